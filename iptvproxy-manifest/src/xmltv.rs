use std::fmt::Write;

/// `<channel>` element of an XMLTV document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmltvChannel {
    pub id: String,
    pub display_name: String,
    /// Empty when the channel has no logo
    pub icon: String,
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Render a `<tv>` document listing the given channels.
///
/// Programme listings are not part of the catalogue, so only `<channel>`
/// elements are emitted.
#[must_use]
pub fn render_xmltv(generator: &str, channels: &[XmltvChannel]) -> String {
    let mut output = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE tv SYSTEM \"xmltv.dtd\">\n");
    let _ = writeln!(output, "<tv generator-info-name=\"{}\">", escape_xml(generator));

    for channel in channels {
        let _ = writeln!(output, "  <channel id=\"{}\">", escape_xml(&channel.id));
        let _ = writeln!(
            output,
            "    <display-name>{}</display-name>",
            escape_xml(&channel.display_name)
        );
        if !channel.icon.is_empty() {
            let _ = writeln!(output, "    <icon src=\"{}\"/>", escape_xml(&channel.icon));
        }
        output.push_str("  </channel>\n");
    }

    output.push_str("</tv>\n");
    output
}
