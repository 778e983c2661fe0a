//! Line-level manifest rewriting
//!
//! Upstream manifests embed provider secrets in their media URIs. The helpers
//! here lift those into query parameters on proxy-local URIs so the live
//! handlers can rebuild the upstream request later.

use m3u8_rs::Playlist;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::ManifestError;

/// Everything but the RFC 3986 unreserved set
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a query parameter value.
#[must_use]
pub fn percent_encode(input: &str) -> String {
    utf8_percent_encode(input, QUERY_VALUE).to_string()
}

/// Ordered query string builder. Parameters are emitted in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.pairs.push((name.to_string(), value.into()));
        self
    }

    /// Adds the parameter with an empty value when `value` is `None`.
    #[must_use]
    pub fn with_opt(self, name: &str, value: Option<&str>) -> Self {
        self.with(name, value.unwrap_or_default())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[must_use]
    pub fn encode(&self) -> String {
        self.pairs
            .iter()
            .map(|(name, value)| format!("{name}={}", percent_encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Inject `params` right after every occurrence of `marker`.
///
/// `marker` must end with `?`, e.g. `chunks.m3u8?` or `.ts?`, so the upstream
/// parameters that follow it are preserved after the injected ones.
#[must_use]
pub fn append_query_to_uris(manifest: &str, marker: &str, params: &QueryParams) -> String {
    if params.is_empty() {
        return manifest.to_string();
    }
    let replacement = format!("{marker}{}&", params.encode());
    manifest.replace(marker, &replacement)
}

/// Rewrite every URI line of a manifest, leaving tags and blank lines intact.
pub fn rewrite_uri_lines<F>(manifest: &str, mut rewrite: F) -> String
where
    F: FnMut(&str) -> String,
{
    let mut output = String::with_capacity(manifest.len());

    for line in manifest.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            output.push_str(line);
        } else {
            output.push_str(&rewrite(trimmed));
        }
        output.push('\n');
    }

    output
}

/// URI of the first variant stream of a master playlist.
///
/// Returns `Ok(None)` when the body already is a media playlist.
pub fn first_variant_uri(body: &str) -> Result<Option<String>, ManifestError> {
    match m3u8_rs::parse_playlist_res(body.as_bytes()) {
        Ok(Playlist::MasterPlaylist(master)) => Ok(master.variants.first().map(|v| v.uri.clone())),
        Ok(Playlist::MediaPlaylist(_)) => Ok(None),
        Err(e) => Err(ManifestError::Parse(e.to_string())),
    }
}

/// Value of the query parameter `name` in a (possibly relative) URI.
#[must_use]
pub fn query_param(uri: &str, name: &str) -> Option<String> {
    let (_, query) = uri.split_once('?')?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Resolve a possibly-relative URI against the URL it was fetched from.
#[must_use]
pub fn make_absolute(raw: &str, base: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }
    url::Url::parse(base)
        .and_then(|base| base.join(raw))
        .map_or_else(|_| raw.to_string(), |joined| joined.to_string())
}
