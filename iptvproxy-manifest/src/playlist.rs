use std::fmt::Write;

/// One channel entry of a client-facing M3U playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub group: String,
    pub tvg_id: String,
    pub name: String,
    pub logo: String,
    pub channel_id: u32,
    pub url: String,
}

impl Track {
    fn write_to(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "#EXTINF:-1 group-title=\"{}\" tvg-id=\"{}\" tvg-name=\"{}\" tvg-logo=\"{}\" channel-id=\"{}\",{}",
            escape_attribute(&self.group),
            escape_attribute(&self.tvg_id),
            escape_attribute(&self.name),
            self.logo.replace(' ', "%20"),
            self.channel_id,
            self.name
        );
        output.push_str(&self.url);
        output.push('\n');
    }
}

fn escape_attribute(value: &str) -> String {
    value.replace('"', "'")
}

/// Builder for `#EXTM3U` channel playlists pointing at the proxy's EPG.
#[derive(Debug, Clone)]
pub struct PlaylistBuilder {
    epg_url: String,
    tracks: Vec<Track>,
}

impl PlaylistBuilder {
    #[must_use]
    pub fn new(epg_url: impl Into<String>) -> Self {
        Self {
            epg_url: epg_url.into(),
            tracks: Vec::new(),
        }
    }

    pub fn push(&mut self, track: Track) -> &mut Self {
        self.tracks.push(track);
        self
    }

    pub fn extend(&mut self, tracks: impl IntoIterator<Item = Track>) -> &mut Self {
        self.tracks.extend(tracks);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    #[must_use]
    pub fn build(&self) -> String {
        let mut output = String::with_capacity(64 + self.tracks.len() * 256);
        let _ = writeln!(output, "#EXTM3U x-tvg-url=\"{}\"", self.epg_url);
        for track in &self.tracks {
            track.write_to(&mut output);
        }
        output
    }
}

/// Single-entry playlist used for direct `mpegts` / `rtmp` channel requests.
#[must_use]
pub fn single_track_playlist(name: &str, url: &str) -> String {
    format!("#EXTM3U\n#EXTINF:-1 ,{name}\n{url}")
}
