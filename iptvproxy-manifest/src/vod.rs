use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::error::ManifestError;

/// One captured segment of a recording, as stored in the segment index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VodSegment {
    pub uri: String,
    pub duration: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Finished recording rendered as an HLS VOD playlist.
#[derive(Debug, Clone, Default)]
pub struct VodPlaylist {
    segments: Vec<VodSegment>,
}

impl VodPlaylist {
    #[must_use]
    pub const fn new(segments: Vec<VodSegment>) -> Self {
        Self { segments }
    }

    #[must_use]
    pub fn segments(&self) -> &[VodSegment] {
        &self.segments
    }

    /// `ceil` of the longest segment duration.
    #[must_use]
    pub fn target_duration(&self) -> u64 {
        let longest = self
            .segments
            .iter()
            .map(|segment| segment.duration)
            .fold(0.0_f32, f32::max);
        longest.ceil() as u64
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut output = String::with_capacity(128 + self.segments.len() * 64);
        output.push_str("#EXTM3U\n#EXT-X-VERSION:3\n");
        let _ = writeln!(output, "#EXT-X-TARGETDURATION:{}", self.target_duration());
        output.push_str("#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-PLAYLIST-TYPE:VOD\n");

        for segment in &self.segments {
            let _ = writeln!(
                output,
                "#EXTINF:{},{}",
                segment.duration,
                segment.title.as_deref().unwrap_or_default()
            );
            output.push_str(&segment.uri);
            output.push('\n');
        }

        output.push_str("#EXT-X-ENDLIST\n");
        output
    }

    /// Parse a VOD playlist back into its segments.
    pub fn parse(body: &str) -> Result<Self, ManifestError> {
        let playlist = m3u8_rs::parse_media_playlist_res(body.as_bytes())
            .map_err(|e| ManifestError::Parse(e.to_string()))?;

        let segments = playlist
            .segments
            .into_iter()
            .map(|segment| VodSegment {
                uri: segment.uri,
                duration: segment.duration,
                title: segment.title.filter(|title| !title.is_empty()),
            })
            .collect();

        Ok(Self { segments })
    }
}

/// Entry of the VOD index listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VodIndexEntry {
    pub label: String,
    pub url: String,
}

impl VodIndexEntry {
    /// Render the index of available recordings.
    #[must_use]
    pub fn render_index(entries: &[Self]) -> String {
        let mut output = String::from("#EXTM3U\n");
        for entry in entries {
            let _ = writeln!(output, "#EXTINF:-1,{}", entry.label);
            output.push_str(&entry.url);
            output.push('\n');
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(name: &str, duration: f32) -> VodSegment {
        VodSegment {
            uri: format!("{name}?recording_id=abc"),
            duration,
            title: None,
        }
    }

    #[test]
    fn test_render_vod_playlist() {
        let playlist = VodPlaylist::new(vec![segment("a.ts", 9.5), segment("b.ts", 10.2)]);
        let body = playlist.render();

        assert!(body.starts_with("#EXTM3U\n#EXT-X-VERSION:3\n"));
        assert!(body.contains("#EXT-X-TARGETDURATION:11\n"));
        assert!(body.contains("#EXT-X-MEDIA-SEQUENCE:0\n"));
        assert!(body.contains("#EXT-X-PLAYLIST-TYPE:VOD\n"));
        assert!(body.ends_with("#EXT-X-ENDLIST\n"));
        assert!(body.find("a.ts").unwrap() < body.find("b.ts").unwrap());
    }

    #[test]
    fn test_empty_playlist_target_duration() {
        assert_eq!(VodPlaylist::default().target_duration(), 0);
    }

    #[test]
    fn test_parse_preserves_uri_order() {
        let segments = vec![segment("3.ts", 6.0), segment("1.ts", 6.0), segment("2.ts", 4.0)];
        let body = VodPlaylist::new(segments.clone()).render();

        let parsed = VodPlaylist::parse(&body).unwrap();
        let uris: Vec<_> = parsed.segments().iter().map(|s| s.uri.as_str()).collect();

        assert_eq!(uris, vec!["3.ts?recording_id=abc", "1.ts?recording_id=abc", "2.ts?recording_id=abc"]);
        assert_eq!(parsed.target_duration(), 6);
    }

    #[test]
    fn test_segment_serialization_skips_missing_title() {
        let json = serde_json::to_string(&segment("a.ts", 2.0)).unwrap();
        assert!(!json.contains("title"));
        let back: VodSegment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, segment("a.ts", 2.0));
    }

    #[test]
    fn test_render_index() {
        let index = VodIndexEntry::render_index(&[VodIndexEntry {
            label: "News - [2024-01-01 10:00:00 - 2024-01-01 11:00:00]".to_string(),
            url: "http://localhost:8080/vod/playlist.m3u8?recording_id=abc".to_string(),
        }]);
        assert_eq!(
            index,
            "#EXTM3U\n#EXTINF:-1,News - [2024-01-01 10:00:00 - 2024-01-01 11:00:00]\nhttp://localhost:8080/vod/playlist.m3u8?recording_id=abc\n"
        );
        assert_eq!(VodIndexEntry::render_index(&[]), "#EXTM3U\n");
    }
}
