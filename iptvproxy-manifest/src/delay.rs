use m3u8_rs::MediaPlaylist;

use crate::error::ManifestError;

/// Result of trimming a live chunks manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayReduction {
    pub manifest: String,
    /// Segments removed from the head; `media_sequence` was bumped by this much.
    pub dropped: usize,
}

/// Trim the head of a live media playlist so the client joins near the live edge.
///
/// With `last_requested = None` (first request, or the client switched
/// channels) only the last `keep` segments survive. With `Some(name)` every
/// segment up to and including the first one whose URI contains `name` is
/// dropped; when no URI matches the manifest is returned untouched.
pub fn reduce_delay(
    manifest: &str,
    last_requested: Option<&str>,
    keep: usize,
) -> Result<DelayReduction, ManifestError> {
    let mut playlist = m3u8_rs::parse_media_playlist_res(manifest.as_bytes())
        .map_err(|e| ManifestError::Parse(e.to_string()))?;

    let dropped = match last_requested {
        None => playlist.segments.len().saturating_sub(keep),
        Some(name) => playlist
            .segments
            .iter()
            .position(|segment| segment.uri.contains(name))
            .map_or(0, |index| index + 1),
    };

    if dropped == 0 {
        return Ok(DelayReduction {
            manifest: manifest.to_string(),
            dropped,
        });
    }

    playlist.segments.drain(..dropped);
    playlist.media_sequence += dropped as u64;

    Ok(DelayReduction {
        manifest: write_media_playlist(&playlist)?,
        dropped,
    })
}

pub(crate) fn write_media_playlist(playlist: &MediaPlaylist) -> Result<String, ManifestError> {
    let mut buffer = Vec::new();
    playlist
        .write_to(&mut buffer)
        .map_err(|e| ManifestError::Write(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| ManifestError::Write(e.to_string()))
}
