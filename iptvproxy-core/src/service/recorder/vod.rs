//! VOD playback of persisted recordings

use bytes::Bytes;
use iptvproxy_manifest::{append_query_to_uris, QueryParams, VodIndexEntry, VodPlaylist};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

use crate::models::RecordingStatus;
use crate::provider::ClientIdentity;
use crate::repository::{RecordingRepository, SegmentRepository};
use crate::{Error, Result};

#[derive(Clone)]
pub struct VodLibrary {
    recordings: RecordingRepository,
    segments: SegmentRepository,
}

impl VodLibrary {
    #[must_use]
    pub const fn new(recordings: RecordingRepository, segments: SegmentRepository) -> Self {
        Self { recordings, segments }
    }

    fn client_query(client: &ClientIdentity) -> QueryParams {
        QueryParams::new()
            .with("client_uuid", client.client_uuid.as_str())
            .with_opt("http_token", client.http_token.as_deref())
    }

    /// Index of PERSISTED recordings that captured at least one segment
    pub async fn index(&self, base_url: &str, client: &ClientIdentity) -> Result<String> {
        let base_url = base_url.trim_end_matches('/');
        let query = Self::client_query(client).encode();
        let mut entries = Vec::new();

        for recording in self.recordings.list(Some(RecordingStatus::Persisted)).await? {
            if self.segments.count_for_recording(recording.id).await? == 0 {
                debug!("Hiding recording {} without segments", recording.id);
                continue;
            }
            entries.push(VodIndexEntry {
                label: recording.label(),
                url: format!("{base_url}/vod/playlist.m3u8?recording_id={}&{query}", recording.id),
            });
        }

        Ok(VodIndexEntry::render_index(&entries))
    }

    /// VOD playlist of one recording, rebuilt from its segment index
    pub async fn playlist(&self, recording_id: Uuid, client: &ClientIdentity) -> Result<String> {
        let recording = self
            .recordings
            .get(recording_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Recording {recording_id} not found")))?;
        if recording.status != RecordingStatus::Persisted {
            return Err(Error::NotFound(format!("Recording {recording_id} is not persisted")));
        }

        let segments = self
            .segments
            .list_for_recording(recording_id)
            .await?
            .into_iter()
            .map(|segment| segment.manifest_segment)
            .collect();
        let playlist = VodPlaylist::new(segments).render();

        Ok(append_query_to_uris(&playlist, ".ts?", &Self::client_query(client)))
    }

    /// Bytes of a captured segment
    pub async fn segment(&self, recording_id: Uuid, name: &str) -> Result<Bytes> {
        let segment = self
            .segments
            .find_by_name(recording_id, name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Segment {name} not found")))?;

        let path = Path::new(&segment.directory_path).join(&segment.name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Segment file {} is missing", path.display())))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewSegment, Recording};
    use crate::repository::test_support::memory_database;
    use chrono::{Duration, TimeZone, Utc};
    use iptvproxy_manifest::VodSegment;

    struct Fixture {
        library: VodLibrary,
        recordings: RecordingRepository,
        segments: SegmentRepository,
    }

    async fn fixture() -> Fixture {
        let db = memory_database().await;
        let recordings = RecordingRepository::new(db.clone());
        let segments = SegmentRepository::new(db);
        Fixture {
            library: VodLibrary::new(recordings.clone(), segments.clone()),
            recordings,
            segments,
        }
    }

    async fn persisted(fixture: &Fixture, title: &str, hour: u32) -> Recording {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap();
        let mut recording = Recording::new("smoothstreams", 1, "ESPN", title, start, start + Duration::hours(1));
        recording.status = RecordingStatus::Persisted;
        fixture.recordings.insert(&recording).await.unwrap();
        recording
    }

    async fn add_segment(fixture: &Fixture, recording: &Recording, directory: &Path, name: &str, duration: f32) {
        tokio::fs::write(directory.join(name), name.as_bytes()).await.unwrap();
        fixture
            .segments
            .insert(&NewSegment {
                name: name.to_string(),
                recording_id: recording.id,
                manifest_segment: VodSegment {
                    uri: format!("{name}?recording_id={}", recording.id),
                    duration,
                    title: None,
                },
                directory_path: directory.to_string_lossy().into_owned(),
            })
            .await
            .unwrap();
    }

    fn client() -> ClientIdentity {
        ClientIdentity {
            client_uuid: "C".to_string(),
            http_token: Some("p w".to_string()),
        }
    }

    #[tokio::test]
    async fn test_index_hides_empty_recordings() {
        let fixture = fixture().await;
        let dir = tempfile::tempdir().unwrap();
        let kept = persisted(&fixture, "News", 10).await;
        persisted(&fixture, "Empty", 12).await;
        add_segment(&fixture, &kept, dir.path(), "0001.ts", 4.0).await;

        let index = fixture.library.index("http://localhost:8080/", &client()).await.unwrap();

        assert_eq!(
            index,
            format!(
                "#EXTM3U\n#EXTINF:-1,News - [2024-01-01 10:00:00 - 2024-01-01 11:00:00]\n\
                 http://localhost:8080/vod/playlist.m3u8?recording_id={}&client_uuid=C&http_token=p%20w\n",
                kept.id
            )
        );
    }

    #[tokio::test]
    async fn test_playlist_replays_capture_order() {
        let fixture = fixture().await;
        let dir = tempfile::tempdir().unwrap();
        let recording = persisted(&fixture, "News", 10).await;
        for (name, duration) in [("0003.ts", 4.0), ("0001.ts", 9.2), ("0002.ts", 4.0)] {
            add_segment(&fixture, &recording, dir.path(), name, duration).await;
        }

        let body = fixture.library.playlist(recording.id, &client()).await.unwrap();
        let parsed = VodPlaylist::parse(&body).unwrap();
        let names: Vec<_> = parsed
            .segments()
            .iter()
            .map(|segment| segment.uri.split('?').next().unwrap().to_string())
            .collect();

        assert_eq!(names, vec!["0003.ts", "0001.ts", "0002.ts"]);
        assert!(body.contains("#EXT-X-TARGETDURATION:10\n"));
        assert!(body.contains(&format!(
            "0003.ts?client_uuid=C&http_token=p%20w&recording_id={}",
            recording.id
        )));
        assert!(body.ends_with("#EXT-X-ENDLIST\n"));
    }

    #[tokio::test]
    async fn test_segment_reads_file() {
        let fixture = fixture().await;
        let dir = tempfile::tempdir().unwrap();
        let recording = persisted(&fixture, "News", 10).await;
        add_segment(&fixture, &recording, dir.path(), "0001.ts", 4.0).await;

        let bytes = fixture.library.segment(recording.id, "0001.ts").await.unwrap();
        assert_eq!(&bytes[..], b"0001.ts");

        assert!(matches!(
            fixture.library.segment(recording.id, "0009.ts").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            fixture.library.playlist(Uuid::new_v4(), &client()).await,
            Err(Error::NotFound(_))
        ));
    }
}
