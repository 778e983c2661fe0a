use iptvproxy_manifest::VodSegment;
use uuid::Uuid;

/// Captured segment of a recording; `id` order is capture order.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: i64,
    pub name: String,
    pub recording_id: Uuid,
    pub manifest_segment: VodSegment,
    pub directory_path: String,
}

/// Segment row before insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewSegment {
    pub name: String,
    pub recording_id: Uuid,
    pub manifest_segment: VodSegment,
    pub directory_path: String,
}
