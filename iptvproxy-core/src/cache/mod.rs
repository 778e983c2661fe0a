pub mod segment_cache;

pub use segment_cache::{CacheEntry, CacheResponse, SegmentCache};
