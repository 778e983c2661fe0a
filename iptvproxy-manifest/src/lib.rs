//! HLS manifest handling for the proxy
//!
//! Everything here is pure text processing: upstream manifests go in, the
//! client-facing manifests come out. Network access lives in `iptvproxy-core`.

pub mod delay;
pub mod error;
pub mod playlist;
pub mod rewrite;
pub mod vod;
pub mod xmltv;

pub use delay::{reduce_delay, DelayReduction};
pub use error::ManifestError;
pub use playlist::{single_track_playlist, PlaylistBuilder, Track};
pub use rewrite::{
    append_query_to_uris, first_variant_uri, make_absolute, percent_encode, query_param,
    rewrite_uri_lines, QueryParams,
};
pub use vod::{VodIndexEntry, VodPlaylist, VodSegment};
pub use xmltv::{render_xmltv, XmltvChannel};
