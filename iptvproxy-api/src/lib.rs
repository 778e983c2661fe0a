// IPTVProxy API Library
//
// HTTP surface of the proxy: live and VOD playback, the recordings and
// configuration JSON API, the login page and the EPG.

pub mod http;

pub use http::{create_router, create_tls_router, AppState};
