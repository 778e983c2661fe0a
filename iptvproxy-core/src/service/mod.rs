pub mod auth;
pub mod clients;
pub mod credential_encryption;
pub mod live;
pub mod net;
pub mod recorder;

pub use auth::{AuthService, ClientContext, Credentials, GatePolicy};
pub use clients::{ServiceableClient, ServiceableClients};
pub use credential_encryption::CredentialEncryption;
pub use live::{CatalogueRequest, LiveService, PlaylistOverride};
pub use net::{classify, IpClass};
pub use recorder::{NewRecording, Recorder, Removal, StopReason, VodLibrary};
