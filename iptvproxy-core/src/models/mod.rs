pub mod channel;
pub mod http_session;
pub mod recording;
pub mod segment;
pub mod setting;

pub use channel::Channel;
pub use http_session::HttpSession;
pub use recording::{Recording, RecordingStatus};
pub use segment::{NewSegment, Segment};
pub use setting::Setting;
