pub mod config;
pub mod delivery;
pub mod error;
pub mod event_log;
pub mod ftp;
pub mod models;
pub mod normalize;
pub mod ssh;

pub use config::Config;
pub use error::{DecoyError, Result};
pub use event_log::{EventLog, EventSink};
pub use models::{Event, EventType};
pub use normalize::Normalizer;
