pub use crate::app::App;
pub use peerflow_types::error::{Error, PfResult};
pub use peerflow_types::types::{Timestamp, Usd, UserId, now};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
