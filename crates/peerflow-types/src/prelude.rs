pub use crate::error::{Error, PfResult};
pub use crate::types::{Timestamp, Usd, UserId, now};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
