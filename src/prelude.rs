pub use crate::error::{ClResult, Error};
pub use crate::types::{now_ms, Entry, GrantLevel, Session, SessionPermission, Timestamp};

pub use tracing::{debug, error, info, warn};

// vim: ts=4
