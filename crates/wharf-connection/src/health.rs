//! Health probing for pooled connections
//!
//! The pool calls [`ping_connection`] through `Connection::ping` whenever a
//! connection is released; [`HealthStatus`] classifies the measured latency
//! for callers that want more than a yes/no answer.

mod ping;
mod status;


#[cfg(test)]
pub(crate) use ping::PING_QUERY;
pub use ping::{PingError, PingResult, check_connection, ping_connection};
pub use status::{HealthStatus, HealthThresholds};
