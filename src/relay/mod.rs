//! Relay layer
//!
//! Provides:
//! - Per-connection orchestration: address header, upstream dial, teardown
//! - Directional pipes with per-chunk deadlines and lockdown checks

mod connection;
mod pipe;

pub use connection::{handle_connection, RelayContext, RelayStats};
pub use pipe::{pipe, PipeEnd, PipeOutcome};
