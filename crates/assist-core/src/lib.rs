//! Foundational low-level utilities shared across Assist crates.
//!
//! Provides atomic file-write helpers, time utilities used for interaction
//! records and provisional ids, and the cooperative cancellation handle shared
//! by the client intake loop and the gateway cancellation registry.

pub mod atomic_io;
pub mod cancellation;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use cancellation::CancellationHandle;
pub use time_utils::{current_iso8601_timestamp, current_unix_timestamp_ms};
