//! Shared utilities.

pub mod clock;
pub mod telemetry;

pub use clock::{deadline_after, now_ms};
pub use telemetry::init_tracing;
