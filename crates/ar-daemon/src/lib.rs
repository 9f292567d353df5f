//! Daemon wiring: the dispatcher and cron loops around the engine, plus the
//! HTTP server. `main.rs` stays thin; everything testable lives here.

pub mod daemon;
pub mod logging;

pub use daemon::{Daemon, ShutdownHandle};
