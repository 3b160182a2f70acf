//! Daemon subsystem: notification loop and signal handling.

pub mod loop_main;
#[cfg(feature = "daemon")]
pub mod signals;
