//! Daemon subsystem: lifecycle wiring, check threads, pid file and signal
//! handling.

pub mod launcher;
pub mod loop_main;
pub mod pidfile;
#[cfg(feature = "daemon")]
pub mod signals;

pub use loop_main::{Daemon, DaemonReport};

/// Requests delivered to a running daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Re-read the check directory and apply the differences.
    Reload,
    /// Stop scheduling, finish or kill running checks, drain results.
    Shutdown,
}
