//! massive-passive: schedules passive Nagios/Icinga checks with an initial
//! random jitter, runs each as an isolated subprocess and submits the
//! results to the monitoring backend, one by one or in time-bounded batches.
//!
//! Data flows store → scheduler → executor → collector → sink:
//!
//! - [`checks`] loads check definitions from a directory of TOML files;
//! - [`scheduler`] owns the time-ordered run queue and dispatches due runs;
//! - [`executor`] runs one check with a hard timeout;
//! - [`results`] batches finished results and retries failed deliveries;
//! - [`sink`] hands batches to the monitoring backend;
//! - [`daemon`] wires everything together and owns the lifecycle.

pub mod checks;
#[cfg(feature = "cli")]
pub mod cli_app;
pub mod core;
pub mod daemon;
pub mod executor;
#[cfg(feature = "cli")]
pub mod logger;
pub mod results;
pub mod scheduler;
pub mod sink;
