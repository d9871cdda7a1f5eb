//! Translates process signals into daemon control messages.
//!
//! SIGHUP requests a reload of the check directory; SIGTERM and SIGINT
//! request a graceful shutdown.

use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};

use super::Control;
use crate::core::errors::{MpError, Result};

/// Background thread forwarding signals; stops forwarding when dropped.
pub struct SignalForwarder {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalForwarder {
    /// Forward SIGHUP, SIGINT and SIGTERM to `control` until dropped.
    pub fn install(control: Sender<Control>) -> Result<Self> {
        let mut signals = Signals::new([SIGHUP, SIGINT, SIGTERM]).map_err(|err| MpError::Runtime {
            details: format!("failed to register signal handlers: {err}"),
        })?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    let Some(message) = control_for(signal) else {
                        continue;
                    };
                    tracing::info!(signal, ?message, "signal received");
                    if control.send(message).is_err() {
                        break;
                    }
                }
            })
            .map_err(|err| MpError::Runtime {
                details: format!("failed to spawn signal thread: {err}"),
            })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

const fn control_for(signal: i32) -> Option<Control> {
    match signal {
        SIGHUP => Some(Control::Reload),
        SIGINT | SIGTERM => Some(Control::Shutdown),
        _ => None,
    }
}
