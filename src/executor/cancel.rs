//! Explicit cancellation passed into every subprocess run.
//!
//! The source keeps the only sender of a never-used channel; cancelling drops
//! it, which disconnects every token at once and wakes any `select!` waiting
//! on [`CancelToken::channel`].

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use parking_lot::Mutex;

/// Owner side of a cancellation signal. Dropping the source also cancels.
#[derive(Debug)]
pub struct CancelSource {
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    /// Source that is not cancelled yet.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    /// Token observing this source.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            receiver: self.receiver.clone(),
        }
    }

    /// Cancel every token handed out so far. Idempotent.
    pub fn cancel(&self) {
        self.sender.lock().take();
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.sender.lock().is_none()
    }
}

/// Cheap, cloneable observer of a [`CancelSource`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    receiver: Receiver<()>,
}

impl CancelToken {
    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Channel that becomes ready (disconnected) on cancellation, for `select!`.
    #[must_use]
    pub const fn channel(&self) -> &Receiver<()> {
        &self.receiver
    }

    /// Sleep up to `timeout`; returns `true` if cancelled meanwhile.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::CancelSource;
    use std::time::{Duration, Instant};

    #[test]
    fn cancel_reaches_existing_and_new_tokens() {
        let source = CancelSource::new();
        let before = source.token();
        assert!(!before.is_cancelled());
        source.cancel();
        source.cancel();
        assert!(before.is_cancelled());
        assert!(source.token().is_cancelled());
        assert!(source.is_cancelled());
    }

    #[test]
    fn wait_timeout_wakes_on_cancel() {
        let source = CancelSource::new();
        let token = source.token();
        let waiter = std::thread::spawn(move || {
            let started = Instant::now();
            (token.wait_timeout(Duration::from_secs(10)), started.elapsed())
        });
        std::thread::sleep(Duration::from_millis(50));
        source.cancel();
        let (cancelled, waited) = waiter.join().expect("join");
        assert!(cancelled);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn dropping_the_source_cancels() {
        let token = CancelSource::new().token();
        assert!(token.is_cancelled());
        let live = CancelSource::new();
        assert!(!live.token().wait_timeout(Duration::from_millis(10)));
    }
}
