use std::future::pending;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// Single-slot cancellable timer. Scheduling replaces any pending deadline, so at most one
/// firing is ever outstanding. Used for both the reconnect backoff and the filter debounce.
#[derive(Debug, Default)]
pub struct DebounceTimer {
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer `delay` from now, cancelling any pending deadline.
    pub fn schedule(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Completes once when the deadline passes and disarms the timer. Never completes while
    /// disarmed. Cancel-safe: dropping the future leaves the deadline in place.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => pending::<()>().await,
        }
    }
}
