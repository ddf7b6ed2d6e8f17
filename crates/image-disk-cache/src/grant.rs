//! Finite-time execution grants for background maintenance

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Why a grant ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantEnd {
    /// The work finished inside the budget
    Completed,
    /// The budget ran out first
    Expired,
}

type EndHandler = Box<dyn FnOnce(GrantEnd) + Send>;

/// A time budget handed out by the host (for example a background-task
/// allowance). The end handler runs exactly once, for whichever of
/// completion or expiry happens first.
pub struct ExecutionGrant {
    budget: Duration,
    ended: AtomicBool,
    on_end: Mutex<Option<EndHandler>>,
}

impl ExecutionGrant {
    pub fn new(budget: Duration, on_end: impl FnOnce(GrantEnd) + Send + 'static) -> Self {
        Self {
            budget,
            ended: AtomicBool::new(false),
            on_end: Mutex::new(Some(Box::new(on_end))),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// End the grant. Returns `false` if it had already ended.
    pub fn end(&self, reason: GrantEnd) -> bool {
        if self.ended.swap(true, Ordering::SeqCst) {
            return false;
        }
        let handler = self
            .on_end
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handler) = handler {
            handler(reason);
        }
        true
    }
}

impl fmt::Debug for ExecutionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionGrant")
            .field("budget", &self.budget)
            .field("ended", &self.is_ended())
            .finish()
    }
}
