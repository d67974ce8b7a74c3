//! Leave-page protection while a payment is being reconciled

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

pub const LEAVE_WARNING: &str =
    "Your payment is still being confirmed. Leaving now may hide the final result of this order.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum LeaveDecision {
    Allow,
    Confirm { message: String },
}

#[derive(Debug, Default)]
pub struct UnsavedWorkGuard {
    armed: AtomicBool,
}

impl UnsavedWorkGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Whether closing the page right now needs the user's explicit consent.
    pub fn on_leave_attempt(&self) -> LeaveDecision {
        if self.is_armed() {
            LeaveDecision::Confirm {
                message: LEAVE_WARNING.to_string(),
            }
        } else {
            LeaveDecision::Allow
        }
    }
}
