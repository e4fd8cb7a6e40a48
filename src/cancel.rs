use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A one-shot cancellation notification handed to a pool when it starts.
///
/// Clones share the same flag. Translating OS signals into `cancel()` is the
/// caller's job, the pool only ever polls `is_cancelled()`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }
    /// Fire the notification. Firing twice has no further effect.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }
    /// Whether `cancel` was called on this token or any of its clones
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}
