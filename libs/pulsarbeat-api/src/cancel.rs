use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Shared, write-once stop signal.
///
/// Every clone observes the same underlying token. Triggering is idempotent:
/// only the first call to [`trigger`](Self::trigger) fires the signal, any
/// later or concurrent call is a no-op that returns `false`.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    token: CancellationToken,
    fired: AtomicBool,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` for the single call that actually fired it.
    pub fn trigger(&self) -> bool {
        let first = self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.inner.token.cancel();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Completes once the signal has fired. Cancel-safe.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }
}
