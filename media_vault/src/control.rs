//! Cooperative cancellation and progress reporting for chunked I/O

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{VaultError, VaultResult};

/// Which step of an operation a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Encrypt,
    Decrypt,
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub phase: Phase,
    /// Cumulative plaintext bytes processed in this phase
    pub bytes: u64,
    /// Known plaintext size, if any
    pub total: Option<u64>,
}

type ProgressFn = dyn Fn(Progress) + Send + Sync;

/// Handed to every chunked operation. The token is checked between chunks;
/// the callback fires after each chunk.
#[derive(Clone, Default)]
pub struct StreamControl {
    cancel: CancellationToken,
    progress: Option<Arc<ProgressFn>>,
}

impl StreamControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err(CancellationRequested)` once the token has fired
    pub fn checkpoint(&self) -> VaultResult<()> {
        if self.cancel.is_cancelled() {
            return Err(VaultError::CancellationRequested);
        }
        Ok(())
    }

    pub(crate) fn report(&self, phase: Phase, bytes: u64, total: Option<u64>) {
        if let Some(callback) = &self.progress {
            callback(Progress {
                phase,
                bytes,
                total,
            });
        }
    }
}

impl fmt::Debug for StreamControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamControl")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_checkpoint_after_cancel() {
        let control = StreamControl::new();
        assert!(control.checkpoint().is_ok());

        let clone = control.clone();
        clone.cancel();
        assert!(matches!(control.checkpoint(), Err(VaultError::CancellationRequested)));
    }

    #[test]
    fn test_progress_callback() {
        let seen = Arc::new(AtomicU64::new(0));
        let sink = seen.clone();
        let control = StreamControl::new().on_progress(move |p| {
            sink.store(p.bytes, Ordering::SeqCst);
        });

        control.report(Phase::Decrypt, 42, Some(100));
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }
}
