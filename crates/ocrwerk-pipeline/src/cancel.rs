// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job-wide cancellation flag shared by the orchestrator, the scheduler and
// every page worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ocrwerk_core::{PageFailure, PageFailureKind};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable handle; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<Inner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Fail page `page` if the job has been cancelled. Workers call this at
    /// every state transition.
    pub fn check(&self, page: u32) -> Result<(), PageFailure> {
        if self.is_cancelled() {
            Err(PageFailure::new(page, PageFailureKind::Cancelled, "job cancelled"))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn waiters_wake_on_cancel() {
        let flag = CancelFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        flag.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn already_cancelled_resolves_immediately() {
        let flag = CancelFlag::new();
        flag.cancel();
        flag.cancel();
        tokio::time::timeout(Duration::from_millis(100), flag.cancelled()).await.unwrap();
        let failure = flag.check(4).unwrap_err();
        assert_eq!(failure.kind, PageFailureKind::Cancelled);
        assert_eq!(failure.page, 4);
    }
}
