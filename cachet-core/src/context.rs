//! Per-request context: namespace, deadline and cancellation.
//!
//! Every backend call made on behalf of a caller runs through
//! [`RequestContext::run`], which abandons the call as soon as the caller
//! cancels or the deadline passes.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{CachetResult, ContextError};
use crate::key::{KeyId, StorageKey};

/// Caller-scoped context for one store operation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    namespace: String,
    started_at: Instant,
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Sender half of a cancellable context.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation to every context cloned from the paired one.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// A context with no namespace, deadline or cancellation.
    pub fn new() -> Self {
        Self {
            namespace: String::new(),
            started_at: Instant::now(),
            deadline: None,
            cancel: None,
        }
    }

    /// A context plus the handle that cancels it.
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self::new().with_cancellation(rx);
        (ctx, CancelHandle { tx })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Observe an externally owned shutdown signal; `true` means cancelled.
    pub fn with_cancellation(mut self, rx: watch::Receiver<bool>) -> Self {
        self.cancel = Some(rx);
        self
    }

    /// Tighten the deadline to at most `timeout` from now.
    ///
    /// A timeout too large to represent as an instant sets no deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Tighten the deadline; a later deadline than the current one is ignored.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Apply `timeout` only if the caller did not set a deadline.
    pub fn with_default_timeout(self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(timeout)) => self.with_timeout(timeout),
            _ => self,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Error if the context is already cancelled or past its deadline.
    pub fn check(&self) -> CachetResult<()> {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled.into());
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(self.deadline_exceeded());
            }
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context is cancelled or expires first.
    pub async fn run<T, F>(&self, fut: F) -> CachetResult<T>
    where
        F: Future<Output = CachetResult<T>>,
    {
        self.check()?;

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = wait_cancelled(self.cancel.clone()) => Err(ContextError::Cancelled.into()),
            _ = expired => Err(self.deadline_exceeded()),
            result = fut => result,
        }
    }

    fn deadline_exceeded(&self) -> crate::CachetError {
        ContextError::DeadlineExceeded {
            elapsed: self.started_at.elapsed(),
        }
        .into()
    }

    /// Key with a string id in this context's namespace.
    pub fn named_key(&self, kind: impl Into<String>, name: impl Into<String>) -> StorageKey {
        StorageKey::new(self.namespace.clone(), kind, KeyId::from_name(name))
    }

    /// Key with an integer id in this context's namespace.
    pub fn numeric_key(&self, kind: impl Into<String>, id: i64) -> StorageKey {
        StorageKey::new(self.namespace.clone(), kind, KeyId::from_int(id))
    }

    /// Key the store will allocate an id for, in this context's namespace.
    pub fn incomplete_key(&self, kind: impl Into<String>) -> StorageKey {
        StorageKey::new(self.namespace.clone(), kind, KeyId::Incomplete)
    }
}

/// Resolves once the receiver observes `true`. A dropped sender never cancels.
async fn wait_cancelled(rx: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CachetError;

    #[tokio::test]
    async fn test_unbounded_timeout_sets_no_deadline() {
        let ctx = RequestContext::new().with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);
        assert!(ctx.check().is_ok());

        let bounded = ctx.with_timeout(Duration::from_secs(5));
        assert!(bounded.deadline().is_some());
    }

    #[tokio::test]
    async fn test_run_passes_through_result() {
        let ctx = RequestContext::new();
        let value = ctx.run(async { Ok::<_, CachetError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (ctx, handle) = RequestContext::cancellable();
        handle.cancel();
        let err = ctx.run(async { Ok::<_, CachetError>(()) }).await.unwrap_err();
        assert_eq!(err, CachetError::Context(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_aborts_stalled_call() {
        let (ctx, handle) = RequestContext::cancellable();
        let stalled = ctx.run(async {
            std::future::pending::<()>().await;
            Ok::<_, CachetError>(())
        });
        let cancel = async {
            tokio::task::yield_now().await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(stalled, cancel);
        assert_eq!(result.unwrap_err(), CachetError::Context(ContextError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_stalled_call() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(50));
        let err = ctx
            .run(async {
                std::future::pending::<()>().await;
                Ok::<_, CachetError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CachetError::Context(ContextError::DeadlineExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_sender_never_cancels() {
        let (ctx, handle) = RequestContext::cancellable();
        drop(handle);
        assert!(!ctx.is_cancelled());
        assert!(ctx.run(async { Ok::<_, CachetError>(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_deadline_only_tightens() {
        let ctx = RequestContext::new().with_timeout(Duration::from_secs(1));
        let first = ctx.deadline().unwrap();
        let ctx = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(first));

        let ctx = ctx.with_default_timeout(Some(Duration::from_millis(1)));
        assert_eq!(ctx.deadline(), Some(first));
    }

    #[test]
    fn test_key_helpers_use_namespace() {
        let ctx = RequestContext::new().with_namespace("tenant-a");
        assert_eq!(ctx.named_key("Profile", "alice").namespace(), "tenant-a");
        assert_eq!(ctx.numeric_key("Counter", 3).int_id(), 3);
        assert!(ctx.incomplete_key("Counter").is_incomplete());
    }
}
