//! Per-call deadline and cancellation.
//!
//! Every blocking entry point takes a [`CallContext`]. Racing a future
//! through [`CallContext::run`] turns an expired deadline into
//! [`ApiError::Timeout`] and a fired token into [`ApiError::Canceled`].
//! Neither outcome cancels work already accepted by the cloud.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// A context with no deadline and a fresh cancellation token.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a cancellation token shared with the caller.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    pub fn child(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        Self {
            deadline: Some(self.deadline.map_or(candidate, |d| d.min(candidate))),
            cancel: self.cancel.clone(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast when the context is already done.
    pub fn check(&self) -> ApiResult<()> {
        if self.is_canceled() {
            return Err(ApiError::Canceled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ApiError::Timeout("deadline exceeded".to_string()));
        }
        Ok(())
    }

    /// Drive `fut` until it completes, the deadline passes, or the token fires.
    pub async fn run<T, F>(&self, fut: F) -> ApiResult<T>
    where
        F: Future<Output = ApiResult<T>>,
    {
        self.check()?;
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(ApiError::Canceled),
                    _ = tokio::time::sleep_until(deadline) => {
                        Err(ApiError::Timeout("deadline exceeded".to_string()))
                    }
                    out = fut => out,
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(ApiError::Canceled),
                    out = fut => out,
                }
            }
        }
    }

    /// Sleep for `dur`, waking early on cancellation or deadline.
    pub async fn sleep(&self, dur: Duration) -> ApiResult<()> {
        self.run(async {
            tokio::time::sleep(dur).await;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn run_times_out_at_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_secs(5));
        let res: ApiResult<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(ApiError::Timeout(_))));
    }

    #[tokio::test]
    async fn run_returns_canceled() {
        let token = CancellationToken::new();
        let ctx = CallContext::background().with_cancel(token.clone());
        token.cancel();
        let res: ApiResult<u32> = ctx.run(async { Ok(1) }).await;
        assert_eq!(res, Err(ApiError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn child_never_extends_parent_deadline() {
        let parent = CallContext::with_timeout(Duration::from_secs(10));
        let child = parent.child(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let short = parent.child(Duration::from_secs(1));
        assert!(short.deadline().unwrap() < parent.deadline().unwrap());
    }

    #[tokio::test]
    async fn run_passes_through_result() {
        let ctx = CallContext::background();
        assert_eq!(ctx.run(async { Ok::<_, ApiError>(7) }).await, Ok(7));
        assert_eq!(ctx.remaining(), None);
    }
}
