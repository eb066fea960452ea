//! Operation waiter — polls asynchronous cloud operations to a terminal state.
//!
//! Poll cadence starts at `poll_interval` and grows by `factor` per poll up
//! to `poll_max`. Transient poll failures (transport errors, 5xx) count
//! against a consecutive-failure budget; any successful poll resets it.
//!
//! The wait ends at the earlier of the caller's deadline and the per-kind
//! operation timeout. Hitting it returns `Timeout`; the cloud keeps running
//! the operation.

use std::sync::Arc;
use std::time::Duration;

use exoscale_api::{ApiError, ApiResult, CallContext, CloudApi, Operation, OperationState};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct WaiterConfig {
    pub poll_interval: Duration,
    pub poll_max: Duration,
    pub factor: f64,
    /// Consecutive transient poll failures tolerated.
    pub failure_budget: u32,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            poll_max: Duration::from_secs(10),
            factor: 1.5,
            failure_budget: 5,
        }
    }
}

/// Poll interval and failure budget for one wait.
#[derive(Debug)]
struct PollBackoff {
    current: Duration,
    max: Duration,
    factor: f64,
    consecutive_failures: u32,
    budget: u32,
}

impl PollBackoff {
    fn new(config: &WaiterConfig) -> Self {
        Self {
            current: config.poll_interval,
            max: config.poll_max,
            factor: config.factor,
            consecutive_failures: 0,
            budget: config.failure_budget,
        }
    }

    /// Interval before the next poll. Grows geometrically up to the cap.
    fn next_interval(&mut self) -> Duration {
        let interval = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.max);
        interval
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns false once the budget is exceeded.
    fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.consecutive_failures <= self.budget
    }
}

/// Drives operations to completion through `get_operation`.
#[derive(Clone)]
pub struct OperationWaiter {
    api: Arc<dyn CloudApi>,
    config: WaiterConfig,
}

impl OperationWaiter {
    pub fn new(api: Arc<dyn CloudApi>, config: WaiterConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &WaiterConfig {
        &self.config
    }

    /// Wait for `op` to reach a terminal state.
    ///
    /// `success` yields the final operation; `failure` is mapped through the
    /// operation's `reason`; a cloud-side `timeout` and an expired wait both
    /// yield [`ApiError::Timeout`].
    pub async fn wait(
        &self,
        ctx: &CallContext,
        op: Operation,
        timeout: Duration,
    ) -> ApiResult<Operation> {
        if op.is_terminal() {
            return outcome(op);
        }

        let started = Instant::now();
        let ctx = ctx.child(timeout);
        let mut backoff = PollBackoff::new(&self.config);
        let id = op.id;

        loop {
            let interval = backoff.next_interval();
            if let Err(e) = ctx.sleep(interval).await {
                return Err(self.abandon(&id, started, e));
            }

            match ctx.run(self.api.get_operation(&id)).await {
                Ok(current) => {
                    backoff.record_success();
                    if current.is_terminal() {
                        info!(
                            operation_id = %id,
                            state = %current.state,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "operation finished"
                        );
                        return outcome(current);
                    }
                    debug!(operation_id = %id, next_poll_ms = backoff.current.as_millis() as u64, "operation pending");
                }
                Err(e @ (ApiError::Timeout(_) | ApiError::Canceled)) => {
                    return Err(self.abandon(&id, started, e));
                }
                Err(e) if e.is_transient() => {
                    if !backoff.record_failure() {
                        warn!(
                            operation_id = %id,
                            failures = backoff.consecutive_failures,
                            error = %e,
                            "operation poll failure budget exhausted"
                        );
                        return Err(ApiError::Transport(format!(
                            "operation {id}: {} consecutive poll failures, last: {e}",
                            backoff.consecutive_failures
                        )));
                    }
                    warn!(
                        operation_id = %id,
                        failures = backoff.consecutive_failures,
                        budget = backoff.budget,
                        error = %e,
                        "transient operation poll failure"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn abandon(&self, id: &str, started: Instant, err: ApiError) -> ApiError {
        match err {
            ApiError::Timeout(_) => {
                warn!(
                    operation_id = %id,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "gave up waiting; the cloud operation keeps running"
                );
                ApiError::Timeout(format!(
                    "operation {id} still pending after {:?}",
                    started.elapsed()
                ))
            }
            other => {
                debug!(operation_id = %id, error = %other, "operation wait aborted");
                other
            }
        }
    }
}

/// Map a terminal operation to its outcome.
fn outcome(op: Operation) -> ApiResult<Operation> {
    match op.state {
        OperationState::Success => Ok(op),
        OperationState::Failure => {
            let message = op
                .message
                .clone()
                .unwrap_or_else(|| format!("operation {} failed", op.id));
            Err(ApiError::from_reason(
                op.reason.as_deref().unwrap_or("unknown"),
                message,
            ))
        }
        OperationState::Timeout => Err(ApiError::Timeout(format!(
            "operation {} timed out in the cloud",
            op.id
        ))),
        OperationState::Pending => Err(ApiError::Protocol(format!(
            "operation {} is not terminal",
            op.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exoscale_api::fake::{FakeCloud, Method};
    use exoscale_api::{ErrorKind, PoolRef, PoolState};
    use tokio_util::sync::CancellationToken;

    fn setup(polls: u32) -> (Arc<FakeCloud>, OperationWaiter) {
        let cloud = Arc::new(FakeCloud::new("ch-gva-2"));
        cloud.add_pool("p1", "t1", 1, PoolState::Running);
        cloud.set_operation_polls(polls);
        let waiter = OperationWaiter::new(cloud.clone(), WaiterConfig::default());
        (cloud, waiter)
    }

    async fn issue(cloud: &FakeCloud) -> Operation {
        cloud
            .scale_pool(&PoolRef::instance_pool("p1"), 2)
            .await
            .unwrap()
    }

    #[test]
    fn backoff_grows_to_cap() {
        let mut b = PollBackoff::new(&WaiterConfig::default());
        let intervals: Vec<u128> = (0..5).map(|_| b.next_interval().as_millis()).collect();
        assert_eq!(intervals, vec![3000, 4500, 6750, 10000, 10000]);
    }

    #[test]
    fn budget_resets_on_success() {
        let mut b = PollBackoff::new(&WaiterConfig {
            failure_budget: 2,
            ..WaiterConfig::default()
        });
        assert!(b.record_failure());
        assert!(b.record_failure());
        b.record_success();
        assert!(b.record_failure());
        assert!(b.record_failure());
        assert!(!b.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_success_exactly_once() {
        let (cloud, waiter) = setup(3);
        let op = issue(&cloud).await;
        let done = waiter
            .wait(&CallContext::background(), op, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(done.state, OperationState::Success);
        assert_eq!(cloud.count(Method::GetOperation), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_operation_is_not_polled() {
        let (cloud, waiter) = setup(0);
        let op = issue(&cloud).await;
        assert!(op.is_terminal());
        waiter
            .wait(&CallContext::background(), op, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(cloud.count(Method::GetOperation), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_maps_reason() {
        let (cloud, waiter) = setup(1);
        cloud.fail_next_operation("busy", "pool is updating");
        let op = issue(&cloud).await;
        let err = waiter
            .wait(&CallContext::background(), op, Duration::from_secs(600))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Busy("pool is updating".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_within_budget_are_absorbed() {
        let (cloud, waiter) = setup(1);
        let op = issue(&cloud).await;
        for _ in 0..5 {
            cloud.fail_next(Method::GetOperation, ApiError::Transport("reset".into()));
        }
        let done = waiter
            .wait(&CallContext::background(), op, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(done.state, OperationState::Success);
        assert_eq!(cloud.count(Method::GetOperation), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn exceeding_budget_is_transport_error() {
        let (cloud, waiter) = setup(1);
        let op = issue(&cloud).await;
        for _ in 0..6 {
            cloud.fail_next(Method::GetOperation, ApiError::Internal("502".into()));
        }
        let err = waiter
            .wait(&CallContext::background(), op, Duration::from_secs(600))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_poll_error_ends_wait() {
        let (cloud, waiter) = setup(5);
        let op = issue(&cloud).await;
        cloud.fail_next(Method::GetOperation, ApiError::Auth("expired".into()));
        let err = waiter
            .wait(&CallContext::background(), op, Duration::from_secs(600))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(cloud.count(Method::GetOperation), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_returns_timeout() {
        let (cloud, waiter) = setup(1000);
        let op = issue(&cloud).await;
        let err = waiter
            .wait(&CallContext::background(), op, Duration::from_secs(20))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_promptly() {
        let (cloud, waiter) = setup(1000);
        let op = issue(&cloud).await;
        let token = CancellationToken::new();
        let ctx = CallContext::background().with_cancel(token.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            token.cancel();
        });
        let err = waiter
            .wait(&ctx, op, Duration::from_secs(600))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Canceled);
    }
}
