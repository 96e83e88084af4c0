//! Attempt bounds, backoff and the per-attempt timeout race.

use std::{future::Future, time::Duration};

use tokio::time::Instant;

use crate::{
    AutoflowError, Result,
    model::ExecutionConfig,
    workflow::node::Node,
};

/// Wall-clock budget of one loop invocation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn error(&self) -> AutoflowError {
        AutoflowError::RunTimeout(self.budget.as_millis() as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub timeout: Duration,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub const BASE_BACKOFF: Duration = Duration::from_millis(250);

    pub fn for_node(
        node: &Node,
        execution: &ExecutionConfig,
    ) -> Self {
        Self {
            retries: node.retries(execution),
            timeout: node.timeout(execution),
            base_backoff: Self::BASE_BACKOFF,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Sleep before the attempt following the `attempt`-th failure.
    pub fn backoff(
        &self,
        attempt: u32,
    ) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << shift)
    }

    /// Race one attempt against the node timeout and the run deadline,
    /// whichever comes first.
    pub async fn attempt<T, F>(
        &self,
        deadline: &Deadline,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let now = Instant::now();
        if now >= deadline.at {
            return Err(deadline.error());
        }
        let node_limit = now + self.timeout;
        if node_limit < deadline.at {
            match tokio::time::timeout_at(node_limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(AutoflowError::Timeout(self.timeout.as_millis() as u64)),
            }
        } else {
            match tokio::time::timeout_at(deadline.at, fut).await {
                Ok(result) => result,
                Err(_) => Err(deadline.error()),
            }
        }
    }
}

/// Backoff sleep that gives up with the run timeout error when the deadline
/// falls inside it.
pub async fn sleep_backoff(
    delay: Duration,
    deadline: &Deadline,
) -> Result<()> {
    let wake = Instant::now() + delay;
    if wake >= deadline.at {
        tokio::time::sleep_until(deadline.at).await;
        return Err(deadline.error());
    }
    tokio::time::sleep_until(wake).await;
    Ok(())
}
