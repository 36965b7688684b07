//! Bounded polling.
//!
//! [`wait_for`] is the general retry-until-predicate-or-timeout utility;
//! [`await_completion`] applies it to a migration attempt on the source.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use ferry_core::{MigrationInfo, MigrationStatus};

use crate::{ExecutorError, VmInstance};

/// Fixed-interval ticks up to a deadline.
#[derive(Debug, Clone)]
pub struct Poller {
    deadline: Instant,
    step: Duration,
}

impl Poller {
    /// Start a poller that gives up `timeout` from now.
    #[must_use]
    pub fn new(timeout: Duration, step: Duration) -> Self {
        Self { deadline: Instant::now() + timeout, step }
    }

    /// Sleep until the next attempt is due.
    ///
    /// Returns `false` without sleeping once the deadline has passed. The
    /// last sleep is shortened so one final attempt lands on the deadline.
    pub async fn tick(&mut self) -> bool {
        let now = Instant::now();
        if now >= self.deadline {
            return false;
        }
        tokio::time::sleep(self.step.min(self.deadline - now)).await;
        true
    }
}

/// Call `check` every `step` until it yields a value or `timeout` passes.
///
/// `check` runs at least once. `Ok(None)` means the bound elapsed; errors
/// from `check` end the wait immediately.
///
/// # Errors
/// Propagates the first error returned by `check`.
pub async fn wait_for<T, E, F, Fut>(
    timeout: Duration,
    step: Duration,
    mut check: F,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let mut poller = Poller::new(timeout, step);
    loop {
        if let Some(value) = check().await? {
            return Ok(Some(value));
        }
        if !poller.tick().await {
            return Ok(None);
        }
    }
}

/// State of one migration attempt as seen from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    /// Not yet terminal.
    Pending,
    /// The source reported `completed`.
    Completed,
    /// The source reported `failed`.
    Failed { error_desc: Option<String> },
    /// The bound elapsed while the source was still in `last_status`.
    TimedOut { last_status: MigrationStatus },
}

impl AttemptState {
    /// Classify a `query-migrate` snapshot.
    #[must_use]
    pub fn from_info(info: &MigrationInfo) -> Self {
        match info.status {
            MigrationStatus::Completed => Self::Completed,
            MigrationStatus::Failed => Self::Failed { error_desc: info.error_desc.clone() },
            _ => Self::Pending,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Poll the source's `query-migrate` until `completed`, `failed`, or the
/// bound elapses.
///
/// The result is never [`AttemptState::Pending`].
///
/// # Errors
/// Propagates control-channel errors; those abort the attempt rather than
/// counting as a timeout.
pub async fn await_completion<I>(
    source: &mut I,
    timeout: Duration,
    step: Duration,
) -> Result<AttemptState, ExecutorError>
where
    I: VmInstance + ?Sized,
{
    let mut poller = Poller::new(timeout, step);
    let mut last_status = MigrationStatus::None;
    loop {
        let info = source.query_migrate().await?;
        if info.status != last_status {
            tracing::debug!(instance_id = %source.id(), status = %info.status, "migration status");
            last_status = info.status;
        }

        let state = AttemptState::from_info(&info);
        if state.is_terminal() {
            return Ok(state);
        }
        if !poller.tick().await {
            tracing::warn!(instance_id = %source.id(), %last_status, ?timeout, "migration timed out");
            return Ok(AttemptState::TimedOut { last_status });
        }
    }
}
