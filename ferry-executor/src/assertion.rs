//! Post-migration contract checks.

use std::fmt::Display;
use std::time::Duration;

use ferry_core::{MigrationStatus, Role, RunState};

use crate::poll::{await_completion, AttemptState};
use crate::{ExecutorError, VmInstance};

/// Check the four terminal fields, in order: source migration status,
/// destination migration status, destination run state, source run state.
///
/// Nothing is retried; the first mismatch is returned.
///
/// # Errors
/// Returns [`ExecutorError::AssertionMismatch`] on the first field that
/// does not match, or a control-channel error if a query fails.
pub async fn assert_migration<S, D>(source: &mut S, destination: &mut D) -> Result<(), ExecutorError>
where
    S: VmInstance + ?Sized,
    D: VmInstance + ?Sized,
{
    let status = source.query_migrate().await?.status;
    expect(source.role(), "migration status", MigrationStatus::Completed, status)?;

    let status = destination.query_migrate().await?.status;
    expect(destination.role(), "migration status", MigrationStatus::Completed, status)?;

    let state = destination.query_status().await?.status;
    expect(destination.role(), "run state", RunState::Running, state)?;

    let state = source.query_status().await?.status;
    expect(source.role(), "run state", RunState::Postmigrate, state)?;

    Ok(())
}

fn expect<T>(role: Role, field: &'static str, expected: T, actual: T) -> Result<(), ExecutorError>
where
    T: PartialEq + Display,
{
    if expected == actual {
        return Ok(());
    }
    Err(ExecutorError::AssertionMismatch {
        role,
        field,
        expected: expected.to_string(),
        actual: actual.to_string(),
    })
}

/// Wait for the source to finish migrating, then assert the contract.
///
/// # Errors
/// - [`ExecutorError::TimedOut`] if the bound elapsed first
/// - [`ExecutorError::MigrationFailed`] if the source reported `failed`
/// - [`ExecutorError::AssertionMismatch`] if a terminal field is wrong
pub async fn verify_migration<S, D>(
    source: &mut S,
    destination: &mut D,
    timeout: Duration,
    step: Duration,
) -> Result<(), ExecutorError>
where
    S: VmInstance + ?Sized,
    D: VmInstance + ?Sized,
{
    match await_completion(source, timeout, step).await? {
        AttemptState::Completed => assert_migration(source, destination).await,
        AttemptState::Failed { error_desc } => Err(ExecutorError::MigrationFailed {
            reason: error_desc.unwrap_or_else(|| "source reported 'failed'".to_owned()),
        }),
        AttemptState::TimedOut { last_status } => {
            Err(ExecutorError::TimedOut { waited: timeout, last_status })
        }
        AttemptState::Pending => {
            Err(ExecutorError::Protocol("poller returned a non-terminal state".to_owned()))
        }
    }
}
