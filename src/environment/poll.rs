//! Readiness polling with a caller-supplied deadline.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;

use super::{ConditionStatus, EnvironmentClient, EnvironmentError, ObjectRef};

/// An object whose named condition the poll observes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadinessTarget {
    /// Object to observe.
    pub object: ObjectRef,
    /// Condition name to read (for example `Ready`).
    pub condition: String,
}

impl ReadinessTarget {
    /// Builds a target observing the conventional `Ready` condition.
    #[must_use]
    pub fn ready(object: ObjectRef) -> Self {
        Self {
            object,
            condition: String::from("Ready"),
        }
    }
}

/// Errors surfaced by [`poll_ready`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PollError {
    /// Raised as soon as any target reports a failed condition.
    #[error("{object} reported failure: {message}")]
    ReadinessFailed {
        /// Object that reported the failure.
        object: String,
        /// Failure reason attached by the environment's controllers.
        message: String,
    },
    /// Raised when the deadline elapses while targets are still pending.
    #[error("timed out waiting for readiness of: {pending}")]
    Timeout {
        /// Comma-separated list of targets still not ready.
        pending: String,
    },
    /// Raised when the environment client errors out mid-poll.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
}

/// Polls every target's readiness condition until all are satisfied.
///
/// Unknown conditions (including objects that do not exist yet) keep the
/// poll going; the first failed condition aborts immediately with that
/// object's own message rather than waiting for the rest.
///
/// # Errors
///
/// Returns [`PollError::ReadinessFailed`] on the first failed condition,
/// [`PollError::Timeout`] when `timeout` elapses with targets pending, and
/// [`PollError::Environment`] when a condition read fails outright.
pub async fn poll_ready<E: EnvironmentClient>(
    client: &E,
    targets: &[ReadinessTarget],
    interval: Duration,
    timeout: Duration,
) -> Result<(), PollError> {
    let deadline = Instant::now() + timeout;
    let mut pending = Vec::new();

    while Instant::now() <= deadline {
        pending = observe_round(client, targets).await?;
        if pending.is_empty() {
            return Ok(());
        }
        sleep(interval).await;
    }

    Err(PollError::Timeout {
        pending: pending.join(", "),
    })
}

async fn observe_round<E: EnvironmentClient>(
    client: &E,
    targets: &[ReadinessTarget],
) -> Result<Vec<String>, PollError> {
    let mut pending = Vec::new();
    for target in targets {
        match client.read_condition(&target.object, &target.condition).await {
            Ok(condition) => match condition.status {
                ConditionStatus::True => {}
                ConditionStatus::Unknown => pending.push(target.object.to_string()),
                ConditionStatus::False => {
                    return Err(PollError::ReadinessFailed {
                        object: target.object.to_string(),
                        message: condition.message,
                    });
                }
            },
            // The object may simply not exist yet; that is a pending state.
            Err(EnvironmentError::NotFound { .. }) => {
                pending.push(target.object.to_string());
            }
            Err(err) => return Err(PollError::Environment(err)),
        }
    }
    Ok(pending)
}
