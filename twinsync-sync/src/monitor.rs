//! Deployment Monitor.
//!
//! `Pending → Building → (Running | Failed)`, or `Unknown` when the timeout
//! budget runs out or the run is cancelled. Observations never move the
//! state backwards.

use std::time::{Duration, Instant};

use chrono::Utc;

use twinsync_core::{CommitHash, DeploymentState, DeploymentStatus};

use crate::cancel::CancelToken;
use crate::hosted::HostedApi;

/// Poll `api` every `poll_interval` until a terminal state is observed,
/// `timeout` elapses, or `cancel` fires.
///
/// Never fails: poll errors are logged and retried within the budget, and an
/// exhausted budget yields `Unknown`.
pub fn monitor(
    api: &dyn HostedApi,
    expected: &CommitHash,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancelToken,
) -> DeploymentStatus {
    let started = Instant::now();
    let mut status = DeploymentStatus::pending(Utc::now());

    loop {
        if cancel.is_cancelled() {
            return cancelled(status);
        }

        status.polls += 1;
        match api.status() {
            Ok(obs) => {
                let observed = obs.state_for(expected);
                status.observed_at = Utc::now();
                if observed.progress() >= status.state.progress() {
                    if observed != status.state {
                        tracing::info!(
                            "deployment of {}: {} -> {}",
                            expected.short(),
                            status.state,
                            observed
                        );
                    }
                    status.state = observed;
                    status.excerpt = obs.summary();
                } else {
                    tracing::debug!(
                        "ignoring regressed observation {} (holding {})",
                        observed,
                        status.state
                    );
                }
                if status.state.is_terminal() {
                    return status;
                }
            }
            Err(e) => tracing::warn!("deployment status poll {} failed: {e}", status.polls),
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return timed_out(status, timeout);
        }
        if cancel.wait(poll_interval.min(timeout - elapsed)) {
            return cancelled(status);
        }
    }
}

fn timed_out(mut status: DeploymentStatus, timeout: Duration) -> DeploymentStatus {
    tracing::warn!(
        "no terminal deployment state within {}s (last observed: {})",
        timeout.as_secs(),
        status.state
    );
    status.excerpt = format!(
        "no terminal state within {}s (last observed: {})",
        timeout.as_secs(),
        describe(&status)
    );
    status.state = DeploymentState::Unknown;
    status.observed_at = Utc::now();
    status
}

fn cancelled(mut status: DeploymentStatus) -> DeploymentStatus {
    tracing::warn!("deployment monitoring cancelled (last observed: {})", status.state);
    status.excerpt = format!("monitoring cancelled (last observed: {})", describe(&status));
    status.state = DeploymentState::Unknown;
    status.observed_at = Utc::now();
    status
}

fn describe(status: &DeploymentStatus) -> String {
    if status.excerpt.is_empty() {
        status.state.to_string()
    } else {
        format!("{}, {}", status.state, status.excerpt)
    }
}
