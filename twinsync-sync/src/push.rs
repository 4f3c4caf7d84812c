//! Push Executor: force-updates the hosted branch to the source tip.
//!
//! Edits made on the hosted remote since the last sync are discarded. This
//! is the one step of a run that can lose data, and only when the source
//! commit is strictly newer.

use twinsync_core::{CommitHash, RemoteRole, RemoteSnapshot, RemoteSpec};

use crate::error::SyncError;
use crate::git::WorkingCopy;
use crate::snapshot::remote_tip;

/// Phrases git and common hosts print when credentials are missing or wrong.
const AUTH_PHRASES: &[&str] = &[
    "authentication failed",
    "could not read username",
    "could not read password",
    "invalid username or password",
    "permission denied",
    "access denied",
    "not authorized",
    "unauthorized",
    "returned error: 401",
    "returned error: 403",
    "terminal prompts disabled",
];

/// Is this push failure an authentication problem rather than a rejection?
pub fn is_auth_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    AUTH_PHRASES.iter().any(|p| lower.contains(p))
}

/// Force the hosted branch to `source.commit` and verify the result.
///
/// Returns the verified hosted tip, which equals the source tip.
pub fn push_forward(
    wc: &WorkingCopy,
    hosted_remote: &RemoteSpec,
    source: &RemoteSnapshot,
) -> Result<CommitHash, SyncError> {
    let url = hosted_remote.authenticated_url();
    let refspec = format!("{}:refs/heads/{}", source.commit.0, hosted_remote.branch);
    let pushed = wc.output(&["push", "-q", "--force", &url, &refspec])?;
    if !pushed.success {
        let detail = pushed.stderr;
        return Err(if is_auth_failure(&detail) {
            SyncError::AuthFailure {
                remote: RemoteRole::Hosted,
                detail,
            }
        } else {
            SyncError::RemoteRejected {
                remote: RemoteRole::Hosted,
                detail,
            }
        });
    }

    match remote_tip(wc, RemoteRole::Hosted, hosted_remote)? {
        Some(tip) if tip == source.commit => {
            tracing::info!(
                "hosted {}@{} force-updated to {}",
                hosted_remote.display_url(),
                hosted_remote.branch,
                tip.short()
            );
            Ok(tip)
        }
        other => Err(SyncError::RemoteRejected {
            remote: RemoteRole::Hosted,
            detail: format!(
                "push reported success but hosted tip is {} (expected {})",
                other.as_ref().map(|c| c.short()).unwrap_or("missing"),
                source.commit.short()
            ),
        }),
    }
}
