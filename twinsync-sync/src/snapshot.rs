//! Snapshot Reader: latest commit identity and timestamp of one remote branch.
//!
//! Read-only towards both remotes. The only local side effect is the
//! engine-private tracking ref `refs/twinsync/<role>/<branch>` inside the
//! working copy, which later steps (merge, push) resolve commits from.

use twinsync_core::{RemoteRole, RemoteSnapshot, RemoteSpec};

use crate::error::SyncError;
use crate::git::{parse_ls_remote, WorkingCopy};

/// Tracking ref that holds the last fetched tip of `role`/`branch`.
pub fn tracking_ref(role: RemoteRole, branch: &str) -> String {
    format!("refs/twinsync/{role}/{branch}")
}

/// Inspect `remote` and return its current tip.
///
/// Fails with [`SyncError::RemoteUnreachable`] when the remote cannot be
/// listed or fetched, and with [`SyncError::BranchNotFound`] when the
/// configured branch does not exist there.
pub fn read_snapshot(
    wc: &WorkingCopy,
    role: RemoteRole,
    remote: &RemoteSpec,
) -> Result<RemoteSnapshot, SyncError> {
    let url = remote.authenticated_url();
    let head_ref = format!("refs/heads/{}", remote.branch);

    let listed = wc.output(&["ls-remote", "--heads", &url, &head_ref])?;
    if !listed.success {
        return Err(SyncError::RemoteUnreachable {
            remote: role,
            detail: listed.stderr,
        });
    }
    if parse_ls_remote(&listed.stdout).is_none() {
        return Err(SyncError::BranchNotFound {
            remote: role,
            branch: remote.branch.clone(),
        });
    }

    let tracking = tracking_ref(role, &remote.branch);
    let refspec = format!("+{head_ref}:{tracking}");
    let fetched = wc.output(&["fetch", "-q", "--no-tags", &url, &refspec])?;
    if !fetched.success {
        return Err(SyncError::RemoteUnreachable {
            remote: role,
            detail: fetched.stderr,
        });
    }

    let (commit, committed_at) = wc.commit_info(&tracking)?;
    tracing::info!(
        "{} {}@{}: {} ({})",
        role,
        remote.display_url(),
        remote.branch,
        commit.short(),
        committed_at.to_rfc3339()
    );
    Ok(RemoteSnapshot {
        remote: role,
        branch: remote.branch.clone(),
        commit,
        committed_at,
    })
}

/// Current tip hash of `remote`, without fetching.
pub(crate) fn remote_tip(
    wc: &WorkingCopy,
    role: RemoteRole,
    remote: &RemoteSpec,
) -> Result<Option<twinsync_core::CommitHash>, SyncError> {
    let url = remote.authenticated_url();
    let head_ref = format!("refs/heads/{}", remote.branch);
    let listed = wc.output(&["ls-remote", "--heads", &url, &head_ref])?;
    if !listed.success {
        return Err(SyncError::RemoteUnreachable {
            remote: role,
            detail: listed.stderr,
        });
    }
    Ok(parse_ls_remote(&listed.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_ref_is_namespaced_by_role() {
        assert_eq!(tracking_ref(RemoteRole::Hosted, "main"), "refs/twinsync/hosted/main");
        assert_eq!(tracking_ref(RemoteRole::Source, "dev"), "refs/twinsync/source/dev");
    }
}
