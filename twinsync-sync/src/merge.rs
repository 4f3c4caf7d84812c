//! Merge/Conflict Resolver: executes a pull-back.
//!
//! The hosted tip is merged into the source tip inside the private working
//! copy. Nothing is auto-resolved: a conflicting merge is aborted and both
//! remotes stay untouched. A clean merge is pushed (non-forced) to the source
//! remote before the step counts as done.

use twinsync_core::{CommitHash, MergeSettings, RemoteSnapshot, RemoteSpec};

use crate::error::SyncError;
use crate::git::WorkingCopy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Source remote now points at `source_tip`, which contains the hosted tip.
    Merged { source_tip: CommitHash },
    /// Merge aborted; working copy restored to the pre-merge commit.
    ConflictAborted { paths: Vec<String> },
}

/// Merge `hosted` into `source` and publish the result to the source remote.
///
/// Both snapshot commits must already be present in `wc` (the Snapshot
/// Reader fetched them).
pub fn pull_back(
    wc: &WorkingCopy,
    source_remote: &RemoteSpec,
    source: &RemoteSnapshot,
    hosted: &RemoteSnapshot,
    settings: &MergeSettings,
) -> Result<MergeOutcome, SyncError> {
    wc.checkout_clean(&source.commit.0)?;
    let before = wc.head()?;

    let message = format!(
        "Merge hosted edits from {} ({})",
        hosted.branch,
        hosted.commit.short()
    );
    let mut args = vec!["merge", "--no-edit", "--no-ff", "-m", message.as_str()];
    if settings.allow_unrelated_histories {
        args.push("--allow-unrelated-histories");
    }
    args.push(hosted.commit.0.as_str());

    let merged = wc.output(&args)?;
    if !merged.success {
        let paths = conflicting_paths(wc)?;
        if paths.is_empty() {
            // git refused before touching the tree (unrelated histories, …).
            let _ = wc.output(&["merge", "--abort"]);
            return Err(SyncError::MergeRefused {
                detail: merged.stderr,
            });
        }

        wc.run(&["merge", "--abort"])?;
        let after = wc.head()?;
        if after != before {
            return Err(SyncError::MergeRefused {
                detail: format!(
                    "merge --abort left HEAD at {} instead of {}",
                    after.short(),
                    before.short()
                ),
            });
        }
        tracing::warn!(
            "pull-back conflict in {} path(s); merge aborted, manual resolution required",
            paths.len()
        );
        return Ok(MergeOutcome::ConflictAborted { paths });
    }

    let source_tip = wc.head()?;
    let url = source_remote.authenticated_url();
    let refspec = format!("HEAD:refs/heads/{}", source_remote.branch);
    let pushed = wc.output(&["push", "-q", &url, &refspec])?;
    if !pushed.success {
        return Err(SyncError::PropagationFailure {
            detail: pushed.stderr,
        });
    }
    tracing::info!(
        "merged hosted {} into source; source now at {}",
        hosted.commit.short(),
        source_tip.short()
    );
    Ok(MergeOutcome::Merged { source_tip })
}

fn conflicting_paths(wc: &WorkingCopy) -> Result<Vec<String>, SyncError> {
    let out = wc.run(&["diff", "--name-only", "--diff-filter=U"])?;
    let mut paths: Vec<String> = out
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    paths.sort();
    paths.dedup();
    Ok(paths)
}
