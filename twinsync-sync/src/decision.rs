//! Sync Decision Engine.

use std::cmp::Ordering;

use twinsync_core::{RemoteSnapshot, SyncDecision};

/// Pick a direction by comparing committer timestamps. Pure; no I/O.
///
/// Newer hosted ⇒ pull back, newer source ⇒ push forward, equal ⇒ no-op.
/// Clock skew between the remotes can misclassify direction; no correction
/// is attempted.
pub fn decide(source: &RemoteSnapshot, hosted: &RemoteSnapshot) -> SyncDecision {
    match hosted.committed_at.cmp(&source.committed_at) {
        Ordering::Greater => SyncDecision::PullBack,
        Ordering::Less => SyncDecision::PushForward,
        Ordering::Equal => SyncDecision::NoOp,
    }
}
