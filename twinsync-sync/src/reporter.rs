//! Run Reporter: persists the finalized run and dispatches its report.
//!
//! Runs strictly after all state-changing work. Nothing here can fail the
//! run: persistence, rendering and delivery problems are logged and
//! reflected in the returned [`ReportReceipt`].

use std::path::{Path, PathBuf};

use twinsync_core::SyncRun;
use twinsync_renderer::{RenderedReport, Renderer};

use crate::notify::{Notification, Notifier};
use crate::run_store;

/// What happened to one report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportReceipt {
    pub subject: String,
    /// Last-run marker written, if persisting succeeded.
    pub stored_at: Option<PathBuf>,
    pub channel: &'static str,
    pub delivered: bool,
}

/// `~/.twinsync/templates/`
pub fn templates_dir_at(home: &Path) -> PathBuf {
    home.join(".twinsync").join("templates")
}

/// Render `run` with user overrides, falling back to the built-in templates
/// and finally to a plain summary.
pub fn render_report(home: &Path, run: &SyncRun, excerpt_entries: usize) -> RenderedReport {
    let rendered = Renderer::with_overrides(&templates_dir_at(home))
        .and_then(|r| r.render(run, excerpt_entries));
    match rendered {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!("report templates failed ({e}); using built-in templates");
            match Renderer::new().and_then(|r| r.render(run, excerpt_entries)) {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!("built-in report templates failed: {e}");
                    plain_report(run)
                }
            }
        }
    }
}

fn plain_report(run: &SyncRun) -> RenderedReport {
    let decision = run
        .decision
        .map(|d| d.to_string())
        .unwrap_or_else(|| "undecided".to_string());
    RenderedReport {
        subject: format!(
            "[twinsync] {}: {} {}",
            run.verdict(),
            run.pair,
            run.outcome.label()
        ),
        body: format!(
            "Run: {}\nTrigger: {} on {}\nDecision: {}\nOutcome: {:?}\n",
            run.id, run.trigger.kind, run.trigger.branch, decision, run.outcome
        ),
    }
}

/// Persist `run` as the pair's last run, then send its report.
pub fn report_at(
    home: &Path,
    run: &SyncRun,
    excerpt_entries: usize,
    notifier: &dyn Notifier,
) -> ReportReceipt {
    let stored_at = match run_store::save_last_at(home, run) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::error!("failed to persist run {} of '{}': {e}", run.id, run.pair);
            None
        }
    };

    let report = render_report(home, run, excerpt_entries);
    let notification = Notification {
        pair: run.pair.clone(),
        run_id: run.id.clone(),
        subject: report.subject,
        body: report.body,
    };
    let delivered = match notifier.send(&notification) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(
                "report for run {} not delivered via {}: {e}",
                run.id,
                notifier.channel()
            );
            false
        }
    };

    ReportReceipt {
        subject: notification.subject,
        stored_at,
        channel: notifier.channel(),
        delivered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use chrono::Utc;
    use tempfile::TempDir;
    use twinsync_core::{PairName, RunOutcome, Trigger};

    struct Refusing;

    impl Notifier for Refusing {
        fn channel(&self) -> &'static str {
            "refusing"
        }
        fn send(&self, _n: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Transport {
                url: "http://mail".to_string(),
                detail: "connection refused".to_string(),
            })
        }
    }

    fn run() -> SyncRun {
        let now = Utc::now();
        SyncRun::start(PairName::from("eew"), Trigger::manual("main"), now)
            .finalize(RunOutcome::NoOp, now)
    }

    #[test]
    fn notification_failure_is_not_fatal_and_run_is_stored() {
        let home = TempDir::new().unwrap();
        let run = run();
        let receipt = report_at(home.path(), &run, 20, &Refusing);
        assert!(!receipt.delivered);
        assert!(receipt.stored_at.is_some());
        let stored = run_store::load_last_at(home.path(), &run.pair).unwrap();
        assert_eq!(stored, Some(run));
    }

    #[test]
    fn broken_override_falls_back_to_builtin() {
        let home = TempDir::new().unwrap();
        let dir = templates_dir_at(home.path()).join("report");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("subject.tera"), "{% if %}").unwrap();
        let report = render_report(home.path(), &run(), 20);
        assert_eq!(report.subject, "[twinsync] OK: eew no-op");
    }
}
