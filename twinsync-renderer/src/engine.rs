//! Tera rendering engine: [`TemplateEngine`] and [`Renderer`].
//!
//! # Templates
//!
//! | Name                      | Purpose                         |
//! |---------------------------|---------------------------------|
//! | `report/subject.tera`     | one-line notification subject   |
//! | `report/body.tera`        | plain-text report body          |
//! | `report/_header.tera`     | run metadata block              |
//! | `report/_snapshots.tera`  | before/after commit table       |
//! | `report/_logs.tera`       | archived files + log excerpt    |
//!
//! Any of them can be overridden by a file of the same relative name under
//! the user template directory (`~/.twinsync/templates/report/body.tera`, …).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use twinsync_core::SyncRun;

use crate::context::ReportContext;
use crate::error::RenderError;

pub const SUBJECT_TEMPLATE: &str = "report/subject.tera";
pub const BODY_TEMPLATE: &str = "report/body.tera";

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("report/_header.tera", include_str!("templates/_partials/header.tera")),
    ("report/_snapshots.tera", include_str!("templates/_partials/snapshots.tera")),
    ("report/_logs.tera", include_str!("templates/_partials/logs.tera")),
    (SUBJECT_TEMPLATE, include_str!("templates/subject.tera")),
    (BODY_TEMPLATE, include_str!("templates/body.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(
            normalize_template_name(Path::new(name)),
            (*content).to_string(),
        );
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine for rendering templates with optional user overrides.
///
/// `user_template_dir` may contain `.tera` files that override embedded defaults.
/// Template names are normalised to lowercase and relative paths.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Construct a new [`TemplateEngine`], loading embedded templates plus any
    /// overrides found in `user_template_dir`.
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let tera = build_tera(user_template_dir)?;
        Ok(TemplateEngine { tera })
    }

    /// Render the subject and body for `ctx`.
    pub fn render(&self, ctx: &ReportContext) -> Result<RenderedReport, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        let subject = self.tera.render(SUBJECT_TEMPLATE, &tera_ctx)?;
        let body = self.tera.render(BODY_TEMPLATE, &tera_ctx)?;
        Ok(RenderedReport {
            subject: single_line(&subject),
            body: tidy_body(&body),
        })
    }
}

/// A report ready for a notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub subject: String,
    pub body: String,
}

/// Subjects are mail headers; collapse any newlines an override introduced.
fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tidy_body(s: &str) -> String {
    let mut out = s.trim_end().to_string();
    out.push('\n');
    out
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders [`SyncRun`] records into reports. Create once and reuse.
pub struct Renderer {
    engine: TemplateEngine,
}

impl Renderer {
    /// Construct a new [`Renderer`] with embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Ok(Renderer { engine: TemplateEngine::new(None)? })
    }

    /// Construct a [`Renderer`] whose templates may be overridden from `dir`.
    pub fn with_overrides(dir: &Path) -> Result<Self, RenderError> {
        Ok(Renderer { engine: TemplateEngine::new(Some(dir))? })
    }

    /// Render a finalized run, quoting its `excerpt_entries` most recent log entries.
    pub fn render(
        &self,
        run: &SyncRun,
        excerpt_entries: usize,
    ) -> Result<RenderedReport, RenderError> {
        let ctx = ReportContext::from_run(run, excerpt_entries);
        self.render_with_context(&ctx)
    }

    /// Render using a caller-provided [`ReportContext`].
    pub fn render_with_context(&self, ctx: &ReportContext) -> Result<RenderedReport, RenderError> {
        self.engine.render(ctx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use twinsync_core::{CommitHash, PairName, RunOutcome, Trigger};

    fn pushed_run() -> SyncRun {
        let t = Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");
        SyncRun::start(PairName::from("eew"), Trigger::schedule("main"), t).finalize(
            RunOutcome::Pushed {
                hosted_tip: CommitHash::from("0123456789abcdef"),
            },
            t,
        )
    }

    #[test]
    fn renderer_new_succeeds() {
        Renderer::new().expect("Renderer::new should succeed with embedded templates");
    }

    #[test]
    fn subject_is_single_line() {
        let report = Renderer::new().unwrap().render(&pushed_run(), 20).unwrap();
        assert!(!report.subject.contains('\n'));
        assert!(report.subject.contains("eew"));
        assert!(report.subject.contains("pushed"));
    }

    #[test]
    fn body_ends_with_single_newline() {
        let report = Renderer::new().unwrap().render(&pushed_run(), 20).unwrap();
        assert!(report.body.ends_with('\n'));
        assert!(!report.body.ends_with("\n\n"));
        assert!(report.body.contains("0123456"));
    }

    #[test]
    fn normalize_lowercases_and_uses_forward_slashes() {
        assert_eq!(
            normalize_template_name(Path::new("Report/Body.tera")),
            "report/body.tera"
        );
    }
}
