//! # twinsync-renderer
//!
//! Tera-based template engine that renders a finalized [`SyncRun`] into a
//! notification subject and a plain-text report body.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use twinsync_renderer::Renderer;
//! use twinsync_core::SyncRun;
//!
//! fn print_report(run: &SyncRun) {
//!     if let Ok(renderer) = Renderer::new() {
//!         if let Ok(report) = renderer.render(run, 20) {
//!             println!("{}\n\n{}", report.subject, report.body);
//!         }
//!     }
//! }
//! ```
//!
//! [`SyncRun`]: twinsync_core::SyncRun

pub mod context;
pub mod engine;
pub mod error;

pub use context::ReportContext;
pub use engine::{RenderedReport, Renderer, TemplateEngine};
pub use error::RenderError;
