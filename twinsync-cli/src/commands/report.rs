//! `twinsync report <pair>`: re-render the last run's report without sending it.

use anyhow::{Context, Result};
use clap::Args;

use twinsync_renderer::RenderedReport;
use twinsync_sync::{reporter, run_store};

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Pair name.
    pub name: String,

    /// Log entries to include in the excerpt; defaults to the pair's setting.
    #[arg(long)]
    pub excerpt: Option<usize>,
}

impl ReportArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let pair = super::load_pair(&home, &self.name)?;
        let run = run_store::load_last_at(&home, &pair.name)
            .with_context(|| format!("failed to read last run of '{}'", pair.name))?
            .with_context(|| format!("'{}' has not run yet", pair.name))?;

        let excerpt = self.excerpt.unwrap_or(pair.logs.excerpt_entries);
        print_report(&reporter::render_report(&home, &run, excerpt));
        Ok(())
    }
}

fn print_report(report: &RenderedReport) {
    println!("Subject: {}", report.subject);
    println!();
    print!("{}", report.body);
    if !report.body.ends_with('\n') {
        println!();
    }
}
