//! `twinsync init <pair> --source <url> --hosted <url> [...]`

use anyhow::{Context, Result};
use clap::Args;

use twinsync_core::{
    registry::{self, InitRequest},
    HostedApiSpec, PairName, RemoteSpec,
};

/// Register a remote pair under ~/.twinsync/pairs/<pair>.yaml.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Pair name (letters, digits, '-', '_', '.').
    pub name: String,

    /// Source remote URL (the repository people push to).
    #[arg(long)]
    pub source: String,

    /// Hosted remote URL (the repository the platform deploys from).
    #[arg(long)]
    pub hosted: String,

    /// Branch compared on both remotes.
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Branch on the hosted remote, when it differs from --branch.
    #[arg(long)]
    pub hosted_branch: Option<String>,

    /// Environment variable holding the source remote token.
    #[arg(long, value_name = "VAR")]
    pub source_token_env: Option<String>,

    /// Environment variable holding the hosted remote token.
    #[arg(long, value_name = "VAR")]
    pub hosted_token_env: Option<String>,

    /// Hosted space id (owner/name); enables deployment monitoring and log archiving.
    #[arg(long, value_name = "OWNER/NAME")]
    pub space: Option<String>,

    /// Base URL of the hosting platform API.
    #[arg(long, default_value = "https://huggingface.co", requires = "space")]
    pub api_base: String,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;

        let mut source = RemoteSpec::new(self.source, self.branch.clone());
        source.token_env = self.source_token_env;
        let mut hosted = RemoteSpec::new(
            self.hosted,
            self.hosted_branch.unwrap_or_else(|| self.branch.clone()),
        );
        hosted.token_env = self.hosted_token_env;
        let hosted_api = self.space.map(|space_id| HostedApiSpec {
            base_url: self.api_base,
            space_id,
        });

        let name = self.name.clone();
        let pair = registry::init_at(
            &home,
            InitRequest {
                name: PairName::from(self.name),
                source,
                hosted,
                hosted_api,
            },
        )
        .with_context(|| format!("failed to register pair '{name}'"))?;

        println!("✓ Registered pair '{}'", pair.name);
        println!(
            "  source: {} ({})",
            pair.source.display_url(),
            pair.source.branch
        );
        println!(
            "  hosted: {} ({})",
            pair.hosted.display_url(),
            pair.hosted.branch
        );
        println!(
            "  Saved to: {}",
            registry::pair_path_at(&home, &pair.name).display()
        );
        Ok(())
    }
}
