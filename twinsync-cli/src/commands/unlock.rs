//! `twinsync unlock <pair>`

use anyhow::{bail, Context, Result};
use clap::Args;

use twinsync_sync::run_lock::{self, RunLockError};

/// Remove a lock file left behind by a crashed run.
#[derive(Args, Debug)]
pub struct UnlockArgs {
    /// Pair name.
    pub name: String,
}

impl UnlockArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let pair = super::load_pair(&home, &self.name)?;

        match run_lock::remove_lock_at(&home, &pair) {
            Ok(true) => println!("✓ Removed leftover run lock of '{}'", pair.name),
            Ok(false) => println!("'{}' is not locked", pair.name),
            Err(e @ RunLockError::Held { .. }) => {
                bail!("'{}' is in use by a live run: {e}", pair.name)
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to remove run lock of '{}'", pair.name))
            }
        }
        Ok(())
    }
}
