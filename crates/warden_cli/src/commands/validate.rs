//! Validate command - Run the static validator on a target directory.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use warden_policy::{RuleSet, Validator};

use super::{CommandFailure, TargetArgs};
use crate::ExitCodes;

#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

pub async fn execute(args: ValidateArgs) -> Result<()> {
    let config = args.target.load_config()?;
    if !config.target_dir.is_dir() {
        anyhow::bail!("Target directory not found: {}", config.target_dir.display());
    }
    info!("Validating {}", config.target_dir.display());

    let rules = RuleSet::app_router(&config.path_alias);
    let validator = Validator::new(&rules).context("Failed to compile validation rules")?;
    println!("🔒 Checking {} rules...", validator.rule_count());

    match validator.find_violation(&config.target_dir)? {
        None => {
            println!("   ✅ Validation passed");
            Ok(())
        }
        Some(finding) => {
            println!("   ❌ {}", finding);
            Err(CommandFailure::new(
                ExitCodes::BUILD_FAILURE,
                format!("Validation failed in {}", finding.file_path),
            )
            .into())
        }
    }
}
