use super::{open_syncer, print_report};
use crate::config::{Access, AppConfig};
use anyhow::{Context, Result};
use clap::Args;

/// `modelsync check`
#[derive(Args, Debug)]
pub struct CheckArgs {}

impl CheckArgs {
    pub async fn run(self, config: &AppConfig) -> Result<()> {
        let syncer = open_syncer(config, Access::Read, false).await?;

        let report = syncer
            .check_updates(&config.model_dir, &config.models)
            .await
            .context("check failed")?;
        print_report(&report);

        if report.is_synced() {
            println!("All requested models are up to date.");
        }
        Ok(())
    }
}
