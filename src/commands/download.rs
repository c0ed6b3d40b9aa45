use super::{open_syncer, print_report};
use crate::config::{Access, AppConfig};
use crate::core::ComponentState;
use anyhow::{bail, Context, Result};
use clap::Args;

/// `modelsync download`
#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Delete local files that no remote version can restore without asking.
    #[arg(long)]
    pub force: bool,

    /// Answer every confirmation with yes.
    #[arg(short, long)]
    pub yes: bool,
}

impl DownloadArgs {
    pub async fn run(self, config: &AppConfig) -> Result<()> {
        let syncer = open_syncer(config, Access::Read, self.yes).await?;

        let report = syncer
            .download_models(&config.model_dir, &config.models, self.force)
            .await
            .context("download failed")?;
        print_report(&report);

        let aborted: Vec<&str> = report
            .outcomes
            .iter()
            .filter(|o| o.state == ComponentState::Aborted)
            .map(|o| o.component.as_str())
            .collect();
        if !aborted.is_empty() {
            bail!("download aborted for {}", aborted.join(", "));
        }
        Ok(())
    }
}
