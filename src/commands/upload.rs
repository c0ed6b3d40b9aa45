use super::{open_syncer, print_report, PromptPolicy};
use crate::config::{Access, AppConfig};
use crate::core::{ConfirmPolicy, Decision, UploadOptions, Verdict};
use anyhow::{bail, Context, Result};
use clap::Args;
use std::collections::BTreeMap;

/// `modelsync upload`
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Replace files of a version that already exists on the remote.
    #[arg(long)]
    pub overwrite: bool,

    /// Do not check whether the same files were already uploaded as another version.
    #[arg(long)]
    pub no_dedup_check: bool,

    /// Answer every confirmation with yes.
    #[arg(short, long)]
    pub yes: bool,
}

impl UploadArgs {
    pub async fn run(self, config: &AppConfig) -> Result<()> {
        let requested: BTreeMap<String, u32> = config
            .models
            .iter()
            .filter_map(|(name, version)| version.map(|v| (name.clone(), v)))
            .collect();
        if requested.is_empty() {
            println!("No model versions requested; nothing to upload.");
            return Ok(());
        }

        let prompt = PromptPolicy { assume_yes: self.yes };
        if prompt.decide(&Decision::Upload { models: requested }) == Verdict::Abort {
            bail!("upload cancelled");
        }

        let syncer = open_syncer(config, Access::Write, self.yes).await?;
        let options = UploadOptions {
            overwrite: self.overwrite,
            check_other_versions: !self.no_dedup_check,
        };
        let report = syncer
            .upload_models(&config.model_dir, &config.models, &options)
            .await
            .context("upload failed")?;

        print_report(&report);
        Ok(())
    }
}
