//! 命令行子命令

pub mod check;
pub mod download;
pub mod upload;

use crate::config::{parse_model_version, Access, AppConfig};
use crate::core::{ComponentState, ConfirmPolicy, Decision, ModelSyncer, SyncReport, Verdict};
use crate::storage::create_repository;
use anyhow::{Context, Result};
use clap::Args;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// 所有子命令共用的参数
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path of the JSON config file.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Local directory holding one subdirectory per model.
    #[arg(long, global = true, value_name = "DIR")]
    pub model_dir: Option<PathBuf>,

    /// Requested model version, e.g. `bert=3` or `tfidf=none` (repeatable).
    #[arg(long = "model", global = true, value_name = "NAME=VERSION")]
    pub models: Vec<String>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    /// 加载配置文件并应用命令行覆盖
    pub fn load_config(&self) -> Result<AppConfig> {
        let path = self.config.clone().unwrap_or_else(AppConfig::default_path);
        let mut config = AppConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;

        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        for item in &self.models {
            let (name, version) = parse_model_version(item)?;
            config.models.insert(name, version);
        }
        Ok(config)
    }
}

/// 从标准输入询问 y/n；`assume_yes` 时直接继续
pub struct PromptPolicy {
    pub assume_yes: bool,
}

impl ConfirmPolicy for PromptPolicy {
    fn decide(&self, decision: &Decision) -> Verdict {
        if self.assume_yes {
            return Verdict::Proceed;
        }

        eprint!("{} [y/n] ", decision);
        let _ = io::stderr().flush();
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) if answer.trim().eq_ignore_ascii_case("y") => Verdict::Proceed,
            _ => Verdict::Abort,
        }
    }
}

/// 连接远程仓库并打开会话
pub async fn open_syncer(config: &AppConfig, access: Access, assume_yes: bool) -> Result<ModelSyncer> {
    let repo = create_repository(&config.remote, access)
        .await
        .context("failed to connect to the remote repository")?;
    let syncer = ModelSyncer::open(repo, &config.remote.base_path)
        .await
        .context("failed to open the model repository")?;
    Ok(syncer.with_policy(PromptPolicy { assume_yes }))
}

pub(crate) fn print_report(report: &SyncReport) {
    for outcome in &report.outcomes {
        let version = outcome
            .version
            .map(|v| format!("v{}", v))
            .unwrap_or_else(|| "none".to_string());
        let detail = match outcome.state {
            ComponentState::Synced if outcome.transferred.is_empty() && outcome.deleted.is_empty() => {
                "up to date".to_string()
            }
            ComponentState::Synced => format!(
                "{} transferred, {} deleted",
                outcome.transferred.len(),
                outcome.deleted.len()
            ),
            ComponentState::Unsynced if !outcome.pending.is_empty() => {
                format!("{} file(s) to download", outcome.pending.len())
            }
            ComponentState::Conflict => format!(
                "{} file(s) to download, local changes not uploaded",
                outcome.pending.len()
            ),
            state => format!("{:?}", state).to_lowercase(),
        };
        println!("{} {}: {}", outcome.component, version, detail);
        for warning in &outcome.warnings {
            println!("  warning: {}", warning);
        }
        for rename in &outcome.renamed {
            println!("  renamed: {} -> {}", rename.from, rename.to);
        }
    }
}
