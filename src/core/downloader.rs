use crate::core::engine::{ComponentOutcome, ComponentState};
use crate::core::ledger::{self, Ledger, LEDGER_NAME};
use crate::core::planner::{Direction, SyncPlanner, TransferPlan};
use crate::core::policy::{ConfirmPolicy, Decision, Verdict};
use crate::core::resolver::{fetch_remote_ledger, version_path, VersionResolver};
use crate::core::scanner::{local_path, LocalTreeScanner, PARTIAL_SUFFIX};
use crate::error::{io_err, Result, SyncError};
use crate::storage::{join_path, RemoteRepository};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::collections::BTreeSet;
use std::path::Path;
use tokio::fs;
use tracing::{debug, error, info, warn};

/// 把远程版本同步到本地模型目录
pub struct Downloader<'a> {
    repo: &'a dyn RemoteRepository,
    base_path: &'a str,
    scanner: &'a LocalTreeScanner,
    policy: &'a dyn ConfirmPolicy,
}

impl<'a> Downloader<'a> {
    pub fn new(
        repo: &'a dyn RemoteRepository,
        base_path: &'a str,
        scanner: &'a LocalTreeScanner,
        policy: &'a dyn ConfirmPolicy,
    ) -> Self {
        Self {
            repo,
            base_path,
            scanner,
            policy,
        }
    }

    /// 读取远程清单；组件、版本或清单不存在都视为版本不存在
    async fn remote_ledger(&self, component: &str, version: u32) -> Result<Ledger> {
        let not_existant = || SyncError::ModelNotExistant {
            component: component.to_string(),
            version,
        };
        let version_dir = version_path(self.base_path, component, version);
        if !self.repo.dir_exists(&version_dir).await? {
            return Err(not_existant());
        }
        if !self.repo.exists(&join_path(&version_dir, LEDGER_NAME)).await? {
            warn!("{} v{} 没有清单，可能是未完成的上传", component, version);
            return Err(not_existant());
        }
        fetch_remote_ledger(self.repo, &version_dir).await
    }

    fn plan(&self, local_dir: &Path, component: &str, version: u32, remote: Ledger) -> Result<TransferPlan> {
        let local = self.scanner.scan(local_dir)?;
        Ok(SyncPlanner::plan(Direction::Down, component, version, local, remote))
    }

    fn report_drift(plan: &TransferPlan, outcome: &mut ComponentOutcome) -> bool {
        let drift = SyncPlanner::reverse_drift(plan.local_ledger(), plan.remote_ledger());
        if !drift.newer_locally.is_empty() {
            outcome.warn(format!(
                "some local files of model `{}` are newer than their remote counterpart: {:?}",
                plan.component, drift.newer_locally
            ));
        }
        if !drift.local_only.is_empty() {
            outcome.warn(format!(
                "local files of model `{}` have no remote counterpart in version {}: {:?}",
                plan.component, plan.version, drift.local_only
            ));
        }
        !drift.newer_locally.is_empty()
    }

    pub async fn download(
        &self,
        local_dir: &Path,
        component: &str,
        version: u32,
        force: bool,
    ) -> Result<ComponentOutcome> {
        let mut outcome = ComponentOutcome::new(component, Some(version));

        let remote = self.remote_ledger(component, version).await?;
        let plan = self.plan(local_dir, component, version, remote)?;
        let to_delete = SyncPlanner::stale_local_files(&plan);
        outcome.state = ComponentState::DiffComputed;
        Self::report_drift(&plan, &mut outcome);

        if plan.is_empty() && to_delete.is_empty() {
            info!("{} v{} 已是最新", component, version);
            outcome.state = ComponentState::Synced;
            return Ok(outcome);
        }
        debug!(
            "{} v{}: 下载 {} 个文件，删除 {} 个文件",
            component,
            version,
            plan.files.len(),
            to_delete.len()
        );

        if !to_delete.is_empty() && !self.may_delete(&plan, &to_delete, force, &mut outcome).await? {
            outcome.state = ComponentState::Aborted;
            return Ok(outcome);
        }

        // 确认可能等待用户输入，修改本地文件前重新扫描
        if self.scanner.scan(local_dir)? != *plan.local_ledger() {
            return Err(SyncError::StateMismatch {
                component: component.to_string(),
            });
        }

        outcome.state = ComponentState::Transferring;
        for path in &to_delete {
            let file = local_path(local_dir, path)?;
            fs::remove_file(&file).await.map_err(|e| io_err(&file, e))?;
            remove_empty_parents(local_dir, &file).await;
            debug!("已删除本地文件 {}: {}", component, path);
            outcome.deleted.insert(path.clone());
        }

        let version_dir = version_path(self.base_path, component, version);
        fs::create_dir_all(local_dir)
            .await
            .map_err(|e| io_err(local_dir, e))?;
        for path in &plan.files {
            debug!("下载 {}: {}", component, path);
            let data = self.repo.read_file(&join_path(&version_dir, path)).await?;
            let mtime = plan.remote_ledger()[path];
            write_local(&local_path(local_dir, path)?, &data, mtime).await?;
            outcome.transferred.insert(path.clone());
        }

        let result = self.scanner.scan(local_dir)?;
        let expected: BTreeSet<&String> = plan.remote_ledger().keys().collect();
        let actual: BTreeSet<&String> = result.keys().collect();
        if expected != actual {
            return Err(SyncError::PartialTransfer {
                component: component.to_string(),
                missing: expected.difference(&actual).map(|s| s.to_string()).collect(),
                unexpected: actual.difference(&expected).map(|s| s.to_string()).collect(),
            });
        }

        info!(
            "{} v{} 下载完成: {} 个文件，删除 {} 个",
            component,
            version,
            outcome.transferred.len(),
            outcome.deleted.len()
        );
        outcome.state = ComponentState::Synced;
        Ok(outcome)
    }

    /// 删除的文件能从某个远程版本恢复，或者得到授权时返回 true
    async fn may_delete(
        &self,
        plan: &TransferPlan,
        to_delete: &BTreeSet<String>,
        force: bool,
        outcome: &mut ComponentOutcome,
    ) -> Result<bool> {
        let subset = ledger::restrict(plan.local_ledger(), to_delete);
        let resolver = VersionResolver::new(self.repo, self.base_path);

        if let Some(backup) = resolver.resolve(&plan.component, &subset).await? {
            outcome.warn(format!(
                "local files of model `{}` will be deleted; they can be recovered from remote version {}: {:?}",
                plan.component, backup, to_delete
            ));
            return Ok(true);
        }

        if force {
            error!(
                "删除无法恢复的本地文件 ({} v{}): {:?}",
                plan.component, plan.version, to_delete
            );
            return Ok(true);
        }

        let decision = Decision::DeleteUnrecoverable {
            component: plan.component.clone(),
            version: plan.version,
            files: to_delete.clone(),
        };
        match self.policy.decide(&decision) {
            Verdict::Proceed => {
                warn!("已确认删除无法恢复的文件: {:?}", to_delete);
                Ok(true)
            }
            Verdict::Abort => {
                outcome.warn(format!(
                    "aborted: switching model `{}` to version {} would delete unrecoverable local files {:?}",
                    plan.component, plan.version, to_delete
                ));
                Ok(false)
            }
        }
    }

    /// 只比较，不做修改
    pub async fn check(&self, local_dir: &Path, component: &str, version: u32) -> Result<ComponentOutcome> {
        let mut outcome = ComponentOutcome::new(component, Some(version));

        let remote = match self.remote_ledger(component, version).await {
            Ok(remote) => remote,
            Err(SyncError::ModelNotExistant { .. }) => {
                outcome.warn(format!(
                    "version {} of model `{}` does not exist on the remote",
                    version, component
                ));
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        };

        let plan = self.plan(local_dir, component, version, remote)?;
        outcome.state = ComponentState::DiffComputed;
        let newer_locally = Self::report_drift(&plan, &mut outcome);

        if plan.is_empty() {
            outcome.state = ComponentState::Synced;
            return Ok(outcome);
        }

        outcome.warn(format!(
            "there are {} new file(s) for model `{}` version {}: {:?}",
            plan.files.len(),
            component,
            version,
            plan.files
        ));
        outcome.pending = plan.files;
        outcome.state = if newer_locally {
            ComponentState::Conflict
        } else {
            ComponentState::Unsynced
        };
        Ok(outcome)
    }
}

/// 写入临时文件后重命名，并设置修改时间
async fn write_local(path: &Path, data: &[u8], mtime: DateTime<Utc>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| io_err(parent, e))?;
    }

    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(PARTIAL_SUFFIX);
    let temp = path.with_file_name(temp_name);

    fs::write(&temp, data).await.map_err(|e| io_err(&temp, e))?;
    filetime::set_file_mtime(&temp, FileTime::from_unix_time(mtime.timestamp(), 0))
        .map_err(|e| io_err(&temp, e))?;
    fs::rename(&temp, path).await.map_err(|e| io_err(path, e))?;
    Ok(())
}

/// 删除文件后清理空目录，直到模型根目录
async fn remove_empty_parents(root: &Path, file: &Path) {
    let mut dir = file.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) {
            break;
        }
        if fs::remove_dir(d).await.is_err() {
            break;
        }
        dir = d.parent();
    }
}
