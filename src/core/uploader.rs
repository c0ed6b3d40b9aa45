use crate::core::engine::{ComponentOutcome, ComponentState};
use crate::core::ledger::{self, LEDGER_NAME};
use crate::core::planner::{Direction, SyncPlanner};
use crate::core::policy::{ConfirmPolicy, Decision, Verdict};
use crate::core::resolver::{fetch_remote_ledger, version_path, VersionResolver};
use crate::core::scanner::{
    apply_renames, check_name, local_path, plan_renames, rename_keys, LocalTreeScanner,
};
use crate::error::{io_err, Result, SyncError};
use crate::storage::{join_path, split_path, RemoteRepository};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// 上传选项
#[derive(Debug, Clone, Copy)]
pub struct UploadOptions {
    /// 允许覆盖已提交的版本
    pub overwrite: bool,
    /// 检查相同文件是否已作为其他版本上传
    pub check_other_versions: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            check_other_versions: true,
        }
    }
}

/// 把一个模型目录上传为远程版本
pub struct Uploader<'a> {
    repo: &'a dyn RemoteRepository,
    base_path: &'a str,
    scanner: &'a LocalTreeScanner,
    policy: &'a dyn ConfirmPolicy,
}

impl<'a> Uploader<'a> {
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

    pub async fn upload(
        &self,
        local_dir: &Path,
        component: &str,
        version: u32,
        options: &UploadOptions,
    ) -> Result<ComponentOutcome> {
        let mut outcome = ComponentOutcome::new(component, Some(version));
        let version_dir = version_path(self.base_path, component, version);
        let ledger_path = join_path(&version_dir, LEDGER_NAME);

        let scanned = self.scanner.scan_lenient(local_dir)?;
        if scanned.is_empty() {
            outcome.warn(format!(
                "model `{}` has no local files in {}; nothing to upload",
                component,
                local_dir.display()
            ));
            outcome.state = ComponentState::Skipped;
            return Ok(outcome);
        }

        let renames = plan_renames(&scanned)?;
        let local = rename_keys(&scanned, &renames);
        // 清单无法保存的文件名在任何传输之前拒绝
        for path in local.keys() {
            check_name(path)?;
        }

        let remote = fetch_remote_ledger(self.repo, &version_dir).await?;

        let plan = SyncPlanner::plan(Direction::Up, component, version, local, remote);
        outcome.state = ComponentState::DiffComputed;
        debug!("{} v{}: {} 个文件需要上传", component, version, plan.files.len());

        if plan.is_empty() {
            if !renames.is_empty() {
                apply_renames(local_dir, &renames)?;
                outcome.renamed = renames;
            }
            info!("{} v{} 已是最新", component, version);
            outcome.state = ComponentState::Synced;
            return Ok(outcome);
        }

        let version_exists = self.repo.dir_exists(&version_dir).await?;
        let committed = version_exists && self.repo.exists(&ledger_path).await?;
        if committed && !options.overwrite {
            return Err(SyncError::VersionConflict {
                component: component.to_string(),
                version,
            });
        }

        if options.check_other_versions {
            let resolver = VersionResolver::new(self.repo, self.base_path);
            if let Some(existing) = resolver
                .resolve(component, plan.local_ledger())
                .await?
                .filter(|v| *v != version)
            {
                let decision = Decision::DuplicateContent {
                    component: component.to_string(),
                    version,
                    existing_version: existing,
                };
                outcome.warn(format!(
                    "the files of model `{}` are already uploaded as version {}",
                    component, existing
                ));
                if self.policy.decide(&decision) == Verdict::Abort {
                    info!("跳过上传 {} v{}", component, version);
                    outcome.state = ComponentState::Skipped;
                    return Ok(outcome);
                }
            }
        }

        apply_renames(local_dir, &renames)?;
        outcome.renamed = renames;

        outcome.state = ComponentState::Transferring;
        if committed {
            warn!("{} v{} 已存在，将覆盖", component, version);
            // 先撤销旧清单，中断时版本处于未提交状态
            self.repo.delete_file(&ledger_path).await?;
        } else if version_exists {
            info!("{} v{} 存在未完成的上传，继续", component, version);
        }

        let existing: BTreeSet<String> = if version_exists {
            self.repo
                .list_files_recursive(&version_dir)
                .await?
                .into_iter()
                .collect()
        } else {
            BTreeSet::new()
        };

        self.repo.create_dir_all(&version_dir).await?;
        let mut created = BTreeSet::from([version_dir.clone()]);

        for path in &plan.files {
            let file = local_path(local_dir, path)?;
            let data = tokio::fs::read(&file).await.map_err(|e| io_err(&file, e))?;
            let remote_path = join_path(&version_dir, path);

            if existing.contains(path) {
                if !committed && self.repo.read_file(&remote_path).await? == data {
                    debug!("已上传，跳过: {}", path);
                    continue;
                }
                self.repo.delete_file(&remote_path).await?;
            }

            let (parent, _) = split_path(&remote_path);
            if created.insert(parent.clone()) {
                self.repo.create_dir_all(&parent).await?;
            }

            debug!("上传 {}: {}", component, path);
            self.repo.write_file(&remote_path, data).await?;
            outcome.transferred.insert(path.clone());
        }

        // 所有文件完成后才提交清单
        self.repo
            .write_file(&ledger_path, ledger::serialize(plan.local_ledger()).into_bytes())
            .await?;

        self.verify(&version_dir, &plan.from_ledger, &mut outcome).await?;
        info!(
            "{} v{} 上传完成: {} 个文件",
            component,
            version,
            outcome.transferred.len()
        );
        outcome.state = ComponentState::Synced;
        Ok(outcome)
    }

    /// 远程多出的文件只警告，缺失的文件是错误
    async fn verify(
        &self,
        version_dir: &str,
        committed: &ledger::Ledger,
        outcome: &mut ComponentOutcome,
    ) -> Result<()> {
        let remote: BTreeSet<String> = self
            .repo
            .list_files_recursive(version_dir)
            .await?
            .into_iter()
            .filter(|p| p != LEDGER_NAME)
            .collect();

        let orphans: Vec<String> = remote
            .iter()
            .filter(|p| !committed.contains_key(*p))
            .cloned()
            .collect();
        if !orphans.is_empty() {
            outcome.warn(format!(
                "remote files in {} that are not part of this version and will never be downloaded: {:?}",
                version_dir, orphans
            ));
        }

        let missing: Vec<String> = committed
            .keys()
            .filter(|p| !remote.contains(*p))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(SyncError::PartialTransfer {
                component: outcome.component.clone(),
                missing,
                unexpected: orphans,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::{AbortPolicy, ProceedPolicy};
    use crate::storage::MemoryRepository;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = local_path(root, rel).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn uploads_files_then_commits_ledger() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "weights.bin", "w");
        write(tmp.path(), "vocab/words.txt", "v");
        let repo = MemoryRepository::new();
        let scanner = LocalTreeScanner::new();
        let uploader = Uploader::new(&repo, "/models", &scanner, &AbortPolicy);

        let outcome = uploader
            .upload(tmp.path(), "bert", 1, &UploadOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.state, ComponentState::Synced);
        assert_eq!(outcome.transferred.len(), 2);
        assert_eq!(repo.file("/models/bert/1/vocab/words.txt").unwrap(), b"v");
        let committed = ledger::parse(
            &String::from_utf8(repo.file("/models/bert/1/last_changes.txt").unwrap()).unwrap(),
        )
        .unwrap();
        assert_eq!(committed, scanner.scan(tmp.path()).unwrap());
    }

    #[tokio::test]
    async fn missing_local_model_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let repo = MemoryRepository::new();
        let scanner = LocalTreeScanner::new();
        let uploader = Uploader::new(&repo, "/models", &scanner, &AbortPolicy);

        let outcome = uploader
            .upload(&tmp.path().join("bert"), "bert", 1, &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.state, ComponentState::Skipped);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(repo.file_paths().is_empty());
    }

    #[tokio::test]
    async fn names_the_ledger_cannot_hold_are_rejected_before_transfer() {
        for name in ["a:b.txt", "line\nbreak.txt"] {
            let tmp = TempDir::new().unwrap();
            write(tmp.path(), "weights.bin", "w");
            fs::write(tmp.path().join(name), "x").unwrap();
            let repo = MemoryRepository::new();
            let scanner = LocalTreeScanner::new();

            let err = Uploader::new(&repo, "/models", &scanner, &AbortPolicy)
                .upload(tmp.path(), "bert", 1, &UploadOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, SyncError::Encoding { .. }), "{name:?}: {err}");
            assert!(repo.file_paths().is_empty());
            assert_eq!(repo.write_count(), 0);
        }
    }

    #[tokio::test]
    async fn trailing_space_names_survive_the_ledger() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "weights.bin ", "w");
        let repo = MemoryRepository::new();
        let scanner = LocalTreeScanner::new();

        Uploader::new(&repo, "/models", &scanner, &AbortPolicy)
            .upload(tmp.path(), "bert", 1, &UploadOptions::default())
            .await
            .unwrap();

        let committed = ledger::parse(
            &String::from_utf8(repo.file("/models/bert/1/last_changes.txt").unwrap()).unwrap(),
        )
        .unwrap();
        assert!(committed.contains_key("weights.bin "));
    }

    #[tokio::test]
    async fn declined_duplicate_can_resume_an_interrupted_upload() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.bin", "a");
        write(tmp.path(), "b.bin", "b");
        let repo = MemoryRepository::new();
        let scanner = LocalTreeScanner::new();

        Uploader::new(&repo, "/models", &scanner, &AbortPolicy)
            .upload(tmp.path(), "bert", 1, &UploadOptions::default())
            .await
            .unwrap();

        // v2 中断在第一个文件之后
        repo.fail_writes_after(Some(1));
        let err = Uploader::new(&repo, "/models", &scanner, &ProceedPolicy)
            .upload(tmp.path(), "bert", 2, &UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Connectivity(_)));
        repo.fail_writes_after(None);

        let declined = Uploader::new(&repo, "/models", &scanner, &AbortPolicy)
            .upload(tmp.path(), "bert", 2, &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(declined.state, ComponentState::Skipped);
        assert!(repo.file("/models/bert/2/a.bin").is_some());
        assert!(repo.file("/models/bert/2/b.bin").is_none());
        assert!(repo.file("/models/bert/2/last_changes.txt").is_none());
        assert_eq!(repo.write_count(), 0);

        let resumed = Uploader::new(&repo, "/models", &scanner, &ProceedPolicy)
            .upload(tmp.path(), "bert", 2, &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(resumed.state, ComponentState::Synced);
        assert_eq!(resumed.transferred, BTreeSet::from(["b.bin".to_string()]));
        assert!(repo.file("/models/bert/2/last_changes.txt").is_some());
    }

    #[tokio::test]
    async fn duplicate_content_asks_the_policy() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "weights.bin", "w");
        let repo = MemoryRepository::new();
        let scanner = LocalTreeScanner::new();

        Uploader::new(&repo, "/models", &scanner, &AbortPolicy)
            .upload(tmp.path(), "bert", 1, &UploadOptions::default())
            .await
            .unwrap();

        let declined = Uploader::new(&repo, "/models", &scanner, &AbortPolicy)
            .upload(tmp.path(), "bert", 2, &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(declined.state, ComponentState::Skipped);
        assert!(repo.file("/models/bert/2/weights.bin").is_none());

        let accepted = Uploader::new(&repo, "/models", &scanner, &ProceedPolicy)
            .upload(tmp.path(), "bert", 2, &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(accepted.state, ComponentState::Synced);
        assert_eq!(accepted.warnings.len(), 1);
        assert!(repo.file("/models/bert/2/weights.bin").is_some());
    }

    #[tokio::test]
    async fn orphaned_remote_files_are_reported() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "weights.bin", "w");
        let repo = MemoryRepository::new();
        repo.insert_file("/models/bert/1/stray.bin", b"s".to_vec());
        let scanner = LocalTreeScanner::new();

        let outcome = Uploader::new(&repo, "/models", &scanner, &AbortPolicy)
            .upload(tmp.path(), "bert", 1, &UploadOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.state, ComponentState::Synced);
        assert!(outcome.warnings.iter().any(|w| w.contains("stray.bin")));
        assert!(repo.file("/models/bert/1/stray.bin").is_some());
    }
}
