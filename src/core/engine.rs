use crate::core::downloader::Downloader;
use crate::core::planner::Direction;
use crate::core::policy::{AbortPolicy, ConfirmPolicy};
use crate::core::scanner::{LocalTreeScanner, Rename};
use crate::core::uploader::{UploadOptions, Uploader};
use crate::error::{Result, SyncError};
use crate::storage::{join_path, normalize_path, RemoteRepository};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument, Span};

const README_NAME: &str = "README.md";

const README: &str = "\
This directory is a model repository managed by modelsync.
PLEASE DO NOT DELETE OR EDIT ANY FILES MANUALLY UNLESS YOU KNOW WHAT YOU ARE DOING!

Every subdirectory is a model, and every model contains one subdirectory per
uploaded version (1, 2, 3, ...). Each version directory holds a `last_changes.txt`
listing every file of the version with its modification time. Files that are not
listed there are never downloaded.

Only change these directories through `modelsync upload` and `modelsync download`.
";

/// 单个模型的同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentState {
    Unsynced,
    DiffComputed,
    Transferring,
    Synced,
    /// 本地和远程都有对方没有的更新
    Conflict,
    /// 确认策略拒绝了破坏性操作，未做任何修改
    Aborted,
    Skipped,
}

/// 单个模型的处理结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentOutcome {
    pub component: String,
    pub version: Option<u32>,
    pub state: ComponentState,
    pub transferred: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    /// 检查模式下等待下载的文件
    pub pending: BTreeSet<String>,
    pub renamed: Vec<Rename>,
    pub warnings: Vec<String>,
}

impl ComponentOutcome {
    pub fn new(component: &str, version: Option<u32>) -> Self {
        Self {
            component: component.to_string(),
            version,
            state: ComponentState::Unsynced,
            transferred: BTreeSet::new(),
            deleted: BTreeSet::new(),
            pending: BTreeSet::new(),
            renamed: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// 记录警告并输出日志
    pub fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub remote: String,
    pub direction: Direction,
    pub outcomes: Vec<ComponentOutcome>,
}

impl SyncReport {
    fn new(remote: &str, direction: Direction) -> Self {
        Self {
            remote: remote.to_string(),
            direction,
            outcomes: Vec::new(),
        }
    }

    pub fn outcome(&self, component: &str) -> Option<&ComponentOutcome> {
        self.outcomes.iter().find(|o| o.component == component)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &String> {
        self.outcomes.iter().flat_map(|o| o.warnings.iter())
    }

    pub fn files_transferred(&self) -> usize {
        self.outcomes.iter().map(|o| o.transferred.len()).sum()
    }

    /// 所有请求的模型都处于一致状态
    pub fn is_synced(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.state, ComponentState::Synced | ComponentState::Skipped))
    }
}

/// 一次同步会话
///
/// 会话开始时检查一次写权限；模型按名称顺序逐个处理，任何错误都会立即返回。
pub struct ModelSyncer {
    repo: Arc<dyn RemoteRepository>,
    base_path: String,
    writable: bool,
    scanner: LocalTreeScanner,
    policy: Box<dyn ConfirmPolicy>,
    span: Span,
}

impl ModelSyncer {
    /// 打开会话：检查写权限，可写时确保仓库目录和 README 存在
    pub async fn open(repo: Arc<dyn RemoteRepository>, base_path: &str) -> Result<Self> {
        let span = info_span!("modelsync", remote = %repo.name());
        Self::open_in(repo, base_path, span).await
    }

    /// 使用调用方提供的 span 打开会话
    pub async fn open_in(repo: Arc<dyn RemoteRepository>, base_path: &str, span: Span) -> Result<Self> {
        let base_path = normalize_path(base_path);

        let writable = async {
            let writable = repo.can_write().await?;
            info!("已连接 {} (可写: {})", repo.name(), writable);

            if writable {
                repo.create_dir_all(&base_path).await?;
                let readme = join_path(&base_path, README_NAME);
                if !repo.exists(&readme).await? {
                    repo.write_file(&readme, README.as_bytes().to_vec()).await?;
                    info!("已写入 {}", readme);
                }
            } else if !repo.dir_exists(&base_path).await? {
                warn!("远程仓库中不存在目录 {}", base_path);
            }
            Ok::<_, SyncError>(writable)
        }
        .instrument(span.clone())
        .await?;

        Ok(Self {
            repo,
            base_path,
            writable,
            scanner: LocalTreeScanner::new(),
            policy: Box::new(AbortPolicy),
            span,
        })
    }

    pub fn with_policy(mut self, policy: impl ConfirmPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_scanner(mut self, scanner: LocalTreeScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn can_write(&self) -> bool {
        self.writable
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn repository(&self) -> &Arc<dyn RemoteRepository> {
        &self.repo
    }

    /// 上传 `model_dir/<name>` 为请求的版本
    pub async fn upload_models(
        &self,
        model_dir: &Path,
        models: &BTreeMap<String, Option<u32>>,
        options: &UploadOptions,
    ) -> Result<SyncReport> {
        async {
            if !self.writable {
                return Err(SyncError::PermissionDenied(format!(
                    "{}{}",
                    self.repo.name(),
                    self.base_path
                )));
            }

            let uploader = Uploader::new(
                self.repo.as_ref(),
                &self.base_path,
                &self.scanner,
                self.policy.as_ref(),
            );
            let mut report = SyncReport::new(self.repo.name(), Direction::Up);

            for (component, version) in models {
                let outcome = match version {
                    Some(version) => {
                        info!("检查上传: {} v{}", component, version);
                        uploader
                            .upload(&model_dir.join(component), component, *version, options)
                            .await?
                    }
                    None => skipped(component),
                };
                report.outcomes.push(outcome);
            }

            info!("上传结束: {} 个文件", report.files_transferred());
            Ok::<_, SyncError>(report)
        }
        .instrument(self.span.clone())
        .await
    }

    /// 把本地模型目录切换到请求的版本
    pub async fn download_models(
        &self,
        model_dir: &Path,
        models: &BTreeMap<String, Option<u32>>,
        force: bool,
    ) -> Result<SyncReport> {
        async {
            info!("请求的版本: {}", describe(models));
            let downloader = Downloader::new(
                self.repo.as_ref(),
                &self.base_path,
                &self.scanner,
                self.policy.as_ref(),
            );
            let mut report = SyncReport::new(self.repo.name(), Direction::Down);

            for (component, version) in models {
                let outcome = match version {
                    Some(version) => {
                        downloader
                            .download(&model_dir.join(component), component, *version, force)
                            .await?
                    }
                    None => skipped(component),
                };
                report.outcomes.push(outcome);
            }

            info!("下载结束: {} 个文件", report.files_transferred());
            Ok::<_, SyncError>(report)
        }
        .instrument(self.span.clone())
        .await
    }

    /// 只报告需要下载的文件，不修改任何内容
    pub async fn check_updates(
        &self,
        model_dir: &Path,
        models: &BTreeMap<String, Option<u32>>,
    ) -> Result<SyncReport> {
        async {
            let downloader = Downloader::new(
                self.repo.as_ref(),
                &self.base_path,
                &self.scanner,
                self.policy.as_ref(),
            );
            let mut report = SyncReport::new(self.repo.name(), Direction::Down);

            for (component, version) in models {
                let outcome = match version {
                    Some(version) => {
                        downloader
                            .check(&model_dir.join(component), component, *version)
                            .await?
                    }
                    None => skipped(component),
                };
                report.outcomes.push(outcome);
            }
            Ok::<_, SyncError>(report)
        }
        .instrument(self.span.clone())
        .await
    }
}

fn skipped(component: &str) -> ComponentOutcome {
    let mut outcome = ComponentOutcome::new(component, None);
    outcome.state = ComponentState::Skipped;
    outcome
}

/// `bert v3, tfidf (none)`
pub fn describe(models: &BTreeMap<String, Option<u32>>) -> String {
    models
        .iter()
        .map(|(name, version)| match version {
            Some(v) => format!("{} v{}", name, v),
            None => format!("{} (none)", name),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRepository;

    #[tokio::test]
    async fn writable_session_writes_readme_once() {
        let repo = Arc::new(MemoryRepository::new());
        ModelSyncer::open(repo.clone(), "/models").await.unwrap();
        ModelSyncer::open(repo.clone(), "/models").await.unwrap();

        assert!(repo.file("/models/README.md").is_some());
        assert_eq!(repo.write_count(), 1);
    }

    #[tokio::test]
    async fn read_only_session_refuses_uploads() {
        let repo = Arc::new(MemoryRepository::read_only());
        let syncer = ModelSyncer::open(repo.clone(), "/models").await.unwrap();
        assert!(!syncer.can_write());

        let models = BTreeMap::from([("bert".to_string(), Some(1))]);
        let err = syncer
            .upload_models(Path::new("/nonexistent"), &models, &UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
        assert!(repo.file_paths().is_empty());
    }

    #[tokio::test]
    async fn none_versions_are_skipped() {
        let repo = Arc::new(MemoryRepository::new());
        let syncer = ModelSyncer::open(repo, "/models").await.unwrap();
        let models = BTreeMap::from([("bert".to_string(), None)]);

        let report = syncer
            .download_models(Path::new("/nonexistent"), &models, false)
            .await
            .unwrap();
        assert_eq!(report.outcome("bert").unwrap().state, ComponentState::Skipped);
        assert!(report.is_synced());
    }

    #[test]
    fn describes_requested_versions() {
        let models = BTreeMap::from([("bert".to_string(), Some(3)), ("tfidf".to_string(), None)]);
        assert_eq!(describe(&models), "bert v3, tfidf (none)");
    }
}
