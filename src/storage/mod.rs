pub mod local;
pub mod memory;
pub mod seafile;
pub mod webdav;

use crate::config::{Access, RemoteConfig, RemoteType};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use local::LocalRepository;
pub use memory::MemoryRepository;
pub use seafile::SeafileRepository;
pub use webdav::WebDavRepository;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- 列目录、删除等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- 上传、下载
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程路径分隔符
pub const REMOTE_SEP: char = '/';

/// 目录项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
}

/// 远程仓库抽象接口
///
/// 所有路径都是以 `/` 开头的绝对路径。认证在各实现的构造函数中完成。
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// 列出目录的直接子项，目录不存在时返回 `SyncError::NotFound`
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// 读取整个文件
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// 写入整个文件，父目录必须已存在
    async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 删除文件
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// 创建目录，父目录必须已存在
    async fn make_dir(&self, path: &str) -> Result<()>;

    /// 当前会话是否有写权限
    async fn can_write(&self) -> Result<bool>;

    /// 检查文件或目录是否存在
    async fn exists(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path);
        if path == "/" {
            return Ok(true);
        }
        let (parent, name) = split_path(&path);
        match self.list_dir(&parent).await {
            Ok(entries) => Ok(entries.iter().any(|e| e.name == name)),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 检查目录是否存在
    async fn dir_exists(&self, path: &str) -> Result<bool> {
        match self.list_dir(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 递归列出目录下所有文件（相对路径，已排序）
    async fn list_files_recursive(&self, path: &str) -> Result<Vec<String>> {
        let root = normalize_path(path);
        let mut files = Vec::new();
        let mut pending = vec![String::new()];

        while let Some(relative) = pending.pop() {
            let dir = join_path(&root, &relative);
            for entry in self.list_dir(&dir).await? {
                let child = if relative.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}{}{}", relative, REMOTE_SEP, entry.name)
                };
                if entry.is_dir {
                    pending.push(child);
                } else {
                    files.push(child);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// 逐级创建目录，已存在的跳过
    async fn create_dir_all(&self, path: &str) -> Result<()> {
        let mut current = String::new();
        for part in normalize_path(path).split(REMOTE_SEP).filter(|p| !p.is_empty()) {
            current.push(REMOTE_SEP);
            current.push_str(part);
            if !self.dir_exists(&current).await? {
                self.make_dir(&current).await?;
            }
        }
        Ok(())
    }

    /// 获取仓库名称（用于日志）
    fn name(&self) -> &str;
}

/// 规范化远程路径：以 `/` 开头，不以 `/` 结尾，去掉空段
pub fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    format!("/{}", parts.join("/"))
}

/// 拼接远程路径
pub fn join_path(base: &str, relative: &str) -> String {
    normalize_path(&format!("{}/{}", base, relative))
}

/// 拆分为（父目录，名称）
pub fn split_path(path: &str) -> (String, String) {
    let path = normalize_path(path);
    match path.rfind(REMOTE_SEP) {
        Some(0) => ("/".to_string(), path[1..].to_string()),
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => ("/".to_string(), path),
    }
}

/// 根据配置创建远程仓库（包含认证）
pub async fn create_repository(
    config: &RemoteConfig,
    access: Access,
) -> Result<Arc<dyn RemoteRepository>> {
    match config.typ {
        RemoteType::Seafile => {
            let server = config.require_server()?;
            let repo_id = config
                .repo_id
                .as_deref()
                .ok_or_else(|| SyncError::Config("Seafile remote requires repoId".to_string()))?;
            let (account, password) = config.credentials(access)?;
            tracing::info!("连接 Seafile: server={}, repo={}", server, repo_id);
            Ok(Arc::new(
                SeafileRepository::connect(server, account, password, repo_id).await?,
            ) as Arc<dyn RemoteRepository>)
        }
        RemoteType::WebDav => {
            let server = config.require_server()?;
            let (account, password) = config.credentials(access)?;
            tracing::info!("连接 WebDAV: endpoint={}, root={:?}", server, config.root);
            Ok(Arc::new(
                WebDavRepository::connect(server, account, password, config.root.clone()).await?,
            ) as Arc<dyn RemoteRepository>)
        }
        RemoteType::Local => {
            let root = config
                .root
                .as_deref()
                .ok_or_else(|| SyncError::Config("local remote requires root".to_string()))?;
            tracing::info!("使用本地目录作为远程仓库: {}", root);
            Ok(Arc::new(LocalRepository::new(root)?) as Arc<dyn RemoteRepository>)
        }
    }
}
