use super::{normalize_path, split_path, RemoteEntry, RemoteRepository};
use crate::error::{io_err, Result, SyncError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

/// 以本地目录（例如挂载的网络盘）作为远程仓库
pub struct LocalRepository {
    base_path: PathBuf,
    name: String,
}

impl LocalRepository {
    pub fn new(path: &str) -> Result<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path).map_err(|e| io_err(&base_path, e))?;
        }
        let name = format!("local:{}", path);
        Ok(Self { base_path, name })
    }

    /// 仓库内的绝对路径映射到本地路径，`..` 不允许越出仓库根目录
    fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        let normalized = normalize_path(path);
        let mut full = self.base_path.clone();
        for part in normalized.split('/').filter(|p| !p.is_empty()) {
            if part == ".." {
                return Err(SyncError::InvalidPath {
                    path: path.to_string(),
                    reason: "`..` segment in remote path".to_string(),
                });
            }
            full.push(part);
        }
        Ok(full)
    }

    fn map_io(&self, path: &str, full: PathBuf, e: std::io::Error) -> SyncError {
        match e.kind() {
            ErrorKind::NotFound => SyncError::NotFound(normalize_path(path)),
            ErrorKind::PermissionDenied => SyncError::PermissionDenied(normalize_path(path)),
            _ => io_err(full, e),
        }
    }
}

#[async_trait]
impl RemoteRepository for LocalRepository {
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let full = self.resolve_path(path)?;
        let mut reader = fs::read_dir(&full)
            .await
            .map_err(|e| self.map_io(path, full.clone(), e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| self.map_io(path, full.clone(), e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| io_err(entry.path(), e))?;
            // 跳过写入过程中的临时文件
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".modelsync-tmp") {
                continue;
            }
            entries.push(RemoteEntry {
                name,
                is_dir: file_type.is_dir(),
            });
        }
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve_path(path)?;
        fs::read(&full)
            .await
            .map_err(|e| self.map_io(path, full.clone(), e))
    }

    async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let full = self.resolve_path(path)?;

        if let Some(parent) = full.parent() {
            if !parent.is_dir() {
                return Err(SyncError::NotFound(split_path(path).0));
            }
        }

        // 使用临时文件写入，然后原子重命名
        let mut temp_name = full.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".modelsync-tmp");
        let temp_path = full.with_file_name(temp_name);
        fs::write(&temp_path, data)
            .await
            .map_err(|e| self.map_io(path, temp_path.clone(), e))?;
        fs::rename(&temp_path, &full)
            .await
            .map_err(|e| self.map_io(path, full.clone(), e))?;

        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let full = self.resolve_path(path)?;
        fs::remove_file(&full)
            .await
            .map_err(|e| self.map_io(path, full.clone(), e))
    }

    async fn make_dir(&self, path: &str) -> Result<()> {
        let full = self.resolve_path(path)?;
        match fs::create_dir(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(self.map_io(path, full.clone(), e)),
        }
    }

    async fn can_write(&self) -> Result<bool> {
        let metadata = fs::metadata(&self.base_path)
            .await
            .map_err(|e| io_err(&self.base_path, e))?;
        Ok(!metadata.permissions().readonly())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
