use super::{normalize_path, RemoteEntry, RemoteRepository, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use opendal::{layers::TimeoutLayer, ErrorKind, Metakey, Operator};
use std::time::Duration;

/// 写权限探测文件
const PROBE_NAME: &str = ".modelsync-write-probe";

/// WebDAV 仓库（Seafile 的 SeafDAV、Nextcloud 等）
pub struct WebDavRepository {
    operator: Operator,
    name: String,
}

fn map_err(path: &str, e: opendal::Error) -> SyncError {
    match e.kind() {
        ErrorKind::NotFound => SyncError::NotFound(path.to_string()),
        ErrorKind::PermissionDenied => SyncError::PermissionDenied(path.to_string()),
        ErrorKind::ConfigInvalid => SyncError::Config(e.to_string()),
        _ => SyncError::Connectivity(e.to_string()),
    }
}

/// opendal 的路径相对于 root，目录以 `/` 结尾
fn file_key(path: &str) -> String {
    normalize_path(path).trim_start_matches('/').to_string()
}

fn dir_key(path: &str) -> String {
    let key = file_key(path);
    if key.is_empty() {
        "/".to_string()
    } else {
        format!("{}/", key)
    }
}

impl WebDavRepository {
    pub async fn connect(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<String>,
    ) -> Result<Self> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);

        if let Some(ref r) = root {
            builder = builder.root(r);
        }

        let operator = Operator::new(builder)
            .map_err(|e| map_err("/", e))?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "webdav://{}{}",
            endpoint.trim_end_matches('/'),
            root.as_deref()
                .map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );

        // 访问根目录以验证账号
        match operator.stat("/").await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(SyncError::Authentication {
                    server: endpoint.to_string(),
                    account: username.to_string(),
                });
            }
            Err(e) => return Err(map_err("/", e)),
        }

        Ok(Self { operator, name })
    }
}

#[async_trait]
impl RemoteRepository for WebDavRepository {
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let dir = dir_key(path);
        let display = normalize_path(path);

        // 部分服务器对不存在的目录返回空列表，先确认目录存在
        let meta = self
            .operator
            .stat(&dir)
            .await
            .map_err(|e| map_err(&display, e))?;
        if !meta.is_dir() {
            return Err(SyncError::NotFound(display));
        }

        let listed = self
            .operator
            .list_with(&dir)
            .metakey(Metakey::Mode)
            .await
            .map_err(|e| map_err(&display, e))?;

        let own = dir.trim_start_matches('/');
        Ok(listed
            .into_iter()
            .filter(|entry| entry.path().trim_start_matches('/') != own)
            .map(|entry| RemoteEntry {
                name: entry.name().trim_end_matches('/').to_string(),
                is_dir: entry.metadata().is_dir(),
            })
            .filter(|entry| !entry.name.is_empty())
            .collect())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let data = self
            .operator
            .read(&file_key(path))
            .await
            .map_err(|e| map_err(&normalize_path(path), e))?;
        Ok(data.to_vec())
    }

    async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()> {
        self.operator
            .write(&file_key(path), data)
            .await
            .map_err(|e| map_err(&normalize_path(path), e))?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.operator
            .delete(&file_key(path))
            .await
            .map_err(|e| map_err(&normalize_path(path), e))
    }

    async fn make_dir(&self, path: &str) -> Result<()> {
        self.operator
            .create_dir(&dir_key(path))
            .await
            .map_err(|e| map_err(&normalize_path(path), e))
    }

    /// 写入并删除一个探测文件
    async fn can_write(&self) -> Result<bool> {
        match self.operator.write(PROBE_NAME, Vec::<u8>::new()).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => return Ok(false),
            Err(e) => return Err(map_err(PROBE_NAME, e)),
        }
        let _ = self.operator.delete(PROBE_NAME).await;
        Ok(true)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_relative_to_root() {
        assert_eq!(file_key("/models/bert/1/a.bin"), "models/bert/1/a.bin");
        assert_eq!(dir_key("/models/bert"), "models/bert/");
        assert_eq!(dir_key("/"), "/");
    }
}
