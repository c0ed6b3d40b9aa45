use crate::core::ledger::{self, Ledger, LEDGER_NAME};
use crate::error::{Result, SyncError};
use crate::storage::{join_path, RemoteRepository};
use tracing::{debug, warn};

/// `<base>/<component>`
pub fn component_path(base_path: &str, component: &str) -> String {
    join_path(base_path, component)
}

/// `<base>/<component>/<version>`
pub fn version_path(base_path: &str, component: &str, version: u32) -> String {
    join_path(&component_path(base_path, component), &version.to_string())
}

/// 读取远程版本目录中的清单，不存在时返回空清单
pub async fn fetch_remote_ledger(repo: &dyn RemoteRepository, version_dir: &str) -> Result<Ledger> {
    match repo.read_file(&join_path(version_dir, LEDGER_NAME)).await {
        Ok(bytes) => ledger::parse(&String::from_utf8_lossy(&bytes)),
        Err(e) if e.is_not_found() => Ok(Ledger::new()),
        Err(e) => Err(e),
    }
}

/// 判断一组本地文件是否已作为某个远程版本存在
pub struct VersionResolver<'a> {
    repo: &'a dyn RemoteRepository,
    base_path: &'a str,
}

impl<'a> VersionResolver<'a> {
    pub fn new(repo: &'a dyn RemoteRepository, base_path: &'a str) -> Self {
        Self { repo, base_path }
    }

    /// 远程已有的版本号（升序），非数字目录被忽略
    pub async fn versions(&self, component: &str) -> Result<Vec<u32>> {
        let entries = match self
            .repo
            .list_dir(&component_path(self.base_path, component))
            .await
        {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut versions: Vec<u32> = entries
            .into_iter()
            .filter(|e| e.is_dir)
            .filter_map(|e| e.name.parse().ok())
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// 返回清单在 `subset` 的键上与 `subset` 完全一致的第一个版本
    pub async fn resolve(&self, component: &str, subset: &Ledger) -> Result<Option<u32>> {
        if subset.is_empty() {
            return Ok(None);
        }

        for version in self.versions(component).await? {
            let remote = match fetch_remote_ledger(
                self.repo,
                &version_path(self.base_path, component, version),
            )
            .await
            {
                Ok(remote) => remote,
                // 损坏的清单不能作为备份，继续比较其他版本
                Err(e @ SyncError::Ledger { .. }) => {
                    warn!("{} v{} 的清单无法解析，跳过: {}", component, version, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if &ledger::restrict(&remote, subset.keys()) == subset {
                debug!("{} 的文件与远程版本 {} 一致", component, version);
                return Ok(Some(version));
            }
        }
        Ok(None)
    }
}
