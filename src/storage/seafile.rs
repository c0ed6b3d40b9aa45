use super::{normalize_path, split_path, RemoteEntry, RemoteRepository, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Seafile Web API 客户端（api2）
pub struct SeafileRepository {
    client: Client,
    server: String,
    repo_id: String,
    token: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AuthToken {
    token: String,
}

#[derive(Debug, Deserialize)]
struct Dirent {
    #[serde(rename = "type")]
    typ: String,
    name: String,
    #[serde(default)]
    permission: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    permission: Option<String>,
}

fn transport(e: reqwest::Error) -> SyncError {
    SyncError::Connectivity(e.to_string())
}

/// 把非 2xx 响应映射为错误
async fn check(resp: Response, path: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => SyncError::NotFound(path.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::PermissionDenied(path.to_string())
        }
        s if s.is_server_error() => SyncError::Connectivity(format!(
            "server answered {} for {} (is Seafile down?): {}",
            s,
            path,
            body.trim()
        )),
        s => SyncError::Connectivity(format!(
            "unexpected status {} for {}: {}",
            s,
            path,
            body.trim()
        )),
    })
}

impl SeafileRepository {
    /// 登录并获取 token
    pub async fn connect(server: &str, account: &str, password: &str, repo_id: &str) -> Result<Self> {
        let server = server.trim_end_matches('/').to_string();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .build()
            .map_err(transport)?;

        let resp = client
            .post(format!("{}/api2/auth-token/", server))
            .form(&[("username", account), ("password", password)])
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(SyncError::Authentication {
                server: server.clone(),
                account: account.to_string(),
            });
        }
        let token = check(resp, "/api2/auth-token/")
            .await?
            .json::<AuthToken>()
            .await
            .map_err(transport)?
            .token;

        debug!("Seafile 登录成功: {}@{}", account, server);

        let name = format!("seafile://{}/{}", server, repo_id);
        Ok(Self {
            client,
            server,
            repo_id: repo_id.to_string(),
            token,
            name,
        })
    }

    fn api(&self, endpoint: &str) -> String {
        format!("{}/api2/repos/{}/{}", self.server, self.repo_id, endpoint)
    }

    fn auth(&self) -> String {
        format!("Token {}", self.token)
    }

    async fn get_link(&self, endpoint: &str, path: &str) -> Result<String> {
        let resp = self
            .client
            .get(self.api(endpoint))
            .header("Authorization", self.auth())
            .query(&[("p", path)])
            .send()
            .await
            .map_err(transport)?;
        check(resp, path).await?.json::<String>().await.map_err(transport)
    }

    async fn list_raw(&self, path: &str) -> Result<Vec<Dirent>> {
        let resp = self
            .client
            .get(self.api("dir/"))
            .header("Authorization", self.auth())
            .query(&[("p", path)])
            .send()
            .await
            .map_err(transport)?;
        check(resp, path).await?.json::<Vec<Dirent>>().await.map_err(transport)
    }
}

#[async_trait]
impl RemoteRepository for SeafileRepository {
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let path = normalize_path(path);
        Ok(self
            .list_raw(&path)
            .await?
            .into_iter()
            .map(|d| RemoteEntry {
                is_dir: d.typ == "dir",
                name: d.name,
            })
            .collect())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path);
        let link = self.get_link("file/", &path).await?;
        let resp = self.client.get(&link).send().await.map_err(transport)?;
        let bytes = check(resp, &path).await?.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }

    async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let (parent, file_name) = split_path(path);
        let link = self.get_link("upload-link/", &parent).await?;

        let form = Form::new()
            .text("parent_dir", parent.clone())
            .text("replace", "1")
            .part("file", Part::bytes(data).file_name(file_name));

        let resp = self
            .client
            .post(format!("{}?ret-json=1", link))
            .header("Authorization", self.auth())
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        check(resp, &normalize_path(path)).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        let resp = self
            .client
            .delete(self.api("file/"))
            .header("Authorization", self.auth())
            .query(&[("p", path.as_str())])
            .send()
            .await
            .map_err(transport)?;
        check(resp, &path).await?;
        Ok(())
    }

    async fn make_dir(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        let resp = self
            .client
            .post(self.api("dir/"))
            .header("Authorization", self.auth())
            .query(&[("p", path.as_str())])
            .form(&[("operation", "mkdir")])
            .send()
            .await
            .map_err(transport)?;
        check(resp, &path).await?;
        Ok(())
    }

    /// 仓库根目录下所有条目的权限都是 `rw` 时才可写；根目录为空时查询仓库权限
    async fn can_write(&self) -> Result<bool> {
        let perms: BTreeSet<String> = self
            .list_raw("/")
            .await?
            .into_iter()
            .filter_map(|d| d.permission)
            .collect();
        if !perms.is_empty() {
            return Ok(perms.len() == 1 && perms.contains("rw"));
        }

        let resp = self
            .client
            .get(self.api(""))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(transport)?;
        let info = check(resp, "/").await?.json::<RepoInfo>().await.map_err(transport)?;
        Ok(info.permission.as_deref() == Some("rw"))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
