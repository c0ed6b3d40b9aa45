//! 应用配置模块
//!
//! 配置来自 JSON 文件，环境变量优先于文件。

use crate::error::{io_err, Result, SyncError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_SERVER: &str = "MODELSYNC_SERVER";
pub const ENV_REPO_ID: &str = "MODELSYNC_REPO_ID";
pub const ENV_BASE_PATH: &str = "MODELSYNC_BASE_PATH";
pub const ENV_READ_ACCOUNT: &str = "MODELSYNC_READ_ACCOUNT";
pub const ENV_READ_PASSWORD: &str = "MODELSYNC_READ_PASSWORD";
pub const ENV_WRITE_ACCOUNT: &str = "MODELSYNC_WRITE_ACCOUNT";
pub const ENV_WRITE_PASSWORD: &str = "MODELSYNC_WRITE_PASSWORD";
pub const ENV_MODEL_VERSIONS: &str = "MODELSYNC_MODEL_VERSIONS";

/// 远程仓库类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteType {
    #[default]
    Seafile,
    WebDav,
    Local,
}

/// 以哪个账号连接
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// 远程仓库配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(rename = "type", default)]
    pub typ: RemoteType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    /// 仓库内存放模型的目录
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// WebDAV 根目录或本地目录
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_password: Option<String>,
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("data")
}

impl RemoteConfig {
    pub fn require_server(&self) -> Result<&str> {
        self.server
            .as_deref()
            .ok_or_else(|| missing("remote.server", ENV_SERVER))
    }

    /// 读操作用只读账号，写操作用写账号（没有则退回只读账号）
    pub fn credentials(&self, access: Access) -> Result<(&str, &str)> {
        let read = || -> Result<(&str, &str)> {
            Ok((
                self.read_account
                    .as_deref()
                    .ok_or_else(|| missing("remote.readAccount", ENV_READ_ACCOUNT))?,
                self.read_password
                    .as_deref()
                    .ok_or_else(|| missing("remote.readPassword", ENV_READ_PASSWORD))?,
            ))
        };

        match (access, &self.write_account, &self.write_password) {
            (Access::Write, Some(account), Some(password)) => Ok((account, password)),
            (Access::Write, Some(_), None) => {
                Err(missing("remote.writePassword", ENV_WRITE_PASSWORD))
            }
            _ => read(),
        }
    }
}

fn missing(key: &str, env: &str) -> SyncError {
    SyncError::Config(format!(
        "`{}` is not set; add it to the config file or set the environment variable {}",
        key, env
    ))
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    /// 本地模型根目录，每个模型一个子目录
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    /// 模型名 -> 请求的版本（null 表示跳过）
    #[serde(default)]
    pub models: BTreeMap<String, Option<u32>>,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            model_dir: default_model_dir(),
            models: BTreeMap::new(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 默认配置文件位置
    pub fn default_path() -> PathBuf {
        crate::dirs::config_dir()
            .map(|p| p.join("modelsync"))
            .unwrap_or_else(|| PathBuf::from(".modelsync"))
            .join("config.json")
    }

    /// 从文件加载，文件不存在时使用默认值；然后应用环境变量
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
            serde_json::from_str::<AppConfig>(&content).map_err(|e| {
                SyncError::Config(format!("cannot parse {}: {}", path.display(), e))
            })?
        } else {
            tracing::debug!("配置文件不存在，使用默认配置: {}", path.display());
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))?;
        Ok(config)
    }

    /// 保存配置
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::Config(e.to_string()))?;
        fs::write(path, content).map_err(|e| io_err(path, e))
    }

    /// 应用环境变量，两处都设置时以环境变量为准并警告
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let remote = &mut self.remote;
        if let Some(base_path) = lookup(ENV_BASE_PATH) {
            remote.base_path = base_path;
        }

        let slots: [(&str, &mut Option<String>); 6] = [
            (ENV_SERVER, &mut remote.server),
            (ENV_REPO_ID, &mut remote.repo_id),
            (ENV_READ_ACCOUNT, &mut remote.read_account),
            (ENV_READ_PASSWORD, &mut remote.read_password),
            (ENV_WRITE_ACCOUNT, &mut remote.write_account),
            (ENV_WRITE_PASSWORD, &mut remote.write_password),
        ];

        for (key, slot) in slots {
            if let Some(value) = lookup(key) {
                if slot.is_some() {
                    tracing::warn!("{} 同时在环境变量和配置文件中设置，使用环境变量", key);
                }
                *slot = Some(value);
            }
        }

        if let Some(spec) = lookup(ENV_MODEL_VERSIONS) {
            if !self.models.is_empty() {
                tracing::warn!(
                    "{} 同时在环境变量和配置文件中设置，使用环境变量",
                    ENV_MODEL_VERSIONS
                );
            }
            self.models = parse_model_versions(&spec)?;
        }
        Ok(())
    }
}

/// 解析 `bert=3,tfidf=none` 形式的版本列表
pub fn parse_model_versions(spec: &str) -> Result<BTreeMap<String, Option<u32>>> {
    let mut models = BTreeMap::new();
    for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, version) = parse_model_version(item)?;
        models.insert(name, version);
    }
    Ok(models)
}

/// 解析单个 `name=version`
pub fn parse_model_version(item: &str) -> Result<(String, Option<u32>)> {
    let (name, version) = item
        .split_once('=')
        .ok_or_else(|| SyncError::Config(format!("expected NAME=VERSION, got `{}`", item)))?;
    let name = name.trim();
    if name.is_empty() || name.contains('/') {
        return Err(SyncError::Config(format!("invalid model name `{}`", name)));
    }
    let version = match version.trim().to_lowercase().as_str() {
        "none" | "null" | "" => None,
        v => Some(v.parse::<u32>().map_err(|_| {
            SyncError::Config(format!("invalid version `{}` for model `{}`", v, name))
        })?),
    };
    Ok((name.to_string(), version))
}
