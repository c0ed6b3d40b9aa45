//! 错误类型

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// 同步过程中可能出现的所有错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 账号或密码错误
    #[error("authentication failed for account `{account}` at {server}")]
    Authentication { server: String, account: String },

    /// 服务器不可达或服务端错误
    #[error("remote repository unreachable: {0}")]
    Connectivity(String),

    /// 远程路径不存在
    #[error("remote path not found: {0}")]
    NotFound(String),

    #[error("version {version} of model `{component}` does not exist on the remote")]
    ModelNotExistant { component: String, version: u32 },

    /// 当前账号没有写权限
    #[error("no write permission on {0}")]
    PermissionDenied(String),

    #[error("version {version} of model `{component}` already exists and overwriting was not authorized")]
    VersionConflict { component: String, version: u32 },

    /// 文件名包含不允许的字符且无法自动重命名
    #[error("file name `{path}` is not allowed ({chars}): {reason}")]
    Encoding {
        path: String,
        chars: String,
        reason: String,
    },

    /// 路径会越出模型目录或仓库根目录
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    /// 计算差异之后本地目录被修改
    #[error("local files of model `{component}` changed since the diff was computed")]
    StateMismatch { component: String },

    #[error("transfer of model `{component}` incomplete: missing {missing:?}, unexpected {unexpected:?}")]
    PartialTransfer {
        component: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// 清单文件格式错误
    #[error("invalid ledger line {line}: {reason}")]
    Ledger { line: usize, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// 是否为远程路径不存在
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

/// 构造带路径的 IO 错误
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
