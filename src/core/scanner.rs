use crate::core::ledger::{check_key, truncate_to_seconds, Ledger, LEDGER_NAME};
use crate::error::{io_err, Result, SyncError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

/// 下载过程中的临时文件后缀，扫描时忽略
pub const PARTIAL_SUFFIX: &str = ".modelsync-part";

/// 扫描配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 是否跟随符号链接
    pub follow_links: bool,
    /// 按文件名排除（系统生成的元数据文件等）
    pub exclude_names: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            follow_links: false,
            exclude_names: vec![".DS_Store".to_string(), "Thumbs.db".to_string()],
        }
    }
}

/// 本地目录扫描器
#[derive(Debug, Clone, Default)]
pub struct LocalTreeScanner {
    config: ScanConfig,
}

/// 一次本地重命名（非 ASCII 文件名 -> 转写后的文件名）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

impl LocalTreeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ScanConfig) -> Self {
        Self { config }
    }

    /// 扫描目录，所有文件名必须能写入清单
    pub fn scan(&self, root: &Path) -> Result<Ledger> {
        let ledger = self.scan_lenient(root)?;
        for path in ledger.keys() {
            check_name(path)?;
        }
        Ok(ledger)
    }

    /// 扫描目录但不检查编码，仅用于上传前的重命名
    pub fn scan_lenient(&self, root: &Path) -> Result<Ledger> {
        let mut ledger = Ledger::new();
        if !root.is_dir() {
            debug!("本地目录不存在，视为空: {}", root.display());
            return Ok(ledger);
        }

        for entry in WalkDir::new(root)
            .follow_links(self.config.follow_links)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                io_err(path, e.into())
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            if file_name.ends_with(PARTIAL_SUFFIX)
                || self.config.exclude_names.iter().any(|n| n == file_name.as_ref())
            {
                continue;
            }

            let relative = relative_key(root, entry.path())?;
            if relative == LEDGER_NAME {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| io_err(entry.path(), e.into()))?;
            let modified = metadata.modified().map_err(|e| io_err(entry.path(), e))?;
            ledger.insert(relative, truncate_to_seconds(DateTime::<Utc>::from(modified)));
        }

        debug!("扫描完成: {} ({} 个文件)", root.display(), ledger.len());
        Ok(ledger)
    }
}

/// 相对路径，统一使用 `/`
fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component.as_os_str();
        match part.to_str() {
            Some(s) => parts.push(s.to_string()),
            None => {
                let lossy = part.to_string_lossy().to_string();
                return Err(SyncError::Encoding {
                    chars: non_ascii_chars(&lossy),
                    path: relative.to_string_lossy().to_string(),
                    reason: "file name is not valid UTF-8; rename it".to_string(),
                });
            }
        }
    }
    Ok(parts.join("/"))
}

fn non_ascii_chars(name: &str) -> String {
    let chars: BTreeSet<char> = name.chars().filter(|c| !c.is_ascii()).collect();
    chars
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>()
        .join(",")
}

/// 文件名只能包含可打印的 ASCII 字符，不能含冒号（清单分隔符）或反斜杠
pub fn check_name(path: &str) -> Result<()> {
    if !path.is_ascii() {
        return Err(SyncError::Encoding {
            path: path.to_string(),
            chars: non_ascii_chars(path),
            reason: "rename the file before uploading; when downloading the local file can be deleted"
                .to_string(),
        });
    }

    let forbidden: BTreeSet<char> = path
        .chars()
        .filter(|c| *c == ':' || *c == '\\' || c.is_control())
        .collect();
    if !forbidden.is_empty() {
        return Err(SyncError::Encoding {
            path: path.escape_debug().to_string(),
            chars: forbidden
                .iter()
                .map(|c| c.escape_debug().to_string())
                .collect::<Vec<_>>()
                .join(","),
            reason: "the ledger format cannot store these characters"
                .to_string(),
        });
    }

    check_key(path).map_err(|reason| SyncError::Encoding {
        path: path.to_string(),
        chars: String::new(),
        reason: reason.to_string(),
    })
}

/// 德语字母的转写，其余字符做 NFD 分解后去掉非 ASCII 部分
const TRANSLITERATIONS: &[(char, &str)] = &[
    ('ä', "ae"),
    ('Ä', "Ae"),
    ('ö', "oe"),
    ('Ö', "Oe"),
    ('ü', "ue"),
    ('Ü', "Ue"),
    ('ß', "ss"),
];

/// 将路径转写为 ASCII
pub fn sanitize_name(path: &str) -> String {
    let mut replaced = String::with_capacity(path.len());
    for ch in path.nfc() {
        match TRANSLITERATIONS.iter().find(|(c, _)| *c == ch) {
            Some((_, ascii)) => replaced.push_str(ascii),
            None => replaced.push(ch),
        }
    }
    replaced.nfd().filter(char::is_ascii).collect()
}

/// 计算需要的重命名；无法安全转写时返回编码错误
pub fn plan_renames(ledger: &Ledger) -> Result<Vec<Rename>> {
    let mut renames = Vec::new();
    let mut taken: BTreeSet<String> = ledger.keys().filter(|k| k.is_ascii()).cloned().collect();

    for path in ledger.keys().filter(|k| !k.is_ascii()) {
        let sanitized = sanitize_name(path);
        let fail = |reason: &str| SyncError::Encoding {
            path: path.clone(),
            chars: non_ascii_chars(path),
            reason: reason.to_string(),
        };

        if sanitized.split('/').any(|part| part.trim().is_empty()) {
            return Err(fail("no usable ASCII name remains after transliteration"));
        }
        if sanitized == LEDGER_NAME || !taken.insert(sanitized.clone()) {
            return Err(fail(&format!("transliterated name `{}` already exists", sanitized)));
        }

        renames.push(Rename {
            from: path.clone(),
            to: sanitized,
        });
    }

    Ok(renames)
}

/// 把重命名应用到清单键上
pub fn rename_keys(ledger: &Ledger, renames: &[Rename]) -> Ledger {
    let mut renamed = ledger.clone();
    for rename in renames {
        if let Some(ts) = renamed.remove(&rename.from) {
            renamed.insert(rename.to.clone(), ts);
        }
    }
    renamed
}

/// 在本地执行重命名
pub fn apply_renames(root: &Path, renames: &[Rename]) -> Result<()> {
    for rename in renames {
        let from = local_path(root, &rename.from)?;
        let to = local_path(root, &rename.to)?;
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        std::fs::rename(&from, &to).map_err(|e| io_err(&from, e))?;
        info!("已重命名文件 {} -> {}", rename.from, rename.to);
    }
    Ok(())
}

/// 相对清单路径对应的本地路径，不允许越出 `root`
pub fn local_path(root: &Path, relative: &str) -> Result<PathBuf> {
    check_key(relative).map_err(|reason| SyncError::InvalidPath {
        path: relative.to_string(),
        reason: reason.to_string(),
    })?;
    Ok(relative
        .split('/')
        .fold(root.to_path_buf(), |acc, part| acc.join(part)))
}
