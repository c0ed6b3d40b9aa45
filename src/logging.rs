//! 日志模块 - 控制台日志和按大小轮转的文件日志

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "modelsync.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否写日志文件
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志目录，默认在配置目录下
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

fn default_max_size_mb() -> u32 {
    5
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_level(),
            max_size_mb: default_max_size_mb(),
            dir: None,
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            crate::dirs::config_dir()
                .map(|p| p.join("modelsync"))
                .unwrap_or_else(|| PathBuf::from(".modelsync"))
                .join("logs")
        })
    }
}

/// 超过大小限制时把当前文件改名为 `.old` 并重新打开
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    written: u64,
    writer: Option<BufWriter<File>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let file_path = log_dir.join(LOG_FILE_NAME);
        let max_size = u64::from(max_size_mb.max(1)) * 1024 * 1024;

        let mut writer = Self {
            file_path,
            max_size,
            written: 0,
            writer: None,
        };
        writer.open()?;
        Ok(writer)
    }

    fn open(&mut self) -> io::Result<()> {
        let existing = fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0);
        if existing > self.max_size {
            self.rotate()?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        self.written = fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0);
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }
        let backup = self.file_path.with_extension("log.old");
        if backup.exists() {
            fs::remove_file(&backup)?;
        }
        if self.file_path.exists() {
            fs::rename(&self.file_path, &backup)?;
        }
        Ok(())
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > self.max_size {
            self.rotate()?;
            self.open()?;
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log writer not available"))?;
        let n = writer.write(buf)?;
        writer.flush()?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

/// 初始化日志系统
///
/// 控制台总是输出到 stderr；`verbose` 把级别提升到 debug。返回的 guard
/// 需要保留到进程结束，否则文件日志可能丢失最后几行。
pub fn init_logging(config: &LogConfig, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };
    let env_filter = || {
        let mut filter = EnvFilter::from_default_env().add_directive(level.into());
        for directive in ["hyper=warn", "reqwest=warn", "opendal=warn"] {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        filter
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(env_filter());

    if !config.enabled {
        let _ = tracing_subscriber::registry().with(console_layer).try_init();
        return None;
    }

    match SizeRotatingWriter::new(&config.log_dir(), config.max_size_mb) {
        Ok(file_writer) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_filter(env_filter());

            let _ = tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .try_init();
            Some(guard)
        }
        Err(e) => {
            // 文件日志创建失败，只用控制台
            let _ = tracing_subscriber::registry().with(console_layer).try_init();
            tracing::warn!("无法创建日志文件: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rotates_when_file_exceeds_limit() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SizeRotatingWriter::new(tmp.path(), 1).unwrap();

        let chunk = vec![b'x'; 600 * 1024];
        writer.write_all(&chunk).unwrap();
        writer.write_all(&chunk).unwrap();
        writer.write_all(b"after rotation\n").unwrap();
        writer.flush().unwrap();

        let old = tmp.path().join("modelsync.log.old");
        assert!(old.exists());
        assert_eq!(fs::metadata(&old).unwrap().len(), 1200 * 1024);
        assert_eq!(
            fs::read_to_string(tmp.path().join(LOG_FILE_NAME)).unwrap(),
            "after rotation\n"
        );
    }

    #[test]
    fn level_names_are_case_insensitive() {
        let config = LogConfig {
            level: "DEBUG".into(),
            ..Default::default()
        };
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogConfig::default().tracing_level(), tracing::Level::INFO);
    }
}
