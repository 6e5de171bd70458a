//! 日志模块 - 提供文件日志和大小管理功能

use crate::config::{load_section, write_config_section, CONFIG_FILE_NAME};
use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "assetsync.log";

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 从配置文件加载日志配置
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "log").unwrap_or_default()
    }

    /// 保存日志配置
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigurationError> {
        let config_file = config_dir.join(CONFIG_FILE_NAME);
        let value = serde_json::to_value(self).map_err(|source| ConfigurationError::Parse {
            path: config_file.clone(),
            source,
        })?;
        write_config_section(&config_file, "log", value)
    }

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
}

/// 日志目录
pub fn log_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("logs")
}

/// 带大小限制的日志写入器
///
/// 超过上限时把当前文件改名为 `.old`（只保留一份）后重新打开。
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE_NAME);
        let max_size = u64::from(max_size_mb.max(1)) * 1024 * 1024;

        let mut writer = Self {
            file_path,
            max_size,
            writer: None,
            written: 0,
        };
        writer.open()?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn open(&mut self) -> io::Result<()> {
        // 检查现有文件大小，如果超过限制则轮转
        let existing = fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0);
        if existing > self.max_size {
            self.rotate()?;
            self.written = 0;
        } else {
            self.written = existing;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    /// 轮转日志文件
    fn rotate(&self) -> io::Result<()> {
        let backup_path = self.file_path.with_extension("log.old");
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(&self.file_path, &backup_path)
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > self.max_size {
            // 关闭当前写入器
            if let Some(mut w) = self.writer.take() {
                let _ = w.flush();
            }
            self.rotate()?;
            self.open()?;
        }

        if self.writer.is_none() {
            self.open()?;
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "日志文件不可用"))?;
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
/// 文件日志总是写入（除非配置禁用），`verbose` 时同时输出到控制台。
/// 返回的 guard 必须在程序结束前保持存活，否则缓冲中的日志会丢失。
pub fn init_logging(config_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let config = LogConfig::load(config_dir);

    // 创建日志级别过滤器
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };
    let mut env_filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "opendal=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    let console_layer = verbose.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
    });

    let (file_layer, guard) = if config.enabled {
        match SizeRotatingWriter::new(&log_dir(config_dir), config.max_size_mb) {
            Ok(writer) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(writer);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                eprintln!("无法创建日志文件: {}", e);
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    guard
}
