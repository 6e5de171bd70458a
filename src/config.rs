//! 应用配置模块
//!
//! 所有配置集中在 `<config_dir>/config.json`，按节存放：
//! `settings`（用户设置键值）、`engine`（引擎参数）、`remote`（远程存储）、`log`（日志）。

use crate::core::PathResolver;
use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 下载目录设置键
pub const DOWNLOAD_DIRECTORY_KEY: &str = "Download Directory";

pub(crate) const CONFIG_FILE_NAME: &str = "config.json";

/// 读取整个 config.json，文件不存在时返回空对象
pub(crate) fn read_config_json(config_file: &Path) -> Result<serde_json::Value, ConfigurationError> {
    let content = match fs::read_to_string(config_file) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(serde_json::json!({})),
        Err(source) => {
            return Err(ConfigurationError::Io {
                path: config_file.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content).map_err(|source| ConfigurationError::Parse {
        path: config_file.to_path_buf(),
        source,
    })
}

/// 更新 config.json 中的某一节，保留其他节
pub(crate) fn write_config_section(
    config_file: &Path,
    section: &str,
    value: serde_json::Value,
) -> Result<(), ConfigurationError> {
    let io_err = |source| ConfigurationError::Io {
        path: config_file.to_path_buf(),
        source,
    };

    if let Some(dir) = config_file.parent() {
        fs::create_dir_all(dir).map_err(io_err)?;
    }

    // 现有文件损坏时从空对象重建
    let mut config = read_config_json(config_file).unwrap_or_else(|_| serde_json::json!({}));
    if !config.is_object() {
        config = serde_json::json!({});
    }
    config[section] = value;

    let content = serde_json::to_string_pretty(&config).map_err(|source| {
        ConfigurationError::Parse {
            path: config_file.to_path_buf(),
            source,
        }
    })?;
    fs::write(config_file, content).map_err(io_err)
}

/// 读取 config.json 中的某一节并反序列化；缺失或格式不对时返回 None
pub(crate) fn load_section<T: serde::de::DeserializeOwned>(config_dir: &Path, section: &str) -> Option<T> {
    let config = read_config_json(&config_dir.join(CONFIG_FILE_NAME)).ok()?;
    let value = config.get(section)?.clone();
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("配置节 {} 格式错误，使用默认值: {}", section, e);
            None
        }
    }
}

/// 用户设置存储
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;

    /// 写入并持久化
    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigurationError>;
}

/// 基于 config.json `settings` 节的设置存储
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    config_file: PathBuf,
    settings: BTreeMap<String, String>,
}

impl JsonSettingsStore {
    pub fn open(config_dir: &Path) -> Result<Self, ConfigurationError> {
        let config_file = config_dir.join(CONFIG_FILE_NAME);
        let config = read_config_json(&config_file)?;

        let settings = match config.get("settings") {
            Some(v) => serde_json::from_value(v.clone()).map_err(|source| {
                ConfigurationError::Parse {
                    path: config_file.clone(),
                    source,
                }
            })?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            config_file,
            settings,
        })
    }

    pub fn path(&self) -> &Path {
        &self.config_file
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.settings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.settings.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigurationError> {
        self.settings.insert(key.to_string(), value.to_string());
        let value = serde_json::to_value(&self.settings).map_err(|source| {
            ConfigurationError::Parse {
                path: self.config_file.clone(),
                source,
            }
        })?;
        write_config_section(&self.config_file, "settings", value)?;
        tracing::debug!("已保存设置 {} = {}", key, self.settings[key]);
        Ok(())
    }
}

/// 引擎配置，显式传给各个构建器 / 解析器 / 传输引擎
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// 下载根目录（原始字符串，支持 ~ 与环境变量），来自 `Download Directory` 设置
    #[serde(skip)]
    pub download_root: Option<String>,
    /// 修改时间容差（秒），在此范围内视为"两边都不更新"
    pub time_tolerance_seconds: i64,
    /// 远程 / 本地树的最大递归深度
    pub max_depth: usize,
    /// 远程列表只返回文件夹
    pub folders_only: bool,
    /// 本地扫描排除规则（glob），默认为空
    ///
    /// 被排除的文件即使远程有同名副本也不会标记为本地存在，下载时不会触发覆盖确认。
    pub exclude_patterns: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_root: None,
            time_tolerance_seconds: 2,
            max_depth: 64,
            folders_only: false,
            exclude_patterns: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// 从 config.json 的 `engine` 节加载，下载目录取自设置存储
    pub fn load(config_dir: &Path, settings: &dyn SettingsStore) -> Self {
        let mut config: EngineConfig = load_section(config_dir, "engine").unwrap_or_default();
        config.download_root = settings.get(DOWNLOAD_DIRECTORY_KEY);
        config
    }

    /// 只从设置存储构建，其余参数取默认值
    pub fn from_settings(settings: &dyn SettingsStore) -> Self {
        Self {
            download_root: settings.get(DOWNLOAD_DIRECTORY_KEY),
            ..Default::default()
        }
    }

    pub fn with_download_root(mut self, root: impl Into<String>) -> Self {
        self.download_root = Some(root.into());
        self
    }

    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(self.download_root.as_deref())
    }
}

/// 远程存储类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteType {
    Gdrive,
    Fs,
    WebDav,
    S3,
}

/// 远程存储配置（config.json 的 `remote` 节）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(rename = "type")]
    pub typ: RemoteType,
    /// 根节点标识；gdrive 为文件夹 id，其余为存储内路径
    #[serde(default)]
    pub root_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl RemoteConfig {
    pub fn new(typ: RemoteType) -> Self {
        Self {
            typ,
            root_ids: Vec::new(),
            client_id: None,
            client_secret: None,
            credentials_path: None,
            path: None,
            endpoint: None,
            username: None,
            password: None,
            root: None,
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            prefix: None,
        }
    }

    pub fn load(config_dir: &Path) -> Option<Self> {
        load_section(config_dir, "remote")
    }

    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigurationError> {
        let config_file = config_dir.join(CONFIG_FILE_NAME);
        let value = serde_json::to_value(self).map_err(|source| ConfigurationError::Parse {
            path: config_file.clone(),
            source,
        })?;
        write_config_section(&config_file, "remote", value)
    }

    /// 取必填字段
    pub fn require<'a>(
        field: &'a Option<String>,
        name: &'static str,
    ) -> Result<&'a str, ConfigurationError> {
        field
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigurationError::MissingField(name))
    }

    /// 凭据文件路径，未配置时放在配置目录下
    pub fn credentials_file(&self, config_dir: &Path) -> PathBuf {
        self.credentials_path
            .as_deref()
            .map(crate::core::path::expand_path)
            .unwrap_or_else(|| config_dir.join("credentials.json"))
    }
}
