//! assetsync - 本地目录与云端网盘的树形对账与同步引擎
//!
//! 数据流：
//! - `Authenticator` 连接得到 `RemoteStore`，`RemoteTreeBuilder` 构建远程树
//! - `SettingsStore` 提供下载目录，`LocalTreeBuilder` 构建本地树
//! - `TreeMerger` 按派生路径合并两棵树，`StatusClassifier` 在读取时计算同步状态
//! - `TransferEngine` 执行下载 / 上传，`TreeModel` 向任意界面层暴露层级结构

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod remote;

pub use config::{EngineConfig, JsonSettingsStore, RemoteConfig, SettingsStore, DOWNLOAD_DIRECTORY_KEY};
pub use core::{
    Column, LocalTreeBuilder, NodeId, NodeKind, Origin, PathResolver, RemoteMeta,
    RemoteTreeBuilder, Status, StatusClassifier, SyncEngine, SyncTree, TransferEngine,
    TransferReport, TreeHandle, TreeMerger, TreeModel,
};
pub use error::{
    AuthError, ConfigurationError, Error, FilesystemError, RemoteError, RemoteFetchError,
    TransferError,
};
pub use remote::{DigestKind, ListQuery, RemoteEntry, RemoteStore};

use std::path::PathBuf;

/// 应用状态，在命令之间共享
#[derive(Debug, Clone)]
pub struct AppState {
    pub config_dir: PathBuf,
}

impl AppState {
    /// 未指定时使用默认应用配置目录
    pub fn new(config_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_dir = config_dir.unwrap_or_else(dirs::app_config_dir);
        std::fs::create_dir_all(&config_dir)?;
        tracing::debug!("配置目录: {:?}", config_dir);
        Ok(Self { config_dir })
    }

    pub fn settings(&self) -> Result<JsonSettingsStore, ConfigurationError> {
        JsonSettingsStore::open(&self.config_dir)
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigurationError> {
        let settings = self.settings()?;
        Ok(EngineConfig::load(&self.config_dir, &settings))
    }

    /// 连接远程存储并创建同步引擎（尚未构建树）
    pub async fn connect(&self) -> anyhow::Result<SyncEngine> {
        let remote_config = RemoteConfig::load(&self.config_dir).ok_or_else(|| {
            anyhow::anyhow!("未配置远程存储，请先运行 `assetsync config remote`")
        })?;
        let root_ids = remote::require_root_ids(&remote_config)?.to_vec();
        let store = remote::connect_store(&remote_config, &self.config_dir).await?;
        Ok(SyncEngine::new(store, self.engine_config()?, root_ids))
    }
}

/// 平台相关目录
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            home_dir().map(|h| h.join("Library").join("Application Support"))
        } else {
            // Linux：优先 XDG_CONFIG_HOME
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .or_else(|| home_dir().map(|h| h.join(".config")))
        }
    }

    pub fn home_dir() -> Option<PathBuf> {
        let var = if cfg!(target_os = "windows") {
            "USERPROFILE"
        } else {
            "HOME"
        };
        std::env::var(var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }

    /// 应用配置目录：`<config_dir>/assetsync`
    pub fn app_config_dir() -> PathBuf {
        config_dir()
            .map(|p| p.join("assetsync"))
            .unwrap_or_else(|| PathBuf::from(".assetsync"))
    }
}
