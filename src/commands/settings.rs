//! 配置相关命令

use crate::config::{RemoteConfig, SettingsStore, DOWNLOAD_DIRECTORY_KEY};
use crate::core::PathResolver;
use crate::AppState;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::info;

const MASK: &str = "******";

/// 隐藏密钥类字段
fn mask_remote(remote: &RemoteConfig) -> Value {
    let mut masked = remote.clone();
    for secret in [
        &mut masked.client_secret,
        &mut masked.password,
        &mut masked.secret_key,
    ] {
        if secret.is_some() {
            *secret = Some(MASK.to_string());
        }
    }
    serde_json::to_value(masked).unwrap_or(Value::Null)
}

/// 当前配置概览
pub fn show_config(state: &AppState) -> Result<Value> {
    let settings = state.settings()?;
    let engine = state.engine_config()?;
    let remote = RemoteConfig::load(&state.config_dir);

    let settings_map: serde_json::Map<String, Value> = settings
        .entries()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();

    Ok(json!({
        "configFile": settings.path(),
        "settings": settings_map,
        "engine": engine,
        "remote": remote.as_ref().map(mask_remote),
        "log": super::log::get_log_config(state),
    }))
}

/// 设置下载目录，先校验能否解析
pub fn set_download_dir(state: &AppState, raw: &str) -> Result<std::path::PathBuf> {
    let resolver = PathResolver::new(Some(raw));
    let root = resolver
        .root()
        .with_context(|| format!("无效的下载目录: {}", raw))?
        .to_path_buf();

    let mut settings = state.settings()?;
    settings.set(DOWNLOAD_DIRECTORY_KEY, raw)?;
    info!("下载目录已设置: {} -> {:?}", raw, root);
    Ok(root)
}

/// 保存远程存储配置
pub fn set_remote(state: &AppState, remote: &RemoteConfig) -> Result<()> {
    crate::remote::require_root_ids(remote)?;
    remote.save(&state.config_dir)?;
    info!("远程存储配置已保存: {:?}", remote.typ);
    Ok(())
}
