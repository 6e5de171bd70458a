//! 连接检查

use crate::remote::{connect_store, require_root_ids};
use crate::{AppState, RemoteConfig, RemoteStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct TestConnectionResult {
    pub success: bool,
    pub message: String,
    pub details: Option<String>,
}

impl TestConnectionResult {
    fn failed(message: &str, details: impl ToString) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            details: Some(details.to_string()),
        }
    }
}

/// 依次读取每个根节点的元数据，确认凭据和根 id 可用
pub async fn check_roots(store: &Arc<dyn RemoteStore>, root_ids: &[String]) -> TestConnectionResult {
    let mut titles = Vec::with_capacity(root_ids.len());
    for id in root_ids {
        match store.fetch_metadata(id).await {
            Ok(entry) if entry.is_folder() => titles.push(entry.title),
            Ok(entry) => {
                return TestConnectionResult::failed(
                    "根节点不是文件夹",
                    format!("{} ({})", id, entry.mime_type),
                )
            }
            Err(e) => {
                warn!("根节点 {} 不可用: {}", id, e);
                return TestConnectionResult::failed("根节点不可用", format!("{}: {}", id, e));
            }
        }
    }

    info!("{} 连接成功", store.name());
    TestConnectionResult {
        success: true,
        message: format!("{} 连接成功", store.name()),
        details: Some(titles.join(", ")),
    }
}

pub async fn test_connection(state: &AppState) -> anyhow::Result<TestConnectionResult> {
    let Some(remote_config) = RemoteConfig::load(&state.config_dir) else {
        return Ok(TestConnectionResult::failed(
            "未配置远程存储",
            state.config_dir.display(),
        ));
    };
    let root_ids = match require_root_ids(&remote_config) {
        Ok(ids) => ids,
        Err(e) => return Ok(TestConnectionResult::failed("远程配置不完整", e)),
    };

    match connect_store(&remote_config, &state.config_dir).await {
        Ok(store) => Ok(check_roots(&store, root_ids).await),
        Err(e) => Ok(TestConnectionResult::failed("连接失败", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_check_roots() {
        let memory = Arc::new(MemoryStore::new());
        let folder = memory.add_folder(None, "Projects");
        let file = memory.add_file(None, "loose.txt", b"x", Utc::now());
        let store: Arc<dyn RemoteStore> = memory;

        let ok = check_roots(&store, &[folder.clone()]).await;
        assert!(ok.success);
        assert_eq!(ok.details.as_deref(), Some("Projects"));

        assert!(!check_roots(&store, &[folder.clone(), file]).await.success);
        assert!(!check_roots(&store, &["missing".to_string()]).await.success);
    }

    #[tokio::test]
    async fn test_unconfigured_remote() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::new(Some(dir.path().to_path_buf())).unwrap();
        let result = test_connection(&state).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "未配置远程存储");
    }
}
