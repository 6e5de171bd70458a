//! 传输相关命令

use super::{load_engine, resolve_node};
use crate::core::{SyncEngine, TransferReport};
use crate::remote::RemoteEntry;
use crate::AppState;
use anyhow::{bail, Result};
use futures::future::join_all;
use tracing::{info, warn};

/// 下载选中的节点
///
/// 任一选中节点下存在本地修改且未确认时拒绝执行。
pub async fn download_nodes(
    engine: &SyncEngine,
    paths: &[String],
    assume_yes: bool,
) -> Result<Vec<(String, TransferReport)>> {
    let tree = engine.tree();
    let selection = paths
        .iter()
        .map(|p| resolve_node(&tree, p))
        .collect::<Result<Vec<_>>>()?;

    if !assume_yes && engine.needs_overwrite_confirmation(&selection) {
        bail!("下载会覆盖本地修改，确认后使用 --yes 重新执行");
    }

    // 各选中节点并发下载，单个节点内部按顺序
    let results = join_all(selection.iter().map(|&node| engine.download(node))).await;

    let mut reports = Vec::with_capacity(paths.len());
    for (path, result) in paths.iter().zip(results) {
        let report = result?;
        if report.is_success() {
            info!("下载完成: {} ({} 个节点)", path, report.completed.len());
        } else {
            warn!(
                "下载未全部完成: {} (失败 {} 个, 取消: {})",
                path,
                report.failures.len(),
                report.cancelled
            );
        }
        reports.push((path.clone(), report));
    }
    Ok(reports)
}

pub async fn download(
    state: &AppState,
    paths: &[String],
    assume_yes: bool,
) -> Result<Vec<(String, TransferReport)>> {
    let engine = load_engine(state).await?;
    download_nodes(&engine, paths, assume_yes).await
}

/// 上传单个文件（不递归）
pub async fn upload(state: &AppState, path: &str) -> Result<RemoteEntry> {
    let engine = load_engine(state).await?;
    let node = resolve_node(&engine.tree(), path)?;
    let entry = engine.upload(node).await?;
    info!("上传完成: {} -> {}", path, entry.id);
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::remote::MemoryStore;
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_download_requires_confirmation_for_local_changes() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let root = store.add_folder(None, "Projects");
        let old = Utc::now() - Duration::hours(1);
        let file = store.add_file(Some(&root), "a.txt", b"remote", old);

        std::fs::create_dir_all(dir.path().join("Projects")).unwrap();
        std::fs::write(dir.path().join("Projects/a.txt"), b"edited locally").unwrap();

        let config = EngineConfig::default().with_download_root(dir.path().to_string_lossy());
        let engine = SyncEngine::new(store.clone(), config, vec![root]);
        engine.rebuild().await.unwrap();

        let paths = vec!["Projects".to_string()];
        assert!(download_nodes(&engine, &paths, false).await.is_err());
        assert_eq!(
            std::fs::read(dir.path().join("Projects/a.txt")).unwrap(),
            b"edited locally"
        );

        let reports = download_nodes(&engine, &paths, true).await.unwrap();
        assert!(reports[0].1.is_success());
        assert_eq!(
            std::fs::read(dir.path().join("Projects/a.txt")).unwrap(),
            store.content(&file).unwrap().as_ref()
        );
    }

    #[tokio::test]
    async fn test_download_unknown_path() {
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(store, EngineConfig::default(), Vec::new());
        let err = download_nodes(&engine, &["Nope".to_string()], true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Nope"));
    }
}
