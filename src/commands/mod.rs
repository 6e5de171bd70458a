//! 命令处理
//!
//! 每个命令只依赖 `AppState` 和引擎公开的接口，命令行入口在 main.rs。

pub mod connection;
pub mod log;
pub mod settings;
pub mod transfer;
pub mod tree;

use crate::core::{NodeId, SyncEngine, SyncTree};
use crate::AppState;
use anyhow::{anyhow, Result};
use std::path::Path;
use tracing::warn;

/// 连接远程并构建合并树
pub async fn load_engine(state: &AppState) -> Result<SyncEngine> {
    let engine = state.connect().await?;
    let report = engine.rebuild().await?;
    for failure in &report.remote_failures {
        warn!("远程子树获取失败: {}", failure);
    }
    Ok(engine)
}

/// 按相对路径（从根名称开始，`/` 分隔）查找节点
pub fn resolve_node(tree: &SyncTree, path: &str) -> Result<NodeId> {
    let trimmed = path.trim_matches('/');
    tree.find_by_path(Path::new(trimmed))
        .ok_or_else(|| anyhow!("找不到节点: {}", path))
}
