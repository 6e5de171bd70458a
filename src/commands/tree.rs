//! 树浏览相关命令：tree 风格打印、单节点状态、JSON 导出
//!
//! 只通过 `TreeModel` 访问树。

use super::{load_engine, resolve_node};
use crate::core::{Column, NodeId, TreeModel};
use crate::AppState;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

/// 打印选项
#[derive(Debug, Clone, Default)]
pub struct TreeOptions {
    /// 最多显示的层数（根为第 0 层）
    pub max_depth: Option<usize>,
    /// 追加状态列
    pub show_status: bool,
}

/// 以 `tree` 命令的样式渲染
pub fn render_tree(model: &TreeModel, options: &TreeOptions) -> String {
    let mut out = String::new();
    // (父节点, 行号, 前缀, 深度)
    let mut stack: Vec<(Option<NodeId>, usize, String, usize)> = vec![(None, 0, String::new(), 0)];

    while let Some((parent, row, prefix, depth)) = stack.pop() {
        let count = model.child_count(parent);
        let Some(node) = model.child(parent, row) else {
            continue;
        };
        let last = row + 1 == count;

        // 同级的下一行稍后处理
        if !last {
            stack.push((parent, row + 1, prefix.clone(), depth));
        }

        let connector = match (parent, last) {
            (None, _) => "",
            (Some(_), true) => "└── ",
            (Some(_), false) => "├── ",
        };
        out.push_str(&prefix);
        out.push_str(connector);
        out.push_str(&model.display_value(node, Column::Name));
        if options.show_status {
            out.push_str(&format!("  [{}]", model.status_of(node)));
        }
        out.push('\n');

        let within_depth = options.max_depth.map_or(true, |max| depth < max);
        if within_depth && model.child_count(Some(node)) > 0 {
            let child_prefix = match (parent, last) {
                (None, _) => prefix.clone(),
                (Some(_), true) => format!("{}    ", prefix),
                (Some(_), false) => format!("{}│   ", prefix),
            };
            stack.push((Some(node), 0, child_prefix, depth + 1));
        }
    }
    out
}

fn node_json(model: &TreeModel, node: NodeId) -> Value {
    let children: Vec<Value> = (0..model.child_count(Some(node)))
        .filter_map(|row| model.child(Some(node), row))
        .map(|child| node_json(model, child))
        .collect();

    json!({
        "name": model.display_value(node, Column::Name),
        "id": model.display_value(node, Column::Id),
        "kind": model.tree().node(node).kind(),
        "status": model.status_of(node),
        "modified": model.display_value(node, Column::Modified),
        "children": children,
    })
}

/// 导出整棵树
pub fn export_json(model: &TreeModel) -> Value {
    let roots: Vec<Value> = (0..model.child_count(None))
        .filter_map(|row| model.child(None, row))
        .map(|root| node_json(model, root))
        .collect();
    Value::Array(roots)
}

/// 一个节点的所有列
pub fn describe_node(model: &TreeModel, node: NodeId) -> Vec<(&'static str, String)> {
    Column::ALL
        .iter()
        .map(|c| (c.header(), model.display_value(node, *c)))
        .collect()
}

pub async fn show_tree(state: &AppState, options: &TreeOptions) -> Result<String> {
    let engine = load_engine(state).await?;
    Ok(render_tree(&engine.model(), options))
}

pub async fn show_status(state: &AppState, path: &str) -> Result<Vec<(&'static str, String)>> {
    let engine = load_engine(state).await?;
    let model = engine.model();
    let node = resolve_node(model.tree(), path)?;
    Ok(describe_node(&model, node))
}

/// 导出到文件，未指定时返回字符串
pub async fn export_tree(state: &AppState, output: Option<&Path>) -> Result<Option<String>> {
    let engine = load_engine(state).await?;
    let content = serde_json::to_string_pretty(&export_json(&engine.model()))?;
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("写入导出文件失败: {:?}", path))?;
            info!("已导出到 {:?}", path);
            Ok(None)
        }
        None => Ok(Some(content)),
    }
}
