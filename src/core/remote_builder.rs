//! 远程树构建
//!
//! 从若干根 id 出发逐层列出子条目。用显式栈做深度优先，深度受 `max_depth` 限制。
//! 单个目录列表失败不影响其他子树：该节点保持没有子节点，失败记录在 `RemoteBuild::failures`。

use super::tree::{NodeId, NodeKind, Origin, SyncTree};
use crate::config::EngineConfig;
use crate::core::path::{normalize_segment, PathResolver};
use crate::error::RemoteFetchError;
use crate::remote::{ListQuery, RemoteStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 远程构建结果
#[derive(Debug)]
pub struct RemoteBuild {
    pub tree: SyncTree,
    /// 列表失败的子树，用于区分"空目录"与"获取失败"
    pub failures: Vec<RemoteFetchError>,
}

impl RemoteBuild {
    /// 该节点的子列表是否获取失败
    pub fn failed(&self, id: NodeId) -> bool {
        self.failures.iter().any(|f| f.node == Some(id))
    }
}

/// 远程树构建器
pub struct RemoteTreeBuilder {
    store: Arc<dyn RemoteStore>,
    resolver: PathResolver,
    query: ListQuery,
    max_depth: usize,
}

impl RemoteTreeBuilder {
    pub fn new(store: Arc<dyn RemoteStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            resolver: config.resolver(),
            query: ListQuery::new().folders_only(config.folders_only),
            max_depth: config.max_depth,
        }
    }

    /// 为每个根 id 构建一棵子树
    pub async fn build(&self, root_ids: &[String]) -> RemoteBuild {
        info!(
            "开始构建远程树: {}, 根节点 {} 个",
            self.store.name(),
            root_ids.len()
        );

        let mut tree = SyncTree::new(self.resolver.clone());
        let mut failures = Vec::new();
        // (节点, 远程 id, 深度)
        let mut stack: Vec<(NodeId, String, usize)> = Vec::new();

        for root_id in root_ids {
            let entry = match self.store.fetch_metadata(root_id).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("获取根节点元数据失败，跳过: {} - {}", root_id, e);
                    failures.push(RemoteFetchError {
                        remote_id: root_id.clone(),
                        node: None,
                        source: e,
                    });
                    continue;
                }
            };

            if tree.find_child(None, &entry.title).is_some() {
                warn!("根节点名称重复，跳过: {} ({})", entry.title, root_id);
                continue;
            }

            let kind = entry.kind();
            let (name, meta) = entry.into_meta();
            let id = tree.add_root(name, kind, Origin::Remote(meta));
            if kind == NodeKind::Folder {
                stack.push((id, root_id.clone(), 0));
            }

            // 先把这个根的整棵子树建完，再处理下一个根
            self.expand(&mut tree, &mut stack, &mut failures).await;
        }

        info!(
            "远程树构建完成: {} 个节点, {} 个子树失败",
            tree.len(),
            failures.len()
        );
        RemoteBuild { tree, failures }
    }

    async fn expand(
        &self,
        tree: &mut SyncTree,
        stack: &mut Vec<(NodeId, String, usize)>,
        failures: &mut Vec<RemoteFetchError>,
    ) {
        while let Some((parent, remote_id, depth)) = stack.pop() {
            if depth >= self.max_depth {
                warn!(
                    "超过最大深度 {}，不再展开: {:?}",
                    self.max_depth,
                    tree.relative_path(parent)
                );
                continue;
            }

            let children = match self.store.list_children(&remote_id, &self.query).await {
                Ok(children) => children,
                Err(e) => {
                    warn!("列出子条目失败，子树按空处理: {} - {}", remote_id, e);
                    failures.push(RemoteFetchError {
                        remote_id,
                        node: Some(parent),
                        source: e,
                    });
                    continue;
                }
            };
            debug!("{} 下有 {} 个子条目", remote_id, children.len());

            // 列表顺序以存储返回为准，不重排
            let mut seen = HashSet::new();
            let mut folders = Vec::new();
            for entry in children {
                if !seen.insert(normalize_segment(&entry.title).into_owned()) {
                    warn!("同级名称重复，跳过: {} ({})", entry.title, entry.id);
                    continue;
                }
                let kind = entry.kind();
                let child_remote_id = entry.id.clone();
                let (name, meta) = entry.into_meta();
                let child = tree.append_child(parent, name, kind, Origin::Remote(meta));
                if kind == NodeKind::Folder {
                    folders.push((child, child_remote_id, depth + 1));
                }
            }

            // 逆序入栈，使第一个子文件夹最先展开
            stack.extend(folders.into_iter().rev());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use chrono::Utc;

    fn names(tree: &SyncTree, parent: Option<NodeId>) -> Vec<String> {
        tree.children_of(parent)
            .iter()
            .map(|&c| tree.node(c).name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_build_keeps_store_order() {
        let store = Arc::new(MemoryStore::new());
        let root = store.add_folder(None, "Projects");
        let alpha = store.add_folder(Some(&root), "Alpha");
        store.add_file(Some(&alpha), "a.png", b"png", Utc::now());
        store.add_folder(Some(&root), "Beta");
        store.add_file(Some(&root), "readme.txt", b"hi", Utc::now());

        let builder = RemoteTreeBuilder::new(store.clone(), &EngineConfig::default());
        let build = builder.build(&[root.clone()]).await;
        assert!(build.failures.is_empty());

        let tree = &build.tree;
        assert_eq!(names(tree, None), vec!["Projects"]);
        let projects = tree.roots()[0];
        assert_eq!(names(tree, Some(projects)), vec!["Alpha", "Beta", "readme.txt"]);
        let alpha_node = tree.find_by_path(std::path::Path::new("Projects/Alpha")).unwrap();
        assert_eq!(names(tree, Some(alpha_node)), vec!["a.png"]);
        assert!(tree.iter().all(|id| !tree.node(id).has_local()));
    }

    #[tokio::test]
    async fn test_listing_failure_isolated_to_subtree() {
        let store = Arc::new(MemoryStore::new());
        let root = store.add_folder(None, "Projects");
        let broken = store.add_folder(Some(&root), "Broken");
        store.add_file(Some(&broken), "hidden.bin", b"x", Utc::now());
        let ok = store.add_folder(Some(&root), "Ok");
        store.add_file(Some(&ok), "seen.bin", b"y", Utc::now());
        store.fail_listing(&broken);

        let builder = RemoteTreeBuilder::new(store.clone(), &EngineConfig::default());
        let build = builder.build(&[root]).await;

        assert_eq!(build.failures.len(), 1);
        let tree = &build.tree;
        let broken_node = tree.find_by_path(std::path::Path::new("Projects/Broken")).unwrap();
        let ok_node = tree.find_by_path(std::path::Path::new("Projects/Ok")).unwrap();
        assert!(tree.node(broken_node).children().is_empty());
        assert!(build.failed(broken_node));
        assert!(!build.failed(ok_node));
        assert_eq!(names(tree, Some(ok_node)), vec!["seen.bin"]);
    }

    #[tokio::test]
    async fn test_missing_root_and_depth_limit() {
        let store = Arc::new(MemoryStore::new());
        let root = store.add_folder(None, "Deep");
        let level1 = store.add_folder(Some(&root), "L1");
        store.add_folder(Some(&level1), "L2");

        let mut config = EngineConfig::default();
        config.max_depth = 1;
        let builder = RemoteTreeBuilder::new(store.clone(), &config);
        let build = builder.build(&["nope".to_string(), root]).await;

        assert_eq!(build.failures.len(), 1);
        assert!(build.failures[0].node.is_none());
        let tree = &build.tree;
        assert_eq!(names(tree, None), vec!["Deep"]);
        let l1 = tree.find_by_path(std::path::Path::new("Deep/L1")).unwrap();
        assert!(tree.node(l1).children().is_empty());
        assert!(!build.failed(l1));
    }
}
