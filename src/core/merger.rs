//! 树合并
//!
//! 以远程树的副本为基础，按派生路径（规范化后的名称链）把本地节点对上去。
//! 只在已匹配的父节点下查找，未匹配的远程子树不会被搜索。
//! 对不上的本地节点连同整个子树以仅本地的身份挂到最近的已匹配父节点下，本地数据不会丢失。

use super::tree::{NodeId, Origin, SyncTree};
use tracing::{debug, info, warn};

/// 树合并器
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeMerger;

impl TreeMerger {
    pub fn new() -> Self {
        Self
    }

    /// 合并两棵树；纯内存操作，不会失败
    pub fn merge(&self, remote: &SyncTree, local: &SyncTree) -> SyncTree {
        let mut merged = remote.clone();
        let mut matched = 0usize;
        let mut spliced = 0usize;

        // (本地节点, 合并树中的父节点, 父节点是否来自匹配)
        let mut stack: Vec<(NodeId, Option<NodeId>, bool)> = local
            .roots()
            .iter()
            .rev()
            .map(|&id| (id, None, true))
            .collect();

        while let Some((local_id, parent, matching)) = stack.pop() {
            let node = local.node(local_id);

            let existing = if matching {
                merged.find_child(parent, node.name())
            } else {
                None
            };

            let (target, still_matching) = match existing {
                Some(target) => {
                    if merged.node(target).kind() != node.kind() {
                        warn!(
                            "本地与远程类型不一致，按同一路径处理: {:?}",
                            merged.relative_path(target)
                        );
                    }
                    merged.mark_local(target);
                    matched += 1;
                    (target, true)
                }
                None => {
                    let target = match parent {
                        Some(p) => merged.append_child(p, node.name(), node.kind(), Origin::Local),
                        None => merged.add_root(node.name(), node.kind(), Origin::Local),
                    };
                    if matching {
                        debug!("仅本地存在: {:?}", merged.relative_path(target));
                    }
                    spliced += 1;
                    (target, false)
                }
            };

            stack.extend(
                node.children()
                    .iter()
                    .rev()
                    .map(|&child| (child, Some(target), still_matching)),
            );
        }

        info!(
            "合并完成: 远程 {} 个节点, 本地匹配 {} 个, 仅本地 {} 个",
            remote.len(),
            matched,
            spliced
        );
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::path::PathResolver;
    use crate::core::tree::{NodeKind, RemoteMeta};
    use std::path::{Path, PathBuf};

    fn remote(id: &str) -> Origin {
        Origin::Remote(RemoteMeta {
            id: id.to_string(),
            mime_type: "application/octet-stream".to_string(),
            modified_time: None,
            checksum: None,
            url: None,
            size: None,
        })
    }

    fn remote_tree() -> SyncTree {
        let mut t = SyncTree::new(PathResolver::new(Some("/data")));
        let p = t.add_root("Projects", NodeKind::Folder, remote("p"));
        let a = t.append_child(p, "Alpha", NodeKind::Folder, remote("a"));
        t.append_child(a, "deep.png", NodeKind::File, remote("d"));
        t.append_child(p, "Beta", NodeKind::File, remote("b"));
        t
    }

    fn all_paths(tree: &SyncTree) -> Vec<PathBuf> {
        tree.iter().map(|id| tree.relative_path(id)).collect()
    }

    #[test]
    fn test_empty_local_yields_remote_structure() {
        let r = remote_tree();
        let merged = TreeMerger::new().merge(&r, &SyncTree::default());
        assert_eq!(all_paths(&merged), all_paths(&r));
        assert!(merged.iter().all(|id| !merged.node(id).has_local()));
    }

    #[test]
    fn test_matches_and_splices() {
        let r = remote_tree();
        let mut l = SyncTree::new(PathResolver::new(Some("/data")));
        let p = l.add_root("Projects", NodeKind::Folder, Origin::Local);
        l.append_child(p, "Beta", NodeKind::File, Origin::Local);
        let g = l.append_child(p, "Gamma", NodeKind::Folder, Origin::Local);
        l.append_child(g, "g.txt", NodeKind::File, Origin::Local);
        l.add_root("Loose", NodeKind::File, Origin::Local);

        let merged = TreeMerger::new().merge(&r, &l);

        // 不丢节点
        let paths = all_paths(&merged);
        for path in all_paths(&r).into_iter().chain(all_paths(&l)) {
            assert!(paths.contains(&path), "缺少 {:?}", path);
        }

        let find = |p: &str| merged.find_by_path(Path::new(p)).unwrap();
        let projects = find("Projects");
        assert!(merged.node(projects).has_local() && merged.node(projects).has_remote());
        assert!(merged.node(find("Projects/Beta")).has_local());
        assert!(!merged.node(find("Projects/Alpha")).has_local());
        assert!(!merged.node(find("Projects/Gamma")).has_remote());
        assert!(!merged.node(find("Projects/Gamma/g.txt")).has_remote());
        assert!(!merged.node(find("Loose")).has_remote());
        assert_eq!(merged.roots().len(), 2);

        // 合并后 row 仍然连续
        let kids = merged.node(projects).children();
        for (row, &c) in kids.iter().enumerate() {
            assert_eq!(merged.node(c).row(), row);
            assert_eq!(merged.node(c).parent(), Some(projects));
        }
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let r = remote_tree();
        let mut l = SyncTree::new(PathResolver::new(Some("/data")));
        l.add_root("projects", NodeKind::Folder, Origin::Local);

        let merged = TreeMerger::new().merge(&r, &l);
        assert_eq!(merged.roots().len(), 2);
        let lower = merged.find_by_path(Path::new("projects")).unwrap();
        assert!(!merged.node(lower).has_remote());
    }
}
