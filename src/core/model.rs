//! 层级访问器
//!
//! 界面层（树控件、命令行打印、JSON 导出）只通过这里的几个方法访问合并树：
//! `child_count`、`child`、`parent`、`row_of`、`display_value`、`status_of`。
//! `None` 表示不可见的顶层，其子节点就是各个根。

use super::classifier::{local_modified_time, Status, StatusClassifier};
use super::tree::{NodeId, SyncTree};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// 显示列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Column {
    Name,
    /// 远程标识
    Id,
    Status,
    Modified,
}

impl Column {
    pub const ALL: [Column; 4] = [Column::Name, Column::Id, Column::Status, Column::Modified];

    pub fn header(&self) -> &'static str {
        match self {
            Column::Name => "Name",
            Column::Id => "Id",
            Column::Status => "Status",
            Column::Modified => "Modified",
        }
    }
}

/// 只读的树模型，持有某一时刻的树快照
#[derive(Debug, Clone)]
pub struct TreeModel {
    tree: Arc<SyncTree>,
    classifier: StatusClassifier,
}

impl TreeModel {
    pub fn new(tree: Arc<SyncTree>, classifier: StatusClassifier) -> Self {
        Self { tree, classifier }
    }

    pub fn tree(&self) -> &SyncTree {
        &self.tree
    }

    pub fn column_count(&self) -> usize {
        Column::ALL.len()
    }

    pub fn child_count(&self, parent: Option<NodeId>) -> usize {
        self.tree.children_of(parent).len()
    }

    pub fn child(&self, parent: Option<NodeId>, row: usize) -> Option<NodeId> {
        self.tree.children_of(parent).get(row).copied()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.node(node).parent()
    }

    pub fn row_of(&self, node: NodeId) -> usize {
        self.tree.node(node).row()
    }

    pub fn status_of(&self, node: NodeId) -> Status {
        self.classifier.classify(&self.tree, node)
    }

    /// 修改时间：有远程副本时取远程时间，否则读本地文件
    pub fn modified_time(&self, node: NodeId) -> Option<DateTime<Utc>> {
        match self.tree.node(node).remote() {
            Some(meta) => meta.modified_time,
            None => self
                .tree
                .disk_path(node)
                .ok()
                .and_then(local_modified_time),
        }
    }

    pub fn display_value(&self, node: NodeId, column: Column) -> String {
        let n = self.tree.node(node);
        match column {
            Column::Name => n.name().to_string(),
            Column::Id => n.remote().map(|m| m.id.clone()).unwrap_or_default(),
            Column::Status => self.status_of(node).to_string(),
            Column::Modified => self
                .modified_time(node)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::core::path::PathResolver;
    use crate::core::tree::{NodeKind, Origin, RemoteMeta};
    use crate::remote::DigestKind;

    fn model() -> TreeModel {
        let mut tree = SyncTree::new(PathResolver::unconfigured());
        let p = tree.add_root(
            "Projects",
            NodeKind::Folder,
            Origin::Remote(RemoteMeta {
                id: "R0".to_string(),
                mime_type: crate::remote::FOLDER_MIME_TYPE.to_string(),
                modified_time: None,
                checksum: None,
                url: None,
                size: None,
            }),
        );
        for name in ["a", "b", "c"] {
            let f = tree.append_child(p, name, NodeKind::Folder, Origin::Local);
            tree.append_child(f, "leaf", NodeKind::File, Origin::Local);
        }
        tree.add_root("Other", NodeKind::File, Origin::Local);

        let classifier = StatusClassifier::new(&EngineConfig::default(), DigestKind::Md5);
        TreeModel::new(Arc::new(tree), classifier)
    }

    /// 标准树模型约束：child(n, row) 的父节点是 n，row_of 等于 row
    #[test]
    fn test_tree_model_invariants() {
        let m = model();
        let mut pending: Vec<Option<NodeId>> = vec![None];
        let mut visited = 0;
        while let Some(parent) = pending.pop() {
            let count = m.child_count(parent);
            assert_eq!(count, m.tree().children_of(parent).len());
            for row in 0..count {
                let c = m.child(parent, row).unwrap();
                assert_eq!(m.parent(c), parent);
                assert_eq!(m.row_of(c), row);
                pending.push(Some(c));
                visited += 1;
            }
            assert_eq!(m.child(parent, count), None);
        }
        assert_eq!(visited, m.tree().len());
    }

    #[test]
    fn test_display_values() {
        let m = model();
        let p = m.child(None, 0).unwrap();
        assert_eq!(m.display_value(p, Column::Name), "Projects");
        assert_eq!(m.display_value(p, Column::Id), "R0");
        assert_eq!(m.display_value(p, Column::Status), "remote only");
        assert_eq!(m.display_value(p, Column::Modified), "");

        let other = m.child(None, 1).unwrap();
        assert_eq!(m.display_value(other, Column::Id), "");
        assert_eq!(m.status_of(other), Status::LocalOnly);
        assert_eq!(m.column_count(), 4);
    }
}
