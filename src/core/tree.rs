//! 同步树
//!
//! 节点存放在 arena（`Vec<Node>`）里，父子关系用 `NodeId` 下标表示，
//! 不存在循环引用。`Origin` 是带数据的枚举，没有远程副本的节点无法携带远程元数据。

use super::path::{normalize_segment, PathResolver};
use crate::error::ConfigurationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// 节点在 arena 中的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

/// 远程元数据（来自 RemoteStore 的缓存）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMeta {
    pub id: String,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
    pub checksum: Option<String>,
    pub url: Option<String>,
    pub size: Option<u64>,
}

/// 节点来源
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    /// 仅远程存在
    Remote(RemoteMeta),
    /// 仅本地存在；本地元数据按需从磁盘读取
    Local,
    /// 两边都存在
    Both(RemoteMeta),
}

impl Origin {
    pub fn has_local(&self) -> bool {
        matches!(self, Origin::Local | Origin::Both(_))
    }

    pub fn has_remote(&self) -> bool {
        matches!(self, Origin::Remote(_) | Origin::Both(_))
    }

    pub fn remote(&self) -> Option<&RemoteMeta> {
        match self {
            Origin::Remote(meta) | Origin::Both(meta) => Some(meta),
            Origin::Local => None,
        }
    }

    /// 标记本地也存在
    fn into_both(self) -> Origin {
        match self {
            Origin::Remote(meta) | Origin::Both(meta) => Origin::Both(meta),
            Origin::Local => Origin::Local,
        }
    }
}

#[derive(Debug)]
pub struct Node {
    name: String,
    kind: NodeKind,
    origin: Origin,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    row: usize,
    /// 派生路径缓存，只在树重建时失效
    disk_path: OnceLock<PathBuf>,
}

impl Clone for Node {
    fn clone(&self) -> Self {
        // 复制出来的节点属于新树，路径缓存重新计算
        Self {
            name: self.name.clone(),
            kind: self.kind,
            origin: self.origin.clone(),
            parent: self.parent,
            children: self.children.clone(),
            row: self.row,
            disk_path: OnceLock::new(),
        }
    }
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn has_local(&self) -> bool {
        self.origin.has_local()
    }

    pub fn has_remote(&self) -> bool {
        self.origin.has_remote()
    }

    pub fn remote(&self) -> Option<&RemoteMeta> {
        self.origin.remote()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// 在兄弟节点中的位置
    pub fn row(&self) -> usize {
        self.row
    }
}

/// 一片森林：若干根节点及其子树
#[derive(Debug, Clone, Default)]
pub struct SyncTree {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
    resolver: PathResolver,
}

impl SyncTree {
    pub fn new(resolver: PathResolver) -> Self {
        Self {
            nodes: Vec::new(),
            roots: Vec::new(),
            resolver,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// 某节点的子节点；None 表示不可见的顶层（根节点列表）
    pub fn children_of(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(id) => &self.nodes[id.0].children,
            None => &self.roots,
        }
    }

    pub fn add_root(&mut self, name: impl Into<String>, kind: NodeKind, origin: Origin) -> NodeId {
        self.insert(None, name.into(), kind, origin)
    }

    pub fn append_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        kind: NodeKind,
        origin: Origin,
    ) -> NodeId {
        self.insert(Some(parent), name.into(), kind, origin)
    }

    /// 追加节点；row 等于追加前的兄弟数量，保证 0..len 连续
    fn insert(&mut self, parent: Option<NodeId>, name: String, kind: NodeKind, origin: Origin) -> NodeId {
        let id = NodeId(self.nodes.len());
        let siblings = match parent {
            Some(p) => &mut self.nodes[p.0].children,
            None => &mut self.roots,
        };
        let row = siblings.len();
        siblings.push(id);

        self.nodes.push(Node {
            name,
            kind,
            origin,
            parent,
            children: Vec::new(),
            row,
            disk_path: OnceLock::new(),
        });
        id
    }

    /// 标记节点本地存在
    pub(crate) fn mark_local(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.0];
        let origin = std::mem::replace(&mut node.origin, Origin::Local);
        node.origin = origin.into_both();
    }

    /// 按规范化名称在兄弟中查找
    pub fn find_child(&self, parent: Option<NodeId>, name: &str) -> Option<NodeId> {
        let wanted = normalize_segment(name);
        self.children_of(parent)
            .iter()
            .copied()
            .find(|&c| normalize_segment(&self.nodes[c.0].name) == wanted)
    }

    /// 按相对路径（从根名称开始）查找节点
    pub fn find_by_path(&self, relative: &Path) -> Option<NodeId> {
        let mut current: Option<NodeId> = None;
        for component in relative.components() {
            let segment = component.as_os_str().to_str()?;
            current = Some(self.find_child(current, segment)?);
        }
        current
    }

    /// 从根到该节点的名称链
    pub fn segments(&self, id: NodeId) -> Vec<&str> {
        let mut names: Vec<&str> = self.ancestors(id).map(|a| self.nodes[a.0].name.as_str()).collect();
        names.reverse();
        names
    }

    /// 规范化后的相对路径（不依赖下载目录）
    pub fn relative_path(&self, id: NodeId) -> PathBuf {
        self.segments(id)
            .into_iter()
            .map(|s| normalize_segment(s).into_owned())
            .collect()
    }

    /// 节点的派生磁盘路径，首次计算后缓存
    pub fn disk_path(&self, id: NodeId) -> Result<&Path, ConfigurationError> {
        let node = &self.nodes[id.0];
        if let Some(path) = node.disk_path.get() {
            return Ok(path.as_path());
        }
        let path = self.resolver.resolve_segments(self.segments(id))?;
        Ok(node.disk_path.get_or_init(|| path).as_path())
    }

    /// 从自身向上到根
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |&cur| self.nodes[cur.0].parent)
    }

    /// 以某节点为根的先序遍历（包含自身），父节点先于子节点
    pub fn descendants(&self, id: NodeId) -> Preorder<'_> {
        Preorder {
            tree: self,
            stack: vec![id],
        }
    }

    /// 整片森林的先序遍历
    pub fn iter(&self) -> Preorder<'_> {
        Preorder {
            tree: self,
            stack: self.roots.iter().rev().copied().collect(),
        }
    }

    pub fn depth(&self, id: NodeId) -> usize {
        self.ancestors(id).count() - 1
    }
}

/// 显式栈的先序遍历，兄弟按插入顺序输出
pub struct Preorder<'a> {
    tree: &'a SyncTree,
    stack: Vec<NodeId>,
}

impl Iterator for Preorder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.nodes[id.0].children.iter().rev().copied());
        Some(id)
    }
}
