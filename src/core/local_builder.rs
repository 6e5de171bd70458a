//! 本地树构建
//!
//! 遍历下载根目录，按名称字典序生成只有本地副本的节点。
//! 符号链接只在指向根目录内部时跟随，已访问过的目录（按解析后的真实路径）不会再次进入。

use super::transfer::{TEMP_FILE_PREFIX, TEMP_FILE_SUFFIX};
use super::tree::{NodeId, NodeKind, Origin, SyncTree};
use crate::config::EngineConfig;
use crate::core::path::PathResolver;
use crate::error::{Error, FilesystemError};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// 把简单 glob（`*`、`?`）转换为不区分大小写的正则
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    match Regex::new(&format!("(?i)^{}$", escaped)) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("排除规则无效，已忽略: {} - {}", pattern, e);
            None
        }
    }
}

fn is_transfer_temp(name: &str) -> bool {
    name.starts_with(TEMP_FILE_PREFIX) && name.ends_with(TEMP_FILE_SUFFIX)
}

/// 本地树构建器
#[derive(Debug, Clone)]
pub struct LocalTreeBuilder {
    resolver: PathResolver,
    excludes: Vec<Regex>,
    max_depth: usize,
}

impl LocalTreeBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            resolver: config.resolver(),
            excludes: config
                .exclude_patterns
                .iter()
                .filter_map(|p| glob_to_regex(p))
                .collect(),
            max_depth: config.max_depth,
        }
    }

    /// 扫描配置的下载根目录
    ///
    /// 未配置根目录返回 `ConfigurationError`，根目录不存在或不可读返回 `FilesystemError`。
    pub async fn build(&self) -> Result<SyncTree, Error> {
        let root = self.resolver.root()?.to_path_buf();
        info!("开始扫描本地目录: {:?}", root);

        let builder = self.clone();
        // 使用 spawn_blocking 避免阻塞 async runtime
        let tree = tokio::task::spawn_blocking(move || builder.build_at(&root))
            .await
            .map_err(|e| FilesystemError::Join(e.to_string()))??;

        info!("本地扫描完成: {} 个节点", tree.len());
        Ok(tree)
    }

    /// 同步扫描指定目录
    pub fn build_at(&self, root: &Path) -> Result<SyncTree, FilesystemError> {
        let canonical_root = check_root(root)?;

        let mut tree = SyncTree::new(self.resolver.clone());
        // parents[d] 是深度 d 上最近一个目录节点
        let mut parents: Vec<NodeId> = Vec::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        visited.insert(canonical_root.clone());

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(self.max_depth.saturating_add(1))
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| self.admit(entry, root, &canonical_root, &mut visited));

        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("跳过无法读取的本地条目: {}", e);
                    continue;
                }
            };

            let depth = entry.depth() - 1;
            parents.truncate(depth);
            if parents.len() != depth {
                continue;
            }
            // admit 已过滤非 UTF-8 名称
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };

            let kind = if entry.file_type().is_dir() {
                NodeKind::Folder
            } else {
                NodeKind::File
            };
            let id = match parents.last() {
                Some(&parent) => tree.append_child(parent, name, kind, Origin::Local),
                None => tree.add_root(name, kind, Origin::Local),
            };
            if kind == NodeKind::Folder {
                parents.push(id);
            }
        }

        Ok(tree)
    }

    /// 检查路径是否应该被排除；下载留下的临时文件总是排除
    fn is_excluded(&self, name: &str, relative: &str) -> bool {
        is_transfer_temp(name)
            || self
                .excludes
                .iter()
                .any(|re| re.is_match(name) || re.is_match(relative))
    }

    /// 决定是否收录该条目（目录被拒绝时不会再进入）
    fn admit(
        &self,
        entry: &DirEntry,
        root: &Path,
        canonical_root: &Path,
        visited: &mut HashSet<PathBuf>,
    ) -> bool {
        let Some(name) = entry.file_name().to_str() else {
            warn!("文件名不是有效的 UTF-8，跳过: {:?}", entry.path());
            return false;
        };

        let relative = entry
            .path()
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        if self.is_excluded(name, &relative) {
            debug!("排除文件: {}", relative);
            return false;
        }

        if entry.path_is_symlink() {
            match entry.path().canonicalize() {
                Ok(target) if target.starts_with(canonical_root) => {}
                Ok(target) => {
                    warn!("符号链接指向根目录之外，跳过: {:?} -> {:?}", entry.path(), target);
                    return false;
                }
                Err(e) => {
                    warn!("无法解析符号链接，跳过: {:?} - {}", entry.path(), e);
                    return false;
                }
            }
        }

        if entry.file_type().is_dir() {
            let real = match entry.path().canonicalize() {
                Ok(real) => real,
                Err(e) => {
                    warn!("无法解析目录，跳过: {:?} - {}", entry.path(), e);
                    return false;
                }
            };
            if !visited.insert(real) {
                warn!("目录已访问过（循环链接），跳过: {:?}", entry.path());
                return false;
            }
        }

        true
    }
}

/// 根目录必须存在、是目录且可读；返回解析后的真实路径
fn check_root(root: &Path) -> Result<PathBuf, FilesystemError> {
    let metadata = match fs::metadata(root) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(FilesystemError::RootMissing(root.to_path_buf()))
        }
        Err(source) => {
            return Err(FilesystemError::Unreadable {
                path: root.to_path_buf(),
                source,
            })
        }
    };
    if !metadata.is_dir() {
        return Err(FilesystemError::NotADirectory(root.to_path_buf()));
    }

    let unreadable = |source| FilesystemError::Unreadable {
        path: root.to_path_buf(),
        source,
    };
    fs::read_dir(root).map_err(unreadable)?;
    root.canonicalize().map_err(unreadable)
}
