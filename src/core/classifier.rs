//! 同步状态分类
//!
//! 状态不落盘，每次读取时根据两边是否存在、修改时间和内容摘要现算。

use super::tree::{NodeId, Origin, SyncTree};
use crate::config::EngineConfig;
use crate::remote::DigestKind;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::debug;

/// 节点同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    RemoteOnly,
    LocalOnly,
    Synced,
    ModifiedLocally,
    ModifiedRemotely,
    /// 需要上次同步基线才能判定，当前分类器不会产生
    DeletedLocally,
    /// 需要上次同步基线才能判定，当前分类器不会产生
    DeletedRemotely,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::RemoteOnly => "remote only",
            Status::LocalOnly => "local only",
            Status::Synced => "synced",
            Status::ModifiedLocally => "modified locally",
            Status::ModifiedRemotely => "modified remotely",
            Status::DeletedLocally => "deleted locally",
            Status::DeletedRemotely => "deleted remotely",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// 修改时间比较结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    LocalNewer,
    RemoteNewer,
    /// 差值在容差内
    Same,
}

/// 计算内容摘要
pub fn content_digest(kind: DigestKind, data: &[u8]) -> String {
    match kind {
        DigestKind::Md5 => format!("{:x}", Md5::digest(data)),
        // 只取前 16 字节（32 个十六进制字符），足够检测变化
        DigestKind::Blake3 => blake3::hash(data).to_hex()[..32].to_string(),
    }
}

/// 流式计算文件摘要，按原始字节读取，与文本编码无关
pub fn file_digest(kind: DigestKind, path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    match kind {
        DigestKind::Md5 => {
            let mut hasher = Md5::new();
            io::copy(&mut file, &mut hasher)?;
            Ok(format!("{:x}", hasher.finalize()))
        }
        DigestKind::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            io::copy(&mut file, &mut hasher)?;
            Ok(hasher.finalize().to_hex()[..32].to_string())
        }
    }
}

/// 读取本地修改时间
pub fn local_modified_time(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// 状态分类器
#[derive(Debug, Clone)]
pub struct StatusClassifier {
    /// 时间容差（秒）
    time_tolerance_seconds: i64,
    /// 远程 checksum 的算法，本地按同一算法计算
    digest: DigestKind,
}

impl StatusClassifier {
    pub fn new(config: &EngineConfig, digest: DigestKind) -> Self {
        Self {
            time_tolerance_seconds: config.time_tolerance_seconds.max(0),
            digest,
        }
    }

    pub fn digest_kind(&self) -> DigestKind {
        self.digest
    }

    /// 计算节点状态
    ///
    /// 两边都存在时：摘要相同即 Synced；摘要不同（或无法比较）时看哪边更新，
    /// 两边都不更新也算 Synced。文件夹只看是否存在。
    /// 本地元数据读不到时按 RemoteOnly，远程缺少修改时间时按 LocalOnly。
    pub fn classify(&self, tree: &SyncTree, id: NodeId) -> Status {
        let node = tree.node(id);
        let meta = match node.origin() {
            Origin::Local => return Status::LocalOnly,
            Origin::Remote(_) => return Status::RemoteOnly,
            Origin::Both(meta) => meta,
        };

        if node.is_folder() {
            return Status::Synced;
        }

        let path = match tree.disk_path(id) {
            Ok(p) => p,
            Err(e) => {
                debug!("无法解析本地路径，按存在性分类: {} - {}", node.name(), e);
                return Status::RemoteOnly;
            }
        };

        let Some(local_time) = local_modified_time(path) else {
            debug!("读取本地元数据失败，按存在性分类: {:?}", path);
            return Status::RemoteOnly;
        };

        if let Some(remote_sum) = &meta.checksum {
            match file_digest(self.digest, path) {
                Ok(local_sum) if local_sum.eq_ignore_ascii_case(remote_sum) => {
                    return Status::Synced;
                }
                Ok(_) => {}
                Err(e) => debug!("计算本地摘要失败，按时间比较: {:?} - {}", path, e),
            }
        }

        let Some(remote_time) = meta.modified_time else {
            debug!("远程缺少修改时间，按存在性分类: {}", node.name());
            return Status::LocalOnly;
        };

        match self.freshness(local_time, remote_time) {
            Freshness::Same => Status::Synced,
            Freshness::RemoteNewer => {
                debug!(
                    "远程较新: {:?} (local={}, remote={})",
                    path, local_time, remote_time
                );
                Status::ModifiedRemotely
            }
            Freshness::LocalNewer => {
                debug!(
                    "本地较新: {:?} (local={}, remote={})",
                    path, local_time, remote_time
                );
                Status::ModifiedLocally
            }
        }
    }

    fn freshness(&self, local: DateTime<Utc>, remote: DateTime<Utc>) -> Freshness {
        let diff = (local - remote).num_seconds();
        if diff.abs() <= self.time_tolerance_seconds {
            Freshness::Same
        } else if diff > 0 {
            Freshness::LocalNewer
        } else {
            Freshness::RemoteNewer
        }
    }

    /// 选中的任一节点（含其全部后代）是否存在本地修改
    ///
    /// 下载会覆盖这些修改，界面层据此决定是否弹出确认。
    pub fn any_descendant_modified_locally(&self, tree: &SyncTree, selection: &[NodeId]) -> bool {
        selection.iter().any(|&selected| {
            tree.descendants(selected)
                .any(|id| self.classify(tree, id) == Status::ModifiedLocally)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::path::PathResolver;
    use crate::core::tree::{NodeKind, RemoteMeta};
    use chrono::Duration;
    use std::fs;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn meta(checksum: Option<String>, modified: Option<DateTime<Utc>>) -> RemoteMeta {
        RemoteMeta {
            id: "r1".to_string(),
            mime_type: "text/plain".to_string(),
            modified_time: modified,
            checksum,
            url: None,
            size: None,
        }
    }

    fn classifier() -> StatusClassifier {
        StatusClassifier::new(&EngineConfig::default(), DigestKind::Md5)
    }

    /// 在临时目录下建一个 Projects/Alpha 文件，返回树和节点
    fn both_tree(dir: &TempDir, content: &[u8], remote: RemoteMeta) -> (SyncTree, NodeId) {
        let root_dir = dir.path().join("Projects");
        fs::create_dir_all(&root_dir).unwrap();
        fs::write(root_dir.join("Alpha"), content).unwrap();

        let resolver = PathResolver::new(dir.path().to_str());
        let mut tree = SyncTree::new(resolver);
        let root = tree.add_root("Projects", NodeKind::Folder, Origin::Both(meta(None, None)));
        let alpha = tree.append_child(root, "Alpha", NodeKind::File, Origin::Both(remote));
        (tree, alpha)
    }

    fn set_mtime(path: &Path, time: DateTime<Utc>) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::from(time)).unwrap();
    }

    #[test]
    fn test_presence_only_statuses() {
        let mut tree = SyncTree::new(PathResolver::unconfigured());
        let local = tree.add_root("L", NodeKind::File, Origin::Local);
        let remote = tree.add_root("R", NodeKind::File, Origin::Remote(meta(None, None)));

        let c = classifier();
        assert_eq!(c.classify(&tree, local), Status::LocalOnly);
        assert_eq!(c.classify(&tree, remote), Status::RemoteOnly);
    }

    #[test]
    fn test_equal_checksum_is_synced_despite_skew() {
        let dir = TempDir::new().unwrap();
        let sum = content_digest(DigestKind::Md5, b"same bytes");
        let remote_time = Utc::now() - Duration::days(30);
        let (tree, alpha) = both_tree(&dir, b"same bytes", meta(Some(sum), Some(remote_time)));

        let c = classifier();
        assert_eq!(c.classify(&tree, alpha), Status::Synced);
        // 纯函数：重复调用结果一致
        assert_eq!(c.classify(&tree, alpha), Status::Synced);
    }

    #[test]
    fn test_newer_side_wins_when_checksums_differ() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let (tree, alpha) = both_tree(
            &dir,
            b"local edit",
            meta(Some("0000".to_string()), Some(now - Duration::hours(1))),
        );
        let path = tree.disk_path(alpha).unwrap().to_path_buf();
        set_mtime(&path, now);
        assert_eq!(classifier().classify(&tree, alpha), Status::ModifiedLocally);

        set_mtime(&path, now - Duration::hours(2));
        assert_eq!(classifier().classify(&tree, alpha), Status::ModifiedRemotely);

        // 容差内视为两边都不更新
        set_mtime(&path, now - Duration::hours(1) + Duration::seconds(1));
        assert_eq!(classifier().classify(&tree, alpha), Status::Synced);
    }

    #[test]
    fn test_unreadable_local_falls_back_to_presence() {
        let dir = TempDir::new().unwrap();
        let (tree, alpha) = both_tree(&dir, b"x", meta(Some("ffff".to_string()), Some(Utc::now())));
        fs::remove_file(tree.disk_path(alpha).unwrap()).unwrap();
        assert_eq!(classifier().classify(&tree, alpha), Status::RemoteOnly);

        // 下载目录未配置时同样读不到本地
        let mut unresolved = SyncTree::new(PathResolver::unconfigured());
        let root = unresolved.add_root("Projects", NodeKind::Folder, Origin::Both(meta(None, None)));
        let file = unresolved.append_child(
            root,
            "Alpha",
            NodeKind::File,
            Origin::Both(meta(Some("ffff".to_string()), Some(Utc::now()))),
        );
        assert_eq!(classifier().classify(&unresolved, file), Status::RemoteOnly);
        assert_eq!(classifier().classify(&unresolved, root), Status::Synced);
    }

    #[test]
    fn test_missing_remote_time_falls_back_to_presence() {
        let dir = TempDir::new().unwrap();
        let (tree, alpha) = both_tree(&dir, b"local", meta(Some("ffff".to_string()), None));
        assert_eq!(classifier().classify(&tree, alpha), Status::LocalOnly);

        // 摘要相同时不需要时间
        let sum = content_digest(DigestKind::Md5, b"local");
        let dir = TempDir::new().unwrap();
        let (tree, alpha) = both_tree(&dir, b"local", meta(Some(sum), None));
        assert_eq!(classifier().classify(&tree, alpha), Status::Synced);
    }

    #[test]
    fn test_any_descendant_checks_every_selected_node() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let (mut tree, alpha) = both_tree(
            &dir,
            b"edited",
            meta(Some("0000".to_string()), Some(now - Duration::hours(3))),
        );
        set_mtime(tree.disk_path(alpha).unwrap(), now);

        // 第一个选中项是一个没有修改的文件夹，第二个才包含修改
        let other = tree.add_root("Other", NodeKind::Folder, Origin::Both(meta(None, None)));
        let projects = tree.roots()[0];
        let c = classifier();
        assert!(c.any_descendant_modified_locally(&tree, &[other, projects]));
        assert!(!c.any_descendant_modified_locally(&tree, &[other]));
    }

    #[test]
    fn test_file_digest_matches_content_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bin");
        let data: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
        fs::write(&path, &data).unwrap();

        for kind in [DigestKind::Md5, DigestKind::Blake3] {
            assert_eq!(file_digest(kind, &path).unwrap(), content_digest(kind, &data));
        }
        assert_eq!(
            content_digest(DigestKind::Md5, b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }
}
