//! 同步引擎
//!
//! 把构建、合并、分类和传输串起来。重建时在旁边建一棵新树，完成后整体替换，
//! 读取方始终拿到完整的快照，不会看到构建了一半的树。

use super::classifier::StatusClassifier;
use super::local_builder::LocalTreeBuilder;
use super::merger::TreeMerger;
use super::model::TreeModel;
use super::remote_builder::RemoteTreeBuilder;
use super::transfer::{TransferEngine, TransferReport};
use super::tree::{NodeId, SyncTree};
use crate::config::EngineConfig;
use crate::error::{ConfigurationError, Error, FilesystemError, RemoteFetchError, TransferError};
use crate::remote::{RemoteEntry, RemoteStore};
use scopeguard::ScopeGuard;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{info, warn};

/// 当前树的共享引用
#[derive(Debug, Default)]
pub struct TreeHandle {
    current: RwLock<Arc<SyncTree>>,
}

impl TreeHandle {
    pub fn new(tree: SyncTree) -> Self {
        Self {
            current: RwLock::new(Arc::new(tree)),
        }
    }

    /// 当前快照
    pub fn load(&self) -> Arc<SyncTree> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 替换为新树，返回旧树
    pub fn swap(&self, tree: SyncTree) -> Arc<SyncTree> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(tree))
    }
}

/// 一次重建的结果
#[derive(Debug)]
pub struct RebuildReport {
    pub nodes: usize,
    /// 远程列表失败的子树
    pub remote_failures: Vec<RemoteFetchError>,
    /// 本地根目录未配置或还不存在时为 false
    pub local_scanned: bool,
    pub duration_ms: u64,
}

/// 同步引擎
pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    config: EngineConfig,
    root_ids: Vec<String>,
    handle: Arc<TreeHandle>,
    classifier: StatusClassifier,
    transfer: TransferEngine,
    cancelled: Arc<AtomicBool>,
    /// 正在进行的下载数
    active_downloads: Arc<AtomicUsize>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RemoteStore>, config: EngineConfig, root_ids: Vec<String>) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let classifier = StatusClassifier::new(&config, store.digest_kind());
        let transfer = TransferEngine::new(store.clone()).with_cancel(cancelled.clone());
        Self {
            handle: Arc::new(TreeHandle::new(SyncTree::new(config.resolver()))),
            store,
            config,
            root_ids,
            classifier,
            transfer,
            cancelled,
            active_downloads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn root_ids(&self) -> &[String] {
        &self.root_ids
    }

    pub fn handle(&self) -> &Arc<TreeHandle> {
        &self.handle
    }

    pub fn tree(&self) -> Arc<SyncTree> {
        self.handle.load()
    }

    pub fn classifier(&self) -> &StatusClassifier {
        &self.classifier
    }

    /// 基于当前快照的层级访问器
    pub fn model(&self) -> TreeModel {
        TreeModel::new(self.tree(), self.classifier.clone())
    }

    /// 取消所有正在进行的下载
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 重新构建远程树和本地树并合并
    ///
    /// 远程子树失败只记录；本地根目录存在但不可读时整体失败。
    pub async fn rebuild(&self) -> Result<RebuildReport, Error> {
        let start = Instant::now();
        info!("开始重建同步树: {}", self.store.name());

        let remote = RemoteTreeBuilder::new(self.store.clone(), &self.config)
            .build(&self.root_ids)
            .await;

        let (local, local_scanned) = match LocalTreeBuilder::new(&self.config).build().await {
            Ok(tree) => (tree, true),
            Err(Error::Configuration(ConfigurationError::MissingDownloadRoot { .. })) => {
                warn!("未配置下载目录，只显示远程树");
                (SyncTree::new(self.config.resolver()), false)
            }
            Err(Error::Filesystem(FilesystemError::RootMissing(path))) => {
                // 首次下载前目录尚未创建
                warn!("下载目录不存在，视为空: {:?}", path);
                (SyncTree::new(self.config.resolver()), false)
            }
            Err(e) => return Err(e),
        };

        let merged = TreeMerger::new().merge(&remote.tree, &local);
        let nodes = merged.len();
        self.handle.swap(merged);

        let duration_ms = start.elapsed().as_millis() as u64;
        info!("同步树重建完成: {} 个节点, 耗时 {}ms", nodes, duration_ms);
        Ok(RebuildReport {
            nodes,
            remote_failures: remote.failures,
            local_scanned,
            duration_ms,
        })
    }

    /// 下载会覆盖本地修改时返回 true，由界面层决定是否确认
    pub fn needs_overwrite_confirmation(&self, selection: &[NodeId]) -> bool {
        let tree = self.tree();
        self.classifier
            .any_descendant_modified_locally(&tree, selection)
    }

    /// 登记一次下载；没有其他下载在进行时才清除上一次的取消标志
    fn begin_download(&self) -> ScopeGuard<Arc<AtomicUsize>, impl FnOnce(Arc<AtomicUsize>)> {
        if self.active_downloads.fetch_add(1, Ordering::SeqCst) == 0 {
            self.cancelled.store(false, Ordering::SeqCst);
        }
        scopeguard::guard(self.active_downloads.clone(), |active| {
            active.fetch_sub(1, Ordering::SeqCst);
        })
    }

    /// 下载选中节点（递归）
    pub async fn download(&self, node: NodeId) -> Result<TransferReport, ConfigurationError> {
        let _active = self.begin_download();
        let tree = self.tree();
        self.transfer.download(&tree, node).await
    }

    /// 上传选中节点（不递归）
    pub async fn upload(&self, node: NodeId) -> Result<RemoteEntry, TransferError> {
        let tree = self.tree();
        self.transfer.upload(&tree, node).await
    }
}
