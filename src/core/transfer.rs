//! 传输引擎
//!
//! 下载：从选中节点开始先序遍历，父节点先于子节点，单个节点失败只记录不中断。
//! 上传：只处理选中的单个文件节点，不递归。
//! 同一派生路径同时只允许一个传输。

use super::tree::{NodeId, SyncTree};
use crate::error::{ConfigurationError, TransferError};
use crate::remote::{RemoteEntry, RemoteStore};
use scopeguard::ScopeGuard;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};

/// 正在传输的路径集合
#[derive(Debug, Default)]
pub struct TransferGuard {
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl TransferGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 占用路径，返回值离开作用域时释放
    pub fn acquire(
        &self,
        path: &Path,
    ) -> Result<ScopeGuard<PathBuf, impl FnOnce(PathBuf) + '_>, TransferError> {
        if !self.lock().insert(path.to_path_buf()) {
            return Err(TransferError::Busy(path.to_path_buf()));
        }
        Ok(scopeguard::guard(path.to_path_buf(), move |p| {
            self.lock().remove(&p);
        }))
    }

    pub fn is_busy(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }
}

/// 单个节点的传输失败
#[derive(Debug)]
pub struct TransferFailure {
    pub node: NodeId,
    pub path: PathBuf,
    pub error: TransferError,
}

/// 下载报告
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReport {
    pub completed: Vec<NodeId>,
    /// 没有远程副本的节点
    pub skipped: Vec<NodeId>,
    #[serde(serialize_with = "serialize_failures")]
    pub failures: Vec<TransferFailure>,
    pub bytes_transferred: u64,
    pub cancelled: bool,
}

fn serialize_failures<S: serde::Serializer>(
    failures: &[TransferFailure],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = serializer.serialize_seq(Some(failures.len()))?;
    for f in failures {
        seq.serialize_element(&serde_json::json!({
            "node": f.node,
            "path": f.path,
            "error": f.error.to_string(),
        }))?;
    }
    seq.end()
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub fn failed(&self, id: NodeId) -> bool {
        self.failures.iter().any(|f| f.node == id)
    }
}

/// 传输引擎
#[derive(Clone)]
pub struct TransferEngine {
    store: Arc<dyn RemoteStore>,
    guard: Arc<TransferGuard>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl TransferEngine {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            guard: Arc::new(TransferGuard::new()),
            cancel_flag: None,
        }
    }

    /// 多个引擎共享同一个路径占用表
    pub fn with_guard(mut self, guard: Arc<TransferGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// 设置取消标志，递归下载在每个节点前检查
    pub fn with_cancel(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    pub fn guard(&self) -> &Arc<TransferGuard> {
        &self.guard
    }

    /// 检查是否已取消
    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 下载节点及其全部后代
    ///
    /// 只有下载目录未配置时整体失败；单个节点的错误收集在报告里。
    pub async fn download(
        &self,
        tree: &SyncTree,
        node: NodeId,
    ) -> Result<TransferReport, ConfigurationError> {
        let root = tree.resolver().root()?;
        info!("开始下载: {:?} -> {:?}", tree.relative_path(node), root);

        let mut report = TransferReport::default();
        for id in tree.descendants(node) {
            if self.is_cancelled() {
                info!("下载已取消");
                report.cancelled = true;
                break;
            }

            let Some(meta) = tree.node(id).remote() else {
                debug!("仅本地节点，跳过: {:?}", tree.relative_path(id));
                report.skipped.push(id);
                continue;
            };

            match self.download_one(tree, id, &meta.id).await {
                Ok(bytes) => {
                    report.bytes_transferred += bytes;
                    report.completed.push(id);
                }
                Err(error) => {
                    let path = tree
                        .disk_path(id)
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|_| tree.relative_path(id));
                    warn!("下载失败: {:?} - {}", path, error);
                    report.failures.push(TransferFailure {
                        node: id,
                        path,
                        error,
                    });
                }
            }
        }

        info!(
            "下载结束: 成功 {}, 失败 {}, 跳过 {}, {} 字节",
            report.completed.len(),
            report.failures.len(),
            report.skipped.len(),
            report.bytes_transferred
        );
        Ok(report)
    }

    async fn download_one(
        &self,
        tree: &SyncTree,
        id: NodeId,
        remote_id: &str,
    ) -> Result<u64, TransferError> {
        let path = tree.disk_path(id)?;
        let _guard = self.guard.acquire(path)?;

        // 刷新元数据，列表之后远程可能已变化
        let entry = self.store.fetch_metadata(remote_id).await?;

        if entry.is_folder() || tree.node(id).is_folder() {
            fs::create_dir_all(path).await.map_err(io_error(path))?;
            return Ok(0);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error(parent))?;
        }

        let data = self.store.get_content(remote_id).await?;
        let size = data.len() as u64;
        write_atomic(path, &data).await?;

        // 本地修改时间对齐远程，避免刚下载的文件被判为本地较新
        if let Some(modified) = entry.modified_time {
            let result = std::fs::File::options()
                .write(true)
                .open(path)
                .and_then(|f| f.set_modified(SystemTime::from(modified)));
            if let Err(e) = result {
                debug!("设置修改时间失败: {:?} - {}", path, e);
            }
        }

        debug!("已下载: {:?} ({} 字节)", path, size);
        Ok(size)
    }

    /// 上传单个节点的本地内容到其远程副本
    pub async fn upload(&self, tree: &SyncTree, id: NodeId) -> Result<RemoteEntry, TransferError> {
        let node = tree.node(id);
        let path = tree.disk_path(id)?;

        if !node.has_local() {
            return Err(TransferError::NoLocalContent(path.to_path_buf()));
        }
        if node.is_folder() {
            return Err(TransferError::DirectoryUpload(path.to_path_buf()));
        }
        let meta = node
            .remote()
            .ok_or_else(|| TransferError::NoRemoteCounterpart(node.name().to_string()))?;

        match fs::metadata(path).await {
            Ok(m) if m.is_file() => {}
            Ok(_) => return Err(TransferError::DirectoryUpload(path.to_path_buf())),
            Err(_) => return Err(TransferError::NoLocalContent(path.to_path_buf())),
        }

        let _guard = self.guard.acquire(path)?;
        info!("开始上传: {:?} -> {}", path, meta.id);

        self.store.set_content(&meta.id, path).await?;
        let updated = self.store.save(&meta.id).await?;

        info!("上传完成: {:?}", path);
        Ok(updated)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TransferError + '_ {
    move |source| TransferError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// 下载临时文件的前缀与后缀，本地扫描会排除这类文件
pub const TEMP_FILE_PREFIX: &str = ".assetsync-";
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

/// 同目录下的临时文件路径；名称长度固定，与目标文件名长度无关
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path.file_name().unwrap_or_default();
    let digest = blake3::hash(name.as_encoded_bytes()).to_hex();
    path.with_file_name(format!(
        "{}{}{}",
        TEMP_FILE_PREFIX,
        &digest[..16],
        TEMP_FILE_SUFFIX
    ))
}

/// 使用临时文件写入，然后原子重命名
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), TransferError> {
    let temp_path = temp_path_for(path);

    fs::write(&temp_path, data)
        .await
        .map_err(io_error(&temp_path))?;
    if let Err(source) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(TransferError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}
