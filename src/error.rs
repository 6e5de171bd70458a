//! 错误分类
//!
//! - `ConfigurationError`：下载目录缺失或无效，任何传输前必须暴露给调用方
//! - `RemoteFetchError`：单个子树的列表失败，可恢复，子树按空处理
//! - `FilesystemError`：本地根目录缺失或不可读，本地构建整体失败
//! - `TransferError`：单个节点的下载 / 上传失败，可恢复，兄弟节点继续
//! - `AuthError`：认证失败，整个会话不可用

use crate::core::NodeId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("未配置下载目录（\"{key}\"）")]
    MissingDownloadRoot { key: &'static str },

    #[error("下载目录无效: {path}: {reason}")]
    InvalidDownloadRoot { path: PathBuf, reason: String },

    #[error("远程存储配置缺少字段: {0}")]
    MissingField(&'static str),

    #[error("读写配置文件失败 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("配置文件格式错误 {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 远程存储协作方返回的原始错误
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("远程对象不存在: {0}")]
    NotFound(String),

    #[error("远程对象不可下载: {id} ({mime_type})")]
    NotDownloadable { id: String, mime_type: String },

    #[error("没有待上传的内容: {0}")]
    NothingStaged(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("存储操作失败: {0}")]
    Operator(#[from] opendal::Error),

    #[error("本地 IO 失败: {0}")]
    Io(#[from] io::Error),

    #[error("认证失败: {0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Other(String),
}

/// 某个远程子树列表失败；该子树在树中表现为空
#[derive(Debug, Error)]
#[error("获取远程目录失败 (id={remote_id}): {source}")]
pub struct RemoteFetchError {
    pub remote_id: String,
    /// 列表失败的节点；根元数据获取失败时为 None
    pub node: Option<NodeId>,
    #[source]
    pub source: RemoteError,
}

#[derive(Debug, Error)]
pub enum FilesystemError {
    #[error("本地根目录不存在: {0}")]
    RootMissing(PathBuf),

    #[error("本地根路径不是目录: {0}")]
    NotADirectory(PathBuf),

    #[error("无法读取本地根目录 {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("本地扫描任务失败: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("该路径已有传输在进行: {0}")]
    Busy(PathBuf),

    #[error("节点没有远程副本: {0}")]
    NoRemoteCounterpart(String),

    #[error("节点没有本地内容: {0}")]
    NoLocalContent(PathBuf),

    #[error("不支持上传目录: {0}")]
    DirectoryUpload(PathBuf),

    #[error("远程操作失败: {0}")]
    Remote(#[from] RemoteError),

    #[error("写入本地文件失败 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("读写凭据文件失败 {path}: {source}")]
    Credentials {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("凭据格式无效: {0}")]
    InvalidCredentials(#[from] serde_json::Error),

    #[error("需要授权，请在浏览器中打开: {url}")]
    AuthorizationRequired { url: String },

    #[error("刷新访问令牌失败: {0}")]
    Refresh(String),

    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Filesystem(#[from] FilesystemError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
