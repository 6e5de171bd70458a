pub mod auth;
pub mod gdrive;
pub mod memory;
pub mod operator;

use crate::config::{RemoteConfig, RemoteType};
use crate::core::{NodeKind, RemoteMeta};
use crate::error::{ConfigurationError, Error, RemoteError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub use auth::{Authenticator, ClientConfig, GoogleAuthenticator, OAuthCredentials};
pub use gdrive::GoogleDriveStore;
pub use memory::MemoryStore;
pub use operator::OperatorStore;

// ============ 公共常量 ============

/// 云端文件夹的 mime 类型
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
/// 云端原生文档的 mime 前缀（没有可下载的二进制内容）
pub const NATIVE_MIME_PREFIX: &str = "application/vnd.google-apps.";
/// 非 IO 操作超时（秒）- stat, list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程条目信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub id: String,
    pub title: String,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
    pub checksum: Option<String>,
    pub url: Option<String>,
    pub size: Option<u64>,
}

impl RemoteEntry {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// 原生文档（如在线表格）无法按二进制下载
    pub fn is_downloadable(&self) -> bool {
        !self.mime_type.starts_with(NATIVE_MIME_PREFIX)
    }

    pub fn kind(&self) -> NodeKind {
        if self.is_folder() {
            NodeKind::Folder
        } else {
            NodeKind::File
        }
    }

    /// 拆成节点名称与缓存的远程元数据
    pub fn into_meta(self) -> (String, RemoteMeta) {
        (
            self.title,
            RemoteMeta {
                id: self.id,
                mime_type: self.mime_type,
                modified_time: self.modified_time,
                checksum: self.checksum,
                url: self.url,
                size: self.size,
            },
        )
    }
}

/// 子条目列表查询条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// 是否包含回收站中的条目
    pub include_trashed: bool,
    /// 只列出文件夹
    pub folders_only: bool,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn folders_only(mut self, folders_only: bool) -> Self {
        self.folders_only = folders_only;
        self
    }

    /// Drive 查询语句
    pub fn to_drive_query(&self, parent_id: &str) -> String {
        let mut q = format!("'{}' in parents", parent_id.replace('\'', "\\'"));
        if !self.include_trashed {
            q.push_str(" and trashed=false");
        }
        if self.folders_only {
            q.push_str(&format!(" and mimeType='{}'", FOLDER_MIME_TYPE));
        }
        q
    }

    pub fn accepts(&self, entry: &RemoteEntry) -> bool {
        !self.folders_only || entry.is_folder()
    }
}

/// 远程存储报告的内容摘要算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestKind {
    Md5,
    Blake3,
}

/// 远程存储抽象接口
///
/// 从引擎角度看每个调用都是一次完整的阻塞操作；列表顺序由实现决定，调用方不重排。
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 获取单个条目的元数据
    async fn fetch_metadata(&self, id: &str) -> Result<RemoteEntry, RemoteError>;

    /// 列出文件夹的直接子条目（按名称排序）
    async fn list_children(
        &self,
        parent_id: &str,
        query: &ListQuery,
    ) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// 读取文件内容
    async fn get_content(&self, id: &str) -> Result<Bytes, RemoteError>;

    /// 暂存本地文件作为条目的新内容，`save` 时提交
    async fn set_content(&self, id: &str, path: &Path) -> Result<(), RemoteError>;

    /// 提交暂存的内容，返回更新后的元数据
    async fn save(&self, id: &str) -> Result<RemoteEntry, RemoteError>;

    /// checksum 字段使用的摘要算法
    fn digest_kind(&self) -> DigestKind;

    /// 存储名称（用于日志）
    fn name(&self) -> &str;
}

/// `set_content` 与 `save` 之间暂存的上传
#[derive(Debug, Default)]
pub struct PendingUploads {
    staged: Mutex<HashMap<String, PathBuf>>,
}

impl PendingUploads {
    pub fn stage(&self, id: &str, path: &Path) {
        self.lock().insert(id.to_string(), path.to_path_buf());
    }

    pub fn take(&self, id: &str) -> Result<PathBuf, RemoteError> {
        self.lock()
            .remove(id)
            .ok_or_else(|| RemoteError::NothingStaged(id.to_string()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PathBuf>> {
        // 持锁期间不会 panic，中毒时直接取回数据
        self.staged.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 根据配置连接远程存储
pub async fn connect_store(
    config: &RemoteConfig,
    config_dir: &Path,
) -> Result<Arc<dyn RemoteStore>, Error> {
    match config.typ {
        RemoteType::Gdrive => {
            let client = ClientConfig {
                client_id: RemoteConfig::require(&config.client_id, "clientId")?.to_string(),
                client_secret: RemoteConfig::require(&config.client_secret, "clientSecret")?
                    .to_string(),
            };
            let credentials = config.credentials_file(config_dir);
            tracing::info!("连接 Google Drive，凭据: {:?}", credentials);
            let store = GoogleAuthenticator::new()
                .authenticate(&client, &credentials)
                .await?;
            Ok(store)
        }
        RemoteType::Fs => {
            let path = RemoteConfig::require(&config.path, "path")?;
            tracing::info!("初始化本地目录存储: {}", path);
            Ok(Arc::new(OperatorStore::fs(path)?) as Arc<dyn RemoteStore>)
        }
        RemoteType::WebDav => {
            let endpoint = RemoteConfig::require(&config.endpoint, "endpoint")?;
            let username = RemoteConfig::require(&config.username, "username")?;
            let password = RemoteConfig::require(&config.password, "password")?;
            tracing::info!("创建WebDAV存储: endpoint={}, root={:?}", endpoint, config.root);
            Ok(Arc::new(OperatorStore::webdav(
                endpoint,
                username,
                password,
                config.root.as_deref(),
            )?) as Arc<dyn RemoteStore>)
        }
        RemoteType::S3 => {
            let bucket = RemoteConfig::require(&config.bucket, "bucket")?;
            let region = RemoteConfig::require(&config.region, "region")?;
            let access_key = RemoteConfig::require(&config.access_key, "accessKey")?;
            let secret_key = RemoteConfig::require(&config.secret_key, "secretKey")?;
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            Ok(Arc::new(OperatorStore::s3(
                bucket,
                region,
                access_key,
                secret_key,
                config.endpoint.as_deref(),
                config.prefix.as_deref(),
            )?) as Arc<dyn RemoteStore>)
        }
    }
}

/// 根节点列表为空时视为配置不完整
pub fn require_root_ids(config: &RemoteConfig) -> Result<&[String], ConfigurationError> {
    if config.root_ids.is_empty() {
        return Err(ConfigurationError::MissingField("rootIds"));
    }
    Ok(&config.root_ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(mime: &str) -> RemoteEntry {
        RemoteEntry {
            id: "x".to_string(),
            title: "x".to_string(),
            mime_type: mime.to_string(),
            modified_time: None,
            checksum: None,
            url: None,
            size: None,
        }
    }

    #[test]
    fn test_drive_query() {
        let q = ListQuery::new().to_drive_query("abc");
        assert_eq!(q, "'abc' in parents and trashed=false");

        let q = ListQuery::new().folders_only(true).to_drive_query("abc");
        assert_eq!(
            q,
            "'abc' in parents and trashed=false and mimeType='application/vnd.google-apps.folder'"
        );
    }

    #[test]
    fn test_downloadable_mime_types() {
        assert!(entry("image/png").is_downloadable());
        assert!(!entry("application/vnd.google-apps.document").is_downloadable());
        assert!(entry(FOLDER_MIME_TYPE).is_folder());
        assert_eq!(entry("image/png").kind(), NodeKind::File);
    }

    #[test]
    fn test_pending_uploads() {
        let pending = PendingUploads::default();
        assert!(matches!(pending.take("a"), Err(RemoteError::NothingStaged(_))));
        pending.stage("a", Path::new("/tmp/a"));
        assert_eq!(pending.take("a").unwrap(), PathBuf::from("/tmp/a"));
    }
}
