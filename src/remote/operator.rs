//! 基于 opendal 的存储（本地目录 / WebDAV / S3）
//!
//! 条目 id 就是存储内的路径，文件夹以 `/` 结尾。

use super::{
    DigestKind, ListQuery, PendingUploads, RemoteEntry, RemoteStore, FOLDER_MIME_TYPE,
    IO_TIMEOUT_SECS, OP_TIMEOUT_SECS,
};
use crate::error::RemoteError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metadata, Metakey, Operator};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub struct OperatorStore {
    operator: Operator,
    name: String,
    pending: PendingUploads,
}

impl OperatorStore {
    fn from_operator(operator: Operator, name: String) -> Self {
        // 添加超时层
        let operator = operator.layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
        );
        Self {
            operator,
            name,
            pending: PendingUploads::default(),
        }
    }

    /// 本地目录（用于镜像盘或测试）
    pub fn fs(root: &str) -> Result<Self, RemoteError> {
        use opendal::services::Fs;

        let builder = Fs::default().root(root);
        let operator = Operator::new(builder)?.finish();
        Ok(Self::from_operator(operator, format!("fs:{}", root)))
    }

    pub fn webdav(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<&str>,
    ) -> Result<Self, RemoteError> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);
        if let Some(r) = root {
            builder = builder.root(r);
        }
        let operator = Operator::new(builder)?.finish();

        let name = format!(
            "webdav://{}{}",
            endpoint.trim_end_matches('/'),
            root.map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );
        Ok(Self::from_operator(operator, name))
    }

    pub fn s3(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<&str>,
        prefix: Option<&str>,
    ) -> Result<Self, RemoteError> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);
        if let Some(ep) = endpoint {
            builder = builder.endpoint(ep);
        }
        if let Some(p) = prefix {
            builder = builder.root(p);
        }
        let operator = Operator::new(builder)?.finish();

        let name = format!(
            "s3://{}{}",
            bucket,
            prefix.map(|p| format!("/{}", p)).unwrap_or_default()
        );
        Ok(Self::from_operator(operator, name))
    }

    /// 规范化路径分隔符，去掉开头的 `/`
    fn normalize_id(id: &str) -> String {
        id.replace('\\', "/").trim_start_matches('/').to_string()
    }

    fn entry_from(path: &str, meta: &Metadata) -> RemoteEntry {
        let is_dir = meta.is_dir() || path.ends_with('/');
        let title = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let id = if is_dir && !path.ends_with('/') {
            format!("{}/", path)
        } else {
            path.to_string()
        };

        let mime_type = if is_dir {
            FOLDER_MIME_TYPE.to_string()
        } else {
            meta.content_type()
                .unwrap_or("application/octet-stream")
                .to_string()
        };

        RemoteEntry {
            url: Some(id.clone()),
            id,
            title,
            mime_type,
            modified_time: meta.last_modified(),
            checksum: if is_dir { None } else { md5_of(meta) },
            size: if is_dir {
                None
            } else {
                Some(meta.content_length())
            },
        }
    }
}

/// 十六进制 md5：优先 Content-MD5，其次形如 md5 的 ETag（分块上传的 ETag 不是 md5）
fn md5_of(meta: &Metadata) -> Option<String> {
    let is_hex_md5 = |s: &str| s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit());
    meta.content_md5()
        .map(str::to_string)
        .filter(|s| is_hex_md5(s))
        .or_else(|| {
            meta.etag()
                .map(|s| s.trim_matches('"').to_lowercase())
                .filter(|s| is_hex_md5(s))
        })
}

#[async_trait]
impl RemoteStore for OperatorStore {
    async fn fetch_metadata(&self, id: &str) -> Result<RemoteEntry, RemoteError> {
        let path = Self::normalize_id(id);
        match self.operator.stat(&path).await {
            Ok(meta) => Ok(Self::entry_from(&path, &meta)),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound && !path.ends_with('/') => {
                // 对象存储里目录必须带 `/`
                let dir = format!("{}/", path);
                match self.operator.stat(&dir).await {
                    Ok(meta) => Ok(Self::entry_from(&dir, &meta)),
                    Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                        Err(RemoteError::NotFound(id.to_string()))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                Err(RemoteError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_children(
        &self,
        parent_id: &str,
        query: &ListQuery,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        let mut dir = Self::normalize_id(parent_id);
        if !dir.is_empty() && !dir.ends_with('/') {
            dir.push('/');
        }

        let mut lister = self
            .operator
            .lister_with(&dir)
            .metakey(
                Metakey::ContentLength
                    | Metakey::LastModified
                    | Metakey::Mode
                    | Metakey::ContentMd5
                    | Metakey::Etag,
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(entry) = lister.try_next().await? {
            let path = entry.path().trim_start_matches('/');
            // 跳过目录自身
            if path.is_empty() || path == dir {
                continue;
            }
            let remote = Self::entry_from(path, entry.metadata());
            if query.accepts(&remote) {
                entries.push(remote);
            }
        }

        // 存储不保证顺序，按名称排序后返回
        entries.sort_by(|a, b| a.title.cmp(&b.title));
        debug!("列出 {} 的子条目: {} 个", dir, entries.len());
        Ok(entries)
    }

    async fn get_content(&self, id: &str) -> Result<Bytes, RemoteError> {
        let path = Self::normalize_id(id);
        if path.is_empty() || path.ends_with('/') {
            return Err(RemoteError::NotDownloadable {
                id: id.to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
            });
        }
        match self.operator.read(&path).await {
            Ok(buffer) => Ok(buffer.to_bytes()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                Err(RemoteError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_content(&self, id: &str, path: &Path) -> Result<(), RemoteError> {
        self.pending.stage(id, path);
        Ok(())
    }

    async fn save(&self, id: &str) -> Result<RemoteEntry, RemoteError> {
        let local = self.pending.take(id)?;
        let data = tokio::fs::read(&local).await?;
        let path = Self::normalize_id(id);
        info!("写入 {}: {} ({} 字节)", self.name, path, data.len());

        self.operator.write(&path, data).await?;
        self.fetch_metadata(&path).await
    }

    fn digest_kind(&self) -> DigestKind {
        DigestKind::Md5
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_store_lists_and_roundtrips() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("Projects/Beta")).unwrap();
        std::fs::write(dir.path().join("Projects/alpha.txt"), b"alpha").unwrap();

        let store = OperatorStore::fs(&dir.path().to_string_lossy()).unwrap();
        let root = store.fetch_metadata("Projects").await.unwrap();
        assert!(root.is_folder());
        assert_eq!(root.id, "Projects/");
        assert_eq!(root.title, "Projects");

        let children = store
            .list_children(&root.id, &ListQuery::new())
            .await
            .unwrap();
        let titles: Vec<_> = children.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Beta", "alpha.txt"]);
        assert!(children[0].is_folder());

        let content = store.get_content("Projects/alpha.txt").await.unwrap();
        assert_eq!(content.as_ref(), b"alpha");
        assert!(matches!(
            store.get_content("Projects/Beta/").await,
            Err(RemoteError::NotDownloadable { .. })
        ));

        let upload = dir.path().join("upload.bin");
        std::fs::write(&upload, b"changed").unwrap();
        store.set_content("Projects/alpha.txt", &upload).await.unwrap();
        let updated = store.save("Projects/alpha.txt").await.unwrap();
        assert_eq!(updated.size, Some(7));
        assert_eq!(
            std::fs::read(dir.path().join("Projects/alpha.txt")).unwrap(),
            b"changed"
        );
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let dir = TempDir::new().unwrap();
        let store = OperatorStore::fs(&dir.path().to_string_lossy()).unwrap();
        assert!(matches!(
            store.fetch_metadata("nope").await,
            Err(RemoteError::NotFound(_))
        ));
    }
}
