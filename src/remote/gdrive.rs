//! Google Drive v2 REST 存储

use super::{DigestKind, ListQuery, PendingUploads, RemoteEntry, RemoteStore};
use crate::error::RemoteError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

const DRIVE_API: &str = "https://www.googleapis.com/drive/v2";
const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v2";
const FILE_FIELDS: &str =
    "id,title,mimeType,modifiedDate,md5Checksum,downloadUrl,alternateLink,fileSize";
/// 单页最大条目数
const PAGE_SIZE: u32 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    title: String,
    mime_type: String,
    #[serde(default)]
    modified_date: Option<DateTime<Utc>>,
    #[serde(default)]
    md5_checksum: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    alternate_link: Option<String>,
    /// v2 接口里是字符串
    #[serde(default)]
    file_size: Option<String>,
}

impl From<DriveFile> for RemoteEntry {
    fn from(f: DriveFile) -> Self {
        RemoteEntry {
            id: f.id,
            title: f.title,
            mime_type: f.mime_type,
            modified_time: f.modified_date,
            checksum: f.md5_checksum,
            url: f.alternate_link.or(f.download_url),
            size: f.file_size.and_then(|s| s.parse().ok()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    items: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Google Drive 存储，id 为 Drive 文件 id
pub struct GoogleDriveStore {
    http: reqwest::Client,
    access_token: String,
    api_base: String,
    upload_base: String,
    pending: PendingUploads,
}

impl GoogleDriveStore {
    pub fn new(http: reqwest::Client, access_token: String) -> Self {
        Self {
            http,
            access_token,
            api_base: DRIVE_API.to_string(),
            upload_base: DRIVE_UPLOAD_API.to_string(),
            pending: PendingUploads::default(),
        }
    }

    fn auth_header(&self) -> HeaderValue {
        HeaderValue::from_str(&format!("Bearer {}", self.access_token))
            .unwrap_or_else(|_| HeaderValue::from_static(""))
    }

    /// 非 2xx 响应转换为错误
    async fn check(resp: reqwest::Response, id: &str) -> Result<reqwest::Response, RemoteError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RemoteStore for GoogleDriveStore {
    async fn fetch_metadata(&self, id: &str) -> Result<RemoteEntry, RemoteError> {
        let url = format!("{}/files/{}", self.api_base, urlencoding::encode(id));
        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, self.auth_header())
            .query(&[("fields", FILE_FIELDS)])
            .send()
            .await?;
        let file: DriveFile = Self::check(resp, id).await?.json().await?;
        Ok(file.into())
    }

    async fn list_children(
        &self,
        parent_id: &str,
        query: &ListQuery,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        let q = query.to_drive_query(parent_id);
        let fields = format!("nextPageToken,items({})", FILE_FIELDS);
        let max_results = PAGE_SIZE.to_string();
        let url = format!("{}/files", self.api_base);

        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params: Vec<(&str, &str)> = vec![
                ("q", q.as_str()),
                ("orderBy", "title"),
                ("maxResults", max_results.as_str()),
                ("fields", fields.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let resp = self
                .http
                .get(&url)
                .header(AUTHORIZATION, self.auth_header())
                .query(&params)
                .send()
                .await?;
            let page: FileList = Self::check(resp, parent_id).await?.json().await?;
            entries.extend(page.items.into_iter().map(RemoteEntry::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("列出 {} 的子条目: {} 个", parent_id, entries.len());
        Ok(entries)
    }

    async fn get_content(&self, id: &str) -> Result<Bytes, RemoteError> {
        let entry = self.fetch_metadata(id).await?;
        if entry.is_folder() || !entry.is_downloadable() {
            return Err(RemoteError::NotDownloadable {
                id: id.to_string(),
                mime_type: entry.mime_type,
            });
        }

        let url = format!("{}/files/{}", self.api_base, urlencoding::encode(id));
        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, self.auth_header())
            .query(&[("alt", "media")])
            .send()
            .await?;
        Ok(Self::check(resp, id).await?.bytes().await?)
    }

    async fn set_content(&self, id: &str, path: &Path) -> Result<(), RemoteError> {
        self.pending.stage(id, path);
        Ok(())
    }

    async fn save(&self, id: &str) -> Result<RemoteEntry, RemoteError> {
        let path = self.pending.take(id)?;
        let data = tokio::fs::read(&path).await?;
        info!("上传到 Google Drive: {:?} -> {} ({} 字节)", path, id, data.len());

        let url = format!("{}/files/{}", self.upload_base, urlencoding::encode(id));
        let resp = self
            .http
            .put(&url)
            .header(AUTHORIZATION, self.auth_header())
            .header(CONTENT_TYPE, "application/octet-stream")
            .query(&[("uploadType", "media")])
            .body(data)
            .send()
            .await?;
        let file: DriveFile = Self::check(resp, id).await?.json().await?;
        Ok(file.into())
    }

    fn digest_kind(&self) -> DigestKind {
        DigestKind::Md5
    }

    fn name(&self) -> &str {
        "gdrive"
    }
}
