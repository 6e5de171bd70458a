//! 内存中的远程存储，用于测试与演练

use super::{DigestKind, ListQuery, PendingUploads, RemoteEntry, RemoteStore, FOLDER_MIME_TYPE};
use crate::core::classifier::content_digest;
use crate::error::RemoteError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, RemoteEntry>,
    children: HashMap<String, Vec<String>>,
    contents: HashMap<String, Bytes>,
    trashed: HashSet<String>,
    failing_lists: HashSet<String>,
    next_id: u64,
}

impl MemoryState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("mem-{}", self.next_id)
    }

    fn insert(&mut self, parent: Option<&str>, entry: RemoteEntry) -> String {
        let id = entry.id.clone();
        if let Some(parent) = parent {
            self.children
                .entry(parent.to_string())
                .or_default()
                .push(id.clone());
        }
        self.entries.insert(id.clone(), entry);
        id
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    digest: DigestKind,
    state: Mutex<MemoryState>,
    pending: PendingUploads,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_digest(DigestKind::Md5)
    }

    pub fn with_digest(digest: DigestKind) -> Self {
        Self {
            name: "memory".to_string(),
            digest,
            state: Mutex::new(MemoryState::default()),
            pending: PendingUploads::default(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 添加文件夹，parent 为 None 时作为根
    pub fn add_folder(&self, parent: Option<&str>, title: &str) -> String {
        let mut state = self.state();
        let id = state.allocate_id();
        state.insert(
            parent,
            RemoteEntry {
                id: id.clone(),
                title: title.to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                modified_time: Some(Utc::now()),
                checksum: None,
                url: Some(format!("memory://{}", id)),
                size: None,
            },
        )
    }

    pub fn add_file(
        &self,
        parent: Option<&str>,
        title: &str,
        content: &[u8],
        modified: DateTime<Utc>,
    ) -> String {
        let mut state = self.state();
        let id = state.allocate_id();
        state.contents.insert(id.clone(), Bytes::copy_from_slice(content));
        state.insert(
            parent,
            RemoteEntry {
                id: id.clone(),
                title: title.to_string(),
                mime_type: "application/octet-stream".to_string(),
                modified_time: Some(modified),
                checksum: Some(content_digest(self.digest, content)),
                url: Some(format!("memory://{}", id)),
                size: Some(content.len() as u64),
            },
        )
    }

    /// 添加没有二进制内容的原生文档
    pub fn add_native_document(&self, parent: Option<&str>, title: &str, mime_type: &str) -> String {
        let mut state = self.state();
        let id = state.allocate_id();
        state.insert(
            parent,
            RemoteEntry {
                id: id.clone(),
                title: title.to_string(),
                mime_type: mime_type.to_string(),
                modified_time: Some(Utc::now()),
                checksum: None,
                url: Some(format!("memory://{}", id)),
                size: None,
            },
        )
    }

    pub fn trash(&self, id: &str) {
        self.state().trashed.insert(id.to_string());
    }

    /// 之后对该文件夹的列表调用都失败
    pub fn fail_listing(&self, id: &str) {
        self.state().failing_lists.insert(id.to_string());
    }

    pub fn content(&self, id: &str) -> Option<Bytes> {
        self.state().contents.get(id).cloned()
    }

    pub fn entry(&self, id: &str) -> Option<RemoteEntry> {
        self.state().entries.get(id).cloned()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn fetch_metadata(&self, id: &str) -> Result<RemoteEntry, RemoteError> {
        self.state()
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn list_children(
        &self,
        parent_id: &str,
        query: &ListQuery,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        let state = self.state();
        if state.failing_lists.contains(parent_id) {
            return Err(RemoteError::Status {
                status: 500,
                body: format!("listing {} failed", parent_id),
            });
        }

        let mut entries: Vec<RemoteEntry> = state
            .children
            .get(parent_id)
            .into_iter()
            .flatten()
            .filter(|id| query.include_trashed || !state.trashed.contains(*id))
            .filter_map(|id| state.entries.get(id).cloned())
            .filter(|e| query.accepts(e))
            .collect();
        entries.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(entries)
    }

    async fn get_content(&self, id: &str) -> Result<Bytes, RemoteError> {
        let state = self.state();
        let entry = state
            .entries
            .get(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        if entry.is_folder() || !entry.is_downloadable() {
            return Err(RemoteError::NotDownloadable {
                id: id.to_string(),
                mime_type: entry.mime_type.clone(),
            });
        }
        state
            .contents
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn set_content(&self, id: &str, path: &Path) -> Result<(), RemoteError> {
        if !self.state().entries.contains_key(id) {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        self.pending.stage(id, path);
        Ok(())
    }

    async fn save(&self, id: &str) -> Result<RemoteEntry, RemoteError> {
        let path = self.pending.take(id)?;
        let data = tokio::fs::read(&path).await?;

        let mut state = self.state();
        let checksum = content_digest(self.digest, &data);
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        entry.checksum = Some(checksum);
        entry.size = Some(data.len() as u64);
        entry.modified_time = Some(Utc::now());
        let updated = entry.clone();
        state.contents.insert(id.to_string(), Bytes::from(data));
        Ok(updated)
    }

    fn digest_kind(&self) -> DigestKind {
        self.digest
    }

    fn name(&self) -> &str {
        &self.name
    }
}
