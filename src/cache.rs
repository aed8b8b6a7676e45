//! 感知修改时间的文件内容缓存。
//!
//! 条目只在磁盘当前修改时间不晚于缓存时记录的修改时间时有效，否则重新读取。
//! 容量满时淘汰记录修改时间最早的条目。

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    content: Vec<u8>,
    size: u64,
    last_modified: SystemTime,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<PathBuf, CacheEntry>,
    total_bytes: u64,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct FileCache {
    enabled: bool,
    max_entries: usize,
    max_bytes: u64,
    state: Mutex<CacheState>,
}

impl FileCache {
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            enabled: max_entries > 0 && max_bytes > 0,
            max_entries,
            max_bytes,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// 不缓存任何内容、每次直接读盘的实例。
    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// 读取文件内容，命中且未过期时返回缓存副本。
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, CacheError> {
        let metadata = fs::metadata(path).await.map_err(CacheError::from_io)?;
        if metadata.is_dir() {
            return Err(CacheError::Unreadable(io::Error::other("is a directory")));
        }
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);

        if self.enabled
            && let Some(content) = self.lookup(path, modified, metadata.len())
        {
            return Ok(content);
        }

        let content = fs::read(path).await.map_err(CacheError::from_io)?;
        if self.enabled {
            self.insert(path, &content, modified);
        }
        Ok(content)
    }

    /// 主动丢弃某路径（或目录下所有路径）的条目。
    pub fn invalidate(&self, path: &Path) {
        if !self.enabled {
            return;
        }
        let mut state = self.lock();
        let doomed: Vec<PathBuf> = state
            .entries
            .keys()
            .filter(|key| key.starts_with(path))
            .cloned()
            .collect();
        for key in doomed {
            if let Some(entry) = state.entries.remove(&key) {
                state.total_bytes -= entry.size;
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            enabled: self.enabled,
            entries: state.entries.len(),
            bytes: state.total_bytes,
            hits: state.hits,
            misses: state.misses,
        }
    }

    fn lookup(&self, path: &Path, modified: SystemTime, size: u64) -> Option<Vec<u8>> {
        let mut state = self.lock();
        let fresh = state
            .entries
            .get(path)
            .filter(|entry| modified <= entry.last_modified && size == entry.size)
            .map(|entry| entry.content.clone());
        match fresh {
            Some(content) => {
                state.hits += 1;
                Some(content)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    fn insert(&self, path: &Path, content: &[u8], modified: SystemTime) {
        let size = content.len() as u64;
        if size > self.max_bytes {
            debug!(path = %path.display(), size, "file exceeds cache budget");
            return;
        }
        let mut state = self.lock();
        if let Some(stale) = state.entries.remove(path) {
            state.total_bytes -= stale.size;
        }
        while state.entries.len() >= self.max_entries
            || state.total_bytes + size > self.max_bytes
        {
            if !state.evict_oldest() {
                break;
            }
        }
        state.total_bytes += size;
        state.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                content: content.to_vec(),
                size,
                last_modified: modified,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheState {
    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_modified)
            .map(|(key, _)| key.clone());
        match oldest.and_then(|key| self.entries.remove(&key)) {
            Some(entry) => {
                self.total_bytes -= entry.size;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
pub enum CacheError {
    NotFound,
    Unreadable(io::Error),
}

impl CacheError {
    fn from_io(err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => CacheError::NotFound,
            _ => CacheError::Unreadable(err),
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::NotFound => f.write_str("file not found"),
            CacheError::Unreadable(err) => write!(f, "file unreadable: {err}"),
        }
    }
}
