//! 内存中的远程仓库，用于测试和演练

use super::{normalize_path, split_path, RemoteEntry, RemoteRepository};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    writable: bool,
    /// 成功写入这么多次之后，后续写入全部失败
    fail_writes_after: Option<usize>,
    writes: usize,
}

pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    name: String,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                files: BTreeMap::new(),
                dirs: BTreeSet::from(["/".to_string()]),
                writable: true,
                fail_writes_after: None,
                writes: 0,
            }),
            name: "memory://".to_string(),
        }
    }

    /// 只读仓库
    pub fn read_only() -> Self {
        let repo = Self::new();
        repo.lock().writable = false;
        repo
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 模拟传输中断：`n` 次写入成功后开始失败，`None` 恢复正常
    pub fn fail_writes_after(&self, n: Option<usize>) {
        let mut state = self.lock();
        state.fail_writes_after = n;
        state.writes = 0;
    }

    /// 直接放入文件（自动创建父目录），不计入写入次数
    pub fn insert_file(&self, path: &str, data: Vec<u8>) {
        let path = normalize_path(path);
        let mut state = self.lock();
        let (parent, _) = split_path(&path);
        insert_dirs(&mut state.dirs, &parent);
        state.files.insert(path, data);
    }

    /// 所有文件路径
    pub fn file_paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(&normalize_path(path)).cloned()
    }

    /// 成功写入的次数
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_dirs(dirs: &mut BTreeSet<String>, path: &str) {
    let mut current = String::new();
    for part in normalize_path(path).split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        dirs.insert(current.clone());
    }
}

#[async_trait]
impl RemoteRepository for MemoryRepository {
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let path = normalize_path(path);
        let state = self.lock();
        if !state.dirs.contains(&path) {
            return Err(SyncError::NotFound(path));
        }

        let is_child = |candidate: &str| split_path(candidate).0 == path && candidate != path;
        let mut entries: Vec<RemoteEntry> = state
            .dirs
            .iter()
            .filter(|d| is_child(d))
            .map(|d| RemoteEntry {
                name: split_path(d).1,
                is_dir: true,
            })
            .collect();
        entries.extend(state.files.keys().filter(|f| is_child(f)).map(|f| RemoteEntry {
            name: split_path(f).1,
            is_dir: false,
        }));
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path);
        self.lock()
            .files
            .get(&path)
            .cloned()
            .ok_or(SyncError::NotFound(path))
    }

    async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = normalize_path(path);
        let mut state = self.lock();
        if !state.writable {
            return Err(SyncError::PermissionDenied(path));
        }
        if let Some(limit) = state.fail_writes_after {
            if state.writes >= limit {
                return Err(SyncError::Connectivity(format!("simulated failure writing {}", path)));
            }
        }
        let (parent, _) = split_path(&path);
        if !state.dirs.contains(&parent) {
            return Err(SyncError::NotFound(parent));
        }
        state.files.insert(path, data);
        state.writes += 1;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        let mut state = self.lock();
        if !state.writable {
            return Err(SyncError::PermissionDenied(path));
        }
        match state.files.remove(&path) {
            Some(_) => Ok(()),
            None => Err(SyncError::NotFound(path)),
        }
    }

    async fn make_dir(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        let mut state = self.lock();
        if !state.writable {
            return Err(SyncError::PermissionDenied(path));
        }
        let (parent, _) = split_path(&path);
        if !state.dirs.contains(&parent) {
            return Err(SyncError::NotFound(parent));
        }
        state.dirs.insert(path);
        Ok(())
    }

    async fn can_write(&self) -> Result<bool> {
        Ok(self.lock().writable)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
