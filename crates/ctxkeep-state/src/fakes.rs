//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryItemStore`, `MemoryCheckpointCatalog`, `MemoryCasStore`,
//! `MemoryFileTree` and `MemoryRelationalBackend` that satisfy the trait
//! contracts without any external dependencies. Each fake carries a
//! `FailSwitch` so tests can make a specific operation fail.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Failure injection toggle shared by the fakes.
#[derive(Debug, Default)]
pub struct FailSwitch(AtomicBool);

impl FailSwitch {
    pub fn set(&self, fail: bool) {
        self.0.store(fail, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, op: &str) -> StorageResult<()> {
        if self.is_set() {
            return Err(StorageError::Backend(format!("injected failure in {op}")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryItemStore
// ---------------------------------------------------------------------------

/// In-memory item store backed by a `BTreeMap<ItemId, MemoryItem>`.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    items: Mutex<BTreeMap<ItemId, MemoryItem>>,
    /// Makes every write fail
    pub fail_writes: FailSwitch,
    /// Makes `update_scores` fail
    pub fail_score_updates: FailSwitch,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn insert(&self, item: MemoryItem) -> StorageResult<()> {
        self.fail_writes.check("insert")?;
        lock(&self.items).insert(item.id.clone(), item);
        Ok(())
    }

    async fn get(&self, id: &ItemId) -> StorageResult<MemoryItem> {
        lock(&self.items)
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::ItemNotFound {
                item_id: id.0.clone(),
            })
    }

    async fn touch(&self, id: &ItemId, at: DateTime<Utc>) -> StorageResult<MemoryItem> {
        self.fail_writes.check("touch")?;
        let mut items = lock(&self.items);
        let item = items.get_mut(id).ok_or_else(|| StorageError::ItemNotFound {
            item_id: id.0.clone(),
        })?;
        item.access_count += 1;
        item.last_accessed_at = at;
        Ok(item.clone())
    }

    async fn list_agent(&self, agent: &AgentRef) -> StorageResult<Vec<MemoryItem>> {
        Ok(lock(&self.items)
            .values()
            .filter(|i| i.belongs_to(agent))
            .cloned()
            .collect())
    }

    async fn list_project(&self, project_id: &str) -> StorageResult<Vec<MemoryItem>> {
        Ok(lock(&self.items)
            .values()
            .filter(|i| i.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn update_scores(&self, updates: &[ScoreUpdate]) -> StorageResult<()> {
        self.fail_writes.check("update_scores")?;
        self.fail_score_updates.check("update_scores")?;
        let mut items = lock(&self.items);
        // Validate the whole batch before touching anything.
        if let Some(missing) = updates.iter().find(|u| !items.contains_key(&u.item_id)) {
            return Err(StorageError::ItemNotFound {
                item_id: missing.item_id.0.clone(),
            });
        }
        for update in updates {
            if let Some(item) = items.get_mut(&update.item_id) {
                item.importance_score = update.importance_score;
                item.tier = update.tier;
            }
        }
        Ok(())
    }

    async fn delete(&self, ids: &[ItemId]) -> StorageResult<usize> {
        self.fail_writes.check("delete")?;
        let mut items = lock(&self.items);
        Ok(ids.iter().filter(|id| items.remove(*id).is_some()).count())
    }

    async fn replace_project(
        &self,
        project_id: &str,
        new_items: Vec<MemoryItem>,
    ) -> StorageResult<()> {
        self.fail_writes.check("replace_project")?;
        let mut items = lock(&self.items);
        items.retain(|_, i| i.project_id != project_id);
        for item in new_items {
            items.insert(item.id.clone(), item);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCheckpointCatalog
// ---------------------------------------------------------------------------

/// In-memory catalog backed by an append-only `Vec`.
#[derive(Debug, Default)]
pub struct MemoryCheckpointCatalog {
    records: Mutex<Vec<CheckpointRecord>>,
    pub fail_append: FailSwitch,
}

impl MemoryCheckpointCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointCatalog for MemoryCheckpointCatalog {
    async fn append(&self, record: CheckpointRecord) -> StorageResult<()> {
        self.fail_append.check("append")?;
        lock(&self.records).push(record);
        Ok(())
    }

    async fn get(&self, id: &CheckpointId) -> StorageResult<CheckpointRecord> {
        lock(&self.records)
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| StorageError::CheckpointNotFound {
                checkpoint_id: id.0.clone(),
            })
    }

    async fn list(&self, project_id: &str) -> StorageResult<Vec<CheckpointRecord>> {
        let mut records: Vec<CheckpointRecord> = lock(&self.records)
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for identical timestamps.
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn prune(&self, id: &CheckpointId) -> StorageResult<()> {
        lock(&self.records).retain(|r| &r.id != id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCasStore
// ---------------------------------------------------------------------------

/// In-memory content-addressed store backed by a `HashMap<digest, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryCasStore {
    store: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_put: FailSwitch,
}

impl MemoryCasStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a blob, simulating a lost artifact.
    pub fn evict(&self, digest: &ContentDigest) {
        lock(&self.store).remove(digest.as_str());
    }
}

#[async_trait]
impl CasStore for MemoryCasStore {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest> {
        self.fail_put.check("put")?;
        let digest = ContentDigest::from_bytes(data);
        lock(&self.store).insert(digest.as_str().to_string(), data.to_vec());
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        lock(&self.store)
            .get(digest.as_str())
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                digest: digest.as_str().to_string(),
            })
    }

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool> {
        Ok(lock(&self.store).contains_key(digest.as_str()))
    }
}

// ---------------------------------------------------------------------------
// MemoryFileTree
// ---------------------------------------------------------------------------

type Files = BTreeMap<String, String>;

/// In-memory versioned file tree: a live `path -> content` map per project
/// plus immutable snapshots keyed by a sequential ref.
#[derive(Debug, Default)]
pub struct MemoryFileTree {
    live: Mutex<HashMap<String, Files>>,
    snapshots: Mutex<HashMap<String, Files>>,
    seq: AtomicU64,
    pub fail_snapshot: FailSwitch,
    pub fail_reset: FailSwitch,
}

impl MemoryFileTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_file(&self, project_id: &str, path: &str, content: &str) {
        lock(&self.live)
            .entry(project_id.to_string())
            .or_default()
            .insert(path.to_string(), content.to_string());
    }

    pub fn remove_file(&self, project_id: &str, path: &str) {
        if let Some(files) = lock(&self.live).get_mut(project_id) {
            files.remove(path);
        }
    }

    pub fn read_file(&self, project_id: &str, path: &str) -> Option<String> {
        lock(&self.live)
            .get(project_id)
            .and_then(|files| files.get(path).cloned())
    }
}

#[async_trait]
impl FileTreeBackend for MemoryFileTree {
    async fn snapshot(&self, project_id: &str, _message: &str) -> StorageResult<TreeRef> {
        if self.fail_snapshot.is_set() {
            return Err(StorageError::FileTree("injected snapshot failure".to_string()));
        }
        let files = lock(&self.live).get(project_id).cloned().unwrap_or_default();
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let tree = TreeRef(format!("tree-{project_id}-{n:06}"));
        lock(&self.snapshots).insert(tree.0.clone(), files);
        Ok(tree)
    }

    async fn reset_to(&self, project_id: &str, tree: &TreeRef) -> StorageResult<()> {
        if self.fail_reset.is_set() {
            return Err(StorageError::FileTree("injected reset failure".to_string()));
        }
        let files = lock(&self.snapshots)
            .get(tree.as_str())
            .cloned()
            .ok_or_else(|| StorageError::FileTree(format!("unknown tree ref {tree}")))?;
        lock(&self.live).insert(project_id.to_string(), files);
        Ok(())
    }

    async fn diff_since(&self, project_id: &str, tree: &TreeRef) -> StorageResult<Vec<FileChange>> {
        let base = lock(&self.snapshots)
            .get(tree.as_str())
            .cloned()
            .ok_or_else(|| StorageError::FileTree(format!("unknown tree ref {tree}")))?;
        let live = lock(&self.live).get(project_id).cloned().unwrap_or_default();

        let mut changes = Vec::new();
        for (path, content) in &live {
            match base.get(path) {
                None => changes.push(FileChange {
                    path: path.clone(),
                    kind: FileChangeKind::Added,
                }),
                Some(old) if old != content => changes.push(FileChange {
                    path: path.clone(),
                    kind: FileChangeKind::Modified,
                }),
                Some(_) => {}
            }
        }
        for path in base.keys().filter(|p| !live.contains_key(*p)) {
            changes.push(FileChange {
                path: path.clone(),
                kind: FileChangeKind::Deleted,
            });
        }
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(changes)
    }
}

// ---------------------------------------------------------------------------
// MemoryRelationalBackend
// ---------------------------------------------------------------------------

/// In-memory relational state: one `key -> value` table per project.
#[derive(Debug, Default)]
pub struct MemoryRelationalBackend {
    tables: Mutex<HashMap<String, BTreeMap<String, String>>>,
    backups: Mutex<HashMap<String, (String, BTreeMap<String, String>)>>,
    seq: AtomicU64,
    pub fail_backup: FailSwitch,
    pub fail_restore: FailSwitch,
}

impl MemoryRelationalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, project_id: &str, key: &str, value: &str) {
        lock(&self.tables)
            .entry(project_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn value(&self, project_id: &str, key: &str) -> Option<String> {
        lock(&self.tables)
            .get(project_id)
            .and_then(|t| t.get(key).cloned())
    }

    /// Drop a backup, simulating a lost artifact.
    pub fn evict(&self, backup: &BackupRef) {
        lock(&self.backups).remove(backup.as_str());
    }
}

#[async_trait]
impl RelationalBackend for MemoryRelationalBackend {
    async fn backup(&self, project_id: &str) -> StorageResult<BackupRef> {
        self.fail_backup.check("backup")?;
        let table = lock(&self.tables).get(project_id).cloned().unwrap_or_default();
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let backup = BackupRef(format!("backup-{project_id}-{n:06}"));
        lock(&self.backups).insert(backup.0.clone(), (project_id.to_string(), table));
        Ok(backup)
    }

    async fn restore(&self, project_id: &str, backup: &BackupRef) -> StorageResult<()> {
        self.fail_restore.check("restore")?;
        let (_, table) = lock(&self.backups)
            .get(backup.as_str())
            .cloned()
            .ok_or_else(|| StorageError::BackupNotFound {
                backup_id: backup.0.clone(),
            })?;
        lock(&self.tables).insert(project_id.to_string(), table);
        Ok(())
    }

    async fn has_backup(&self, backup: &BackupRef) -> StorageResult<bool> {
        Ok(lock(&self.backups).contains_key(backup.as_str()))
    }
}
