use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ctxkeep_state::{CasStore, ContentDigest, StorageError, StorageResult};
use tempfile::NamedTempFile;

/// Filesystem-backed content-addressed store with git-style 2-char sharding.
///
/// Layout: `<root>/objects/<first 2 hex chars>/<remaining hex chars>`
#[derive(Debug, Clone)]
pub struct FsCasStore {
    objects_dir: PathBuf,
}

fn io_error(e: std::io::Error) -> StorageError {
    StorageError::Backend(format!("cas io error: {e}"))
}

impl FsCasStore {
    /// Create a new `FsCasStore` rooted at `root`. Creates `root/objects/` if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let objects_dir = root.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        let hex = digest.as_str();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    fn write_blob(path: &Path, data: &[u8]) -> std::io::Result<()> {
        if path.exists() {
            return Ok(());
        }
        let shard_dir = path
            .parent()
            .ok_or_else(|| std::io::Error::other("blob path has no parent"))?;
        fs::create_dir_all(shard_dir)?;

        // Write to a temp file in the same shard, then rename into place.
        let mut tmp = NamedTempFile::new_in(shard_dir)?;
        tmp.write_all(data)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl CasStore for FsCasStore {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        let path = self.blob_path(&digest);
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || Self::write_blob(&path, &data))
            .await
            .map_err(|e| StorageError::Backend(format!("cas task failed: {e}")))?
            .map_err(io_error)?;
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        let path = self.blob_path(digest);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                digest: digest.as_str().to_string(),
            }),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool> {
        tokio::fs::try_exists(self.blob_path(digest))
            .await
            .map_err(io_error)
    }
}
