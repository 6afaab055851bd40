//! Git-backed versioned file tree.
//!
//! Each checkpoint is a commit of the whole working tree (`git add -A`
//! followed by `git commit --allow-empty`); the commit SHA is the tree ref.
//! Restoring rewrites the index and working tree to that commit with
//! `git read-tree -u --reset` and removes untracked files, leaving `HEAD`
//! and branch history untouched. The ctxkeep data directory is never
//! committed, reset or cleaned.
//!
//! Git commands for one repository run one at a time. A command whose caller
//! gave up (for example on a snapshot timeout) still holds the repository
//! lock until git exits, so the next reset or commit waits for it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ctxkeep_state::{
    FileChange, FileChangeKind, FileTreeBackend, StorageError, StorageResult, TreeRef,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument};

use crate::error::{CtxKeepError, Result};

/// Directory under a repository root holding ctxkeep's own state.
pub const DATA_DIR: &str = ".ctxkeep";

const FALLBACK_NAME: &str = "ctxkeep";
const FALLBACK_EMAIL: &str = "ctxkeep@localhost";

fn run_git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| CtxKeepError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CtxKeepError::Git(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Capture the HEAD commit SHA from a git repository.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let sha = run_git(repo_dir, &["rev-parse", "HEAD"])?.trim().to_string();
    if sha.is_empty() {
        return Err(CtxKeepError::Git(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn has_identity(repo_dir: &Path) -> bool {
    run_git(repo_dir, &["config", "user.email"])
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false)
}

fn is_data_path(path: &str) -> bool {
    path == DATA_DIR || path.starts_with(&format!("{DATA_DIR}/"))
}

fn commit_all(repo_dir: &Path, message: &str) -> Result<String> {
    let exclude = format!(":(exclude){DATA_DIR}");
    run_git(repo_dir, &["add", "-A", "--", ".", &exclude])?;

    let name = format!("user.name={FALLBACK_NAME}");
    let email = format!("user.email={FALLBACK_EMAIL}");
    let mut args: Vec<&str> = if has_identity(repo_dir) {
        Vec::new()
    } else {
        vec!["-c", name.as_str(), "-c", email.as_str()]
    };
    args.extend(["commit", "--allow-empty", "--no-verify", "-q", "-m", message]);
    run_git(repo_dir, &args)?;

    capture_head_sha(repo_dir)
}

fn reset_tree(repo_dir: &Path, sha: &str) -> Result<()> {
    run_git(repo_dir, &["cat-file", "-e", &format!("{sha}^{{commit}}")])?;
    run_git(repo_dir, &["read-tree", "-u", "--reset", sha])?;
    run_git(repo_dir, &["clean", "-fd", "-q", "-e", DATA_DIR])?;
    Ok(())
}

fn changes_since(repo_dir: &Path, sha: &str) -> Result<Vec<FileChange>> {
    let mut changes: BTreeMap<String, FileChangeKind> = BTreeMap::new();

    let diff = run_git(repo_dir, &["diff", "--name-status", "--no-renames", sha, "--"])?;
    for line in diff.lines() {
        let mut parts = line.splitn(2, '\t');
        let (Some(status), Some(path)) = (parts.next(), parts.next()) else {
            continue;
        };
        let kind = match status.chars().next() {
            Some('A') => FileChangeKind::Added,
            Some('D') => FileChangeKind::Deleted,
            _ => FileChangeKind::Modified,
        };
        changes.insert(path.to_string(), kind);
    }

    let untracked = run_git(repo_dir, &["ls-files", "--others", "--exclude-standard"])?;
    for path in untracked.lines() {
        changes.insert(path.to_string(), FileChangeKind::Added);
    }

    Ok(changes
        .into_iter()
        .filter(|(path, _)| !is_data_path(path))
        .map(|(path, kind)| FileChange { path, kind })
        .collect())
}

fn to_storage(e: CtxKeepError) -> StorageError {
    StorageError::FileTree(e.to_string())
}

/// [`FileTreeBackend`] over git working trees, one per project.
///
/// Projects without an explicit root fall back to the default root.
pub struct GitFileTree {
    default_root: Option<PathBuf>,
    roots: Mutex<HashMap<String, PathBuf>>,
    repo_locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl GitFileTree {
    pub fn new(default_root: impl Into<PathBuf>) -> Self {
        Self {
            default_root: Some(default_root.into()),
            roots: Mutex::new(HashMap::new()),
            repo_locks: Mutex::new(HashMap::new()),
        }
    }

    /// No default root; every project must be registered.
    pub fn empty() -> Self {
        Self {
            default_root: None,
            roots: Mutex::new(HashMap::new()),
            repo_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, project_id: impl Into<String>, root: impl Into<PathBuf>) {
        self.roots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(project_id.into(), root.into());
    }

    fn root_for(&self, project_id: &str) -> StorageResult<PathBuf> {
        let roots = self.roots.lock().unwrap_or_else(|e| e.into_inner());
        roots
            .get(project_id)
            .or(self.default_root.as_ref())
            .cloned()
            .ok_or_else(|| {
                StorageError::FileTree(format!("no repository registered for project {project_id}"))
            })
    }

    fn repo_lock(&self, root: &Path) -> Arc<AsyncMutex<()>> {
        self.repo_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(root.to_path_buf())
            .or_default()
            .clone()
    }

    /// Runs `f` on the blocking pool while holding the repository lock. The
    /// guard moves into the blocking task, so dropping this future early
    /// does not release the repository before git finishes.
    async fn blocking<T, F>(&self, project_id: &str, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let root = self.root_for(project_id)?;
        if !is_git_repo(&root) {
            return Err(StorageError::FileTree(format!(
                "{} is not a git repository",
                root.display()
            )));
        }
        let guard = self.repo_lock(&root).lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            f(&root)
        })
        .await
        .map_err(|e| StorageError::FileTree(format!("git task failed: {e}")))?
        .map_err(to_storage)
    }
}

#[async_trait]
impl FileTreeBackend for GitFileTree {
    #[instrument(skip(self, message))]
    async fn snapshot(&self, project_id: &str, message: &str) -> StorageResult<TreeRef> {
        let message = message.to_string();
        let sha = self
            .blocking(project_id, move |root| commit_all(root, &message))
            .await?;
        debug!(sha = %sha, "working tree committed");
        Ok(TreeRef(sha))
    }

    #[instrument(skip(self))]
    async fn reset_to(&self, project_id: &str, tree: &TreeRef) -> StorageResult<()> {
        let sha = tree.0.clone();
        self.blocking(project_id, move |root| reset_tree(root, &sha))
            .await
    }

    async fn diff_since(&self, project_id: &str, tree: &TreeRef) -> StorageResult<Vec<FileChange>> {
        let sha = tree.0.clone();
        self.blocking(project_id, move |root| changes_since(root, &sha))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command as StdCommand;

    fn git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q"]);
        git(dir.path(), &["config", "user.name", "test-user"]);
        git(dir.path(), &["config", "user.email", "test@example.com"]);
        fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        git(dir.path(), &["add", "README.md"]);
        git(dir.path(), &["commit", "-q", "-m", "initial"]);
        dir
    }

    #[test]
    fn capture_head_sha_returns_40_hex_chars() {
        let repo = make_git_repo();
        let sha = capture_head_sha(repo.path()).unwrap();
        assert_eq!(sha.len(), 40, "SHA should be 40 hex chars, got: {sha}");
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn is_git_repo_false_for_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_git_repo(dir.path()));
    }

    #[test]
    fn data_paths_are_recognised() {
        assert!(is_data_path(".ctxkeep"));
        assert!(is_data_path(".ctxkeep/db/000001.log"));
        assert!(!is_data_path(".ctxkeeper"));
        assert!(!is_data_path("src/.ctxkeep"));
    }

    #[tokio::test]
    async fn snapshot_commits_working_tree() {
        let repo = make_git_repo();
        let tree = GitFileTree::new(repo.path());
        fs::write(repo.path().join("notes.txt"), "draft").unwrap();

        let snap = tree.snapshot("proj", "Checkpoint: first").await.unwrap();
        assert_eq!(snap.0, capture_head_sha(repo.path()).unwrap());
        assert!(tree.diff_since("proj", &snap).await.unwrap().is_empty());

        let log = run_git(repo.path(), &["log", "-1", "--format=%s"]).unwrap();
        assert_eq!(log.trim(), "Checkpoint: first");
    }

    #[tokio::test]
    async fn snapshot_without_changes_still_commits() {
        let repo = make_git_repo();
        let tree = GitFileTree::new(repo.path());
        let a = tree.snapshot("proj", "a").await.unwrap();
        let b = tree.snapshot("proj", "b").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn reset_restores_files_and_keeps_data_dir() {
        let repo = make_git_repo();
        let root = repo.path();
        let tree = GitFileTree::new(root);
        fs::write(root.join("src.rs"), "v1").unwrap();
        let snap = tree.snapshot("proj", "base").await.unwrap();
        let head = capture_head_sha(root).unwrap();

        fs::write(root.join("src.rs"), "v2").unwrap();
        fs::remove_file(root.join("README.md")).unwrap();
        fs::write(root.join("scratch.txt"), "temp").unwrap();
        fs::create_dir_all(root.join(DATA_DIR)).unwrap();
        fs::write(root.join(DATA_DIR).join("state"), "keep me").unwrap();

        let changes = tree.diff_since("proj", &snap).await.unwrap();
        assert_eq!(
            changes,
            vec![
                FileChange {
                    path: "README.md".to_string(),
                    kind: FileChangeKind::Deleted
                },
                FileChange {
                    path: "scratch.txt".to_string(),
                    kind: FileChangeKind::Added
                },
                FileChange {
                    path: "src.rs".to_string(),
                    kind: FileChangeKind::Modified
                },
            ]
        );

        tree.reset_to("proj", &snap).await.unwrap();
        assert_eq!(fs::read_to_string(root.join("src.rs")).unwrap(), "v1");
        assert_eq!(fs::read_to_string(root.join("README.md")).unwrap(), "hello\n");
        assert!(!root.join("scratch.txt").exists());
        assert_eq!(
            fs::read_to_string(root.join(DATA_DIR).join("state")).unwrap(),
            "keep me"
        );
        assert_eq!(capture_head_sha(root).unwrap(), head);
    }

    #[tokio::test]
    async fn abandoned_snapshot_completes_before_next_reset() {
        let repo = make_git_repo();
        let root = repo.path();
        let tree = GitFileTree::new(root);
        for i in 0..200 {
            fs::write(root.join(format!("file-{i}.txt")), format!("v1 {i}")).unwrap();
        }
        let base = tree.snapshot("proj", "base").await.unwrap();

        for i in 0..200 {
            fs::write(root.join(format!("file-{i}.txt")), format!("v2 {i}")).unwrap();
        }
        let _ = tokio::time::timeout(
            std::time::Duration::ZERO,
            tree.snapshot("proj", "abandoned"),
        )
        .await;

        tree.reset_to("proj", &base).await.unwrap();
        assert!(!root.join(".git").join("index.lock").exists());
        assert_eq!(fs::read_to_string(root.join("file-7.txt")).unwrap(), "v1 7");
        let log = run_git(root, &["log", "-1", "--format=%s"]).unwrap();
        assert_eq!(log.trim(), "abandoned");
        assert!(tree.diff_since("proj", &base).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_to_unknown_commit_fails() {
        let repo = make_git_repo();
        let tree = GitFileTree::new(repo.path());
        let err = tree
            .reset_to("proj", &TreeRef("0".repeat(40)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::FileTree(_)));
    }

    #[tokio::test]
    async fn unregistered_project_fails() {
        let tree = GitFileTree::empty();
        let err = tree.snapshot("proj", "x").await.unwrap_err();
        assert!(matches!(err, StorageError::FileTree(_)));
    }
}
