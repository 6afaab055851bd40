//! Per-project and per-agent locking.
//!
//! Every agent operation takes its project's lock shared and then the agent's
//! mutex, so writes are linear per namespace and concurrent across
//! namespaces. Restore takes the project lock exclusively. Locks are created
//! lazily. An entry nobody holds or waits on is dropped the next time a lock
//! of the same kind is looked up, so the registry tracks live namespaces only.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use ctxkeep_state::AgentRef;
use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};
use tracing::debug;

use crate::error::{CtxKeepError, Result};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Held for the duration of one agent-namespace operation.
#[derive(Debug)]
pub struct AgentGuard {
    // Field order is drop order: agent first, then project.
    _agent: OwnedMutexGuard<()>,
    _project: OwnedRwLockReadGuard<()>,
}

/// Marks a restore as in flight for a project until dropped.
pub struct RestoreGuard<'a> {
    registry: &'a LockRegistry,
    project_id: String,
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        lock(&self.registry.restoring).remove(&self.project_id);
    }
}

// Guards and waiters each own a clone, so a count of one means the map's
// reference is the last and the lock can be recreated on demand.
fn prune_idle<K, L>(map: &mut HashMap<K, Arc<L>>) {
    map.retain(|_, l| Arc::strong_count(l) > 1);
}

#[derive(Default)]
pub struct LockRegistry {
    projects: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    agents: Mutex<HashMap<AgentRef, Arc<AsyncMutex<()>>>>,
    restoring: Mutex<HashSet<String>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn project_lock(&self, project_id: &str) -> Arc<RwLock<()>> {
        let mut projects = lock(&self.projects);
        prune_idle(&mut projects);
        projects.entry(project_id.to_string()).or_default().clone()
    }

    fn agent_lock(&self, agent: &AgentRef) -> Arc<AsyncMutex<()>> {
        let mut agents = lock(&self.agents);
        prune_idle(&mut agents);
        agents.entry(agent.clone()).or_default().clone()
    }

    /// Shared project lock plus exclusive agent lock.
    pub async fn agent(&self, agent: &AgentRef) -> AgentGuard {
        let project = self.project_lock(&agent.project_id).read_owned().await;
        let agent_guard = self.agent_lock(agent).lock_owned().await;
        debug!(agent = %agent, "agent lock acquired");
        AgentGuard {
            _agent: agent_guard,
            _project: project,
        }
    }

    pub async fn project_shared(&self, project_id: &str) -> OwnedRwLockReadGuard<()> {
        self.project_lock(project_id).read_owned().await
    }

    pub async fn project_exclusive(&self, project_id: &str) -> OwnedRwLockWriteGuard<()> {
        let guard = self.project_lock(project_id).write_owned().await;
        debug!(project_id, "project lock acquired exclusively");
        guard
    }

    /// Claim the single restore slot of a project.
    ///
    /// Fails with [`CtxKeepError::ConcurrencyConflict`] instead of queueing
    /// when a restore of the same project is already running.
    pub fn begin_restore(&self, project_id: &str) -> Result<RestoreGuard<'_>> {
        if !lock(&self.restoring).insert(project_id.to_string()) {
            return Err(CtxKeepError::ConcurrencyConflict(format!(
                "a restore of project {project_id} is already in progress"
            )));
        }
        Ok(RestoreGuard {
            registry: self,
            project_id: project_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_restore_is_rejected_until_first_ends() {
        let registry = LockRegistry::new();
        let first = registry.begin_restore("proj").unwrap();
        assert!(matches!(
            registry.begin_restore("proj"),
            Err(CtxKeepError::ConcurrencyConflict(_))
        ));
        assert!(registry.begin_restore("other").is_ok());
        drop(first);
        assert!(registry.begin_restore("proj").is_ok());
    }

    #[tokio::test]
    async fn different_agents_do_not_block_each_other() {
        let registry = LockRegistry::new();
        let _a = registry.agent(&AgentRef::new("proj", "a")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            registry.agent(&AgentRef::new("proj", "b")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn same_agent_waits() {
        let registry = LockRegistry::new();
        let agent = AgentRef::new("proj", "a");
        let _held = registry.agent(&agent).await;
        let second = tokio::time::timeout(Duration::from_millis(50), registry.agent(&agent)).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn exclusive_waits_for_agents() {
        let registry = LockRegistry::new();
        let held = registry.agent(&AgentRef::new("proj", "a")).await;
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            registry.project_exclusive("proj"),
        )
        .await;
        assert!(blocked.is_err());
        drop(held);
        let _exclusive = registry.project_exclusive("proj").await;
    }

    #[tokio::test]
    async fn released_locks_are_dropped_from_the_registry() {
        let registry = LockRegistry::new();
        let held = registry.agent(&AgentRef::new("proj", "a")).await;
        for i in 0..50 {
            drop(registry.agent(&AgentRef::new("proj", format!("gone-{i}"))).await);
        }
        let _other = registry.agent(&AgentRef::new("other", "c")).await;

        assert_eq!(lock(&registry.agents).len(), 2);
        assert_eq!(lock(&registry.projects).len(), 2);

        drop(held);
        let _again = registry.agent(&AgentRef::new("proj", "a")).await;
        let _blocked = tokio::time::timeout(
            Duration::from_millis(50),
            registry.agent(&AgentRef::new("proj", "a")),
        )
        .await
        .unwrap_err();
    }
}
