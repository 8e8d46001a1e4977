//! Per-owner background task registry
//!
//! Each logical owner (a user, a chat, a session) has at most one live task.
//! Registering a new task for an owner cancels the token of the previous one,
//! so a long narration started earlier stops at its next cancellation check.
//! Completion only clears the registry entry if it still belongs to the task
//! that completes; a replaced task finishing late never removes its successor.
//! `run` and `enter` clear the entry on drop, so a request abandoned by its
//! client does not stay registered.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct TaskEntry {
    id: u64,
    token: CancellationToken,
}

/// Handle for one registered task.
#[derive(Debug, Clone)]
pub struct TaskHandle<K> {
    owner: K,
    id: u64,
    token: CancellationToken,
}

impl<K> TaskHandle<K> {
    /// Token to pass into `Invoker::invoke` and check between steps.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn owner(&self) -> &K {
        &self.owner
    }
}

/// Registry of live tasks keyed by owner.
///
/// The lock is never held across an `.await`.
pub struct TaskRegistry<K> {
    tasks: Mutex<HashMap<K, TaskEntry>>,
    next_id: AtomicU64,
}

impl<K> Default for TaskRegistry<K>
where
    K: Eq + Hash + Clone + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Clears a registration when dropped, including when the future running
/// the task is dropped before it finishes.
pub struct Registration<'a, K>
where
    K: Eq + Hash + Clone + Display,
{
    registry: &'a TaskRegistry<K>,
    handle: TaskHandle<K>,
}

impl<K> Registration<'_, K>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn handle(&self) -> &TaskHandle<K> {
        &self.handle
    }
}

impl<K> Drop for Registration<'_, K>
where
    K: Eq + Hash + Clone + Display,
{
    fn drop(&mut self) {
        self.registry.complete(&self.handle);
    }
}

impl<K> TaskRegistry<K>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, TaskEntry>> {
        // Entries stay consistent even if a holder panicked
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new task for `owner`, cancelling any task it replaces.
    pub fn register(&self, owner: K) -> TaskHandle<K> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let previous = self.lock().insert(
            owner.clone(),
            TaskEntry {
                id,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            info!(owner = %owner, replaced = previous.id, task = id, "replaced running task");
        } else {
            debug!(owner = %owner, task = id, "registered task");
        }

        TaskHandle { owner, id, token }
    }

    /// Register a task whose registration is cleared when the returned
    /// guard drops.
    pub fn enter(&self, owner: K) -> Registration<'_, K> {
        Registration {
            registry: self,
            handle: self.register(owner),
        }
    }

    /// Cancel the live task for `owner`. Returns false if none was running.
    pub fn cancel(&self, owner: &K) -> bool {
        let removed = self.lock().remove(owner);
        match removed {
            Some(entry) => {
                entry.token.cancel();
                info!(owner = %owner, task = entry.id, "cancelled task");
                true
            }
            None => false,
        }
    }

    /// Clear the registration for a finished task, unless it was replaced.
    pub fn complete(&self, handle: &TaskHandle<K>) {
        let mut tasks = self.lock();
        if tasks.get(&handle.owner).is_some_and(|entry| entry.id == handle.id) {
            tasks.remove(&handle.owner);
            debug!(owner = %handle.owner, task = handle.id, "task completed");
        }
    }

    /// Cancel every live task. Used on shutdown. Returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<TaskEntry> = self.lock().drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.token.cancel();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "cancelled all running tasks");
        }
        drained.len()
    }

    /// Number of owners with a live task.
    pub fn active(&self) -> usize {
        self.lock().len()
    }

    /// Register a task for `owner` and run `work` with its token. The
    /// registration is cleared when `work` finishes or this future is dropped.
    pub async fn run<F, Fut, T>(&self, owner: K, work: F) -> T
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let registration = self.enter(owner);
        work(registration.handle().token().clone()).await
    }
}
