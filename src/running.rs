use std::{collections::BTreeMap, fmt, sync::Mutex};

use serde::{Deserialize, Serialize};

use crate::common::lock;

/// Identity a pool gives a task when it is enqueued.
///
/// A retried task keeps its id, so the pool can tell one task sitting in
/// both the queue and the running set from two equal tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The tasks some worker is executing right now, keyed by `TaskId`.
#[derive(Debug)]
pub struct RunningSet<T> {
    tasks: Mutex<BTreeMap<TaskId, T>>,
}

impl<T> Default for RunningSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RunningSet<T> {
    /// An empty set
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Track `task` under `id`. Adding an id that is already present keeps
    /// the first entry.
    pub fn add(&self, id: TaskId, task: T) {
        lock(&self.tasks).entry(id).or_insert(task);
    }

    /// Stop tracking `id`, returning its task if it was tracked
    pub fn remove(&self, id: TaskId) -> Option<T> {
        lock(&self.tasks).remove(&id)
    }

    /// Whether `id` is tracked
    pub fn contains(&self, id: TaskId) -> bool {
        lock(&self.tasks).contains_key(&id)
    }

    /// Number of tracked tasks
    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Whether no task is tracked
    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    /// Stop tracking everything.
    pub fn clear(&self) {
        lock(&self.tasks).clear();
    }

}

impl<T: Clone> RunningSet<T> {
    /// A copy of the tracked tasks, ascending by id
    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.tasks).values().cloned().collect()
    }

    /// A copy of the tracked `(id, task)` pairs, ascending by id
    pub fn entries(&self) -> Vec<(TaskId, T)> {
        lock(&self.tasks)
            .iter()
            .map(|(id, task)| (*id, task.clone()))
            .collect()
    }

    /// Visit every tracked task in ascending id order.
    ///
    /// The visitor runs on a copy taken under the lock, so it may call back
    /// into the set.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(TaskId, &T),
    {
        self.entries().iter().for_each(|(id, task)| visit(*id, task));
    }
}
