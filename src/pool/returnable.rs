use std::{
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex},
};

use super::{worker::Routine, BasePool, TaskContext, TaskPoolBuilder};
use crate::{common::lock, CancelToken, PoolConfig, Result};

type ReturningFn<T, R> = dyn Fn(T, &TaskContext<'_, T>) -> R + Send + Sync;

/// Append-only list of routine results shared by all workers of a pool.
#[derive(Debug)]
pub struct ResultSequence<R> {
    items: Mutex<Vec<R>>,
}

impl<R> Default for ResultSequence<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ResultSequence<R> {
    /// An empty sequence
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
    /// Append one result
    pub fn push(&self, item: R) {
        lock(&self.items).push(item);
    }
    /// Number of collected results
    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }
    /// Whether nothing was collected
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Move every collected result out, leaving the sequence empty
    pub fn take(&self) -> Vec<R> {
        std::mem::take(&mut *lock(&self.items))
    }
}

struct Collecting<T, R> {
    run: Arc<ReturningFn<T, R>>,
    results: Arc<ResultSequence<R>>,
    ignore_empty: bool,
}

impl<T, R> Routine<T> for Collecting<T, R>
where
    R: Default + PartialEq + Send,
{
    fn execute(&self, task: T, ctx: &TaskContext<'_, T>) {
        let result = (self.run)(task, ctx);
        if self.ignore_empty && result == R::default() {
            return;
        }
        self.results.push(result);
    }
}

/// A pool whose routine returns a value per invocation.
///
/// Results are gathered in completion order. With `ignore_empty`, results
/// equal to `R::default()` are dropped; wrap `R` in an `Option` when the
/// default value is a legitimate result.
pub struct ReturnableTaskPool<T, R> {
    base: BasePool<T>,
    run: Arc<ReturningFn<T, R>>,
}

impl<T, R> ReturnableTaskPool<T, R>
where
    T: Clone + Send + 'static,
    R: Default + PartialEq + Send + 'static,
{
    /// Create a pool over `tasks` with the given config and no callbacks.
    pub fn new<F>(config: PoolConfig, tasks: Vec<T>, run: F) -> Result<Self>
    where
        F: Fn(T, &TaskContext<'_, T>) -> R + Send + Sync + 'static,
    {
        TaskPoolBuilder::from_config(config).build_returnable(tasks, run)
    }

    /// Create a pool of `concurrency` workers with no spawn stagger, no
    /// execute delay and no callbacks.
    pub fn simple<F>(concurrency: usize, tasks: Vec<T>, run: F) -> Result<Self>
    where
        F: Fn(T, &TaskContext<'_, T>) -> R + Send + Sync + 'static,
    {
        TaskPoolBuilder::new(concurrency).build_returnable(tasks, run)
    }

    pub(crate) fn from_parts(base: BasePool<T>, run: Arc<ReturningFn<T, R>>) -> Self {
        ReturnableTaskPool { base, run }
    }

    /// Run every task and return what the routines produced.
    ///
    /// After an interrupt only the results of routines that had returned by
    /// then are included.
    pub fn start(&mut self, ignore_empty: bool) -> Result<Vec<R>> {
        self.start_with_cancel(ignore_empty, CancelToken::new())
    }

    /// Like `start`, but also stops once `cancel` fires.
    pub fn start_with_cancel(&mut self, ignore_empty: bool, cancel: CancelToken) -> Result<Vec<R>> {
        let results = Arc::new(ResultSequence::new());
        let routine = Arc::new(Collecting {
            run: Arc::clone(&self.run),
            results: Arc::clone(&results),
            ignore_empty,
        });
        let state = self.base.run(routine, &cancel)?;
        debug!(
            "task pool {} with {} results collected",
            state,
            results.len()
        );
        Ok(results.take())
    }
}

impl<T, R> Deref for ReturnableTaskPool<T, R> {
    type Target = BasePool<T>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<T, R> DerefMut for ReturnableTaskPool<T, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}
