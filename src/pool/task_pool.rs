use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use super::{worker::Routine, BasePool, PoolState, TaskContext, TaskPoolBuilder};
use crate::{CancelToken, PoolConfig, Result};

/// A pool running a routine that returns nothing.
///
/// ```
/// use taskpool::{TaskContext, TaskPool};
///
/// type Attempt = (u32, u32);
///
/// let tasks = (1..=10).map(|n| (n, 0)).collect();
/// let mut pool = TaskPool::simple(3, tasks, |(n, tries): Attempt, ctx: &TaskContext<Attempt>| {
///     if n == 7 && tries == 0 {
///         // first attempt failed, run it again later
///         ctx.retry((n, tries + 1));
///     }
/// })
/// .unwrap();
/// pool.start().unwrap();
/// assert!(pool.is_all_done());
/// ```
pub struct TaskPool<T> {
    base: BasePool<T>,
    routine: Arc<dyn Routine<T>>,
}

impl<T: Clone + Send + 'static> TaskPool<T> {
    /// Create a pool over `tasks` with the given config and no callbacks.
    /// Use [`TaskPoolBuilder`] for callbacks and auto-save.
    pub fn new<F>(config: PoolConfig, tasks: Vec<T>, run: F) -> Result<Self>
    where
        F: Fn(T, &TaskContext<'_, T>) + Send + Sync + 'static,
    {
        TaskPoolBuilder::from_config(config).build(tasks, run)
    }

    /// Create a pool of `concurrency` workers with no spawn stagger, no
    /// execute delay and no callbacks.
    pub fn simple<F>(concurrency: usize, tasks: Vec<T>, run: F) -> Result<Self>
    where
        F: Fn(T, &TaskContext<'_, T>) + Send + Sync + 'static,
    {
        TaskPoolBuilder::new(concurrency).build(tasks, run)
    }

    pub(crate) fn from_parts(base: BasePool<T>, routine: Arc<dyn Routine<T>>) -> Self {
        TaskPool { base, routine }
    }

    /// Run every task, blocking until the pool completes or is interrupted.
    ///
    /// Can be called once; a second call fails with `AlreadyStarted`.
    pub fn start(&mut self) -> Result<PoolState> {
        self.start_with_cancel(CancelToken::new())
    }

    /// Like `start`, but also stops once `cancel` fires. The shutdown
    /// callback, if any, runs before the pool is interrupted.
    pub fn start_with_cancel(&mut self, cancel: CancelToken) -> Result<PoolState> {
        let routine = Arc::clone(&self.routine);
        self.base.run(routine, &cancel)
    }
}

impl<T> Deref for TaskPool<T> {
    type Target = BasePool<T>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<T> DerefMut for TaskPool<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}
