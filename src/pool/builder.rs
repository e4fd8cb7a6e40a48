use std::{sync::Arc, time::Duration};

use super::{
    AutoSave, BasePool, LookupFn, PoolHandle, ReturnableTaskPool, ShutdownFn, TaskContext,
    TaskPool,
};
use crate::{PoolConfig, Result, TaskStore};

/// TaskPool Builder that can set:
///   - concurrency, spawn interval, execute delay and poll interval
///   - a shutdown callback, run once when the cancel token fires
///   - a lookup callback, run on every control loop iteration
///   - an auto-save store and interval
pub struct TaskPoolBuilder<T> {
    config: PoolConfig,
    shutdown: Option<ShutdownFn<T>>,
    lookup: Option<LookupFn<T>>,
    auto_save: Option<AutoSave<T>>,
}

impl<T: Clone + Send + 'static> TaskPoolBuilder<T> {
    /// A builder for `concurrency` workers, everything else default
    pub fn new(concurrency: usize) -> Self {
        Self::from_config(PoolConfig::new(concurrency))
    }
    /// A builder starting from `config`
    pub fn from_config(config: PoolConfig) -> Self {
        TaskPoolBuilder {
            config,
            shutdown: None,
            lookup: None,
            auto_save: None,
        }
    }
    /// set the pause between two worker spawns
    pub fn set_spawn_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.set_spawn_interval(interval);
        self
    }
    /// set the pause before each routine invocation
    pub fn set_execute_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.set_execute_delay(delay);
        self
    }
    /// set the idle wait bound
    pub fn set_poll_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.set_poll_interval(interval);
        self
    }
    /// set the callback run when the cancel token fires
    pub fn on_shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: FnOnce(&PoolHandle<T>) + Send + 'static,
    {
        self.shutdown = Some(Box::new(shutdown));
        self
    }
    /// set the callback run on every control loop iteration
    pub fn on_lookup<F>(mut self, lookup: F) -> Self
    where
        F: FnMut(&PoolHandle<T>) + Send + 'static,
    {
        self.lookup = Some(Box::new(lookup));
        self
    }
    /// save unfinished tasks to `store` every `interval` while running
    pub fn auto_save<S>(mut self, store: S, interval: Duration) -> Self
    where
        S: TaskStore<T>,
    {
        self.auto_save = Some(AutoSave::new(Box::new(store), interval));
        self
    }

    /// consume this builder, create a pool whose routine returns nothing
    pub fn build<F>(self, tasks: Vec<T>, run: F) -> Result<TaskPool<T>>
    where
        F: Fn(T, &TaskContext<'_, T>) + Send + Sync + 'static,
    {
        let base = self.into_base(tasks)?;
        Ok(TaskPool::from_parts(base, Arc::new(run)))
    }

    /// consume this builder, create a pool collecting one result per call
    pub fn build_returnable<R, F>(self, tasks: Vec<T>, run: F) -> Result<ReturnableTaskPool<T, R>>
    where
        R: Default + PartialEq + Send + 'static,
        F: Fn(T, &TaskContext<'_, T>) -> R + Send + Sync + 'static,
    {
        let base = self.into_base(tasks)?;
        Ok(ReturnableTaskPool::from_parts(base, Arc::new(run)))
    }

    fn into_base(self, tasks: Vec<T>) -> Result<BasePool<T>> {
        BasePool::new(
            self.config,
            tasks,
            self.shutdown,
            self.lookup,
            self.auto_save,
        )
    }
}
