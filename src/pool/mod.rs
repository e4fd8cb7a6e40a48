//! The task pool engine.
//!
//! A pool owns one [`TaskQueue`] and one [`RunningSet`]. Workers move tasks
//! from the queue into the running set, call the routine, and release them.
//! The thread calling `start` runs the control loop, which returns once the
//! pool is either done or interrupted.

use std::{
    cell::Cell,
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use crossbeam::channel::{bounded, Receiver, Sender};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    common::lock, CancelToken, JsonFileStore, PoolConfig, PoolError, Result, RunningSet, TaskId,
    TaskQueue, TaskStore,
};

mod autosave;
mod builder;
mod returnable;
mod task_pool;
mod worker;

pub use builder::TaskPoolBuilder;
pub use returnable::{ResultSequence, ReturnableTaskPool};
pub use task_pool::TaskPool;

use autosave::{AutoSave, AutoSaver};
use worker::{Routine, Worker};

/// Callback run once when the cancel token fires, before the pool is interrupted
pub type ShutdownFn<T> = Box<dyn FnOnce(&PoolHandle<T>) + Send + 'static>;
/// Callback run on every control loop iteration while the pool is running
pub type LookupFn<T> = Box<dyn FnMut(&PoolHandle<T>) + Send + 'static>;

/// Lifecycle of a pool. `Completed` and `Interrupted` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// built, `start` not called yet
    Created,
    /// `start` is running
    Running,
    /// queue and running set drained
    Completed,
    /// stopped by `interrupt` or the cancel token
    Interrupted,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desp = match self {
            PoolState::Created => "created",
            PoolState::Running => "running",
            PoolState::Completed => "completed",
            PoolState::Interrupted => "interrupted",
        };
        write!(f, "{}", desp)
    }
}

pub(crate) struct Shared<T> {
    queue: TaskQueue<(TaskId, T)>,
    running: RunningSet<T>,
    next_id: AtomicU64,
    // queued + running, counted by id; only reaches zero once the last
    // routine has returned and its task left the running set
    outstanding: AtomicUsize,
    interrupted: AtomicBool,
    stopped: AtomicBool,
    auto_saving: AtomicBool,
    // taken by the control loop, which (re)starts the saver
    auto_save_request: Mutex<Option<AutoSave<T>>>,
    live_workers: AtomicUsize,
    changed_tx: Sender<()>,
    changed_rx: Receiver<()>,
}

impl<T> Shared<T> {
    fn new(tasks: Vec<T>) -> Self {
        let (changed_tx, changed_rx) = bounded(1);
        let tracked: Vec<(TaskId, T)> = tasks
            .into_iter()
            .enumerate()
            .map(|(i, task)| (TaskId(i as u64), task))
            .collect();
        Shared {
            next_id: AtomicU64::new(tracked.len() as u64),
            outstanding: AtomicUsize::new(tracked.len()),
            queue: TaskQueue::from_vec(tracked),
            running: RunningSet::new(),
            interrupted: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            auto_saving: AtomicBool::new(false),
            auto_save_request: Mutex::new(None),
            live_workers: AtomicUsize::new(0),
            changed_tx,
            changed_rx,
        }
    }

    fn issue_id(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn push(&self, id: TaskId, task: T) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.queue.enqueue((id, task));
    }

    /// Release a task whose routine returned (or panicked).
    fn finish(&self, id: TaskId) {
        self.running.remove(id);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.notify();
    }

    fn notify(&self) {
        // a pending wake-up already covers this one
        let _ = self.changed_tx.try_send(());
    }

    fn wait_for_change(&self, timeout: Duration) {
        let _ = self.changed_rx.recv_timeout(timeout);
    }

    fn is_all_done(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) == 0
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn interrupt(&self) {
        if !self.interrupted.swap(true, Ordering::SeqCst) {
            info!("task pool interrupted");
        }
        self.queue.wake_all();
        self.notify();
    }

    fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.is_interrupted()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.queue.wake_all();
    }
}

/// A cheap, cloneable view of a running pool.
///
/// This is what callbacks receive: it can requeue tasks, interrupt the pool
/// and take point-in-time snapshots, nothing more. Snapshots of the queue and
/// of the running set are taken one after the other, so they may already be
/// stale when the caller looks at them.
pub struct PoolHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for PoolHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> PoolHandle<T> {
    /// Put `task` at the tail of the queue under a fresh id.
    ///
    /// From inside a routine use [`TaskContext::retry`] instead, which keeps
    /// the task's id.
    pub fn retry(&self, task: T) {
        let id = self.shared.issue_id();
        self.shared.push(id, task);
    }

    /// Stop dispatching tasks. Routines already running finish normally.
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }

    /// Whether the pool has been interrupted
    pub fn is_interrupted(&self) -> bool {
        self.shared.is_interrupted()
    }

    /// Whether no task is queued and none is running
    pub fn is_all_done(&self) -> bool {
        self.shared.is_all_done()
    }

    /// Number of tasks waiting in the queue
    pub fn queued_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Number of tasks being executed
    pub fn running_len(&self) -> usize {
        self.shared.running.len()
    }

    /// Stop the auto-saver, if one runs, at its next tick. A request made
    /// with `enable_auto_save_with` and not picked up yet is dropped too.
    pub fn disable_auto_save(&self) {
        *lock(&self.shared.auto_save_request) = None;
        self.shared.auto_saving.store(false, Ordering::SeqCst);
    }

    /// Whether an auto-saver is active
    pub fn is_auto_saving(&self) -> bool {
        self.shared.auto_saving.load(Ordering::SeqCst)
    }
}

impl<T: Send + 'static> PoolHandle<T> {
    /// Hand the unfinished tasks to `store` every `interval`.
    ///
    /// Works before `start` and while the pool runs, from a routine or a
    /// callback alike: the control loop replaces any running auto-saver with
    /// the new one on its next iteration.
    pub fn enable_auto_save_with<S>(&self, store: S, interval: Duration)
    where
        S: TaskStore<T>,
    {
        *lock(&self.shared.auto_save_request) = Some(AutoSave::new(Box::new(store), interval));
        self.shared.notify();
    }

    /// Save the unfinished tasks to a JSON file at `path` every `interval`.
    pub fn enable_auto_save(&self, path: impl Into<std::path::PathBuf>, interval: Duration)
    where
        T: Serialize + DeserializeOwned,
    {
        self.enable_auto_save_with(JsonFileStore::new(path), interval);
    }

    fn take_auto_save_request(&self) -> Option<AutoSave<T>> {
        lock(&self.shared.auto_save_request).take()
    }
}

impl<T: Clone> PoolHandle<T> {
    /// Tasks waiting in the queue, head first
    pub fn queued_tasks(&self) -> Vec<T> {
        self.shared
            .queue
            .snapshot()
            .into_iter()
            .map(|(_, task)| task)
            .collect()
    }

    /// Tasks being executed, in the order they were first enqueued
    pub fn running_tasks(&self) -> Vec<T> {
        self.shared.running.snapshot()
    }

    /// Every unfinished task: running ones first, then the queue head first.
    /// A task retried from its own routine appears once.
    pub fn all_tasks(&self) -> Vec<T> {
        let running = self.shared.running.entries();
        let queued = self.shared.queue.snapshot();
        let mut seen = HashSet::with_capacity(running.len() + queued.len());
        running
            .into_iter()
            .chain(queued)
            .filter(|(id, _)| seen.insert(*id))
            .map(|(_, task)| task)
            .collect()
    }
}

/// What a routine gets alongside its task.
pub struct TaskContext<'a, T> {
    pool: &'a PoolHandle<T>,
    id: TaskId,
    retried: Cell<bool>,
}

impl<'a, T> TaskContext<'a, T> {
    fn new(pool: &'a PoolHandle<T>, id: TaskId) -> Self {
        Self {
            pool,
            id,
            retried: Cell::new(false),
        }
    }

    /// Id of the task being executed
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Requeue the task at the tail so it runs again later.
    ///
    /// The task stays in the running set until the routine returns, so it is
    /// tracked the whole time. Only the first retry keeps the task's id.
    pub fn retry(&self, task: T) {
        if self.retried.replace(true) {
            self.pool.retry(task);
        } else {
            self.pool.shared.push(self.id, task);
        }
    }

    /// Stop dispatching tasks. This routine still runs to its end.
    pub fn interrupt(&self) {
        self.pool.interrupt();
    }

    /// The pool this task runs in
    pub fn handle(&self) -> &PoolHandle<T> {
        self.pool
    }
}

/// State and controls common to every pool flavour.
///
/// [`TaskPool`] and [`ReturnableTaskPool`] deref to this type, which is where
/// introspection, retry, interrupt and the auto-save switches live.
pub struct BasePool<T> {
    config: PoolConfig,
    handle: PoolHandle<T>,
    shutdown: Option<ShutdownFn<T>>,
    lookup: Option<LookupFn<T>>,
    state: PoolState,
}

impl<T: Clone + Send + 'static> BasePool<T> {
    fn new(
        config: PoolConfig,
        tasks: Vec<T>,
        shutdown: Option<ShutdownFn<T>>,
        lookup: Option<LookupFn<T>>,
        auto_save: Option<AutoSave<T>>,
    ) -> Result<Self> {
        config.validate()?;
        let shared = Shared::new(tasks);
        *lock(&shared.auto_save_request) = auto_save;
        Ok(BasePool {
            config,
            handle: PoolHandle {
                shared: Arc::new(shared),
            },
            shutdown,
            lookup,
            state: PoolState::Created,
        })
    }

    /// A handle that stays valid after `start` returns
    pub fn handle(&self) -> PoolHandle<T> {
        self.handle.clone()
    }

    /// The pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Where the pool is in its lifecycle
    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Put `task` at the tail of the queue.
    pub fn retry(&self, task: T) {
        self.handle.retry(task);
    }

    /// Stop dispatching tasks, see [`PoolHandle::interrupt`].
    pub fn interrupt(&self) {
        self.handle.interrupt();
    }

    /// Whether the pool has been interrupted
    pub fn is_interrupted(&self) -> bool {
        self.handle.is_interrupted()
    }

    /// Whether no task is queued and none is running
    pub fn is_all_done(&self) -> bool {
        self.handle.is_all_done()
    }

    /// Tasks waiting in the queue, head first
    pub fn queued_tasks(&self) -> Vec<T> {
        self.handle.queued_tasks()
    }

    /// Tasks being executed
    pub fn running_tasks(&self) -> Vec<T> {
        self.handle.running_tasks()
    }

    /// Every unfinished task, see [`PoolHandle::all_tasks`]
    pub fn all_tasks(&self) -> Vec<T> {
        self.handle.all_tasks()
    }

    /// Save the unfinished tasks to a JSON file at `path` every `interval`
    /// while the pool runs.
    pub fn enable_auto_save(&self, path: impl Into<std::path::PathBuf>, interval: Duration)
    where
        T: Serialize + DeserializeOwned,
    {
        self.handle.enable_auto_save(path, interval);
    }

    /// Hand the unfinished tasks to `store` every `interval` while the pool
    /// runs. Replaces any earlier auto-save setting.
    pub fn enable_auto_save_with<S>(&self, store: S, interval: Duration)
    where
        S: TaskStore<T>,
    {
        self.handle.enable_auto_save_with(store, interval);
    }

    /// Turn auto-save off, whether or not the pool is running yet.
    pub fn disable_auto_save(&self) {
        self.handle.disable_auto_save();
    }

    fn run(&mut self, routine: Arc<dyn Routine<T>>, cancel: &CancelToken) -> Result<PoolState> {
        if self.state != PoolState::Created {
            return Err(PoolError::AlreadyStarted);
        }
        self.state = PoolState::Running;
        let shared = Arc::clone(&self.handle.shared);
        info!(
            "task pool starting: {} workers, {} tasks queued",
            self.config.concurrency,
            shared.queue.len()
        );

        let mut workers = Vec::with_capacity(self.config.concurrency);
        for id in 0..self.config.concurrency {
            let spawned = Worker::spawn(
                id,
                self.handle(),
                Arc::clone(&routine),
                self.config.execute_delay,
                self.config.poll_interval,
            );
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    error!("failed to spawn worker {}: {}", id, e);
                    return self.abort_on_err(Err(e));
                }
            }
            if !self.config.spawn_interval.is_zero() && id + 1 < self.config.concurrency {
                thread::sleep(self.config.spawn_interval);
            }
        }

        let mut saver = None;
        let state = self.control_loop(cancel, &mut saver);
        shared.stop();
        if let Some(saver) = saver {
            saver.stop();
        }
        match state {
            PoolState::Completed => {
                workers.into_iter().for_each(Worker::join);
                info!("task pool completed");
            }
            _ => {
                // in-flight routines are never preempted; let them finish detached
                info!(
                    "task pool interrupted: {} running, {} left in queue",
                    shared.running.len(),
                    shared.queue.len()
                );
            }
        }
        self.state = state;
        Ok(state)
    }

    fn abort_on_err<V>(&mut self, result: Result<V>) -> Result<V> {
        if result.is_err() {
            self.handle.shared.interrupt();
            self.handle.shared.stop();
            self.state = PoolState::Interrupted;
        }
        result
    }

    fn control_loop(
        &mut self,
        cancel: &CancelToken,
        saver: &mut Option<AutoSaver>,
    ) -> PoolState {
        let handle = self.handle();
        loop {
            if cancel.is_cancelled() {
                // no new dispatch while the callback looks at the tasks
                handle.shared.stop();
                if let Some(shutdown) = self.shutdown.take() {
                    info!("cancellation received, running shutdown callback");
                    shutdown(&handle);
                }
                handle.interrupt();
            }
            if handle.is_interrupted() {
                return PoolState::Interrupted;
            }
            if handle.is_all_done() {
                return PoolState::Completed;
            }
            if handle.shared.live_workers.load(Ordering::SeqCst) == 0 {
                error!("every worker was lost with tasks left, interrupting");
                handle.interrupt();
                return PoolState::Interrupted;
            }
            if let Some(auto_save) = handle.take_auto_save_request() {
                if let Some(running) = saver.take() {
                    running.stop();
                }
                match AutoSaver::spawn(handle.clone(), auto_save) {
                    Ok(spawned) => *saver = Some(spawned),
                    Err(e) => error!("cannot start auto-save: {}", e),
                }
            }
            if let Some(lookup) = self.lookup.as_mut() {
                lookup(&handle);
            }
            handle.shared.wait_for_change(self.config.poll_interval);
        }
    }
}
