use std::{
    sync::{atomic::Ordering, Arc},
    thread::{self, JoinHandle},
    time::Duration,
};

use super::{PoolHandle, Shared, TaskContext};
use crate::{Result, TaskId};

/// The code a worker runs for every task it takes.
pub(crate) trait Routine<T>: Send + Sync {
    fn execute(&self, task: T, ctx: &TaskContext<'_, T>);
}

impl<T, F> Routine<T> for F
where
    F: Fn(T, &TaskContext<'_, T>) + Send + Sync,
{
    fn execute(&self, task: T, ctx: &TaskContext<'_, T>) {
        self(task, ctx)
    }
}

pub(crate) struct Worker {
    id: usize,
    handle: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn<T>(
        id: usize,
        pool: PoolHandle<T>,
        routine: Arc<dyn Routine<T>>,
        execute_delay: Duration,
        poll_interval: Duration,
    ) -> Result<Self>
    where
        T: Clone + Send + 'static,
    {
        let shared = Arc::clone(&pool.shared);
        shared.live_workers.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(format!("taskpool-worker-{}", id))
            .spawn(move || run_tasks(id, pool, routine, execute_delay, poll_interval));
        match spawned {
            Ok(handle) => Ok(Worker { id, handle }),
            Err(e) => {
                shared.live_workers.fetch_sub(1, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    pub(crate) fn join(self) {
        if self.handle.join().is_err() {
            warn!("worker {} ended by a panic", self.id);
        }
    }
}

fn run_tasks<T>(
    id: usize,
    pool: PoolHandle<T>,
    routine: Arc<dyn Routine<T>>,
    execute_delay: Duration,
    poll_interval: Duration,
) where
    T: Clone + Send + 'static,
{
    let shared = Arc::clone(&pool.shared);
    let _alive = Alive { id, shared: &shared };
    debug!("worker {} started", id);
    while !shared.should_stop() {
        let (task_id, task) = match shared.queue.dequeue_timeout(poll_interval) {
            Some(entry) => entry,
            None => continue,
        };
        let _running = Running::enter(&shared, task_id, task.clone());
        if !execute_delay.is_zero() {
            thread::sleep(execute_delay);
        }
        trace!("worker {} executing task {}", id, task_id);
        let ctx = TaskContext::new(&pool, task_id);
        routine.execute(task, &ctx);
    }
    debug!("worker {} exiting", id);
}

/// Keeps a task in the running set for the life of one routine call,
/// including a call that panics.
struct Running<'a, T> {
    shared: &'a Shared<T>,
    id: TaskId,
}

impl<'a, T> Running<'a, T> {
    fn enter(shared: &'a Shared<T>, id: TaskId, task: T) -> Self {
        shared.running.add(id, task);
        Running { shared, id }
    }
}

impl<T> Drop for Running<'_, T> {
    fn drop(&mut self) {
        self.shared.finish(self.id);
    }
}

/// Counts a worker thread as live until it exits.
struct Alive<'a, T> {
    id: usize,
    shared: &'a Shared<T>,
}

impl<T> Drop for Alive<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("worker {} lost: task routine panicked", self.id);
        }
        self.shared.live_workers.fetch_sub(1, Ordering::SeqCst);
        self.shared.notify();
    }
}
