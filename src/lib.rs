#![deny(missing_docs)]
//! A bounded concurrent task pool.
//!
//! At most N workers drain a shared FIFO queue of tasks through a user
//! routine. Routines can requeue their task or interrupt the pool, callbacks
//! can inspect it while it runs, and the unfinished tasks can be saved
//! periodically to reseed a later pool.

#[macro_use]
extern crate log;

mod cancel;
mod common;
mod config;
mod error;
mod persist;
/// The pool engine
pub mod pool;
mod queue;
mod running;

pub use cancel::CancelToken;
pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use persist::{load_task_file, JsonFileStore, TaskStore};
pub use pool::{
    BasePool, LookupFn, PoolHandle, PoolState, ResultSequence, ReturnableTaskPool, ShutdownFn,
    TaskContext, TaskPool, TaskPoolBuilder,
};
pub use queue::TaskQueue;
pub use running::{RunningSet, TaskId};
