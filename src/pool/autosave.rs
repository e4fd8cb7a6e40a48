use std::{
    sync::{atomic::Ordering, Arc},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{bounded, select, tick, Sender};

use super::PoolHandle;
use crate::{Result, TaskStore};

/// A requested auto-save setting, picked up by the control loop.
pub(crate) struct AutoSave<T> {
    store: Box<dyn TaskStore<T>>,
    interval: Duration,
}

impl<T> AutoSave<T> {
    pub(crate) fn new(store: Box<dyn TaskStore<T>>, interval: Duration) -> Self {
        AutoSave { store, interval }
    }
}

/// Background thread writing the pool's unfinished tasks to a store on every
/// tick. It quits on its own once the pool is done, interrupted, or auto-save
/// is disabled, and is stopped for good when `stop` is called.
pub(crate) struct AutoSaver {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl AutoSaver {
    pub(crate) fn spawn<T>(pool: PoolHandle<T>, auto_save: AutoSave<T>) -> Result<Self>
    where
        T: Clone + Send + 'static,
    {
        let (stop, stopped) = bounded::<()>(0);
        let shared = Arc::clone(&pool.shared);
        shared.auto_saving.store(true, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name("taskpool-autosave".to_string())
            .spawn(move || {
                let ticker = tick(auto_save.interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            if !pool.is_auto_saving()
                                || pool.is_all_done()
                                || pool.is_interrupted()
                            {
                                break;
                            }
                            save_once(&pool, &*auto_save.store);
                        }
                        recv(stopped) -> _ => break,
                    }
                }
                pool.shared.auto_saving.store(false, Ordering::SeqCst);
                debug!("auto-save stopped");
            });
        match spawned {
            Ok(handle) => Ok(AutoSaver { stop, handle }),
            Err(e) => {
                shared.auto_saving.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    pub(crate) fn stop(self) {
        drop(self.stop);
        if self.handle.join().is_err() {
            warn!("auto-save thread ended by a panic");
        }
    }
}

fn save_once<T: Clone + 'static>(pool: &PoolHandle<T>, store: &dyn TaskStore<T>) {
    let tasks = pool.all_tasks();
    match store.save(&tasks) {
        Ok(()) => debug!("auto-saved {} unfinished tasks", tasks.len()),
        Err(e) => error!("auto-save failed: {}", e),
    }
}
