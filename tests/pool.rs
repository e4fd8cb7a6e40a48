use crossbeam::channel::{bounded, unbounded};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};
use taskpool::*;
use tempfile::TempDir;

type Attempt = (u32, u32);

fn attempts(range: std::ops::RangeInclusive<u32>) -> Vec<Attempt> {
    range.map(|n| (n, 0)).collect()
}

fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn running_task_keeps_pool_busy() {
    let (started_tx, started_rx) = bounded::<()>(1);
    let (gate_tx, gate_rx) = bounded::<()>(0);
    let mut pool = TaskPool::simple(
        2,
        vec!["gated", "quick"],
        move |task: &'static str, _: &TaskContext<&'static str>| {
            if task == "gated" {
                started_tx.send(()).unwrap();
                gate_rx.recv().unwrap();
            }
        },
    )
    .unwrap();
    let handle = pool.handle();
    let runner = thread::spawn(move || pool.start().unwrap());

    started_rx.recv().unwrap();
    wait_until("quick task to finish", || {
        handle.queued_len() == 0 && handle.running_len() == 1
    });
    assert!(!handle.is_all_done());
    assert_eq!(handle.running_tasks(), vec!["gated"]);

    gate_tx.send(()).unwrap();
    assert_eq!(runner.join().unwrap(), PoolState::Completed);
    assert!(handle.is_all_done());
}

#[test]
fn retried_task_runs_exactly_once_more() {
    let runs: Arc<Mutex<HashMap<u32, u32>>> = Arc::new(Mutex::new(HashMap::new()));
    let counter = Arc::clone(&runs);
    let mut pool = TaskPool::simple(
        3,
        attempts(1..=10),
        move |(n, tries): Attempt, ctx: &TaskContext<Attempt>| {
            *counter.lock().unwrap().entry(n).or_insert(0) += 1;
            if n == 4 && tries == 0 {
                ctx.retry((n, tries + 1));
            }
        },
    )
    .unwrap();
    assert_eq!(pool.start().unwrap(), PoolState::Completed);

    let runs = runs.lock().unwrap();
    assert_eq!(runs.len(), 10);
    for n in 1..=10 {
        let expected = if n == 4 { 2 } else { 1 };
        assert_eq!(runs[&n], expected, "task {}", n);
    }
    assert!(pool.is_all_done());
    assert!(pool.all_tasks().is_empty());
}

#[test]
fn retry_goes_to_the_tail() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&order);
    let mut pool = TaskPool::simple(
        1,
        attempts(1..=4),
        move |(n, tries): Attempt, ctx: &TaskContext<Attempt>| {
            seen.lock().unwrap().push(n);
            if n == 1 && tries == 0 {
                ctx.retry((n, 1));
            }
        },
    )
    .unwrap();
    pool.start().unwrap();
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4, 1]);
}

#[test]
fn interrupt_stops_new_dispatch() {
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&dispatched);
    let mut pool = TaskPool::simple(1, (1..=5).collect(), move |n: u32, ctx: &TaskContext<u32>| {
        seen.lock().unwrap().push(n);
        if n == 2 {
            ctx.interrupt();
        }
    })
    .unwrap();
    assert_eq!(pool.start().unwrap(), PoolState::Interrupted);
    assert_eq!(pool.state(), PoolState::Interrupted);

    let dispatched = dispatched.lock().unwrap();
    assert!(!dispatched.contains(&4));
    assert!(!dispatched.contains(&5));
    let queued = pool.queued_tasks();
    assert!(!queued.is_empty());
    assert!(queued.contains(&4) && queued.contains(&5));
    assert!(!pool.is_all_done());
}

#[test]
fn collects_one_result_per_task() {
    let mut pool = ReturnableTaskPool::simple(3, (1..=5).collect(), |n: u32, _: &TaskContext<u32>| {
        thread::sleep(Duration::from_millis(10));
        n.to_string()
    })
    .unwrap();
    let mut results = pool.start(true).unwrap();
    results.sort();
    assert_eq!(results, vec!["1", "2", "3", "4", "5"]);
    assert!(pool.is_all_done());
    assert_eq!(pool.state(), PoolState::Completed);
}

#[test]
fn ignore_empty_drops_default_results() {
    let run = |n: u32, _: &TaskContext<u32>| {
        if n % 2 == 0 {
            String::new()
        } else {
            n.to_string()
        }
    };
    let mut skipping = ReturnableTaskPool::simple(2, (1..=6).collect(), run).unwrap();
    let mut kept = skipping.start(true).unwrap();
    kept.sort();
    assert_eq!(kept, vec!["1", "3", "5"]);

    let mut keeping = ReturnableTaskPool::simple(2, (1..=6).collect(), run).unwrap();
    assert_eq!(keeping.start(false).unwrap().len(), 6);
}

#[test]
fn option_results_survive_ignore_empty() {
    let mut pool =
        ReturnableTaskPool::simple(2, vec![0u32, 1, 2], |n: u32, _: &TaskContext<u32>| Some(n))
            .unwrap();
    let mut results = pool.start(true).unwrap();
    results.sort();
    assert_eq!(results, vec![Some(0), Some(1), Some(2)]);
}

#[derive(Clone, Default)]
struct CountingStore {
    saves: Arc<AtomicUsize>,
    snapshots: Arc<Mutex<Vec<Vec<u32>>>>,
}

impl TaskStore<u32> for CountingStore {
    fn save(&self, tasks: &[u32]) -> Result<()> {
        self.snapshots.lock().unwrap().push(tasks.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn load(&self) -> Result<Vec<u32>> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default())
    }
}

#[test]
fn auto_save_writes_while_running_and_stops_after() {
    let interval = Duration::from_millis(20);
    let store = CountingStore::default();
    let mut pool = TaskPoolBuilder::new(1)
        .auto_save(store.clone(), interval)
        .build((1..=4).collect(), |_: u32, _: &TaskContext<u32>| {
            thread::sleep(Duration::from_millis(40));
        })
        .unwrap();
    assert_eq!(pool.start().unwrap(), PoolState::Completed);

    let saves = store.saves.load(Ordering::SeqCst);
    assert!(saves >= 2, "only {} snapshots written", saves);
    assert!(!pool.handle().is_auto_saving());
    thread::sleep(interval * 3);
    assert_eq!(store.saves.load(Ordering::SeqCst), saves);
    // the first snapshot was taken with work left
    assert!(!store.snapshots.lock().unwrap()[0].is_empty());
}

struct FailingStore;

impl TaskStore<u32> for FailingStore {
    fn save(&self, _tasks: &[u32]) -> Result<()> {
        Err(PoolError::StringError("disk full".to_string()))
    }
    fn load(&self) -> Result<Vec<u32>> {
        Ok(Vec::new())
    }
}

#[test]
fn failed_save_does_not_stop_the_pool() {
    let done = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&done);
    let mut pool = TaskPoolBuilder::new(2)
        .auto_save(FailingStore, Duration::from_millis(5))
        .build((1..=6).collect(), move |_: u32, _: &TaskContext<u32>| {
            thread::sleep(Duration::from_millis(10));
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(pool.start().unwrap(), PoolState::Completed);
    assert_eq!(done.load(Ordering::SeqCst), 6);
}

#[test]
fn disabled_auto_save_never_writes() {
    let store = CountingStore::default();
    let mut pool = TaskPoolBuilder::new(1)
        .auto_save(store.clone(), Duration::from_millis(5))
        .build((1..=3).collect(), |_: u32, _: &TaskContext<u32>| {
            thread::sleep(Duration::from_millis(20));
        })
        .unwrap();
    pool.disable_auto_save();
    pool.start().unwrap();
    assert_eq!(store.saves.load(Ordering::SeqCst), 0);
}

#[test]
fn routine_can_disable_auto_save_mid_run() {
    let interval = Duration::from_millis(10);
    let store = CountingStore::default();
    let saves = Arc::clone(&store.saves);
    let at_disable = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&at_disable);
    let mut pool = TaskPoolBuilder::new(1)
        .auto_save(store.clone(), interval)
        .build((1..=4).collect(), move |n: u32, ctx: &TaskContext<u32>| {
            if n == 2 {
                ctx.handle().disable_auto_save();
                assert!(!ctx.handle().is_auto_saving());
                // let a save that was already under way land
                thread::sleep(interval * 3);
                *slot.lock().unwrap() = Some(saves.load(Ordering::SeqCst));
            }
            thread::sleep(interval * 3);
        })
        .unwrap();
    assert_eq!(pool.start().unwrap(), PoolState::Completed);

    let at_disable = at_disable.lock().unwrap().unwrap();
    assert!(at_disable >= 1, "no snapshot before disabling");
    assert_eq!(store.saves.load(Ordering::SeqCst), at_disable);
}

#[test]
fn routine_can_enable_auto_save_mid_run() {
    let interval = Duration::from_millis(10);
    let store = CountingStore::default();
    let requested = store.clone();
    let mut pool = TaskPool::simple(1, (1..=4).collect(), move |n: u32, ctx: &TaskContext<u32>| {
        if n == 1 {
            ctx.handle().enable_auto_save_with(requested.clone(), interval);
        }
        thread::sleep(interval * 4);
    })
    .unwrap();
    assert_eq!(pool.start().unwrap(), PoolState::Completed);

    assert!(store.saves.load(Ordering::SeqCst) >= 1);
    assert!(!pool.handle().is_auto_saving());
}

#[test]
fn lookup_can_restart_auto_save_after_disabling() {
    let interval = Duration::from_millis(10);
    let first = CountingStore::default();
    let second = CountingStore::default();
    let replacement = second.clone();
    let mut lookups = 0;
    let mut pool = TaskPoolBuilder::new(1)
        .set_poll_interval(Duration::from_millis(5))
        .auto_save(first.clone(), interval)
        .on_lookup(move |pool: &PoolHandle<u32>| {
            lookups += 1;
            if lookups == 2 {
                pool.disable_auto_save();
                pool.enable_auto_save_with(replacement.clone(), interval);
            }
        })
        .build((1..=5).collect(), |_: u32, _: &TaskContext<u32>| {
            thread::sleep(Duration::from_millis(30));
        })
        .unwrap();
    assert_eq!(pool.start().unwrap(), PoolState::Completed);

    assert!(second.saves.load(Ordering::SeqCst) >= 1);
}

#[test]
fn snapshot_file_reseeds_a_new_pool() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.json");
    let mut pool = TaskPool::simple(1, (0..10).collect(), |n: u32, ctx: &TaskContext<u32>| {
        thread::sleep(Duration::from_millis(20));
        if n == 5 {
            ctx.interrupt();
        }
    })
    .unwrap();
    pool.enable_auto_save(&path, Duration::from_millis(10));
    assert_eq!(pool.start().unwrap(), PoolState::Interrupted);

    let saved: Vec<u32> = load_task_file(&path).unwrap();
    assert!(saved.contains(&9));

    let finished = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&finished);
    let mut resumed = TaskPool::simple(2, saved.clone(), move |n: u32, _: &TaskContext<u32>| {
        seen.lock().unwrap().push(n);
    })
    .unwrap();
    assert_eq!(resumed.start().unwrap(), PoolState::Completed);
    let mut finished = finished.lock().unwrap().clone();
    finished.sort_unstable();
    let mut saved = saved;
    saved.sort_unstable();
    assert_eq!(finished, saved);
}

#[test]
fn cancel_runs_shutdown_then_interrupts() {
    let seen_at_shutdown = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen_at_shutdown);
    let mut pool = TaskPoolBuilder::new(2)
        .on_shutdown(move |pool: &PoolHandle<u32>| {
            *slot.lock().unwrap() = Some((pool.is_interrupted(), pool.all_tasks().len()));
        })
        .build((0..50).collect(), |_: u32, _: &TaskContext<u32>| {
            thread::sleep(Duration::from_millis(20));
        })
        .unwrap();
    let token = CancelToken::new();
    let trigger = token.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(60));
        trigger.cancel();
    });
    assert_eq!(pool.start_with_cancel(token).unwrap(), PoolState::Interrupted);

    let (interrupted_before, unfinished) = seen_at_shutdown.lock().unwrap().unwrap();
    assert!(!interrupted_before);
    assert!(unfinished > 0);
    assert!(pool.is_interrupted());
    assert!(!pool.all_tasks().is_empty());
}

#[test]
fn no_dispatch_while_shutdown_callback_runs() {
    let dispatched = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dispatched);
    let observed = Arc::clone(&dispatched);
    let counts = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&counts);
    let mut pool = TaskPoolBuilder::new(1)
        .on_shutdown(move |pool: &PoolHandle<u32>| {
            // a worker may still be finishing the routine it had started
            thread::sleep(Duration::from_millis(20));
            let before = observed.load(Ordering::SeqCst);
            let saved = pool.all_tasks().len();
            thread::sleep(Duration::from_millis(150));
            let after = observed.load(Ordering::SeqCst);
            *slot.lock().unwrap() = Some((before, after, saved));
        })
        .build((0..200).collect(), move |_: u32, _: &TaskContext<u32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
        })
        .unwrap();
    let token = CancelToken::new();
    let trigger = token.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        trigger.cancel();
    });
    assert_eq!(pool.start_with_cancel(token).unwrap(), PoolState::Interrupted);
    thread::sleep(Duration::from_millis(30));

    let (before, after, saved) = counts.lock().unwrap().unwrap();
    assert_eq!(before, after, "tasks dispatched during shutdown");
    assert_eq!(dispatched.load(Ordering::SeqCst), before);
    assert_eq!(before + saved, 200);
}

#[test]
fn lookup_sees_live_state() {
    let (gate_tx, gate_rx) = unbounded::<()>();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&observed);
    let mut pool = TaskPoolBuilder::new(2)
        .set_poll_interval(Duration::from_millis(5))
        .on_lookup(move |pool: &PoolHandle<u32>| {
            let running = pool.running_tasks().len();
            log.lock().unwrap().push(running);
            if running == 2 {
                gate_tx.send(()).unwrap();
                gate_tx.send(()).unwrap();
            }
        })
        .build(vec![1, 2], move |_: u32, _: &TaskContext<u32>| {
            gate_rx.recv().unwrap();
        })
        .unwrap();
    assert_eq!(pool.start().unwrap(), PoolState::Completed);
    assert!(observed.lock().unwrap().contains(&2));
}

#[test]
fn pool_cannot_start_twice() {
    let mut pool = TaskPool::simple(1, vec![1], |_: i32, _: &TaskContext<i32>| {}).unwrap();
    assert_eq!(pool.start().unwrap(), PoolState::Completed);
    assert!(matches!(pool.start(), Err(PoolError::AlreadyStarted)));
}

#[test]
fn empty_task_list_completes_at_once() {
    let mut pool = TaskPool::simple(4, Vec::<u8>::new(), |_: u8, _: &TaskContext<u8>| {}).unwrap();
    assert_eq!(pool.start().unwrap(), PoolState::Completed);
    assert!(pool.is_all_done());
}

#[test]
fn never_more_than_n_routines_at_once() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (c, p) = (Arc::clone(&current), Arc::clone(&peak));
    let mut pool = TaskPoolBuilder::new(3)
        .set_spawn_interval(Duration::from_millis(2))
        .build((0..30).collect(), move |_: u32, _: &TaskContext<u32>| {
            let now = c.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            c.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();
    pool.start().unwrap();
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 3, "peak concurrency {}", peak);
}

#[test]
fn panicking_routine_does_not_hang_the_pool() {
    let mut pool = TaskPool::simple(1, vec![1, 2], |n: u32, _: &TaskContext<u32>| {
        if n == 1 {
            panic!("task {} blew up", n);
        }
    })
    .unwrap();
    assert_eq!(pool.start().unwrap(), PoolState::Interrupted);
    assert_eq!(pool.queued_tasks(), vec![2]);
    assert!(pool.running_tasks().is_empty());
}
