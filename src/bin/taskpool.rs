#[macro_use]
extern crate log;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, AtomicU8, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use structopt::StructOpt;
use taskpool::*;

const STATUS_EVERY: Duration = Duration::from_millis(500);
const STEP: u8 = 25;

#[derive(Debug, StructOpt)]
#[structopt(
    name = env!("CARGO_PKG_NAME"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS")
)]
struct Opt {
    #[structopt(short = "c", long = "concurrency", help = "Number of concurrent workers")]
    concurrency: Option<usize>,
    #[structopt(
        short = "n",
        long = "tasks",
        default_value = "30",
        help = "Number of simulated downloads to create"
    )]
    tasks: u32,
    #[structopt(long = "config", parse(from_os_str), help = "Pool config JSON file")]
    config: Option<PathBuf>,
    #[structopt(
        long = "resume",
        parse(from_os_str),
        help = "Reload unfinished downloads from a saved task file"
    )]
    resume: Option<PathBuf>,
    #[structopt(
        long = "save",
        parse(from_os_str),
        help = "Save unfinished downloads to this file"
    )]
    save: Option<PathBuf>,
    #[structopt(long = "save-interval-ms", default_value = "1000")]
    save_interval_ms: u64,
    #[structopt(long = "step-ms", default_value = "100", help = "Time per 25% of a download")]
    step_ms: u64,
    #[structopt(
        long = "fail-rate",
        default_value = "0",
        help = "Chance that a download step fails and is retried"
    )]
    fail_rate: f64,
    #[structopt(long = "progress", help = "Print running downloads while working")]
    progress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DownloadRecord {
    url: String,
    filename: String,
    progress: u8,
}

#[derive(Debug)]
struct DownloadState {
    url: String,
    filename: String,
    progress: AtomicU8,
    attempts: AtomicU32,
}

/// A simulated download whose progress is visible while it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "DownloadRecord", into = "DownloadRecord")]
struct Download(Arc<DownloadState>);

impl From<DownloadRecord> for Download {
    fn from(record: DownloadRecord) -> Self {
        Download(Arc::new(DownloadState {
            url: record.url,
            filename: record.filename,
            progress: AtomicU8::new(record.progress.min(100)),
            attempts: AtomicU32::new(0),
        }))
    }
}

impl From<Download> for DownloadRecord {
    fn from(download: Download) -> Self {
        DownloadRecord {
            url: download.0.url.clone(),
            filename: download.0.filename.clone(),
            progress: download.progress(),
        }
    }
}

impl Download {
    fn new(index: u32) -> Self {
        DownloadRecord {
            url: format!("http://example.com/file/{}.txt", index),
            filename: format!("file-{}.txt", index),
            progress: 0,
        }
        .into()
    }
    fn progress(&self) -> u8 {
        self.0.progress.load(Ordering::SeqCst)
    }
}

fn load_config(opt: &Opt) -> Result<PoolConfig> {
    let config = match &opt.config {
        Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
        None => PoolConfig::default(),
    };
    Ok(match opt.concurrency {
        Some(concurrency) => config.set_concurrency(concurrency),
        None => config,
    })
}

fn load_tasks(opt: &Opt) -> Result<Vec<Download>> {
    match &opt.resume {
        Some(path) => {
            let tasks: Vec<Download> = load_task_file(path)?;
            info!("resumed {} downloads from {}", tasks.len(), path.display());
            Ok(tasks)
        }
        None => Ok((1..=opt.tasks).map(Download::new).collect()),
    }
}

/// Turn Ctrl-C into a cancel of `token`.
fn cancel_on_ctrl_c(token: CancelToken) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!("cannot listen for Ctrl-C: {}", e);
            return;
        }
    };
    let spawned = thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                info!("Ctrl-C received");
                token.cancel();
            }
        });
    if let Err(e) = spawned {
        warn!("cannot listen for Ctrl-C: {}", e);
    }
}

fn download(task: Download, ctx: &TaskContext<'_, Download>, step: Duration, fail_rate: f64) {
    let state = &task.0;
    let attempt = state.attempts.fetch_add(1, Ordering::SeqCst) + 1;
    debug!("downloading {} (attempt {})", state.filename, attempt);
    while state.progress.load(Ordering::SeqCst) < 100 {
        thread::sleep(step);
        if fail_rate > 0.0 && rand::thread_rng().gen_bool(fail_rate) {
            warn!(
                "{} failed at {}%, retrying later",
                state.filename,
                task.progress()
            );
            ctx.retry(task);
            return;
        }
        let next = (state.progress.load(Ordering::SeqCst) + STEP).min(100);
        state.progress.store(next, Ordering::SeqCst);
    }
    debug!("{} done from {}", state.filename, state.url);
}

fn print_status(pool: &PoolHandle<Download>) {
    let now = chrono::Local::now().format("%H:%M:%S");
    let running = pool.running_tasks();
    println!(
        "[{}] {} running, {} queued",
        now,
        running.len(),
        pool.queued_len()
    );
    for task in running {
        println!("  {} {:>3}%", task.0.filename, task.progress());
    }
}

fn save_unfinished(path: &Path, pool: &PoolHandle<Download>) {
    let tasks = pool.all_tasks();
    match TaskStore::<Download>::save(&JsonFileStore::new(path), &tasks) {
        Ok(()) => info!("saved {} unfinished downloads to {}", tasks.len(), path.display()),
        Err(e) => error!("cannot save unfinished downloads: {}", e),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt: Opt = Opt::from_args();
    if !(0.0..=1.0).contains(&opt.fail_rate) {
        return Err(PoolError::StringError(format!(
            "fail rate {} is not between 0 and 1",
            opt.fail_rate
        )));
    }
    let config = load_config(&opt)?;
    let tasks = load_tasks(&opt)?;
    let total = tasks.len();

    info!("Simulated Downloader");
    info!("  Version     : {}", env!("CARGO_PKG_VERSION"));
    info!("  Concurrency : {}", config.concurrency);
    info!("  Downloads   : {}", total);

    let mut builder = TaskPoolBuilder::<Download>::from_config(config);
    if let Some(path) = opt.save.clone() {
        builder = builder
            .auto_save(
                JsonFileStore::new(&path),
                Duration::from_millis(opt.save_interval_ms),
            )
            .on_shutdown(move |pool| save_unfinished(&path, pool));
    }
    if opt.progress {
        let mut last = Instant::now();
        builder = builder.on_lookup(move |pool| {
            if last.elapsed() >= STATUS_EVERY {
                print_status(pool);
                last = Instant::now();
            }
        });
    }

    let step = Duration::from_millis(opt.step_ms);
    let fail_rate = opt.fail_rate;
    let mut pool = builder.build(tasks, move |task, ctx| {
        download(task, ctx, step, fail_rate)
    })?;

    let cancel = CancelToken::new();
    cancel_on_ctrl_c(cancel.clone());
    match pool.start_with_cancel(cancel)? {
        PoolState::Completed => println!("completed {} downloads", total),
        state => {
            let left = pool.all_tasks().len();
            println!("{}: {} downloads unfinished", state, left);
        }
    }
    Ok(())
}
