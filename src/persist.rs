//! Snapshot storage for unfinished tasks.
//!
//! The pool only ever hands a `TaskStore` a complete list of the tasks it has
//! not finished yet; how the list is encoded and where it lives is up to the
//! store.

use std::{
    fs::{File, OpenOptions},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Serialize};

use crate::Result;

/// TaskStore defines how a snapshot of unfinished tasks is saved and loaded
pub trait TaskStore<T>: Send + Sync + 'static {
    /// replace the stored snapshot with `tasks`
    fn save(&self, tasks: &[T]) -> Result<()>;
    /// read back the last stored snapshot
    fn load(&self) -> Result<Vec<T>>;
}

impl<T, S: ?Sized + TaskStore<T>> TaskStore<T> for Box<S> {
    fn save(&self, tasks: &[T]) -> Result<()> {
        (**self).save(tasks)
    }
    fn load(&self) -> Result<Vec<T>> {
        (**self).load()
    }
}

impl<T, S: ?Sized + TaskStore<T>> TaskStore<T> for Arc<S> {
    fn save(&self, tasks: &[T]) -> Result<()> {
        (**self).save(tasks)
    }
    fn load(&self) -> Result<Vec<T>> {
        (**self).load()
    }
}

/// JsonFileStore keeps the snapshot as a JSON array in a single file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store writing to `path`. The file is created on first save
    /// and overwritten by every later one.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
    /// Where the snapshot lives
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> TaskStore<T> for JsonFileStore
where
    T: Serialize + DeserializeOwned,
{
    fn save(&self, tasks: &[T]) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, tasks)?;
        writer.flush()?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<T>> {
        load_task_file(&self.path)
    }
}

/// Read a task snapshot written by `JsonFileStore`, to seed a new pool.
pub fn load_task_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
