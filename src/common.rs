use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, carrying on with the data if a previous holder panicked.
///
/// Guards are held for container bookkeeping and clones only, never across a
/// routine or callback, so a poisoned lock still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
