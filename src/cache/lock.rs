//! Poison-tolerant lock access for the shared cache maps.
//!
//! A panic inside a subscriber callback or a test must not wedge the whole
//! store, so every guard is recovered from poisoning and the event logged.

use std::sync::{
    LockResult, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use tracing::warn;

fn recover<G>(result: LockResult<G>, source: &'static str, op: &'static str, kind: &str) -> G {
    result.unwrap_or_else(|poisoned: PoisonError<G>| {
        warn!(
            op,
            source_module = source,
            lock_kind = kind,
            result = "poisoned_recovered",
            "Recovered query cache lock after a panic in another holder"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), source, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), source, op, "rwlock.write")
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    source: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), source, op, "mutex.lock")
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn poisoned_rwlock_is_recovered() {
        let lock = RwLock::new(1_u32);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.write().expect("fresh lock");
            panic!("poison the lock");
        }));

        *rw_write(&lock, "test", "write") += 1;
        assert_eq!(*rw_read(&lock, "test", "read"), 2);
    }

    #[test]
    fn poisoned_mutex_is_recovered() {
        let lock = Mutex::new(Vec::<u8>::new());
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock().expect("fresh lock");
            panic!("poison the mutex");
        }));

        mutex_lock(&lock, "test", "push").push(7);
        assert_eq!(mutex_lock(&lock, "test", "len").len(), 1);
    }
}
