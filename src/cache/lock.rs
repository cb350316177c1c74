use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

/// Acquire a read guard, recovering the data if a writer panicked.
pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    tier: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, tier, op, "rwlock.read"))
}

/// Acquire a write guard, recovering the data if a writer panicked.
pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    tier: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, tier, op, "rwlock.write"))
}

fn recover<G>(
    poisoned: PoisonError<G>,
    tier: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    warn!(
        op,
        tier,
        lock_kind,
        result = "poisoned_recovered",
        hint = "entries written by the panicking thread may be partial",
        "Recovered from poisoned cache lock"
    );
    poisoned.into_inner()
}
