use std::sync::{Mutex, MutexGuard};

/// Lock from the control thread, taking over a mutex a panicking holder left
/// poisoned. Audio callbacks use `try_lock` instead.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            crate::log_debug(&format!("Mutex poisoned in {context}; recovering"));
            poisoned.into_inner()
        }
    }
}
