//! Synchronization aliases used across the runtime.
//!
//! parking_lot locks throughout; guards never poison.

pub use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use std::sync::Arc;

/// Alias for the common pattern Arc<Mutex<T>>
pub type Shared<T> = Arc<Mutex<T>>;

/// Helper to create Shared<T> easily
pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
