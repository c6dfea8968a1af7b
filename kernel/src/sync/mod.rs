//! Synchronization primitives.
pub mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
