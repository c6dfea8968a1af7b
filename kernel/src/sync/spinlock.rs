//! SMP-supported spinlock.
//!
//! To acquire a lock on a multiprocessor, a processor 1) polls a variable that
//! represents whether the value is locked, 2) sets the variable when the
//! thread takes the lock, and 3) clears it when the thread unlocks. Steps 1
//! and 2 are a single atomic read-modify-write.
//!
//! The guard returned by [`SpinLock::lock`] releases the lock when it goes out
//! of scope, so an early return on an error path can never leave the lock
//! held. [`SpinLockGuard::unlock`] releases it explicitly at a chosen point.
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};
use crossbeam_utils::Backoff;

/// Returned by [`SpinLock::try_lock`] when the lock is already held.
#[derive(Debug, PartialEq, Eq)]
pub struct WouldBlock;

/// A mutual exclusion primitive that busy-waits for the lock.
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new unlocked spinlock holding `t`.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes the lock, returning the protected value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the lock, spinning until it is available.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
        SpinLockGuard { lock: self }
    }

    /// Tries to acquire the lock without spinning.
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Ok(SpinLockGuard { lock: self })
        } else {
            Err(WouldBlock)
        }
    }

    /// Returns `true` if some guard currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// A scoped hold on a [`SpinLock`].
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the lock.
    pub fn unlock(self) {
        drop(self)
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: holding the guard grants exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: holding the guard grants exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::{SpinLock, WouldBlock};
    use std::{sync::Arc, thread};

    #[test]
    fn guard_releases_on_every_path() {
        let lock = SpinLock::new(0usize);
        let early = |fail: bool| -> Result<(), ()> {
            let mut guard = lock.lock();
            *guard += 1;
            if fail {
                return Err(());
            }
            guard.unlock();
            Ok(())
        };
        assert_eq!(early(true), Err(()));
        assert!(!lock.is_locked(), "early return must release the lock");
        assert_eq!(early(false), Ok(()));
        assert!(!lock.is_locked());
        assert_eq!(lock.into_inner(), 2);
    }

    #[test]
    fn try_lock_contended() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(matches!(lock.try_lock(), Err(WouldBlock)));
        guard.unlock();
        assert!(lock.try_lock().is_ok());
    }

    #[test]
    fn counter_is_exclusive() {
        let lock = Arc::new(SpinLock::new(0usize));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
