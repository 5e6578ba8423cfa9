//! Synchronization primitives for the `OxRT` runtime.
//!
//! - [`Lock`]: mutual exclusion over a value
//! - [`Condition`]: a lock paired with a condition variable
//! - [`RefCount`]: the atomic counter embedded in every object header
//!
//! The runtime itself only needs [`RefCount`] on the hot path and a [`Lock`]
//! per class descriptor during first resolution. The other primitives are
//! provided for collaborators that build synchronized types on top of the
//! runtime.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering, fence};
use std::time::{Duration, Instant};

/// Guard returned by [`Lock::lock`] and [`Condition::lock`].
///
/// The protected value is released when the guard is dropped.
pub type LockGuard<'a, T> = MutexGuard<'a, T>;

/// Mutual exclusion lock protecting a value of type `T`.
///
/// `Lock::new` is `const`, so locks can live in `static` items such as class
/// descriptors.
///
/// # Example
///
/// ```rust
/// use oxrt::runtime::Lock;
///
/// static HITS: Lock<u32> = Lock::new(0);
///
/// *HITS.lock() += 1;
/// assert_eq!(HITS.synchronized(|hits| *hits), 1);
/// ```
pub struct Lock<T> {
    mutex: Mutex<T>,
}

impl<T> Lock<T> {
    /// Creates an unlocked lock holding `value`.
    pub const fn new(value: T) -> Self {
        Lock {
            mutex: parking_lot::const_mutex(value),
        }
    }

    /// Blocks until the lock is acquired.
    pub fn lock(&self) -> LockGuard<'_, T> {
        self.mutex.lock()
    }

    /// Acquires the lock if it is free, without blocking.
    pub fn try_lock(&self) -> Option<LockGuard<'_, T>> {
        self.mutex.try_lock()
    }

    /// Tries to acquire the lock, giving up after `timeout`.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<LockGuard<'_, T>> {
        self.mutex.try_lock_for(timeout)
    }

    /// Runs `f` with the lock held and returns its result.
    pub fn synchronized<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.mutex.lock();
        f(&mut guard)
    }

    /// Returns `true` if some thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }

    /// Consumes the lock, returning the protected value.
    pub fn into_inner(self) -> T {
        self.mutex.into_inner()
    }
}

impl<T: Default> Default for Lock<T> {
    fn default() -> Self {
        Lock::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Lock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mutex.try_lock() {
            Some(value) => f.debug_struct("Lock").field("value", &*value).finish(),
            None => f.debug_struct("Lock").field("value", &"<locked>").finish(),
        }
    }
}

/// A lock paired with a condition variable.
///
/// Waiters hold the guard returned by [`Condition::lock`], check their
/// predicate, and call one of the wait functions, which atomically release the
/// lock while sleeping and re-acquire it before returning.
///
/// # Example
///
/// ```rust
/// use oxrt::runtime::Condition;
/// use std::sync::Arc;
/// use std::thread;
///
/// let ready = Arc::new(Condition::new(false));
///
/// let signaller = Arc::clone(&ready);
/// let handle = thread::spawn(move || {
///     *signaller.lock() = true;
///     signaller.signal();
/// });
///
/// let mut guard = ready.lock();
/// ready.wait_while(&mut guard, |ready| !*ready);
/// assert!(*guard);
/// drop(guard);
/// handle.join().unwrap();
/// ```
pub struct Condition<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Condition<T> {
    /// Creates a condition whose lock protects `value`.
    pub const fn new(value: T) -> Self {
        Condition {
            mutex: parking_lot::const_mutex(value),
            condvar: Condvar::new(),
        }
    }

    /// Acquires the condition's lock.
    pub fn lock(&self) -> LockGuard<'_, T> {
        self.mutex.lock()
    }

    /// Sleeps until signalled. Spurious wakeups are possible.
    pub fn wait(&self, guard: &mut LockGuard<'_, T>) {
        self.condvar.wait(guard);
    }

    /// Sleeps until signalled or until `deadline` passes.
    ///
    /// Returns `true` if the wait ended by timing out.
    pub fn wait_until(&self, guard: &mut LockGuard<'_, T>, deadline: Instant) -> bool {
        self.condvar.wait_until(guard, deadline).timed_out()
    }

    /// Sleeps until signalled or until `timeout` elapses.
    ///
    /// Returns `true` if the wait ended by timing out.
    pub fn wait_for(&self, guard: &mut LockGuard<'_, T>, timeout: Duration) -> bool {
        self.condvar.wait_for(guard, timeout).timed_out()
    }

    /// Sleeps for as long as `condition` holds on the protected value.
    pub fn wait_while<F>(&self, guard: &mut LockGuard<'_, T>, condition: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        self.condvar.wait_while(guard, condition);
    }

    /// Wakes one waiter. Returns `true` if a thread was woken.
    pub fn signal(&self) -> bool {
        self.condvar.notify_one()
    }

    /// Wakes every waiter. Returns the number of threads woken.
    pub fn broadcast(&self) -> usize {
        self.condvar.notify_all()
    }
}

impl<T: Default> Default for Condition<T> {
    fn default() -> Self {
        Condition::new(T::default())
    }
}

impl<T> fmt::Debug for Condition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("locked", &self.mutex.is_locked())
            .finish_non_exhaustive()
    }
}

/// Outcome of a successful [`RefCount::decrement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decrement {
    /// Other references remain.
    Alive,
    /// This call released the last reference.
    Zero,
}

/// Error raised by [`RefCount`] when a transition is not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CountViolation {
    /// Decrement of a zero count.
    Underflow,
    /// Increment of a zero count.
    Resurrection,
    /// Increment past the counter's range.
    Overflow,
}

/// Atomic reference count stored in every object header.
///
/// Increments use `Relaxed` ordering: a new reference can only be made from an
/// existing one. Decrements use `Release`, and the thread that observes the
/// zero crossing issues an `Acquire` fence before teardown, so every access
/// made through other references happens before deallocation.
///
/// Neither transition wraps. Decrementing zero, incrementing zero and
/// incrementing past `usize::MAX` are reported instead of performed.
#[repr(transparent)]
pub struct RefCount {
    count: AtomicUsize,
}

impl RefCount {
    /// Creates a counter holding `value`.
    pub(crate) const fn new(value: usize) -> Self {
        RefCount {
            count: AtomicUsize::new(value),
        }
    }

    /// Current value. May be stale by the time it is used.
    #[must_use]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Adds one reference.
    pub(crate) fn increment(&self) -> Result<usize, CountViolation> {
        let mut current = self.count.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return Err(CountViolation::Resurrection);
            }
            let next = current.checked_add(1).ok_or(CountViolation::Overflow)?;
            match self.count.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(next),
                Err(actual) => current = actual,
            }
        }
    }

    /// Removes one reference.
    pub(crate) fn decrement(&self) -> Result<Decrement, CountViolation> {
        let old = self
            .count
            .fetch_update(Ordering::Release, Ordering::Relaxed, |n| n.checked_sub(1))
            .map_err(|_| CountViolation::Underflow)?;

        if old == 1 {
            fence(Ordering::Acquire);
            Ok(Decrement::Zero)
        } else {
            Ok(Decrement::Alive)
        }
    }

    #[cfg(test)]
    pub(crate) fn set(&self, value: usize) {
        self.count.store(value, Ordering::Relaxed);
    }
}

impl fmt::Debug for RefCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefCount").field(&self.get()).finish()
    }
}
