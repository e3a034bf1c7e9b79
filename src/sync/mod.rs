//! Kernel concurrency control.
//!
//! A single mutex per kernel instance protects every piece of shared state;
//! condition variables atomically release that mutex while waiting and
//! reacquire it before returning. Waiters must always recheck their
//! predicate in a loop: broadcasts wake every waiter, and the condition may
//! have changed again by the time a woken thread reacquires the lock.

use std::sync::Arc;
use std::time::Instant;

use crate::kernel::KernelGuard;

/// A condition variable tied to the kernel mutex.
///
/// Handles are cheap clones of one underlying variable, so a waiter can keep
/// one across the wait even if the object that owns it is torn down
/// concurrently. After waking, the waiter revalidates the object (see
/// [`Condvar::same_as`]) before trusting it.
#[derive(Clone)]
pub(crate) struct Condvar {
    inner: Arc<parking_lot::Condvar>,
}

impl Condvar {
    pub(crate) fn new() -> Condvar {
        Condvar {
            inner: Arc::new(parking_lot::Condvar::new()),
        }
    }

    /// Releases the kernel lock, sleeps until a broadcast, reacquires.
    pub(crate) fn wait(&self, guard: &mut KernelGuard<'_>) {
        self.inner.wait(guard);
    }

    /// Bounded wait. Returns `true` if the deadline passed before a wake.
    pub(crate) fn wait_until(&self, guard: &mut KernelGuard<'_>, deadline: Instant) -> bool {
        self.inner.wait_until(guard, deadline).timed_out()
    }

    /// Wakes every waiter.
    pub(crate) fn broadcast(&self) {
        self.inner.notify_all();
    }

    /// Handle identity. A waiter that slept through a teardown uses this to
    /// detect that a table slot now holds a different object.
    pub(crate) fn same_as(&self, other: &Condvar) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::kernel::Kernel;

    #[test]
    fn broadcast_wakes_waiter() {
        let kernel = Kernel::new();
        let cv = Condvar::new();

        let waiter = {
            let kernel = kernel.clone();
            let cv = cv.clone();
            thread::spawn(move || {
                let mut guard = kernel.lock();
                while guard.procs.alive == 0 {
                    cv.wait(&mut guard);
                }
                guard.procs.alive
            })
        };

        thread::sleep(Duration::from_millis(10));
        {
            let mut guard = kernel.lock();
            guard.procs.acquire().unwrap();
        }
        cv.broadcast();
        assert_eq!(waiter.join().unwrap(), 1);
    }

    #[test]
    fn timed_wait_expires() {
        let kernel = Kernel::new();
        let cv = Condvar::new();
        let mut guard = kernel.lock();
        let timed_out = cv.wait_until(&mut guard, Instant::now() + Duration::from_millis(5));
        assert!(timed_out);
    }

    #[test]
    fn clones_share_identity() {
        let a = Condvar::new();
        let b = a.clone();
        let c = Condvar::new();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }
}
