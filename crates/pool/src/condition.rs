//! Async condition variable used to coordinate acquirers.
//!
//! An exclusive section (`tokio::sync::Mutex<()>`) plus a wait queue
//! (`tokio::sync::Notify`). [`Condition::wait`] registers with the queue
//! before giving up the section, so a notification sent by someone who
//! takes the section afterwards is never lost. Wakeups may be spurious;
//! callers loop and re-check their predicate.

use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, MutexGuard, Notify};

/// Exclusive section guard.
pub(crate) type Section<'a> = MutexGuard<'a, ()>;

/// How many waiters a notification should wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    One,
    All,
}

#[derive(Debug, Default)]
pub(crate) struct Condition {
    section: Mutex<()>,
    queue: Notify,
    waiters: AtomicUsize,
}

impl Condition {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enter the exclusive section.
    pub(crate) async fn lock(&self) -> Section<'_> {
        self.section.lock().await
    }

    /// Leave the section, suspend until notified, then re-enter it.
    ///
    /// Cancel-safe: dropping the future removes the waiter, and a
    /// notification it had already received is passed on to another waiter,
    /// including while it is still waiting to re-enter the section.
    pub(crate) async fn wait<'a>(&'a self, section: Section<'a>) -> Section<'a> {
        let mut notified = pin!(self.queue.notified());
        notified.as_mut().enable();
        drop(section);

        let _waiting = WaiterCount::enter(&self.waiters);
        notified.await;

        let pass_on = PassOn::arm(&self.queue);
        let section = self.section.lock().await;
        pass_on.disarm();
        section
    }

    /// Enter the exclusive section from a thread without an async runtime.
    pub(crate) fn blocking_lock(&self) -> Section<'_> {
        self.section.blocking_lock()
    }

    /// Wake waiters. Callers should hold the section, or at least have
    /// published the state change the waiters are looking for.
    pub(crate) fn notify(&self, wake: Wake) {
        match wake {
            Wake::One => self.queue.notify_one(),
            Wake::All => self.queue.notify_waiters(),
        }
    }

    /// Number of tasks currently suspended in [`Condition::wait`].
    pub(crate) fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }
}

struct WaiterCount<'a>(&'a AtomicUsize);

impl<'a> WaiterCount<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for WaiterCount<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Re-sends a consumed notification if the waiter is dropped before it
/// gets back into the section.
struct PassOn<'a> {
    queue: Option<&'a Notify>,
}

impl<'a> PassOn<'a> {
    fn arm(queue: &'a Notify) -> Self {
        Self { queue: Some(queue) }
    }

    fn disarm(mut self) {
        self.queue = None;
    }
}

impl Drop for PassOn<'_> {
    fn drop(&mut self) {
        if let Some(queue) = self.queue {
            queue.notify_one();
        }
    }
}
