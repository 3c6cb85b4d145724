//! Timer service: a single dedicated thread dispatching callbacks at
//! scheduled deadlines, driving both replay-store purges and group-cache
//! refreshes (§4.5).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type Callback = Box<dyn FnOnce() + Send>;

/// Opaque handle identifying a scheduled timer, usable with [`Timer::cancel`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TimerId(u64);

struct ScheduledCallback {
    deadline: Instant,
    id: TimerId,
    callback: Option<Callback>,
}

impl Eq for ScheduledCallback {}
impl PartialEq for ScheduledCallback {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Ord for ScheduledCallback {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline sorts first.
        other.deadline.cmp(&self.deadline)
    }
}
impl PartialOrd for ScheduledCallback {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Shared {
    heap: Mutex<BinaryHeap<ScheduledCallback>>,
    condvar: Condvar,
    next_id: AtomicU64,
    terminate: AtomicBool,
    cancelled: Mutex<std::collections::HashSet<u64>>,
}

/// The dedicated timer thread plus the handle used to schedule/cancel work
/// against it. Dropping the last [`Timer`] stops the thread.
pub struct Timer {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    /// Spawn the timer thread.
    pub fn start() -> Self {
        let shared = Arc::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
            next_id: AtomicU64::new(1),
            terminate: AtomicBool::new(false),
            cancelled: Mutex::new(std::collections::HashSet::new()),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("munge-timer".into())
            .spawn(move || run(worker_shared))
            .expect("failed to spawn timer thread");

        Timer {
            shared,
            handle: Some(handle),
        }
    }

    /// Schedule `callback` to run once, `delay` from now.
    pub fn set_relative(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> TimerId {
        schedule(&self.shared, Instant::now() + delay, callback)
    }

    /// Schedule `callback` to run once at the given absolute `deadline`.
    pub fn set_absolute(&self, deadline: Instant, callback: impl FnOnce() + Send + 'static) -> TimerId {
        schedule(&self.shared, deadline, callback)
    }

    /// Cancel a previously scheduled timer. Idempotent: cancelling an
    /// already-fired or already-cancelled id is a harmless no-op.
    pub fn cancel(&self, id: TimerId) {
        cancel_shared(&self.shared, id);
    }

    /// A cheaply cloneable handle onto this timer that does not keep the
    /// background thread alive on its own (the [`Timer`] returned by
    /// [`Timer::start`] still owns the thread and must outlive its handles).
    /// Used by repeating maintenance callbacks (replay purge, group-cache
    /// refresh) to reschedule themselves without owning a `Timer`.
    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn schedule(shared: &Arc<Shared>, deadline: Instant, callback: impl FnOnce() + Send + 'static) -> TimerId {
    let id = TimerId(shared.next_id.fetch_add(1, AtomicOrdering::Relaxed));
    {
        let mut heap = shared.heap.lock().expect("timer heap mutex poisoned");
        heap.push(ScheduledCallback {
            deadline,
            id,
            callback: Some(Box::new(callback)),
        });
    }
    shared.condvar.notify_one();
    id
}

fn cancel_shared(shared: &Arc<Shared>, id: TimerId) {
    let mut cancelled = shared.cancelled.lock().expect("cancelled set mutex poisoned");
    cancelled.insert(id.0);
}

/// A cloneable reference to a running [`Timer`]'s scheduling queue, usable
/// to set or cancel callbacks from any thread. See [`Timer::handle`].
#[derive(Clone)]
pub struct TimerHandle {
    shared: Arc<Shared>,
}

impl TimerHandle {
    /// Schedule `callback` to run once, `delay` from now.
    pub fn set_relative(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> TimerId {
        schedule(&self.shared, Instant::now() + delay, callback)
    }

    /// Schedule `callback` to run once at the given absolute `deadline`.
    pub fn set_absolute(&self, deadline: Instant, callback: impl FnOnce() + Send + 'static) -> TimerId {
        schedule(&self.shared, deadline, callback)
    }

    /// Cancel a previously scheduled timer.
    pub fn cancel(&self, id: TimerId) {
        cancel_shared(&self.shared, id);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.terminate.store(true, AtomicOrdering::SeqCst);
        self.shared.condvar.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(shared: Arc<Shared>) {
    loop {
        let mut heap = shared.heap.lock().expect("timer heap mutex poisoned");

        loop {
            if shared.terminate.load(AtomicOrdering::SeqCst) {
                return;
            }

            match heap.peek() {
                None => {
                    heap = shared.condvar.wait(heap).expect("timer heap mutex poisoned");
                }
                Some(next) => {
                    let now = Instant::now();
                    if next.deadline <= now {
                        break;
                    }
                    let (guard, _timeout) = shared
                        .condvar
                        .wait_timeout(heap, next.deadline - now)
                        .expect("timer heap mutex poisoned");
                    heap = guard;
                }
            }
        }

        let due = heap.pop();
        drop(heap);

        if let Some(mut scheduled) = due {
            let was_cancelled = {
                let mut cancelled = shared.cancelled.lock().expect("cancelled set mutex poisoned");
                cancelled.remove(&scheduled.id.0)
            };
            if !was_cancelled {
                if let Some(callback) = scheduled.callback.take() {
                    callback();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn relative_timer_fires() {
        let timer = Timer::start();
        let (tx, rx) = mpsc::channel();
        timer.set_relative(Duration::from_millis(10), move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(1)).expect("timer should fire");
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let timer = Timer::start();
        let (tx, rx) = mpsc::channel();
        let id = timer.set_relative(Duration::from_millis(50), move || {
            tx.send(()).unwrap();
        });
        timer.cancel(id);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let timer = Timer::start();
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        timer.set_relative(Duration::from_millis(40), move || tx2.send(2).unwrap());
        timer.set_relative(Duration::from_millis(10), move || tx.send(1).unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 2);
    }
}
