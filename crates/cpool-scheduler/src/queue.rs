//! Worker queue — fair hand-out of idle compiler workers.
//!
//! Idle workers live in a deque whose front is handed out first; callers
//! that find no idle worker park on a one-shot signal in a FIFO of waiters.
//! `release` wakes exactly one waiter per returned worker.
//!
//! A woken waiter is not guaranteed a worker: another caller may take it
//! between the wakeup and the waiter's re-check (e.g. a worker retired
//! through [`WorkerQueue::take_idle`] for quota enforcement). The waiter
//! then parks again at the *front* of the waiter list so it keeps its
//! place in line. A waiter dropped after being woken hands its wakeup on
//! to the next waiter, so a released worker is never left unclaimed.
//!
//! All queue mutations happen inside one short critical section that is
//! never held across an `.await`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::trace;

type Condition<'a, W> = Box<dyn Fn(&W) -> bool + Send + 'a>;
type Weighter<'a, W, K> = Box<dyn Fn(&W) -> K + Send + 'a>;

/// Selection policy for [`WorkerQueue::acquire_with`].
///
/// The policy only matters when more than one worker is idle: a lone idle
/// worker is returned without consulting the condition or the weighter.
/// Both callables run while the queue is locked and must not touch the
/// queue themselves. A panic inside them propagates to the caller of
/// `acquire_with`.
pub struct AcquirePolicy<'a, W, K = i64> {
    condition: Option<Condition<'a, W>>,
    weighter: Option<Weighter<'a, W, K>>,
}

impl<'a, W, K> AcquirePolicy<'a, W, K> {
    /// Plain FIFO reuse order.
    pub fn new() -> Self {
        Self {
            condition: None,
            weighter: None,
        }
    }

    /// Prefer the first idle worker (front to back) satisfying `condition`.
    pub fn condition(mut self, condition: impl Fn(&W) -> bool + Send + 'a) -> Self {
        self.condition = Some(Box::new(condition));
        self
    }

    /// Prefer the idle worker with the greatest weight; ties go to the
    /// worker closest to the front. Consulted when no condition is set or
    /// the condition matched nothing.
    pub fn weighter(mut self, weighter: impl Fn(&W) -> K + Send + 'a) -> Self {
        self.weighter = Some(Box::new(weighter));
        self
    }
}

impl<W, K> Default for AcquirePolicy<'_, W, K> {
    fn default() -> Self {
        Self::new()
    }
}

struct Waiter {
    id: u64,
    wake: oneshot::Sender<()>,
}

struct Inner<W> {
    idle: VecDeque<W>,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

impl<W> Inner<W> {
    fn select<K: PartialOrd>(&mut self, policy: &AcquirePolicy<'_, W, K>) -> Option<W> {
        if self.idle.len() > 1 {
            if let Some(condition) = &policy.condition {
                if let Some(pos) = self.idle.iter().position(|w| condition(w)) {
                    return self.idle.remove(pos);
                }
            }
            if let Some(weighter) = &policy.weighter {
                let mut best = 0;
                let mut best_weight = weighter(&self.idle[0]);
                for (pos, worker) in self.idle.iter().enumerate().skip(1) {
                    let weight = weighter(worker);
                    if weight > best_weight {
                        best_weight = weight;
                        best = pos;
                    }
                }
                return self.idle.remove(best);
            }
        }
        self.idle.pop_front()
    }

    fn park(&mut self, keep_seniority: bool) -> (u64, oneshot::Receiver<()>) {
        let (wake, signal) = oneshot::channel();
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        let waiter = Waiter { id, wake };
        if keep_seniority {
            self.waiters.push_front(waiter);
        } else {
            self.waiters.push_back(waiter);
        }
        (id, signal)
    }

    /// Remove a parked waiter; `false` if `release` already took it.
    fn unpark(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(pos) => {
                self.waiters.remove(pos);
                true
            }
            None => false,
        }
    }

    fn wake_next(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.wake.send(()).is_ok() {
                trace!(waiter = waiter.id, "woke waiter");
                break;
            }
        }
    }
}

/// Deregisters a parked waiter whose `acquire` future is dropped before it
/// got a worker.
struct ParkedWaiter<'q, W> {
    inner: &'q Mutex<Inner<W>>,
    id: u64,
    signal: oneshot::Receiver<()>,
    done: bool,
}

impl<W> ParkedWaiter<'_, W> {
    async fn wait(&mut self) {
        // The sender only disappears through `release`, which sends first.
        let _ = (&mut self.signal).await;
        self.done = true;
    }
}

impl<W> Drop for ParkedWaiter<'_, W> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut inner = lock(self.inner);
        let still_parked = inner.unpark(self.id);
        if !still_parked && !inner.idle.is_empty() {
            // Woken by `release` but gone before claiming the worker.
            inner.wake_next();
        }
        trace!(waiter = self.id, still_parked, "waiter dropped");
    }
}

fn lock<W>(inner: &Mutex<Inner<W>>) -> MutexGuard<'_, Inner<W>> {
    // A panicking condition/weighter poisons the lock without having
    // modified the queue.
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scheduler handing out idle workers of type `W`.
///
/// `WorkerQueue` guarantees that an idle worker is handed to one caller at
/// a time. It does not track workers once they are handed out: returning
/// each worker exactly once, and never dispatching two requests to one
/// worker concurrently, is the caller's contract.
pub struct WorkerQueue<W> {
    inner: Mutex<Inner<W>>,
}

impl<W> WorkerQueue<W> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                idle: VecDeque::new(),
                waiters: VecDeque::new(),
                next_waiter_id: 0,
            }),
        }
    }

    /// Acquire the worker at the front of the idle sequence, waiting for
    /// one to be released if none is idle.
    pub async fn acquire(&self) -> W {
        self.acquire_with(AcquirePolicy::<W, i64>::new()).await
    }

    /// Acquire the first idle worker satisfying `condition`, falling back
    /// to the front worker when none does.
    pub async fn acquire_if(&self, condition: impl Fn(&W) -> bool + Send) -> W {
        self.acquire_with(AcquirePolicy::<W, i64>::new().condition(condition))
            .await
    }

    /// Acquire the idle worker with the greatest weight.
    pub async fn acquire_weighted<K: PartialOrd>(&self, weighter: impl Fn(&W) -> K + Send) -> W {
        self.acquire_with(AcquirePolicy::new().weighter(weighter))
            .await
    }

    /// Acquire a worker according to `policy`.
    ///
    /// Cancel-safe: dropping the returned future deregisters the caller and,
    /// if it had already been woken, passes the wakeup on to the next waiter.
    pub async fn acquire_with<K: PartialOrd>(&self, policy: AcquirePolicy<'_, W, K>) -> W {
        let mut attempts: u32 = 0;
        loop {
            let (id, signal) = {
                let mut inner = lock(&self.inner);
                if let Some(worker) = inner.select(&policy) {
                    return worker;
                }
                attempts += 1;
                inner.park(attempts > 1)
            };
            trace!(waiter = id, attempts, "no idle worker, parked");
            let mut parked = ParkedWaiter {
                inner: &self.inner,
                id,
                signal,
                done: false,
            };
            parked.wait().await;
        }
    }

    /// Return a worker to the front of the idle sequence, so the most
    /// recently used workers (and their warm caches) are reused first.
    pub fn release(&self, worker: W) {
        self.release_at(worker, true);
    }

    /// Return a worker to the back of the idle sequence.
    pub fn release_to_back(&self, worker: W) {
        self.release_at(worker, false);
    }

    fn release_at(&self, worker: W, put_in_front: bool) {
        let mut inner = lock(&self.inner);
        if put_in_front {
            inner.idle.push_front(worker);
        } else {
            inner.idle.push_back(worker);
        }
        inner.wake_next();
    }

    /// Remove the first idle worker satisfying `condition` without waiting
    /// and without waking anyone. Used to retire workers (quota
    /// enforcement, shutdown, a crashed process).
    pub fn take_idle(&self, condition: impl Fn(&W) -> bool) -> Option<W> {
        let mut inner = lock(&self.inner);
        let pos = inner.idle.iter().position(|w| condition(w))?;
        inner.idle.remove(pos)
    }

    /// Number of idle workers.
    pub fn qsize(&self) -> usize {
        lock(&self.inner).idle.len()
    }

    /// Number of callers parked in `acquire`.
    pub fn count_waiters(&self) -> usize {
        lock(&self.inner).waiters.len()
    }
}

impl<W> Default for WorkerQueue<W> {
    fn default() -> Self {
        Self::new()
    }
}
