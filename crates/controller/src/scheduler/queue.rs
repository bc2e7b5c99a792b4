//! Deduplicating work queue.
//!
//! Keys are coalesced while queued, and a key being processed is never
//! handed to a second worker: adding it again marks it dirty and it is
//! queued once the current worker calls [`WorkQueue::done`]. Delayed
//! requeues share one timer task backed by a [`DelayQueue`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::poll_fn;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Poll;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::time::{delay_queue, DelayQueue};

struct State<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be processed, queued or parked behind an in-flight run.
    dirty: HashSet<K>,
    processing: HashSet<K>,
    /// At most one pending requeue per key.
    delayed: HashMap<K, delay_queue::Key>,
    timers: DelayQueue<K>,
    timer_running: bool,
    shutting_down: bool,
}

pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    timers_changed: Notify,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                delayed: HashMap::new(),
                timers: DelayQueue::new(),
                timer_running: false,
                shutting_down: false,
            }),
            notify: Notify::new(),
            timers_changed: Notify::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `key` now, superseding any pending delayed requeue.
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        if let Some(timer) = state.delayed.remove(&key) {
            state.timers.remove(&timer);
        }
        if !state.dirty.insert(key.clone()) || state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue `key` after `delay`, superseding any pending delayed requeue.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let start_timer = {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            if let Some(timer) = state.delayed.get(&key).cloned() {
                state.timers.reset(&timer, delay);
            } else {
                let timer = state.timers.insert(key.clone(), delay);
                state.delayed.insert(key, timer);
            }
            !std::mem::replace(&mut state.timer_running, true)
        };

        if start_timer {
            tokio::spawn(Arc::clone(self).run_timers());
        }
        self.timers_changed.notify_one();
    }

    /// Moves expired requeues onto the queue until shutdown.
    async fn run_timers(self: Arc<Self>) {
        loop {
            let changed = self.timers_changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if self.state().shutting_down {
                return;
            }

            let expired = poll_fn(|cx| {
                let mut state = self.state();
                match state.timers.poll_expired(cx) {
                    Poll::Ready(Some(expired)) => {
                        let key = expired.into_inner();
                        state.delayed.remove(&key);
                        Poll::Ready(key)
                    }
                    // Empty: wait for the next insert.
                    Poll::Ready(None) | Poll::Pending => Poll::Pending,
                }
            });

            tokio::select! {
                key = expired => self.add(key),
                () = &mut changed => {}
            }
        }
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as finished, queueing it again if it was added meanwhile.
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker.
    pub fn shutdown(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            state.delayed.clear();
            state.timers.clear();
        }
        self.notify.notify_waiters();
        self.timers_changed.notify_one();
    }

    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if a delayed requeue is pending for `key`.
    pub fn has_delayed(&self, key: &K) -> bool {
        self.state().delayed.contains_key(key)
    }
}
