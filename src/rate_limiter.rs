//! Sliding-window rate limiter with first-come-first-served admission.
//!
//! Callers that find the window full receive a wait ticket (a oneshot
//! channel) and are parked in a queue. A single drain task re-evaluates the
//! window whenever the oldest admission ages out and hands out admissions in
//! queue order until either the queue or the window is exhausted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    max_requests: usize,
    window: Duration,
    poll_interval: Duration,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    admitted: VecDeque<Instant>,
    waiters: VecDeque<oneshot::Sender<()>>,
    draining: bool,
}

impl State {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.admitted.front() {
            if now.duration_since(oldest) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Forget waiters at the head of the queue whose callers went away.
    fn drop_abandoned(&mut self) {
        while self.waiters.front().is_some_and(|w| w.is_closed()) {
            self.waiters.pop_front();
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RateLimiter {
    /// At most `max_requests` admissions in any rolling `window`.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                max_requests: max_requests.max(1),
                window,
                poll_interval: DEFAULT_POLL_INTERVAL,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn per_second(requests: usize) -> Self {
        Self::new(requests, Duration::from_secs(1))
    }

    pub fn max_requests(&self) -> usize {
        self.shared.max_requests
    }

    pub fn window(&self) -> Duration {
        self.shared.window
    }

    /// Number of callers currently waiting for admission.
    pub fn queued(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    /// Wait until this caller may issue one request. Never fails.
    pub async fn acquire(&self) {
        let ticket = {
            let mut state = self.shared.lock();
            let now = Instant::now();
            state.prune(now, self.shared.window);
            state.drop_abandoned();

            // Later arrivals never jump the queue, even if the window has room.
            if state.waiters.is_empty() && state.admitted.len() < self.shared.max_requests {
                state.admitted.push_back(now);
                return;
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!(queued = state.waiters.len(), "rate limit reached, queueing request");

            if !state.draining {
                state.draining = true;
                tokio::spawn(drain(self.shared.clone()));
            }
            rx
        };

        // A closed ticket only happens when the runtime is shutting down.
        let _ = ticket.await;
    }
}

async fn drain(shared: Arc<Shared>) {
    loop {
        let wait = {
            let state = shared.lock();
            let now = Instant::now();
            state
                .admitted
                .front()
                .map(|oldest| (*oldest + shared.window).saturating_duration_since(now))
                .unwrap_or(Duration::ZERO)
                .min(shared.poll_interval)
        };
        tokio::time::sleep(wait).await;

        let mut state = shared.lock();
        let now = Instant::now();
        state.prune(now, shared.window);

        let mut admitted = 0usize;
        while state.admitted.len() < shared.max_requests {
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            // A dropped receiver means the caller went away; its slot stays free.
            if waiter.send(()).is_ok() {
                state.admitted.push_back(now);
                admitted += 1;
            }
        }
        if admitted > 0 {
            debug!(admitted, remaining = state.waiters.len(), "admitted queued requests");
        }

        if state.waiters.is_empty() {
            state.draining = false;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn admits_immediately_below_capacity() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        for _ in 0..3 {
            let mut fut = task::spawn(limiter.acquire());
            assert_ready!(fut.poll());
        }
        let mut fourth = task::spawn(limiter.acquire());
        assert_pending!(fourth.poll());
        assert_eq!(limiter.queued(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_callers_are_admitted_in_arrival_order() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        limiter.acquire().await;
        limiter.acquire().await;

        let mut first = task::spawn(limiter.acquire());
        let mut second = task::spawn(limiter.acquire());
        let mut third = task::spawn(limiter.acquire());
        assert_pending!(first.poll());
        assert_pending!(second.poll());
        assert_pending!(third.poll());

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_ready!(first.poll());
        assert_ready!(second.poll());
        assert_pending!(third.poll());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_ready!(third.poll());
        assert_eq!(limiter.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_max_requests_in_any_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..14 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }
        let mut times = Vec::new();
        for h in futures::future::join_all(handles).await {
            times.push(h.unwrap());
        }
        times.sort();

        for pair in times.windows(4) {
            assert!(
                pair[3].duration_since(pair[0]) >= Duration::from_secs(1),
                "four admissions within one window: {:?}",
                pair
            );
        }
        // 14 admissions at 3/s need at least four full windows.
        assert!(times[13].duration_since(start) >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn abandoned_tickets_do_not_hold_back_new_callers() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1));
        {
            let (tx, rx) = oneshot::channel();
            drop(rx);
            limiter.shared.lock().waiters.push_back(tx);
        }
        assert_eq!(limiter.queued(), 1);

        let mut fut = task::spawn(limiter.acquire());
        assert_ready!(fut.poll());
        assert_eq!(limiter.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiters_do_not_consume_slots() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1));
        limiter.acquire().await;

        let mut abandoned = task::spawn(limiter.acquire());
        assert_pending!(abandoned.poll());
        let mut kept = task::spawn(limiter.acquire());
        assert_pending!(kept.poll());
        drop(abandoned);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_ready!(kept.poll());
    }
}
