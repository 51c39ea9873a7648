use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::error::NormalizedError;

use super::poller::{FetchFuture, Poller, PollerBuilder};

type FetchFn<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;
type DataFn<T> = Arc<dyn Fn(T) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(NormalizedError) + Send + Sync>;
type ActivityFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Activity-sensitive cadence on top of [`Poller`].
///
/// Every successful fetch is classified as active or idle. On a change the
/// current inner controller is stopped and a fresh one is started at the
/// new interval, without an immediate fetch (the data that triggered the
/// switch already satisfies this cycle). Cadence therefore lags a change
/// by at most one fetch.
pub struct AdaptivePoller<T> {
    inner: Arc<AdaptiveInner<T>>,
}

impl<T> Clone for AdaptivePoller<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct AdaptivePollerBuilder<T> {
    active_interval: Duration,
    idle_interval: Duration,
    immediate: bool,
    fetch: FetchFn<T>,
    is_active: ActivityFn<T>,
    on_data: Option<DataFn<T>>,
    on_error: Option<ErrorFn>,
}

impl<T: Send + 'static> AdaptivePollerBuilder<T> {
    pub fn new(
        active_interval: Duration,
        idle_interval: Duration,
        fetch: impl Fn() -> FetchFuture<T> + Send + Sync + 'static,
        is_active: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            active_interval,
            idle_interval,
            immediate: true,
            fetch: Arc::new(fetch),
            is_active: Arc::new(is_active),
            on_data: None,
            on_error: None,
        }
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn on_data(mut self, on_data: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Arc::new(on_data));
        self
    }

    pub fn on_error(
        mut self,
        on_error: impl Fn(NormalizedError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    pub fn build(self) -> AdaptivePoller<T> {
        AdaptivePoller {
            inner: Arc::new(AdaptiveInner {
                intervals: Mutex::new((self.active_interval, self.idle_interval)),
                immediate: self.immediate,
                fetch: self.fetch,
                is_active: self.is_active,
                on_data: self.on_data,
                on_error: self.on_error,
                last_activity: AtomicBool::new(false),
                running: AtomicBool::new(false),
                current: Mutex::new(None),
            }),
        }
    }
}

struct AdaptiveInner<T> {
    intervals: Mutex<(Duration, Duration)>,
    immediate: bool,
    fetch: FetchFn<T>,
    is_active: ActivityFn<T>,
    on_data: Option<DataFn<T>>,
    on_error: Option<ErrorFn>,
    last_activity: AtomicBool,
    running: AtomicBool,
    current: Mutex<Option<Poller<T>>>,
}

impl<T: Send + 'static> AdaptivePoller<T> {
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut current = self.inner.current.lock().unwrap();
        let interval = self
            .inner
            .interval_for(self.inner.last_activity.load(Ordering::SeqCst));
        let poller = current.get_or_insert_with(|| {
            AdaptiveInner::build_poller(&self.inner, interval, self.inner.immediate)
        });
        poller.start();
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(poller) = self.inner.current.lock().unwrap().as_ref() {
            poller.stop();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
            && self
                .inner
                .current
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(Poller::is_polling)
    }

    /// Last activity classification observed by a successful fetch.
    pub fn is_active(&self) -> bool {
        self.inner.last_activity.load(Ordering::SeqCst)
    }

    /// Fetch outside the cadence, joining any in-flight fetch.
    pub async fn fetch_now(&self) {
        let poller = {
            let mut current = self.inner.current.lock().unwrap();
            let interval = self
                .inner
                .interval_for(self.inner.last_activity.load(Ordering::SeqCst));
            current
                .get_or_insert_with(|| AdaptiveInner::build_poller(&self.inner, interval, false))
                .clone()
        };
        poller.fetch_now().await;
    }

    /// Re-base the cadence pair, restarting the inner controller when the
    /// effective interval changed.
    pub fn set_intervals(&self, active_interval: Duration, idle_interval: Duration) {
        let effective_changed = {
            let mut intervals = self.inner.intervals.lock().unwrap();
            let previous = *intervals;
            *intervals = (active_interval, idle_interval);
            let active = self.inner.last_activity.load(Ordering::SeqCst);
            let pick = |pair: (Duration, Duration)| if active { pair.0 } else { pair.1 };
            pick(previous) != pick(*intervals)
        };
        if effective_changed && self.inner.running.load(Ordering::SeqCst) {
            AdaptiveInner::rebuild(
                &self.inner,
                self.inner.last_activity.load(Ordering::SeqCst),
            );
        }
    }
}

impl<T: Send + 'static> AdaptiveInner<T> {
    fn interval_for(&self, active: bool) -> Duration {
        let intervals = self.intervals.lock().unwrap();
        if active {
            intervals.0
        } else {
            intervals.1
        }
    }

    fn build_poller(this: &Arc<Self>, interval: Duration, immediate: bool) -> Poller<T> {
        let fetch = Arc::clone(&this.fetch);
        let weak = Arc::downgrade(this);
        let mut builder = PollerBuilder::new(interval, move || (fetch)())
            .immediate(immediate)
            .on_data(move |data: T| {
                if let Some(inner) = weak.upgrade() {
                    AdaptiveInner::handle_data(&inner, data);
                }
            });
        if let Some(on_error) = &this.on_error {
            let on_error = Arc::clone(on_error);
            builder = builder.on_error(move |err| on_error(err));
        }
        builder.build()
    }

    fn handle_data(this: &Arc<Self>, data: T) {
        let active = (this.is_active)(&data);
        if let Some(on_data) = &this.on_data {
            on_data(data);
        }
        let previous = this.last_activity.swap(active, Ordering::SeqCst);
        if previous != active && this.running.load(Ordering::SeqCst) {
            debug!(active, "Polling activity changed, switching cadence");
            AdaptiveInner::rebuild(this, active);
        }
    }

    /// Swap the inner controller for one at the interval matching the given
    /// activity. The replacement starts without an immediate fetch.
    fn rebuild(this: &Arc<Self>, active: bool) {
        let interval = this.interval_for(active);
        let mut current = this.current.lock().unwrap();
        if let Some(old) = current.take() {
            old.stop();
        }
        if !this.running.load(Ordering::SeqCst) {
            return;
        }
        let poller = AdaptiveInner::build_poller(this, interval, false);
        poller.start();
        *current = Some(poller);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    /// Fetch counter that reports "active" from the `threshold`-th call on.
    fn counting_poller(
        calls: &Arc<AtomicUsize>,
        restarts: &Arc<AtomicUsize>,
        threshold: usize,
    ) -> AdaptivePoller<usize> {
        let fetch_calls = Arc::clone(calls);
        let seen = Arc::new(AtomicUsize::new(0));
        let restart_probe = Arc::clone(restarts);
        AdaptivePollerBuilder::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            move || {
                let calls = Arc::clone(&fetch_calls);
                async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) }.boxed()
            },
            move |count: &usize| *count >= threshold,
        )
        .on_data(move |count| {
            // A gap in delivery order would mean overlapping controllers.
            let previous = seen.swap(count, Ordering::SeqCst);
            if count != previous + 1 {
                restart_probe.fetch_add(1000, Ordering::SeqCst);
            }
        })
        .build()
    }

    #[tokio::test(start_paused = true)]
    async fn activity_flip_switches_to_active_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let anomalies = Arc::new(AtomicUsize::new(0));
        let poller = counting_poller(&calls, &anomalies, 2);

        poller.start();
        assert!(!poller.is_active());

        // Call 1 at t=0 (idle), call 2 at t=10s flips activity.
        sleep(Duration::from_millis(10_500)).await;
        assert!(poller.is_active());
        let after_flip = calls.load(Ordering::SeqCst);
        assert_eq!(after_flip, 2);

        // Active cadence: one fetch per second, no immediate refetch.
        sleep(Duration::from_secs(3)).await;
        let now = calls.load(Ordering::SeqCst);
        assert_eq!(now, after_flip + 3);
        assert_eq!(anomalies.load(Ordering::SeqCst), 0);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn flip_back_to_idle_slows_down() {
        let calls = Arc::new(AtomicUsize::new(0));
        // Active only for calls 2..4.
        let fetch_calls = Arc::clone(&calls);
        let poller = AdaptivePollerBuilder::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            move || {
                let calls = Arc::clone(&fetch_calls);
                async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) }.boxed()
            },
            |count: &usize| (2..=4).contains(count),
        )
        .build();

        poller.start();
        // t=0: call 1 idle. t=10: call 2 -> active. t=11,12: calls 3,4.
        // Call 4 is the last active one; call 5 at t=13 flips back to idle.
        sleep(Duration::from_millis(13_500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(!poller.is_active());

        // Idle cadence again: next fetch 10s after the flip.
        sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        sleep(Duration::from_secs(6)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn set_intervals_rebases_cadence() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch_calls = Arc::clone(&calls);
        let poller = AdaptivePollerBuilder::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            move || {
                let calls = Arc::clone(&fetch_calls);
                async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) }.boxed()
            },
            |_: &usize| false,
        )
        .build();

        poller.start();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Relax the idle cadence; the rebuilt controller waits the full
        // new interval before its next fetch.
        poller.set_intervals(Duration::from_secs(1), Duration::from_secs(60));
        sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        sleep(Duration::from_secs(31)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        poller.stop();
    }
}
