use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::NormalizedError;

pub type FetchFuture<T> = BoxFuture<'static, Result<T, NormalizedError>>;

type FetchFn<T> = Box<dyn Fn() -> FetchFuture<T> + Send + Sync>;
type DataFn<T> = Box<dyn Fn(T) + Send + Sync>;
type ErrorFn = Box<dyn Fn(NormalizedError) + Send + Sync>;
type StopFn<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

type SharedRun = Shared<BoxFuture<'static, ()>>;

/// Repeatedly invokes a fetch on a timer, guaranteeing at most one
/// in-flight fetch at a time.
///
/// A tick that lands while a fetch is still outstanding joins it instead of
/// starting a second one, and so does `fetch_now`; every waiter resolves
/// when that single fetch completes. Fetch failures are reported through
/// `on_error` and never stop the timer.
pub struct Poller<T> {
    inner: Arc<PollerInner<T>>,
}

impl<T> Clone for Poller<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct PollerBuilder<T> {
    interval: Duration,
    immediate: bool,
    fetch: FetchFn<T>,
    on_data: Option<DataFn<T>>,
    on_error: Option<ErrorFn>,
    should_stop: Option<StopFn<T>>,
}

impl<T: Send + 'static> PollerBuilder<T> {
    pub fn new(
        interval: Duration,
        fetch: impl Fn() -> FetchFuture<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            interval,
            immediate: true,
            fetch: Box::new(fetch),
            on_data: None,
            on_error: None,
            should_stop: None,
        }
    }

    /// Whether `start()` fetches right away or only after the first interval.
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn on_data(mut self, on_data: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Box::new(on_data));
        self
    }

    pub fn on_error(
        mut self,
        on_error: impl Fn(NormalizedError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Halt the controller once a fetched value satisfies the predicate.
    pub fn stop_when(mut self, should_stop: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.should_stop = Some(Box::new(should_stop));
        self
    }

    pub fn build(self) -> Poller<T> {
        Poller {
            inner: Arc::new(PollerInner {
                interval: self.interval,
                immediate: self.immediate,
                fetch: self.fetch,
                on_data: self.on_data,
                on_error: self.on_error,
                should_stop: self.should_stop,
                pending: Mutex::new(None),
                stopped: AtomicBool::new(true),
                ticker: Mutex::new(None),
            }),
        }
    }
}

struct PollerInner<T> {
    interval: Duration,
    immediate: bool,
    fetch: FetchFn<T>,
    on_data: Option<DataFn<T>>,
    on_error: Option<ErrorFn>,
    should_stop: Option<StopFn<T>>,
    /// Dedup slot: the single in-flight fetch, joinable by ticks and
    /// `fetch_now` callers alike.
    pending: Mutex<Option<SharedRun>>,
    stopped: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Poller<T> {
    /// Begin ticking. No-op if the controller is already polling.
    pub fn start(&self) {
        let mut ticker = self.inner.ticker.lock().unwrap();
        let active = ticker.as_ref().is_some_and(|task| !task.is_finished())
            && !self.inner.stopped.load(Ordering::SeqCst);
        if active {
            return;
        }
        if let Some(task) = ticker.take() {
            task.abort();
        }
        self.inner.stopped.store(false, Ordering::SeqCst);
        *ticker = Some(tokio::spawn(tick_loop(Arc::clone(&self.inner))));
    }

    /// Stop ticking. Idempotent. An already in-flight fetch still resolves
    /// and its callbacks still run; only future ticks are gated.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.inner.ticker.lock().unwrap().take() {
            task.abort();
        }
    }

    pub fn is_polling(&self) -> bool {
        !self.inner.stopped.load(Ordering::SeqCst)
            && self
                .inner
                .ticker
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }

    /// Fetch outside the timer cadence. Joins the in-flight fetch when one
    /// is outstanding rather than issuing a second call.
    pub async fn fetch_now(&self) {
        PollerInner::run(&self.inner).await;
    }
}

impl<T: Send + 'static> PollerInner<T> {
    /// Return the in-flight run, or begin a new one. Each run is driven by
    /// its own task so it completes even if every waiter goes away.
    fn run(this: &Arc<Self>) -> SharedRun {
        let run = {
            let mut slot = this.pending.lock().unwrap();
            if let Some(run) = slot.as_ref() {
                return run.clone();
            }
            let inner = Arc::clone(this);
            let run: SharedRun = async move {
                match (inner.fetch)().await {
                    Ok(data) => {
                        let done = inner
                            .should_stop
                            .as_ref()
                            .map(|should_stop| should_stop(&data))
                            .unwrap_or(false);
                        if let Some(on_data) = &inner.on_data {
                            on_data(data);
                        }
                        if done {
                            inner.stopped.store(true, Ordering::SeqCst);
                        }
                    }
                    Err(err) => {
                        if let Some(on_error) = &inner.on_error {
                            on_error(err);
                        }
                    }
                }
                inner.pending.lock().unwrap().take();
            }
            .boxed()
            .shared();
            *slot = Some(run.clone());
            run
        };
        tokio::spawn(run.clone());
        run
    }
}

async fn tick_loop<T: Send + 'static>(inner: Arc<PollerInner<T>>) {
    if inner.immediate {
        PollerInner::run(&inner).await;
        if inner.stopped.load(Ordering::SeqCst) {
            return;
        }
    }

    let mut ticker = tokio::time::interval(inner.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick of a fresh interval completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        PollerInner::run(&inner).await;
        if inner.stopped.load(Ordering::SeqCst) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    struct Probe {
        started: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delivered: AtomicUsize,
    }

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delivered: AtomicUsize::new(0),
            })
        }

        fn enter(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn slow_counter_poller(
        probe: &Arc<Probe>,
        interval: Duration,
        latency: Duration,
    ) -> Poller<usize> {
        let fetch_probe = Arc::clone(probe);
        let data_probe = Arc::clone(probe);
        PollerBuilder::new(interval, move || {
            let probe = Arc::clone(&fetch_probe);
            async move {
                probe.enter();
                sleep(latency).await;
                probe.exit();
                Ok(probe.started.load(Ordering::SeqCst))
            }
            .boxed()
        })
        .on_data(move |_| {
            data_probe.delivered.fetch_add(1, Ordering::SeqCst);
        })
        .build()
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetches_never_overlap() {
        let probe = Probe::new();
        let poller = slow_counter_poller(&probe, Duration::from_millis(100), Duration::from_millis(350));
        poller.start();
        sleep(Duration::from_secs(3)).await;

        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(probe.started.load(Ordering::SeqCst) >= 2);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_then_start_fetches_immediately_again() {
        let probe = Probe::new();
        let poller = slow_counter_poller(&probe, Duration::from_secs(5), Duration::from_millis(1));
        poller.start();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.started.load(Ordering::SeqCst), 1);

        poller.stop();
        assert!(!poller.is_polling());
        sleep(Duration::from_secs(20)).await;
        assert_eq!(probe.started.load(Ordering::SeqCst), 1);

        poller.start();
        assert!(poller.is_polling());
        sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.started.load(Ordering::SeqCst), 2);
        // And the original cadence resumes.
        sleep(Duration::from_secs(5)).await;
        assert_eq!(probe.started.load(Ordering::SeqCst), 3);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let probe = Probe::new();
        let poller = slow_counter_poller(&probe, Duration::from_secs(1), Duration::from_millis(1));
        poller.start();
        poller.stop();
        poller.stop();
        assert!(!poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn halts_on_stop_condition() {
        #[derive(Clone)]
        struct Report {
            end_time: Option<u64>,
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let fetch_calls = Arc::clone(&calls);
        let poller = PollerBuilder::new(Duration::from_secs(1), move || {
            let calls = Arc::clone(&fetch_calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Report {
                    end_time: (n >= 3).then_some(42),
                })
            }
            .boxed()
        })
        .stop_when(|report: &Report| report.end_time.is_some())
        .build();

        poller.start();
        sleep(Duration::from_secs(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn errors_do_not_stop_polling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let fetch_calls = Arc::clone(&calls);
        let seen_errors = Arc::clone(&errors);
        let poller = PollerBuilder::new(Duration::from_secs(1), move || {
            let calls = Arc::clone(&fetch_calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<usize, _>(NormalizedError::new("transient"))
            }
            .boxed()
        })
        .on_error(move |_| {
            seen_errors.fetch_add(1, Ordering::SeqCst);
        })
        .build();

        poller.start();
        sleep(Duration::from_millis(3500)).await;

        assert!(poller.is_polling());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(errors.load(Ordering::SeqCst), 4);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetch_now_joins_the_in_flight_call() {
        let probe = Probe::new();
        let poller = slow_counter_poller(&probe, Duration::from_secs(60), Duration::from_millis(200));

        let first = poller.fetch_now();
        let second = poller.fetch_now();
        tokio::join!(first, second);

        assert_eq!(probe.started.load(Ordering::SeqCst), 1);
        assert_eq!(probe.delivered.load(Ordering::SeqCst), 1);
    }
}
