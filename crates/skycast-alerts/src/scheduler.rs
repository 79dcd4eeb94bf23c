//! Recurring alert jobs.
//!
//! `AlertScheduler` is an explicit state object with a `start()` /
//! `shutdown()` lifecycle. Each job runs as its own task on the tokio
//! runtime captured at `start()`, driven by an interval timer and cancelled
//! through a child of the scheduler's root cancellation token. Jobs are
//! identified by (location, condition); scheduling the same identity again
//! cancels the old timer before the new one is registered.
//!
//! A firing fetches a fresh observation, appends it to the store and
//! evaluates the condition. Fetch and store failures are logged and the
//! firing is skipped; the job keeps its schedule.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use skycast_store::{normalize_location, ObservationStore};
use skycast_weather::WeatherSource;
use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::condition::Condition;
use crate::error::AlertError;
use crate::sink::{AlertEvent, AlertSink};

/// Upper bound on a single provider fetch before the firing is skipped
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity of a job: normalized location plus canonical condition text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    pub location: String,
    pub condition: String,
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.location, self.condition)
    }
}

/// Snapshot of an active job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub id: JobId,
    pub condition: Condition,
    pub interval_minutes: u32,
}

/// What a single firing did.
#[derive(Debug, Clone, PartialEq)]
pub enum FiringOutcome {
    Triggered(AlertEvent),
    /// Condition did not hold; carries the observed value
    Clear { value: f64 },
    FetchFailed(String),
    StoreFailed(String),
}

struct JobHandle {
    info: JobInfo,
    cancel: CancellationToken,
}

struct Driver {
    runtime: Handle,
    root: CancellationToken,
}

/// Everything a job needs to fire, shared with its task.
#[derive(Clone)]
struct JobContext {
    id: JobId,
    condition: Condition,
    store: ObservationStore,
    source: Arc<dyn WeatherSource>,
    sink: Arc<dyn AlertSink>,
    fetch_timeout: Duration,
}

impl JobContext {
    async fn fire(&self) -> FiringOutcome {
        let fetched = match tokio::time::timeout(self.fetch_timeout, self.source.fetch(&self.id.location)).await {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => {
                tracing::warn!("Skipping alert check {}: fetch failed: {}", self.id, e);
                return FiringOutcome::FetchFailed(e.to_string());
            }
            Err(_) => {
                tracing::warn!("Skipping alert check {}: fetch timed out", self.id);
                return FiringOutcome::FetchFailed("fetch timed out".to_string());
            }
        };

        let store = self.store.clone();
        let location = self.id.location.clone();
        let saved = tokio::task::spawn_blocking(move || {
            store.save_with_country(&location, &fetched.observation, fetched.country.as_deref())
        })
        .await;

        let stored = match saved {
            Ok(Ok(stored)) => stored,
            Ok(Err(e)) => {
                tracing::error!("Skipping alert check {}: could not store observation: {}", self.id, e);
                return FiringOutcome::StoreFailed(e.to_string());
            }
            Err(e) => {
                tracing::error!("Skipping alert check {}: store task failed: {}", self.id, e);
                return FiringOutcome::StoreFailed(e.to_string());
            }
        };

        match self.condition.evaluate(&stored.observation) {
            Some(value) => {
                let event = AlertEvent {
                    location: self.id.location.clone(),
                    metric: self.condition.metric,
                    value,
                    condition: self.id.condition.clone(),
                    observed_at: stored.observation.timestamp,
                };
                self.sink.notify(&event);
                FiringOutcome::Triggered(event)
            }
            None => {
                let value = self.condition.metric.value_of(&stored.observation);
                tracing::debug!("Alert check {}: {} = {}, not triggered", self.id, self.condition.metric, value);
                FiringOutcome::Clear { value }
            }
        }
    }

    async fn run(self, cancel: CancellationToken, first_tick: Instant, period: Duration) {
        let mut ticker = interval_at(first_tick, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.fire().await;
                }
            }
        }
        tracing::debug!("Alert job {} stopped", self.id);
    }
}

/// Owns the set of recurring alert jobs.
pub struct AlertScheduler {
    store: ObservationStore,
    source: Arc<dyn WeatherSource>,
    sink: Arc<dyn AlertSink>,
    fetch_timeout: Duration,
    driver: Mutex<Option<Driver>>,
    jobs: Mutex<HashMap<JobId, JobHandle>>,
}

impl AlertScheduler {
    pub fn new(store: ObservationStore, source: Arc<dyn WeatherSource>, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            store,
            source,
            sink,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            driver: Mutex::new(None),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Upper bound on one provider fetch inside a firing.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Start the scheduler on the current tokio runtime.
    ///
    /// Starting a running scheduler is a no-op.
    ///
    /// # Errors
    /// Returns `AlertError::NoRuntime` when called outside a tokio runtime.
    pub fn start(&self) -> Result<(), AlertError> {
        let runtime = Handle::try_current().map_err(|_| AlertError::NoRuntime)?;
        let mut driver = self.driver.lock();
        if driver.is_none() {
            *driver = Some(Driver {
                runtime,
                root: CancellationToken::new(),
            });
            tracing::info!("Alert scheduler started");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.driver.lock().is_some()
    }

    /// Register a recurring check, replacing any job with the same identity.
    ///
    /// The condition is parsed here, so a malformed one never reaches a
    /// firing. The first check runs one interval from now. Returns without
    /// waiting for any firing.
    ///
    /// # Errors
    /// `InvalidCondition`, `InvalidInterval` for zero minutes,
    /// `InvalidLocation` for a blank name, `NotRunning` before `start` or
    /// after `shutdown`.
    pub fn schedule(&self, location: &str, condition: &str, interval_minutes: u32) -> Result<JobId, AlertError> {
        let parsed: Condition = condition.parse()?;
        if interval_minutes == 0 {
            return Err(AlertError::InvalidInterval);
        }
        let id = job_id(location, &parsed)?;

        // Held until the job is registered so a concurrent shutdown cannot
        // drain the table between the check and the insert.
        let driver = self.driver.lock();
        let driver = driver.as_ref().ok_or(AlertError::NotRunning)?;

        let context = self.context(id.clone(), parsed);
        let cancel = driver.root.child_token();
        let period = Duration::from_secs(u64::from(interval_minutes) * 60);
        let first_tick = Instant::now() + period;

        let mut jobs = self.jobs.lock();
        if let Some(previous) = jobs.remove(&id) {
            previous.cancel.cancel();
            tracing::info!(
                "Replacing alert job {} ({} min -> {} min)",
                id,
                previous.info.interval_minutes,
                interval_minutes
            );
        }
        driver.runtime.spawn(context.run(cancel.clone(), first_tick, period));
        jobs.insert(
            id.clone(),
            JobHandle {
                info: JobInfo {
                    id: id.clone(),
                    condition: parsed,
                    interval_minutes,
                },
                cancel,
            },
        );

        tracing::info!("Scheduled alert job {} every {} min", id, interval_minutes);
        Ok(id)
    }

    /// Cancel the job with this identity. Returns whether one existed.
    pub fn cancel(&self, location: &str, condition: &str) -> Result<bool, AlertError> {
        let parsed: Condition = condition.parse()?;
        let id = job_id(location, &parsed)?;

        match self.jobs.lock().remove(&id) {
            Some(job) => {
                job.cancel.cancel();
                tracing::info!("Cancelled alert job {}", id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Active jobs, ordered by identity.
    pub fn jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self.jobs.lock().values().map(|job| job.info.clone()).collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Run one check right now, outside any schedule.
    ///
    /// Works whether or not the scheduler is running.
    pub async fn check_now(&self, location: &str, condition: &str) -> Result<FiringOutcome, AlertError> {
        let parsed: Condition = condition.parse()?;
        let id = job_id(location, &parsed)?;
        Ok(self.context(id, parsed).fire().await)
    }

    /// Cancel every pending timer and stop accepting jobs.
    ///
    /// Firings already in progress finish; nothing is persisted.
    pub fn shutdown(&self) {
        let Some(driver) = self.driver.lock().take() else {
            return;
        };
        driver.root.cancel();

        let cancelled = self.jobs.lock().drain().count();
        tracing::info!("Alert scheduler shut down, cancelled {} jobs", cancelled);
    }

    fn context(&self, id: JobId, condition: Condition) -> JobContext {
        JobContext {
            id,
            condition,
            store: self.store.clone(),
            source: self.source.clone(),
            sink: self.sink.clone(),
            fetch_timeout: self.fetch_timeout,
        }
    }
}

impl Drop for AlertScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn job_id(location: &str, condition: &Condition) -> Result<JobId, AlertError> {
    let location = normalize_location(location).map_err(|e| AlertError::InvalidLocation(e.to_string()))?;
    Ok(JobId {
        location,
        condition: condition.to_string(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::condition::Metric;
    use crate::sink::ChannelSink;
    use async_trait::async_trait;
    use skycast_weather::{FetchError, FetchedObservation, Observation};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Replays scripted temperatures; `None` entries fail the fetch.
    /// Repeats the last entry once the script runs out.
    struct ScriptedSource {
        script: Mutex<VecDeque<Option<f64>>>,
        last: Mutex<Option<f64>>,
        calls: AtomicUsize,
        /// Time each fetch takes to answer
        delay: Option<Duration>,
    }

    impl ScriptedSource {
        fn new(script: &[Option<f64>]) -> Arc<Self> {
            Self::build(script, None)
        }

        fn slow(script: &[Option<f64>], delay: Duration) -> Arc<Self> {
            Self::build(script, Some(delay))
        }

        fn build(script: &[Option<f64>], delay: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WeatherSource for ScriptedSource {
        async fn fetch(&self, location: &str) -> Result<FetchedObservation, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = match self.script.lock().pop_front() {
                Some(entry) => {
                    *self.last.lock() = entry;
                    entry
                }
                None => *self.last.lock(),
            };
            match next {
                Some(temp) => Ok(FetchedObservation {
                    observation: Observation::new(temp, 55.0, 12.0, "Clear"),
                    country: Some("Testland".to_string()),
                }),
                None => Err(FetchError::LocationNotFound(location.to_string())),
            }
        }
    }

    struct Harness {
        store: ObservationStore,
        source: Arc<ScriptedSource>,
        scheduler: AlertScheduler,
        events: UnboundedReceiver<AlertEvent>,
    }

    fn harness(script: &[Option<f64>]) -> Harness {
        harness_with(ScriptedSource::new(script))
    }

    fn harness_with(source: Arc<ScriptedSource>) -> Harness {
        let store = ObservationStore::in_memory().unwrap();
        let (sink, events) = ChannelSink::new();
        let scheduler = AlertScheduler::new(store.clone(), source.clone(), Arc::new(sink));
        Harness {
            store,
            source,
            scheduler,
            events,
        }
    }

    /// Let woken tasks run to completion on the paused runtime.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Poll until `done` holds. Store writes run on the blocking pool, which
    /// holds back the paused clock while they are in flight.
    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if done() {
                return;
            }
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition never became true");
    }

    async fn advance_minutes(minutes: u64) {
        tokio::time::advance(Duration::from_secs(minutes * 60)).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_requires_start() {
        let h = harness(&[Some(20.0)]);
        assert!(matches!(
            h.scheduler.schedule("london", "temp > 30", 5),
            Err(AlertError::NotRunning)
        ));
        assert!(!h.scheduler.is_running());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let h = harness(&[]);
        assert!(matches!(h.scheduler.start(), Err(AlertError::NoRuntime)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_condition_rejected_at_schedule_time() {
        let h = harness(&[Some(20.0)]);
        h.scheduler.start().unwrap();

        assert!(matches!(
            h.scheduler.schedule("london", "temp >> 30", 5),
            Err(AlertError::InvalidCondition { .. })
        ));
        assert!(matches!(
            h.scheduler.schedule("london", "temp > 30", 0),
            Err(AlertError::InvalidInterval)
        ));
        assert!(matches!(
            h.scheduler.schedule("  ", "temp > 30", 5),
            Err(AlertError::InvalidLocation(_))
        ));
        assert!(h.scheduler.jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_identity_replaces_job() {
        let h = harness(&[Some(20.0)]);
        h.scheduler.start().unwrap();

        let first = h.scheduler.schedule("London", "temp > 30", 5).unwrap();
        let second = h.scheduler.schedule(" london ", "temp  >  30.0", 15).unwrap();

        assert_eq!(first, second);
        let jobs = h.scheduler.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].interval_minutes, 15);
        assert_eq!(jobs[0].id.to_string(), "london_temp > 30");
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_timer_stops_firing() {
        let h = harness(&[Some(20.0)]);
        h.scheduler.start().unwrap();

        h.scheduler.schedule("london", "temp > 30", 1).unwrap();
        h.scheduler.schedule("london", "temp > 30", 10).unwrap();

        advance_minutes(5).await;
        assert_eq!(h.source.calls(), 0);

        advance_minutes(5).await;
        assert_eq!(h.source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_conditions_are_distinct_jobs() {
        let h = harness(&[Some(20.0)]);
        h.scheduler.start().unwrap();

        h.scheduler.schedule("london", "temp > 30", 5).unwrap();
        h.scheduler.schedule("london", "humidity < 40", 5).unwrap();
        h.scheduler.schedule("paris", "temp > 30", 5).unwrap();

        assert_eq!(h.scheduler.jobs().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_firing_stores_and_notifies() {
        let mut h = harness(&[Some(32.0)]);
        h.scheduler.start().unwrap();
        h.scheduler.schedule("London", "temp > 30", 1).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(120), h.events.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(event.location, "london");
        assert_eq!(event.metric, Metric::Temp);
        assert_eq!(event.value, 32.0);
        assert_eq!(event.condition, "temp > 30");
        assert!(h.store.count("london").unwrap() >= 1);
        assert_eq!(
            h.store.location("london").unwrap().unwrap().country.as_deref(),
            Some("Testland")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_untriggered_firing_only_stores() {
        let mut h = harness(&[Some(28.0)]);
        h.scheduler.start().unwrap();
        h.scheduler.schedule("london", "temp > 30", 1).unwrap();

        advance_minutes(1).await;
        wait_until(|| h.store.count("london").unwrap() == 1).await;

        assert_eq!(h.source.calls(), 1);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_skips_firing_but_keeps_job() {
        let mut h = harness(&[None, Some(35.0)]);
        h.scheduler.start().unwrap();
        h.scheduler.schedule("london", "temp > 30", 1).unwrap();

        advance_minutes(1).await;
        assert_eq!(h.source.calls(), 1);
        assert_eq!(h.store.count("london").unwrap(), 0);
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.scheduler.jobs().len(), 1);

        advance_minutes(1).await;
        let event = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.value, 35.0);
        assert_eq!(h.source.calls(), 2);
        assert_eq!(h.store.count("london").unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_times_out_and_job_continues() {
        let source = ScriptedSource::slow(&[Some(35.0)], Duration::from_secs(30));
        let mut h = harness_with(source);
        h.scheduler = AlertScheduler::new(h.store.clone(), h.source.clone(), h.scheduler.sink.clone())
            .with_fetch_timeout(Duration::from_secs(5));
        assert_eq!(h.scheduler.fetch_timeout(), Duration::from_secs(5));

        let outcome = h.scheduler.check_now("london", "temp > 30").await.unwrap();
        assert!(matches!(outcome, FiringOutcome::FetchFailed(_)));
        assert_eq!(h.store.count("london").unwrap(), 0);

        h.scheduler.start().unwrap();
        h.scheduler.schedule("london", "temp > 30", 1).unwrap();

        advance_minutes(1).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;

        assert_eq!(h.source.calls(), 2);
        assert_eq!(h.store.count("london").unwrap(), 0);
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.scheduler.jobs().len(), 1);

        advance_minutes(1).await;
        assert_eq!(h.source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_shutdown() {
        let h = harness(&[Some(20.0)]);
        h.scheduler.start().unwrap();
        h.scheduler.schedule("london", "temp > 30", 1).unwrap();
        h.scheduler.shutdown();

        h.scheduler.start().unwrap();
        assert!(h.scheduler.jobs().is_empty());
        h.scheduler.schedule("paris", "temp > 30", 2).unwrap();

        advance_minutes(1).await;
        assert_eq!(h.source.calls(), 0);

        advance_minutes(1).await;
        assert_eq!(h.source.calls(), 1);
        assert_eq!(h.scheduler.jobs().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_schedule_racing_shutdown_leaves_no_jobs() {
        for _ in 0..50 {
            let h = harness(&[Some(20.0)]);
            let scheduler = Arc::new(h.scheduler);
            scheduler.start().unwrap();

            let scheduling = {
                let scheduler = scheduler.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        let _ = scheduler.schedule(&format!("city-{i}"), "temp > 30", 60);
                    }
                })
            };
            scheduler.shutdown();
            scheduling.join().unwrap();

            assert!(!scheduler.is_running());
            assert!(scheduler.jobs().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_by_identity() {
        let h = harness(&[Some(20.0)]);
        h.scheduler.start().unwrap();
        h.scheduler.schedule("london", "temp > 30", 1).unwrap();

        assert!(h.scheduler.cancel("LONDON", "temp > 30").unwrap());
        assert!(!h.scheduler.cancel("london", "temp > 30").unwrap());
        assert!(h.scheduler.jobs().is_empty());

        advance_minutes(3).await;
        assert_eq!(h.source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_all_timers() {
        let h = harness(&[Some(20.0)]);
        h.scheduler.start().unwrap();
        h.scheduler.schedule("london", "temp > 30", 1).unwrap();
        h.scheduler.schedule("paris", "wind > 50", 2).unwrap();

        h.scheduler.shutdown();

        assert!(!h.scheduler.is_running());
        assert!(h.scheduler.jobs().is_empty());
        assert!(matches!(
            h.scheduler.schedule("london", "temp > 30", 1),
            Err(AlertError::NotRunning)
        ));

        advance_minutes(5).await;
        assert_eq!(h.source.calls(), 0);

        // Idempotent
        h.scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_now_without_running_scheduler() {
        let h = harness(&[Some(28.0), Some(32.0)]);

        let first = h.scheduler.check_now("london", "temp > 30").await.unwrap();
        assert_eq!(first, FiringOutcome::Clear { value: 28.0 });

        let second = h.scheduler.check_now("london", "temp > 30").await.unwrap();
        assert!(matches!(second, FiringOutcome::Triggered(event) if event.value == 32.0));

        assert_eq!(h.store.count("london").unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_now_reports_fetch_failure() {
        let h = harness(&[None]);
        let outcome = h.scheduler.check_now("london", "temp > 30").await.unwrap();
        assert!(matches!(outcome, FiringOutcome::FetchFailed(_)));
    }
}
