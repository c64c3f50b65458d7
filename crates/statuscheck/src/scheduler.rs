//! Periodic check cycles.
//!
//! The scheduler is either Idle or Running a single cycle. A tick that fires
//! while a cycle is in flight is skipped, never queued. Within a cycle a
//! fixed pool of workers drains a queue of services; each worker checks,
//! persists and publishes one service at a time.

use crate::checkers::Checkers;
use crate::evaluator;
use crate::metrics::MetricsRegistry;
use crate::observer::Subject;
use crate::repository::Repository;
use crate::types::{
    CheckResult, HealthCheckEvent, Service, ServiceStatus, Status, StatusLog, WebhookPayload,
};
use crate::webhook;
use chrono::{DateTime, Utc};
use common::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Largest history page served by [`Scheduler::status_history`]
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// Scheduler timing and concurrency settings
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Time between ticks
    pub interval: Duration,

    /// Upper bound for a single check
    pub check_timeout: Duration,

    /// Upper bound for a whole cycle; later checks get what is left of it
    pub cycle_timeout: Duration,

    /// Number of concurrent checks per cycle
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            check_timeout: Duration::from_secs(10),
            cycle_timeout: Duration::from_secs(90),
            workers: 10,
        }
    }
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Summary of one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Services whose check completed
    pub checked: usize,
    pub operational: usize,
    pub degraded: usize,
    pub down: usize,
    pub maintenance: usize,
    /// Completed checks whose log could not be saved
    pub persist_failures: usize,
    /// Checks abandoned because the cycle was cancelled, also counted as down
    pub cancelled: usize,
    pub duration: Duration,
}

impl CycleReport {
    fn record(&mut self, outcome: CheckOutcome) {
        match outcome {
            CheckOutcome::Completed { status, persisted } => {
                self.checked += 1;
                match status {
                    Status::Operational => self.operational += 1,
                    Status::Degraded => self.degraded += 1,
                    Status::Down => self.down += 1,
                    Status::Maintenance => self.maintenance += 1,
                }
                if !persisted {
                    self.persist_failures += 1;
                }
            }
            CheckOutcome::Cancelled => {
                self.cancelled += 1;
                self.down += 1;
            }
        }
    }
}

/// A service's latest check with any active override applied
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveServiceStatus {
    pub status: ServiceStatus,
    /// None when the service was never checked and has no active override
    pub effective: Option<Status>,
    pub overridden: bool,
}

enum CheckOutcome {
    Completed { status: Status, persisted: bool },
    Cancelled,
}

struct Lifecycle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    repository: Arc<dyn Repository>,
    subject: Arc<Subject>,
    checkers: Checkers,
    config: SchedulerConfig,
    metrics: Option<Arc<MetricsRegistry>>,
    running: AtomicBool,
    skipped_ticks: AtomicU64,
    cycles: TaskTracker,
    lifecycle: Mutex<Option<Lifecycle>>,
}

/// Resets the Running flag when the cycle holding it ends
struct CycleGuard {
    inner: Arc<Inner>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
    }
}

/// Drives check cycles over every enabled service
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        repository: Arc<dyn Repository>,
        subject: Arc<Subject>,
        checkers: Checkers,
        config: SchedulerConfig,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                subject,
                checkers,
                config,
                metrics,
                running: AtomicBool::new(false),
                skipped_ticks: AtomicU64::new(0),
                cycles: TaskTracker::new(),
                lifecycle: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SchedulerState {
        if self.inner.running.load(Ordering::Acquire) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Ticks skipped so far because a cycle was still running
    pub fn skipped_ticks(&self) -> u64 {
        self.inner.skipped_ticks.load(Ordering::Relaxed)
    }

    /// Start ticking. The first cycle runs immediately.
    ///
    /// Cancelling `shutdown` has the same effect as [`Scheduler::stop`]
    /// without waiting for in-flight work.
    pub fn start(&self, shutdown: &CancellationToken) -> Result<()> {
        let mut lifecycle = self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // A loop whose shutdown token was cancelled has already exited
        if lifecycle.as_ref().is_some_and(|l| !l.token.is_cancelled()) {
            return Err(Error::conflict("scheduler is already started"));
        }

        let token = shutdown.child_token();
        let inner = self.inner.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            inner.tick_loop(loop_token).await;
        });

        *lifecycle = Some(Lifecycle { token, handle });
        Ok(())
    }

    /// Stop ticking, cancel in-flight checks and wait for them to wind down.
    pub async fn stop(&self) {
        let lifecycle = self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(Lifecycle { token, handle }) = lifecycle {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler loop terminated abnormally");
            }
        }

        self.inner.cycles.close();
        self.inner.cycles.wait().await;
        self.inner.cycles.reopen();
    }

    /// Run one cycle now and wait for it.
    ///
    /// Fails with a conflict if a cycle is already running, and with an
    /// internal error if the services cannot be fetched.
    pub async fn run_health_checks(&self, token: &CancellationToken) -> Result<CycleReport> {
        let _guard = Inner::try_begin(&self.inner)
            .ok_or_else(|| Error::conflict("a check cycle is already running"))?;
        self.inner.clone().run_cycle(token.child_token()).await
    }

    /// Validate and ingest a pushed status update.
    ///
    /// A rejected update is neither persisted nor published.
    pub async fn handle_webhook(
        &self,
        service: &Service,
        raw_body: &[u8],
        signature: &str,
        payload: &WebhookPayload,
    ) -> Result<StatusLog> {
        let now = Utc::now();

        let log = match webhook::ingest(service, raw_body, signature, payload, now) {
            Ok(log) => log,
            Err(e) => {
                warn!(service = %service.name, error = %e, "Rejected webhook update");
                if let Some(ref m) = self.inner.metrics {
                    m.record_webhook(false);
                }
                return Err(e);
            }
        };

        if let Err(e) = self.inner.repository.save_status_log(&log).await {
            self.inner.record_repository_error("save_status_log");
            return Err(Error::internal(format!(
                "failed to persist webhook status for {}: {}",
                service.name, e
            )));
        }

        if let Some(ref m) = self.inner.metrics {
            m.record_webhook(true);
        }

        let status = evaluator::effective_status(service, log.status, now);
        self.inner
            .subject
            .publish(&HealthCheckEvent::from_log(&log, status));

        info!(service = %service.name, status = %log.status, "Accepted webhook update");
        Ok(log)
    }

    /// [`Scheduler::handle_webhook`] for the service registered under `slug`.
    pub async fn handle_webhook_by_slug(
        &self,
        slug: &str,
        raw_body: &[u8],
        signature: &str,
        payload: &WebhookPayload,
    ) -> Result<StatusLog> {
        let service = self
            .inner
            .repository
            .get_by_slug(slug)
            .await
            .map_err(|e| {
                self.inner.record_repository_error("get_by_slug");
                Error::internal(format!("failed to look up service {}: {}", slug, e))
            })?
            .ok_or_else(|| Error::not_found(format!("service {:?}", slug)))?;

        self.handle_webhook(&service, raw_body, signature, payload)
            .await
    }

    /// Latest status of every service, overrides resolved at `now`.
    pub async fn latest_statuses(&self, now: DateTime<Utc>) -> Result<Vec<EffectiveServiceStatus>> {
        let statuses = self
            .inner
            .repository
            .get_latest_status()
            .await
            .map_err(|e| {
                self.inner.record_repository_error("get_latest_status");
                Error::internal(format!("failed to load latest statuses: {}", e))
            })?;

        Ok(statuses
            .into_iter()
            .map(|status| EffectiveServiceStatus {
                effective: evaluator::effective_service_status(&status, now),
                overridden: evaluator::has_manual_override(&status.service, now),
                status,
            })
            .collect())
    }

    /// Most recent logs of a service, newest first. `limit` is clamped to 1..=1000.
    pub async fn status_history(&self, name: &str, limit: usize) -> Result<Vec<StatusLog>> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        self.inner
            .repository
            .get_status_history(name, limit)
            .await
            .map_err(|e| {
                self.inner.record_repository_error("get_status_history");
                Error::internal(format!("failed to load history for {}: {}", name, e))
            })
    }
}

impl Inner {
    fn try_begin(inner: &Arc<Inner>) -> Option<CycleGuard> {
        inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard {
                inner: inner.clone(),
            })
    }

    fn record_repository_error(&self, operation: &str) {
        if let Some(ref m) = self.metrics {
            m.record_repository_error(operation);
        }
    }

    async fn tick_loop(self: Arc<Self>, token: CancellationToken) {
        info!(
            interval = ?self.config.interval,
            workers = self.config.workers,
            "Scheduler started"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.on_tick(&token),
            }
        }

        info!("Scheduler stopped");
    }

    fn on_tick(self: &Arc<Self>, token: &CancellationToken) {
        let Some(guard) = Inner::try_begin(self) else {
            let skipped = self.skipped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(ref m) = self.metrics {
                m.record_tick_skipped();
            }
            warn!(skipped, "Previous check cycle still running, skipping tick");
            return;
        };

        let inner = self.clone();
        let cycle_token = token.child_token();
        self.cycles.spawn(async move {
            let _guard = guard;
            if let Err(e) = inner.run_cycle(cycle_token).await {
                warn!(error = %e, "Check cycle failed");
            }
        });
    }

    async fn run_cycle(self: Arc<Self>, token: CancellationToken) -> Result<CycleReport> {
        let start = Instant::now();

        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => {
                if let Some(ref m) = self.metrics {
                    m.record_cycle(false, start.elapsed());
                }
                return Err(Error::internal("check cycle cancelled while fetching services"));
            }
            fetched = self.repository.get_enabled() => fetched,
        };

        let services = match fetched {
            Ok(services) => services,
            Err(e) => {
                self.record_repository_error("get_enabled");
                if let Some(ref m) = self.metrics {
                    m.record_cycle(false, start.elapsed());
                }
                return Err(Error::internal(format!(
                    "failed to fetch enabled services: {}",
                    e
                )));
            }
        };

        let services: Vec<Service> = services
            .into_iter()
            .filter(|s| s.enabled && self.checkers.for_type(s.service_type()).is_some())
            .collect();

        let mut report = CycleReport::default();
        if services.is_empty() {
            debug!("No services to check");
            report.duration = start.elapsed();
            if let Some(ref m) = self.metrics {
                m.record_cycle(true, report.duration);
            }
            return Ok(report);
        }

        let deadline = start + self.config.cycle_timeout;
        let worker_count = self.config.workers.max(1).min(services.len());
        debug!(services = services.len(), workers = worker_count, "Starting check cycle");

        // The queue holds every service up front, so sends never wait
        let (queue_tx, queue_rx) = mpsc::channel(services.len());
        for service in services {
            let _ = queue_tx.send(service).await;
        }
        drop(queue_tx);
        let queue = Arc::new(tokio::sync::Mutex::new(queue_rx));

        let (outcome_tx, mut outcome_rx) = mpsc::channel(worker_count);
        let mut workers = JoinSet::new();

        for worker_id in 0..worker_count {
            let inner = self.clone();
            let queue = queue.clone();
            let outcome_tx = outcome_tx.clone();
            let token = token.clone();

            workers.spawn(async move {
                loop {
                    let next = queue.lock().await.recv().await;
                    let Some(service) = next else { break };

                    let outcome = inner.check_service(service, deadline, &token).await;
                    if outcome_tx.send(outcome).await.is_err() {
                        break;
                    }
                }
                debug!(worker_id, "Check worker finished");
            });
        }
        drop(outcome_tx);

        while let Some(outcome) = outcome_rx.recv().await {
            report.record(outcome);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Check worker panicked");
            }
        }

        report.duration = start.elapsed();
        if let Some(ref m) = self.metrics {
            m.record_cycle(true, report.duration);
        }

        info!(
            checked = report.checked,
            operational = report.operational,
            degraded = report.degraded,
            down = report.down,
            persist_failures = report.persist_failures,
            cancelled = report.cancelled,
            duration_ms = report.duration.as_millis() as u64,
            "Check cycle completed"
        );

        Ok(report)
    }

    async fn check_service(
        &self,
        service: Service,
        deadline: Instant,
        token: &CancellationToken,
    ) -> CheckOutcome {
        let budget = self
            .config
            .check_timeout
            .min(deadline.saturating_duration_since(Instant::now()));

        let result = match self.checkers.for_type(service.service_type()) {
            None => CheckResult::unreachable(format!(
                "no checker for {} services",
                service.service_type()
            )),
            Some(_) if budget.is_zero() => {
                debug!(service = %service.name, "Cycle deadline reached before check started");
                CheckResult::timeout()
            }
            Some(checker) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(service = %service.name, "Check cancelled");
                        return CheckOutcome::Cancelled;
                    }
                    result = timeout(budget, checker.check(&service, budget)) => {
                        result.unwrap_or_else(|_| CheckResult::timeout())
                    }
                }
            }
        };

        let now = Utc::now();
        let log = StatusLog::from_check(&service.name, &result, now);

        let saved = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            saved = self.repository.save_status_log(&log) => Some(saved),
        };
        let persisted = match saved {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!(service = %service.name, error = %e, "Failed to persist status log");
                self.record_repository_error("save_status_log");
                false
            }
            None => {
                warn!(service = %service.name, "Cycle cancelled while persisting status log");
                false
            }
        };

        let status = evaluator::effective_status(&service, log.status, now);
        self.subject.publish(&HealthCheckEvent::from_log(&log, status));

        CheckOutcome::Completed {
            status: log.status,
            persisted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::HealthChecker;
    use crate::observer::Observer;
    use crate::repository::MockRepository;
    use crate::types::{ManualStatusOverride, ServiceType};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Returns a fixed result after a delay, tracking concurrency
    struct StubChecker {
        result: CheckResult,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl StubChecker {
        fn new(result: CheckResult, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                result,
                delay,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HealthChecker for StubChecker {
        async fn check(&self, _service: &Service, _budget: Duration) -> CheckResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.result.clone()
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    #[derive(Default)]
    struct EventLog {
        events: Mutex<Vec<HealthCheckEvent>>,
    }

    impl EventLog {
        fn events(&self) -> Vec<HealthCheckEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Observer for EventLog {
        fn notify(&self, event: &HealthCheckEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "event-log"
        }
    }

    fn services(count: usize) -> Vec<Service> {
        (0..count)
            .map(|i| Service::new(format!("svc-{}", i), ServiceType::Http, "http://x/health"))
            .collect()
    }

    fn scheduler(
        repository: MockRepository,
        checker: Arc<StubChecker>,
        config: SchedulerConfig,
    ) -> (Scheduler, Arc<EventLog>) {
        let events = Arc::new(EventLog::default());
        let mut subject = Subject::new();
        subject.attach(events.clone());

        let checkers = Checkers::new(checker.clone(), checker.clone(), checker);
        let scheduler = Scheduler::new(
            Arc::new(repository),
            Arc::new(subject),
            checkers,
            config,
            Some(Arc::new(MetricsRegistry::new())),
        );
        (scheduler, events)
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(60),
            check_timeout: Duration::from_secs(1),
            cycle_timeout: Duration::from_secs(5),
            workers: 4,
        }
    }

    #[tokio::test]
    async fn test_cycle_persists_and_publishes_every_service() {
        let mut repository = MockRepository::new();
        let mut all = services(3);
        all.push(Service::new("hooks", ServiceType::Webhook, ""));
        let mut disabled = Service::new("off", ServiceType::Http, "http://x");
        disabled.enabled = false;
        all.push(disabled);

        repository
            .expect_get_enabled()
            .times(1)
            .returning(move || Ok(all.clone()));
        repository
            .expect_save_status_log()
            .withf(|log| log.status == Status::Operational && log.status_code == 200)
            .times(3)
            .returning(|_| Ok(()));

        let checker = StubChecker::new(
            CheckResult::operational(50).with_status_code(200),
            Duration::ZERO,
        );
        let (scheduler, events) = scheduler(repository, checker.clone(), fast_config());

        let report = scheduler
            .run_health_checks(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.checked, 3);
        assert_eq!(report.operational, 3);
        assert_eq!(report.persist_failures, 0);
        assert_eq!(checker.calls.load(Ordering::SeqCst), 3);
        assert_eq!(events.events().len(), 3);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_save_failure_does_not_abort_cycle() {
        let mut repository = MockRepository::new();
        repository
            .expect_get_enabled()
            .returning(|| Ok(services(4)));
        repository
            .expect_save_status_log()
            .times(4)
            .returning(|log| {
                if log.service_name == "svc-1" {
                    Err(Error::internal("disk full"))
                } else {
                    Ok(())
                }
            });

        let checker = StubChecker::new(CheckResult::operational(5), Duration::ZERO);
        let (scheduler, events) = scheduler(repository, checker, fast_config());

        let report = scheduler
            .run_health_checks(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.checked, 4);
        assert_eq!(report.persist_failures, 1);
        // The event is published even when persistence fails
        assert_eq!(events.events().len(), 4);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_reported() {
        let mut repository = MockRepository::new();
        repository
            .expect_get_enabled()
            .returning(|| Err(Error::internal("connection reset")));
        repository.expect_save_status_log().times(0);

        let checker = StubChecker::new(CheckResult::operational(5), Duration::ZERO);
        let (scheduler, _events) = scheduler(repository, checker, fast_config());

        let err = scheduler
            .run_health_checks(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pool_bounds_concurrency() {
        let mut repository = MockRepository::new();
        repository
            .expect_get_enabled()
            .returning(|| Ok(services(10)));
        repository.expect_save_status_log().returning(|_| Ok(()));

        let checker = StubChecker::new(CheckResult::operational(5), Duration::from_millis(100));
        let config = SchedulerConfig {
            workers: 3,
            ..fast_config()
        };
        let (scheduler, _events) = scheduler(repository, checker.clone(), config);

        let report = scheduler
            .run_health_checks(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.checked, 10);
        assert_eq!(checker.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_check_times_out_as_down() {
        let mut repository = MockRepository::new();
        repository
            .expect_get_enabled()
            .returning(|| Ok(services(1)));
        repository
            .expect_save_status_log()
            .withf(|log| {
                log.status == Status::Down
                    && log.error.as_deref() == Some("timeout")
                    && log.latency_ms == crate::types::FAILED_LATENCY_MS
            })
            .times(1)
            .returning(|_| Ok(()));

        let checker = StubChecker::new(CheckResult::operational(5), Duration::from_secs(30));
        let (scheduler, events) = scheduler(repository, checker, fast_config());

        let report = scheduler
            .run_health_checks(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.down, 1);
        assert_eq!(events.events()[0].error.as_deref(), Some("timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_deadline_limits_later_checks() {
        let mut repository = MockRepository::new();
        repository
            .expect_get_enabled()
            .returning(|| Ok(services(3)));
        repository.expect_save_status_log().returning(|_| Ok(()));

        // One worker, each check takes 400ms, the cycle may take 1s
        let checker = StubChecker::new(CheckResult::operational(5), Duration::from_millis(400));
        let config = SchedulerConfig {
            interval: Duration::from_secs(60),
            check_timeout: Duration::from_secs(1),
            cycle_timeout: Duration::from_secs(1),
            workers: 1,
        };
        let (scheduler, _events) = scheduler(repository, checker, config);

        let report = scheduler
            .run_health_checks(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.checked, 3);
        assert_eq!(report.operational, 2);
        assert_eq!(report.down, 1);
        assert!(report.duration <= Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_abandons_in_flight_checks() {
        let mut repository = MockRepository::new();
        repository
            .expect_get_enabled()
            .returning(|| Ok(services(2)));
        repository.expect_save_status_log().times(0);

        let checker = StubChecker::new(CheckResult::operational(5), Duration::from_secs(5));
        let (scheduler, events) = scheduler(repository, checker, fast_config());

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let report = scheduler.run_health_checks(&token).await.unwrap();

        assert_eq!(report.cancelled, 2);
        assert_eq!(report.down, 2);
        assert_eq!(report.checked, 0);
        assert!(events.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_demand_run_conflicts_with_running_cycle() {
        let mut repository = MockRepository::new();
        repository
            .expect_get_enabled()
            .returning(|| Ok(services(1)));
        repository.expect_save_status_log().returning(|_| Ok(()));

        let checker = StubChecker::new(CheckResult::operational(5), Duration::from_millis(500));
        let (scheduler, _events) = scheduler(repository, checker, fast_config());

        let background = scheduler.clone();
        let first = tokio::spawn(async move {
            background
                .run_health_checks(&CancellationToken::new())
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);

        let err = scheduler
            .run_health_checks(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        assert!(first.await.unwrap().is_ok());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_ticks_are_skipped() {
        let mut repository = MockRepository::new();
        repository
            .expect_get_enabled()
            .returning(|| Ok(services(1)));
        repository.expect_save_status_log().returning(|_| Ok(()));

        let checker = StubChecker::new(CheckResult::operational(5), Duration::from_millis(250));
        let config = SchedulerConfig {
            interval: Duration::from_millis(100),
            check_timeout: Duration::from_secs(5),
            cycle_timeout: Duration::from_secs(5),
            workers: 1,
        };
        let (scheduler, _events) = scheduler(repository, checker.clone(), config);

        let shutdown = CancellationToken::new();
        scheduler.start(&shutdown).unwrap();
        assert!(scheduler.start(&shutdown).is_err());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        scheduler.stop().await;

        assert_eq!(checker.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(checker.calls.load(Ordering::SeqCst) >= 2);
        assert!(scheduler.skipped_ticks() >= 2);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_event_carries_effective_status() {
        let mut service = Service::new("API", ServiceType::Http, "http://x/health");
        service.manual_override = Some(ManualStatusOverride {
            status: Status::Maintenance,
            reason: "migration".to_string(),
            set_by: "ops".to_string(),
            set_at: Utc::now(),
            expires_at: None,
        });

        let mut repository = MockRepository::new();
        repository
            .expect_get_enabled()
            .returning(move || Ok(vec![service.clone()]));
        repository
            .expect_save_status_log()
            .withf(|log| log.status == Status::Down)
            .returning(|_| Ok(()));

        let checker = StubChecker::new(CheckResult::unreachable("refused"), Duration::ZERO);
        let (scheduler, events) = scheduler(repository, checker, fast_config());

        scheduler
            .run_health_checks(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(events.events()[0].status, Status::Maintenance);
    }

    #[tokio::test]
    async fn test_webhook_with_bad_signature_leaves_no_trace() {
        let mut repository = MockRepository::new();
        repository.expect_save_status_log().times(0);

        let checker = StubChecker::new(CheckResult::operational(5), Duration::ZERO);
        let (scheduler, events) = scheduler(repository, checker, fast_config());

        let mut service = Service::new("hooks", ServiceType::Webhook, "");
        service.webhook_secret = Some("secret".to_string());
        let body = br#"{"status":"down"}"#;
        let payload = WebhookPayload {
            status: "down".to_string(),
            ..Default::default()
        };

        let err = scheduler
            .handle_webhook(&service, body, &webhook::sign("wrong", body), &payload)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::WebhookInvalidSignature));
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_accepted_is_persisted_and_published() {
        let mut repository = MockRepository::new();
        repository
            .expect_save_status_log()
            .withf(|log| log.service_name == "hooks" && log.status == Status::Degraded)
            .times(1)
            .returning(|_| Ok(()));

        let checker = StubChecker::new(CheckResult::operational(5), Duration::ZERO);
        let (scheduler, events) = scheduler(repository, checker, fast_config());

        let mut service = Service::new("hooks", ServiceType::Webhook, "");
        service.webhook_secret = Some("secret".to_string());
        let body = br#"{"status":"degraded","latency_ms":80}"#;
        let payload: WebhookPayload = serde_json::from_slice(body).unwrap();

        let log = scheduler
            .handle_webhook(&service, body, &webhook::sign("secret", body), &payload)
            .await
            .unwrap();

        assert_eq!(log.latency_ms, 80);
        assert_eq!(events.events().len(), 1);
        assert_eq!(events.events()[0].status, Status::Degraded);
    }

    #[tokio::test]
    async fn test_webhook_unknown_slug_is_not_found() {
        let mut repository = MockRepository::new();
        repository.expect_get_by_slug().returning(|_| Ok(None));

        let checker = StubChecker::new(CheckResult::operational(5), Duration::ZERO);
        let (scheduler, _events) = scheduler(repository, checker, fast_config());

        let err = scheduler
            .handle_webhook_by_slug("missing", b"{}", "00", &WebhookPayload::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_status_history_clamps_limit() {
        let mut repository = MockRepository::new();
        repository
            .expect_get_status_history()
            .withf(|name, limit| name == "API" && *limit == MAX_HISTORY_LIMIT)
            .times(1)
            .returning(|_, _| Ok(Vec::new()));
        repository
            .expect_get_status_history()
            .withf(|_, limit| *limit == 1)
            .times(1)
            .returning(|_, _| Ok(Vec::new()));

        let checker = StubChecker::new(CheckResult::operational(5), Duration::ZERO);
        let (scheduler, _events) = scheduler(repository, checker, fast_config());

        scheduler.status_history("API", 50_000).await.unwrap();
        scheduler.status_history("API", 0).await.unwrap();
    }

    /// Never answers the calls selected by its flags
    struct StalledRepository {
        stall_fetch: bool,
        stall_save: bool,
    }

    #[async_trait]
    impl Repository for StalledRepository {
        async fn get_enabled(&self) -> Result<Vec<Service>> {
            if self.stall_fetch {
                std::future::pending::<()>().await;
            }
            Ok(services(1))
        }

        async fn save_status_log(&self, _log: &StatusLog) -> Result<()> {
            if self.stall_save {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn get_latest_status(&self) -> Result<Vec<ServiceStatus>> {
            Ok(Vec::new())
        }

        async fn get_status_history(&self, _name: &str, _limit: usize) -> Result<Vec<StatusLog>> {
            Ok(Vec::new())
        }

        async fn get_by_slug(&self, _slug: &str) -> Result<Option<Service>> {
            Ok(None)
        }
    }

    fn stalled_scheduler(stall_fetch: bool, stall_save: bool) -> (Scheduler, Arc<EventLog>) {
        let events = Arc::new(EventLog::default());
        let mut subject = Subject::new();
        subject.attach(events.clone());

        let checker = StubChecker::new(CheckResult::operational(5), Duration::ZERO);
        let scheduler = Scheduler::new(
            Arc::new(StalledRepository {
                stall_fetch,
                stall_save,
            }),
            Arc::new(subject),
            Checkers::new(checker.clone(), checker.clone(), checker),
            fast_config(),
            None,
        );
        (scheduler, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_does_not_wait_on_stalled_fetch() {
        let (scheduler, _events) = stalled_scheduler(true, false);

        let shutdown = CancellationToken::new();
        scheduler.start(&shutdown).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);

        tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
            .await
            .expect("stop should return while the fetch is stalled");
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_save_counts_as_persist_failure() {
        let (scheduler, events) = stalled_scheduler(false, true);

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let report =
            tokio::time::timeout(Duration::from_secs(1), scheduler.run_health_checks(&token))
                .await
                .expect("cycle should end once cancelled")
                .unwrap();

        assert_eq!(report.checked, 1);
        assert_eq!(report.persist_failures, 1);
        assert_eq!(events.events().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_shutdown_token_cancelled() {
        let (scheduler, _events) = stalled_scheduler(false, false);

        let shutdown = CancellationToken::new();
        scheduler.start(&shutdown).unwrap();
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let restarted = CancellationToken::new();
        scheduler.start(&restarted).unwrap();
        assert!(scheduler.start(&restarted).is_err());
        scheduler.stop().await;
    }
}
