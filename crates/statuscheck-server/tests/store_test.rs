//! Integration tests for the in-memory repository driven by the scheduler

use chrono::Utc;
use statuscheck::{
    AlertingObserver, Checkers, HealthCheckEvent, ManualStatusOverride, MetricsObserver,
    MetricsRegistry, Observer, Repository, Scheduler, SchedulerConfig, Service, ServiceType,
    Status, Subject, webhook,
};
use statuscheck_server::MemoryRepository;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<HealthCheckEvent>>,
}

impl Observer for Recorder {
    fn notify(&self, event: &HealthCheckEvent) -> common::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recorder"
    }
}

fn scheduler(
    repository: Arc<MemoryRepository>,
    recorder: Arc<Recorder>,
    alerting: AlertingObserver,
) -> Scheduler {
    let metrics = Arc::new(MetricsRegistry::new());
    let mut subject = Subject::new();
    subject.attach(recorder);
    subject.attach(Arc::new(MetricsObserver::new(metrics.clone())));
    subject.attach(Arc::new(alerting));

    Scheduler::new(
        repository,
        Arc::new(subject),
        Checkers::with_defaults().unwrap(),
        SchedulerConfig {
            check_timeout: Duration::from_millis(500),
            cycle_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        Some(metrics),
    )
}

#[tokio::test]
async fn test_http_check_is_stored_and_published() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;

    let repository = Arc::new(MemoryRepository::default());
    repository
        .register(Service::new(
            "API",
            ServiceType::Http,
            format!("{}/health", server.uri()),
        ))
        .unwrap();

    let recorder = Arc::new(Recorder::default());
    let (alerting, mut alert_rx) = AlertingObserver::new(Duration::from_secs(1), 10);
    let scheduler = scheduler(repository.clone(), recorder.clone(), alerting);

    let report = scheduler
        .run_health_checks(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.operational, 1);

    let history = repository.get_status_history("API", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    let log = &history[0];
    assert_eq!(log.status, Status::Operational);
    assert_eq!(log.status_code, 200);
    assert!(log.latency_ms >= 50);

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, log.status);
    assert_eq!(events[0].latency_ms, log.latency_ms);
    assert_eq!(events[0].status_code, log.status_code);
    assert_eq!(events[0].timestamp, log.timestamp);

    assert!(alert_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_alert_carries_override_until_cleared() {
    let repository = Arc::new(MemoryRepository::default());
    repository
        .register(Service::new("Closed", ServiceType::Tcp, "127.0.0.1:1"))
        .unwrap();
    repository
        .set_override(
            "closed",
            ManualStatusOverride {
                status: Status::Maintenance,
                reason: "decommissioning".to_string(),
                set_by: "ops".to_string(),
                set_at: Utc::now(),
                expires_at: None,
            },
        )
        .unwrap();

    let recorder = Arc::new(Recorder::default());
    let (alerting, mut alert_rx) = AlertingObserver::new(Duration::from_secs(1), 10);
    let scheduler = scheduler(repository.clone(), recorder.clone(), alerting);
    let token = CancellationToken::new();

    scheduler.run_health_checks(&token).await.unwrap();

    // Stored as observed, published and alerted as overridden
    let latest = repository.get_status_history("Closed", 1).await.unwrap();
    assert_eq!(latest[0].status, Status::Down);
    assert_eq!(recorder.events.lock().unwrap()[0].status, Status::Maintenance);
    assert_eq!(alert_rx.try_recv().unwrap().status, Status::Maintenance);
    assert!(alert_rx.try_recv().is_err());

    repository.clear_override("closed").unwrap();
    scheduler.run_health_checks(&token).await.unwrap();

    let alert = alert_rx.try_recv().unwrap();
    assert_eq!(alert.status, Status::Down);
}

#[tokio::test]
async fn test_webhook_update_is_stored() {
    let repository = Arc::new(MemoryRepository::default());
    let mut hook = Service::new("Nightly Batch", ServiceType::Webhook, "");
    hook.webhook_secret = Some("s3cret".to_string());
    repository.register(hook).unwrap();

    let recorder = Arc::new(Recorder::default());
    let (alerting, _alert_rx) = AlertingObserver::new(Duration::from_secs(1), 10);
    let scheduler = scheduler(repository.clone(), recorder.clone(), alerting);

    let body = br#"{"status":"operational","latency_ms":1200}"#;
    let payload = serde_json::from_slice(body).unwrap();
    scheduler
        .handle_webhook_by_slug("nightly-batch", body, &webhook::sign("s3cret", body), &payload)
        .await
        .unwrap();

    let statuses = scheduler.latest_statuses(Utc::now()).await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].effective, Some(Status::Operational));
    assert_eq!(
        statuses[0].status.latest.as_ref().map(|l| l.latency_ms),
        Some(1200)
    );
}
