//! Status server wiring.

use crate::http_server::MetricsServer;
use crate::notifier::{AlertNotifier, AlertSink, LogSink, WebhookSink};
use crate::store::MemoryRepository;
use crate::types::ServerConfig;
use statuscheck::{
    AlertingObserver, Checkers, LoggingObserver, MetricsObserver, MetricsRegistry, Scheduler,
    Subject,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Status server
pub struct StatusServer {
    config: ServerConfig,
    repository: Arc<MemoryRepository>,
}

impl StatusServer {
    /// Create a server and register the configured services
    pub fn new(config: ServerConfig) -> common::Result<Self> {
        let repository = Arc::new(MemoryRepository::default());
        for service in &config.services {
            repository.register(service.clone())?;
        }

        Ok(Self { config, repository })
    }

    pub fn repository(&self) -> &Arc<MemoryRepository> {
        &self.repository
    }

    /// Run until ctrl-c
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let shutdown = CancellationToken::new();

        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received ctrl-c, shutting down"),
                Err(e) => warn!(error = %e, "Failed to listen for ctrl-c, shutting down"),
            }
            signal_token.cancel();
        });

        self.run_until(shutdown).await
    }

    /// Run until `shutdown` is cancelled, then stop the scheduler and flush alerts
    pub async fn run_until(
        self,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        info!(
            services = self.repository.len(),
            interval = ?self.config.scheduler.interval,
            workers = self.config.scheduler.workers,
            "Starting status server"
        );

        let metrics = Arc::new(MetricsRegistry::new());

        let (alerting, alert_rx) =
            AlertingObserver::new(self.config.alert_threshold, self.config.alert_capacity);

        let mut subject = Subject::new();
        subject.attach(Arc::new(LoggingObserver::new()));
        subject.attach(Arc::new(MetricsObserver::new(metrics.clone())));
        subject.attach(Arc::new(alerting.with_metrics(metrics.clone())));

        let sink: Arc<dyn AlertSink> = match self.config.sink_url {
            Some(ref url) => {
                info!(sink_url = %url, "Delivering alerts over HTTP");
                Arc::new(WebhookSink::new(url.clone(), self.config.sink_timeout)?)
            }
            None => {
                info!("No alert sink configured, alerts will be logged");
                Arc::new(LogSink)
            }
        };

        let scheduler = Scheduler::new(
            self.repository.clone(),
            Arc::new(subject),
            Checkers::with_defaults()?,
            self.config.scheduler.clone(),
            Some(metrics.clone()),
        );

        let tasks = TaskTracker::new();

        // The notifier outlives the scheduler so late alerts are still flushed
        let notifier_shutdown = CancellationToken::new();
        let notifier = AlertNotifier::new(
            alert_rx,
            sink,
            self.config.batch_delay,
            self.config.batch_size,
            Some(metrics.clone()),
        );
        let notifier_token = notifier_shutdown.clone();
        tasks.spawn(async move {
            notifier.run(notifier_token).await;
        });

        if self.config.metrics_enabled {
            let server = MetricsServer::new(metrics.clone(), self.config.metrics_listen_addr.clone());
            let server_token = shutdown.clone();
            tasks.spawn(async move {
                if let Err(e) = server.run(server_token).await {
                    warn!(error = %e, "Metrics server error");
                }
            });
        } else {
            info!("Metrics endpoint disabled");
        }

        scheduler.start(&shutdown)?;
        info!("All tasks spawned, server running");

        shutdown.cancelled().await;

        scheduler.stop().await;
        notifier_shutdown.cancel();

        tasks.close();
        tasks.wait().await;

        info!("Status server stopped");
        Ok(())
    }
}
