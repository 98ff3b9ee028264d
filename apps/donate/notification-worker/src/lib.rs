//! Notification Worker Service
//!
//! Consumes notification events from RabbitMQ and delivers them.
//!
//! ## Architecture
//!
//! ```text
//! notifications (topic) ──► email.verification_queue ──► VerificationEmailProcessor
//!        ▲                          │ failure                     │
//!        │ TTL 10s                  ▼                             ▼
//!  email_verification_retry_queue ◄─┘                     SmtpProvider
//!                                   │ retries exhausted
//!                                   ▼
//!                     dlx.notifications ──► email_verification_dlq
//!
//! donation_events (fanout) ──► email_requests ──► ReceiptEmailProcessor
//!                          └─► sms_receipts   ──► SmsReceiptProcessor
//! ```
//!
//! One consumer per queue runs until SIGINT/SIGTERM. The health server exposes
//! liveness, readiness (broker connected), the declared topology and
//! Prometheus metrics.

pub mod config;

use axum::Router;
use config::WorkerSettings;
use core_config::amqp::AmqpConfig;
use core_config::server::HealthServerConfig;
use core_config::{app_info, Environment, FromEnv};
use domain_notifications::{
    notification_topology, DonationReceipt, EmailProvider, EmailReceiptQueue,
    EmailVerificationQueue, NotificationConfig, ReceiptEmailProcessor, SmsReceiptProcessor,
    SmsReceiptQueue, SmtpConfig, SmtpProvider, TemplateEngine, TemplateRenderer,
    VerificationEmail, VerificationEmailProcessor,
};
use eyre::{Result, WrapErr};
use queue_worker::backoff::RetryConfig;
use queue_worker::{
    health_router, AmqpBroker, HealthState, MessageBroker, QueueDef, QueueWorker, WorkerConfig,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Serve health, readiness, topology and metrics until shutdown.
async fn start_health_server(
    state: HealthState,
    config: HealthServerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app: Router = health_router(state).layer(TraceLayer::new_for_http());

    let addr = config.address();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(address = %addr, "Health server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the notification worker
///
/// 1. Sets up color-eyre, structured logging and Prometheus metrics
/// 2. Connects to RabbitMQ with retry and declares the notification topology
/// 3. Starts one consumer per queue plus the health server
/// 4. Stops everything on SIGINT/SIGTERM and closes the connection
///
/// # Errors
///
/// Returns an error if configuration is invalid, the broker cannot be
/// reached or the topology cannot be declared, or a consumer stops with a
/// fatal error.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    queue_worker::metrics::init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    let app_info = app_info!();
    info!(
        name = %app_info.name,
        version = %app_info.version,
        environment = ?environment,
        "Starting notification worker"
    );

    // Configuration
    let amqp_config = AmqpConfig::from_env().wrap_err("Invalid RabbitMQ configuration")?;
    let health_config = HealthServerConfig::from_env().wrap_err("Invalid health server configuration")?;
    let notification_config =
        NotificationConfig::from_env().wrap_err("Invalid notification configuration")?;
    let smtp_config = SmtpConfig::from_env().wrap_err("Invalid SMTP configuration")?;
    let settings = WorkerSettings::from_env().wrap_err("Invalid worker configuration")?;

    info!(
        attempt_timeout = ?settings.attempt_timeout,
        prefetch = settings.prefetch,
        failure_policy = %settings.failure_policy,
        "Worker settings loaded"
    );

    // Broker
    let retry = RetryConfig::new().with_max_retries(amqp_config.connect_retries);
    let broker: Arc<dyn MessageBroker> = Arc::new(
        AmqpBroker::connect_with_retry(&amqp_config.url, retry)
            .await
            .wrap_err("Failed to connect to RabbitMQ")?,
    );

    let topology = notification_topology();
    broker
        .declare(&topology)
        .await
        .wrap_err("Failed to declare notification topology")?;
    info!(
        exchanges = topology.exchanges.len(),
        queues = topology.queues.len(),
        "Notification topology declared"
    );

    // Delivery
    let provider: Arc<dyn EmailProvider> = Arc::new(
        SmtpProvider::new(smtp_config).wrap_err("Failed to create SMTP provider")?,
    );
    let templates: Arc<dyn TemplateRenderer> =
        Arc::new(TemplateEngine::new().wrap_err("Failed to initialize template engine")?);

    let verification = QueueWorker::<VerificationEmail, _>::new(
        Arc::clone(&broker),
        VerificationEmailProcessor::new(
            Arc::clone(&provider),
            Arc::clone(&templates),
            notification_config.clone(),
        ),
        settings.apply(WorkerConfig::from_queue_def::<EmailVerificationQueue>()),
    );
    let receipts = QueueWorker::<DonationReceipt, _>::new(
        Arc::clone(&broker),
        ReceiptEmailProcessor::new(
            Arc::clone(&provider),
            Arc::clone(&templates),
            notification_config.clone(),
        ),
        settings.apply(WorkerConfig::from_queue_def::<EmailReceiptQueue>()),
    );
    let sms = QueueWorker::<DonationReceipt, _>::new(
        Arc::clone(&broker),
        SmsReceiptProcessor::new(notification_config.brand_name.clone()),
        settings.apply(WorkerConfig::from_queue_def::<SmsReceiptQueue>()),
    );

    // Shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState::new(
        Arc::clone(&broker),
        app_info.name,
        app_info.version,
        topology,
    );
    let health_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_config, health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    info!(
        queues = ?[
            EmailVerificationQueue::QUEUE,
            EmailReceiptQueue::QUEUE,
            SmsReceiptQueue::QUEUE,
        ],
        "Consumers starting"
    );

    let result = tokio::try_join!(
        verification.run(shutdown_rx.clone()),
        receipts.run(shutdown_rx.clone()),
        sms.run(shutdown_rx),
    );

    if let Err(e) = broker.close().await {
        warn!(error = %e, "Failed to close broker connection cleanly");
    }

    result.wrap_err("Consumer stopped with an error")?;
    info!("Notification worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
