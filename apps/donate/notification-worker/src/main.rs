//! Notification Worker Service
//!
//! Binary entry point for the RabbitMQ notification worker.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    donate_notification_worker::run().await
}
