//! Donations API entry point.
//!
//! Serves the campaign, donation, volunteer and contact REST API, accepts
//! payment-provider callbacks and feeds them to the ledger reconciler, and
//! runs the background notifier that sends outbound email.

mod api;
mod config;
mod db;
mod errors;
mod ledger;
mod models;
mod money;
mod notifier;
mod providers;

#[cfg(test)]
mod test_api;

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use ledger::Ledger;
use notifier::{NotificationQueue, NotifierState};
use providers::{PayPalClient, PaymentGateways, StripeClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url, config.database_busy_timeout).await?;

    // HTTP client shared by the payment providers and the email transport.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let shutdown = CancellationToken::new();

    // ─── Background notifier ──────────────────────────────
    let (queue, rx) = NotificationQueue::new(config.email.queue_capacity);
    let notifier_state = Arc::new(NotifierState {
        pool: pool.clone(),
        transport: notifier::transport_from_config(client.clone(), &config.email),
        from: config.email.from.clone(),
        timeout: config.email.timeout,
    });
    let notifier_task = tokio::spawn(notifier::run(notifier_state, rx, shutdown.clone()));

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        pool: pool.clone(),
        ledger: Ledger::new(pool, queue.clone()),
        notifications: queue,
        gateways: PaymentGateways {
            stripe: Arc::new(StripeClient::new(client.clone(), &config.stripe)),
            paypal: Arc::new(PayPalClient::new(client, &config.paypal)),
        },
        settings: api::ApiSettings {
            public_base_url: config.public_base_url.clone(),
            frontend_url: config.frontend_url.clone(),
            currency: config.currency.clone(),
            admin_token: config.admin_token.clone(),
        },
    });
    let app = api::router(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    notifier_task.await?;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
        _ = token.cancelled() => {}
    }
}
