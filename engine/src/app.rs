//! Application assembly and startup.
//!
//! [`assemble`] wires stores, provider clients and services into an
//! [`AppState`]; [`run`] does the same against `PostgreSQL` and serves HTTP
//! until Ctrl+C or SIGTERM.

use crate::config::Config;
use crate::metrics::register_business_metrics;
use crate::notifier::{Notifier, TracingNotifier};
use crate::providers::book::LocalBook;
use crate::providers::paypal::PayPalProvider;
use crate::providers::paypal_api::{HttpPayPalApi, PayPalApi};
use crate::providers::stripe::StripeProvider;
use crate::providers::stripe_api::{HttpStripeApi, StripeApi};
use crate::providers::ProviderRegistry;
use crate::server::{build_router, AppState};
use crate::stores::Stores;
use crate::transfer::TransferService;
use crate::webhook::WebhookPipeline;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use slotledger_core::environment::{Clock, SystemClock};
use slotledger_core::ledger::CapacityPolicy;
use slotledger_core::store::StoreError;
use slotledger_postgres::PostgresStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors that abort startup or serving.
#[derive(Error, Debug)]
pub enum StartupError {
    /// Database pool could not be created.
    #[error("Failed to connect to PostgreSQL: {0}")]
    Database(#[from] sqlx::Error),

    /// Migrations failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Prometheus recorder could not be installed.
    #[error("Failed to install metrics recorder: {0}")]
    Metrics(String),

    /// Provider HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Listener or server I/O failure.
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Provider REST clients.
#[derive(Clone)]
pub struct ProviderApis {
    /// `PayPal` REST client.
    pub paypal: Arc<dyn PayPalApi>,
    /// Stripe REST client.
    pub stripe: Arc<dyn StripeApi>,
}

impl ProviderApis {
    /// HTTP clients using the configured endpoints.
    #[must_use]
    pub fn http(client: &reqwest::Client, config: &Config) -> Self {
        Self {
            paypal: Arc::new(HttpPayPalApi::new(
                client.clone(),
                config.providers.paypal_live_base_url.clone(),
                config.providers.paypal_sandbox_base_url.clone(),
            )),
            stripe: Arc::new(HttpStripeApi::new(
                client.clone(),
                config.providers.stripe_base_url.clone(),
            )),
        }
    }
}

/// Builds the services and the shared state over the given backends.
///
/// Provider sales are always recorded blind; manual entries and transfers
/// follow [`LedgerConfig::operator_policy`](crate::config::LedgerConfig::operator_policy).
#[must_use]
pub fn assemble(
    stores: Stores,
    apis: ProviderApis,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: &Config,
    metrics: Option<PrometheusHandle>,
) -> AppState {
    let operator_policy: CapacityPolicy = config.ledger.operator_policy();
    let book = || {
        LocalBook::new(
            stores.orders.clone(),
            TransferService::new(stores.orders.clone(), clock.clone(), operator_policy),
            clock.clone(),
            operator_policy,
        )
    };

    let providers = ProviderRegistry::new(
        Arc::new(PayPalProvider::new(apis.paypal, book())),
        Arc::new(StripeProvider::new(
            apis.stripe,
            book(),
            config.providers.stripe_signature_tolerance_secs,
        )),
    );

    let pipeline = Arc::new(WebhookPipeline::new(
        stores.merchants.clone(),
        stores.events.clone(),
        stores.orders.clone(),
        providers.clone(),
        notifier,
        clock,
    ));

    AppState::new(
        stores,
        providers,
        pipeline,
        metrics,
        config.server.admin_token.clone(),
    )
}

/// Connects, migrates and serves until shutdown.
///
/// # Errors
///
/// Any [`StartupError`] raised while connecting, migrating or binding.
pub async fn run(config: Config) -> Result<(), StartupError> {
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| StartupError::Metrics(e.to_string()))?;
    register_business_metrics();

    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .idle_timeout(Some(Duration::from_secs(config.postgres.idle_timeout)))
        .connect(&config.postgres.url)
        .await?;
    info!("PostgreSQL connected");

    let store = Arc::new(PostgresStore::new(pool, config.ledger.default_capacity));
    store.migrate().await?;
    info!("Migrations complete");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.providers.timeout_secs))
        .build()?;

    let state = assemble(
        Stores::from_shared(store),
        ProviderApis::http(&client, &config),
        Arc::new(TracingNotifier),
        Arc::new(SystemClock),
        &config,
        Some(prometheus),
    );

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        address = %address,
        enforce_floor = config.ledger.enforce_floor,
        default_capacity = config.ledger.default_capacity,
        "HTTP server listening"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
