mod chain;
mod config;
mod digest;
mod errors;
mod eth;
mod metrics;
mod routes;
mod settings;
mod signer;
mod state;
mod verification;

use anyhow::{Context, Result};
use aws_config::Region;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::chain::rpc::JsonRpcClient;
use crate::config::Config;
use crate::metrics::PrometheusMetrics;
use crate::routes::build_router;
use crate::settings::{resolve_settings, ChainSettings, SecretSource, SecretsManagerSource};
use crate::signer::kms::KmsSigner;
use crate::signer::SigningIdentity;
use crate::state::AppState;
use crate::verification::orchestrator::{Verifier, VerifierPolicy};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume verifier v{}", env!("CARGO_PKG_VERSION"));

    // Shared AWS configuration for KMS and Secrets Manager
    let aws = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()))
        .load()
        .await;

    // Chain settings, resolved once for the life of the process
    let secret_source = config
        .chain_secret_id
        .as_ref()
        .map(|id| SecretsManagerSource::new(aws_sdk_secretsmanager::Client::new(&aws), id));
    let settings = resolve_settings(
        secret_source.as_ref().map(|s| s as &dyn SecretSource),
        ChainSettings::from_config(&config),
    )
    .await;

    // Chain client
    let chain = JsonRpcClient::new(
        settings.rpc_url.clone(),
        Duration::from_secs(config.rpc_timeout_secs),
        Duration::from_millis(config.confirmation_poll_ms),
        Duration::from_secs(config.confirmation_timeout_secs),
    )?;
    info!("Chain client initialized ({})", settings.rpc_url);

    // Remote signer; the address is resolved lazily and cached
    let kms = KmsSigner::new(aws_sdk_kms::Client::new(&aws), config.kms_key_id.clone());
    let signer = Arc::new(SigningIdentity::new(Arc::new(kms)));
    info!("Remote signer initialized (key {})", signer.key_ref());
    if let Err(e) = signer.resolve_address().await {
        warn!("Signer address not available yet: {e}");
    }

    let metrics = PrometheusMetrics::new().context("failed to create metrics registry")?;

    let verifier = Verifier::new(
        settings,
        Arc::new(chain),
        signer,
        Arc::new(metrics.clone()),
        VerifierPolicy::from_config(&config),
    );

    // Build app state
    let state = AppState {
        verifier: Arc::new(verifier),
        metrics,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
