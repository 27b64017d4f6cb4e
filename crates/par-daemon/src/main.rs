// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use par_daemon::{build_app, AppState};
use par_orchestrator::Registry;
use par_receipt::InMemoryReplayStore;
use par_status_client::StatusListClient;
use par_store::{ConfigKeyProvider, DevKeyProvider, InMemoryAuthenticator, KeyProvider, MemoryStore, StubIssuerDirectory};
use par_telemetry::RegistryTelemetry;
use rand::RngCore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "par-daemon", version, about = "Proof-Asset Registry control plane")]
struct Args {
    /// Address the HTTP API binds to. Overrides the config file's `bind_addr`.
    #[arg(long)]
    bind: Option<String>,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("par=debug,par_daemon=debug,par_orchestrator=debug")
    } else {
        EnvFilter::new("par=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = par_config::load_config(args.config.as_deref()).context("load configuration")?;
    if let Some(bind) = &args.bind {
        config.bind_addr = bind.clone();
    }
    let warnings = par_config::validate_config(&config).context("validate configuration")?;
    for warning in &warnings {
        tracing::warn!(%warning, "configuration warning");
    }

    let key_provider: Arc<dyn KeyProvider> = match (&config.receipt.verifier_private_jwk, &config.receipt.verifier_public_jwk) {
        (Some(private), Some(public)) => {
            Arc::new(ConfigKeyProvider::from_jwk(private, public, "par-registry-1".to_string()).context("load receipt signing key")?)
        }
        _ => {
            tracing::warn!("no receipt signing key configured, generating an ephemeral development key");
            Arc::new(DevKeyProvider::generate().context("generate development signing key")?)
        }
    };

    let registry = Arc::new(Registry::new(
        Arc::new(MemoryStore::new()),
        Arc::new(seed_dev_authenticator()),
        Arc::new(StubIssuerDirectory::new()),
        key_provider,
        Arc::new(StatusListClient::new()),
        Arc::new(InMemoryReplayStore::new()),
        Arc::new(RegistryTelemetry::new()),
        config.clone(),
    ));

    let state = Arc::new(AppState { registry, started_at: Instant::now() });
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    info!(bind_addr = %config.bind_addr, env = ?config.env, "par-daemon listening");

    axum::serve(listener, app).await.context("serve")
}

/// Builds an [`InMemoryAuthenticator`] seeded with a single development API
/// key carrying every scope. The bearer token is read from `PAR_DEV_API_KEY`
/// if set, otherwise a random one is generated and logged at `warn` so a
/// local operator can find it.
fn seed_dev_authenticator() -> InMemoryAuthenticator {
    let mut authenticator = InMemoryAuthenticator::new();
    let token = std::env::var("PAR_DEV_API_KEY").unwrap_or_else(|_| {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        use base64::Engine;
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        warn!(%token, "PAR_DEV_API_KEY not set, generated an ephemeral development API key");
        token
    });
    authenticator.register_key(
        &token,
        Uuid::new_v4(),
        Uuid::new_v4(),
        "register_asset,verify_asset,update_status,read_audit",
        None,
        None,
    );
    authenticator
}
