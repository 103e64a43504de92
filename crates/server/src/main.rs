use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use keystone_core::{BudgetWindow, MicroUsd, ProviderId, RateLimits};
use keystone_crypto::{ExposeSecret, MasterKey, decrypt_value, is_encrypted, parse_master_key};
use keystone_gateway::PipelineBuilder;
use keystone_provider::EchoProvider;
use keystone_server::config::KeystoneConfig;
use keystone_state::StateStore;
use keystone_state_memory::MemoryStateStore;
use keystone_store::PostgresGatewayStore;
use tracing::info;

/// Keystone inference gateway HTTP server.
#[derive(Parser, Debug)]
#[command(name = "keystone-server", about = "Standalone HTTP server for the Keystone inference gateway")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "keystone.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration from TOML file, or use defaults if the file does not exist.
    let config: KeystoneConfig = if Path::new(&cli.config).exists() {
        let contents = std::fs::read_to_string(&cli.config)?;
        toml::from_str(&contents)?
    } else {
        toml::from_str("")?
    };

    keystone_server::telemetry::init(&config.telemetry);

    // Connection strings may be given as `ENC[...]` in the config file; the
    // master key to decrypt them is never itself stored on disk.
    let master_key = std::env::var("KEYSTONE_AUTH_KEY").ok();
    let master_key = master_key.as_deref().map(parse_master_key).transpose()?;

    let state: Arc<dyn StateStore> = match config.state.backend.as_str() {
        "redis" => {
            #[cfg(feature = "redis")]
            {
                let redis_url = require_decrypt(&config.state.redis_url, master_key.as_ref())?;
                let redis_config = keystone_state_redis::RedisConfig {
                    url: redis_url,
                    prefix: config.state.redis_prefix.clone(),
                    pool_size: config.state.redis_pool_size,
                    ..keystone_state_redis::RedisConfig::default()
                };
                Arc::new(keystone_state_redis::RedisStateStore::new(&redis_config)?)
            }
            #[cfg(not(feature = "redis"))]
            {
                return Err("redis state backend requested but this binary was built without the `redis` feature".into());
            }
        }
        other => {
            if other != "memory" {
                info!(backend = other, "unrecognized state backend, falling back to in-memory");
            }
            Arc::new(MemoryStateStore::new())
        }
    };

    let store_config = keystone_store::PostgresConfig {
        url: require_decrypt(&config.store.url, master_key.as_ref())?,
        pool_size: config.store.pool_size,
        schema: config.store.schema.clone(),
        table_prefix: config.store.table_prefix.clone(),
    };
    let store = Arc::new(PostgresGatewayStore::new(store_config).await?);

    let rate_limits = |requests_per_minute: u32, tokens_per_minute: u32, max_parallel_requests: u32| RateLimits {
        requests_per_minute: (requests_per_minute > 0).then_some(requests_per_minute),
        tokens_per_minute: (tokens_per_minute > 0).then_some(tokens_per_minute),
        max_parallel_requests: (max_parallel_requests > 0).then_some(max_parallel_requests),
    };

    let pipeline = PipelineBuilder::new()
        .store(store)
        .state(state)
        // Real provider adapters are external collaborators; the echo
        // provider keeps a freshly bootstrapped gateway usable out of the box.
        .provider(ProviderId::new("echo"), Arc::new(EchoProvider::new("echo")))
        .default_rate_limits(rate_limits(
            config.gateway.default_requests_per_minute,
            config.gateway.default_tokens_per_minute,
            config.gateway.default_max_parallel_requests,
        ))
        .default_tenant_rate_limits(rate_limits(config.gateway.default_tenant_requests_per_minute, 0, 0))
        .default_budget(BudgetWindow::CalendarMonth, MicroUsd::from_micros(config.gateway.default_budget_limit_cents * 10_000))
        .build()?;

    let pipeline = Arc::new(pipeline);
    let app = keystone_server::api::router(Arc::clone(&pipeline));

    let host = cli.host.unwrap_or(config.server.host);
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "keystone-server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("keystone-server shut down");
    Ok(())
}

/// Decrypt a config value, requiring `KEYSTONE_AUTH_KEY` if the value is
/// encrypted.
///
/// - `ENC[...]` values are decrypted using the master key (error if the key
///   is missing).
/// - Plain values are returned as-is regardless of whether a key is
///   available.
fn require_decrypt(value: &str, master_key: Option<&MasterKey>) -> Result<String, Box<dyn std::error::Error>> {
    if is_encrypted(value) {
        let key = master_key.ok_or("KEYSTONE_AUTH_KEY environment variable is required to decrypt ENC[...] config values")?;
        Ok(decrypt_value(value, key)?.expose_secret().to_string())
    } else {
        Ok(value.to_owned())
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
