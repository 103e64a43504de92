//! TOML-backed server configuration, with CLI overrides layered on top in
//! `main.rs`. Every section has a `Default` so a missing config file (or a
//! config file that only sets a few fields) still produces a usable server.

use serde::{Deserialize, Serialize};

/// Top-level configuration, deserialized from the TOML file named by
/// `--config` (defaults to `keystone.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeystoneConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// Bind address and shutdown behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

/// Which `StateStore` backend to construct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSection {
    /// `"memory"` or `"redis"`.
    pub backend: String,
    pub redis_url: String,
    pub redis_prefix: String,
    pub redis_pool_size: usize,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
            redis_url: "redis://127.0.0.1:6379".into(),
            redis_prefix: "keystone".into(),
            redis_pool_size: 10,
        }
    }
}

/// Postgres connection settings for the [`keystone_store::GatewayStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub url: String,
    pub pool_size: u32,
    pub schema: String,
    pub table_prefix: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/keystone".into(),
            pool_size: 10,
            schema: "public".into(),
            table_prefix: "keystone_".into(),
        }
    }
}

/// Operator-configured defaults threaded through
/// [`keystone_gateway::PipelineBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Default requests-per-minute ceiling applied to a key with no
    /// explicit rate limits of its own. `0` means unlimited.
    pub default_requests_per_minute: u32,
    /// Default tokens-per-minute ceiling. `0` means unlimited.
    pub default_tokens_per_minute: u32,
    /// Default max-parallel-requests ceiling. `0` means unlimited.
    pub default_max_parallel_requests: u32,
    /// Tenant-scope requests-per-minute ceiling. `0` means unlimited.
    pub default_tenant_requests_per_minute: u32,
    /// Default monthly budget ceiling in whole US cents for a tenant with
    /// no [`keystone_core::BudgetPolicy`] on file. `0` means unlimited.
    pub default_budget_limit_cents: i64,
    /// Background health-prober interval, in seconds.
    pub health_interval_seconds: u64,
    pub health_degraded_after: u32,
    pub health_offline_after: u32,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            default_requests_per_minute: 0,
            default_tokens_per_minute: 0,
            default_max_parallel_requests: 0,
            default_tenant_requests_per_minute: 0,
            default_budget_limit_cents: 0,
            health_interval_seconds: 60,
            health_degraded_after: 3,
            health_offline_after: 8,
        }
    }
}

/// Logging configuration. OpenTelemetry export is out of scope; this only
/// controls the `tracing-subscriber` filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    /// `RUST_LOG`-style env filter, used when the `RUST_LOG` env var itself
    /// is unset.
    pub log_filter: String,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self { log_filter: "info".into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_produces_defaults() {
        let config: KeystoneConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.state.backend, "memory");
        assert_eq!(config.gateway.health_interval_seconds, 60);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: KeystoneConfig = toml::from_str("[server]\nport = 9000\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
