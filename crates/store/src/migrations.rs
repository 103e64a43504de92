use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Run database migrations, creating required tables if they do not exist.
///
/// Uses raw `CREATE TABLE IF NOT EXISTS` DDL in the configured schema with
/// the configured table prefix, rather than a migration-framework DSL.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let tenants = config.tenants_table();
    let api_keys = config.api_keys_table();
    let catalog_routes = config.catalog_routes_table();
    let budget_windows = config.budget_windows_table();
    let request_log = config.request_log_table();
    let usage_log = config.usage_log_table();
    let guardrail_events = config.guardrail_events_table();
    let idempotency_cache = config.idempotency_cache_table();

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {tenants} (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            budget_policy JSONB,
            guardrail_policy JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {api_keys} (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES {tenants}(id),
            prefix TEXT NOT NULL UNIQUE,
            secret_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            rate_limits JSONB NOT NULL DEFAULT '{{}}',
            allowed_models JSONB,
            guardrail_policy JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            revoked_at TIMESTAMPTZ
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {catalog_routes} (
            id BIGSERIAL PRIMARY KEY,
            model TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            upstream_model TEXT NOT NULL,
            capabilities JSONB NOT NULL DEFAULT '[]',
            weight INTEGER NOT NULL DEFAULT 1,
            input_price_micros_per_million BIGINT NOT NULL,
            output_price_micros_per_million BIGINT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{}_model \
         ON {catalog_routes} (model)",
        config.table_prefix.trim_end_matches('_'),
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {budget_windows} (
            tenant_id TEXT NOT NULL REFERENCES {tenants}(id),
            window_label TEXT NOT NULL,
            window_start TIMESTAMPTZ NOT NULL,
            used_micros BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (tenant_id, window_label, window_start)
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {request_log} (
            id UUID PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            api_key_id TEXT NOT NULL,
            model TEXT,
            endpoint TEXT NOT NULL,
            outcome TEXT NOT NULL,
            status_code INTEGER NOT NULL,
            latency_ms BIGINT NOT NULL,
            idempotency_key TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {usage_log} (
            id UUID PRIMARY KEY,
            request_id UUID NOT NULL REFERENCES {request_log}(id),
            tenant_id TEXT NOT NULL,
            api_key_id TEXT NOT NULL,
            model TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            prompt_tokens BIGINT NOT NULL,
            completion_tokens BIGINT NOT NULL,
            cost_micros BIGINT NOT NULL,
            cost_cents BIGINT NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {guardrail_events} (
            id UUID PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            api_key_id TEXT NOT NULL,
            request_id UUID NOT NULL,
            stage TEXT NOT NULL,
            verdict TEXT NOT NULL,
            matched_rule TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {idempotency_cache} (
            tenant_id TEXT NOT NULL,
            idempotency_key TEXT NOT NULL,
            request_id UUID NOT NULL,
            outcome TEXT NOT NULL,
            status_code INTEGER NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (tenant_id, idempotency_key)
        )"
    ))
    .execute(pool)
    .await?;

    Ok(())
}
