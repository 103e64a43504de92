use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use keystone_core::{
    ApiKey, BudgetPolicy, BudgetStatus, BudgetWindow, Capability, Catalog, GuardrailEvent,
    GuardrailPolicy, MicroUsd, RateLimits, RequestRecord, Route, Tenant, TenantId, UsageRecord,
};

use crate::config::PostgresConfig;
use crate::error::StoreError;
use crate::migrations;
use crate::repository::{GatewayStore, IdempotencyRecord};

/// Postgres-backed implementation of [`GatewayStore`].
pub struct PostgresGatewayStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresGatewayStore {
    /// Connect to Postgres, build the connection pool, and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if pool creation fails, or
    /// [`StoreError::Migration`] if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        tracing::debug!(url = %config.url, "connecting to postgres store");
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        tracing::info!(schema = %config.schema, "gateway store migrations applied");

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    /// Build from an already-connected pool, running migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Migration`] if migrations fail.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StoreError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    /// Sum recorded cost for `tenant_id` over `[start, end)`, used for
    /// window kinds whose boundaries slide on every call rather than
    /// landing on a fixed bucket.
    async fn sum_usage_between(
        &self,
        tenant_id: &TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MicroUsd, StoreError> {
        let usage_log = self.config.usage_log_table();
        let query = format!(
            "SELECT COALESCE(SUM(cost_micros), 0) AS total FROM {usage_log} \
             WHERE tenant_id = $1 AND recorded_at >= $2 AND recorded_at < $3"
        );
        let row = sqlx::query(&query)
            .bind(tenant_id.as_str())
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .await?;
        Ok(MicroUsd(row.get::<i64, _>("total")))
    }
}

#[async_trait]
impl GatewayStore for PostgresGatewayStore {
    async fn find_tenant(&self, id: &TenantId) -> Result<Option<Tenant>, StoreError> {
        let table = self.config.tenants_table();
        let query = format!(
            "SELECT id, display_name, enabled, created_at FROM {table} WHERE id = $1"
        );
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Tenant {
            id: TenantId::new(r.get::<String, _>("id")),
            display_name: r.get("display_name"),
            enabled: r.get("enabled"),
            created_at: r.get("created_at"),
        }))
    }

    async fn find_budget_policy(&self, id: &TenantId) -> Result<Option<BudgetPolicy>, StoreError> {
        let table = self.config.tenants_table();
        let query = format!("SELECT budget_policy FROM {table} WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let policy: Option<Json<BudgetPolicy>> = row.try_get("budget_policy")?;
        Ok(policy.map(|Json(p)| p))
    }

    async fn tenant_guardrail_policy(&self, id: &TenantId) -> Result<GuardrailPolicy, StoreError> {
        let table = self.config.tenants_table();
        let query = format!("SELECT guardrail_policy FROM {table} WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(GuardrailPolicy::default());
        };
        let policy: Option<Json<GuardrailPolicy>> = row.try_get("guardrail_policy")?;
        Ok(policy.map_or_else(GuardrailPolicy::default, |Json(p)| p))
    }

    async fn api_key_guardrail_policy(
        &self,
        id: &keystone_core::ApiKeyId,
    ) -> Result<GuardrailPolicy, StoreError> {
        let table = self.config.api_keys_table();
        let query = format!("SELECT guardrail_policy FROM {table} WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(GuardrailPolicy::default());
        };
        let policy: Option<Json<GuardrailPolicy>> = row.try_get("guardrail_policy")?;
        Ok(policy.map_or_else(GuardrailPolicy::default, |Json(p)| p))
    }

    async fn find_api_key_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, StoreError> {
        let table = self.config.api_keys_table();
        let query = format!(
            "SELECT id, tenant_id, prefix, secret_hash, salt, enabled, rate_limits, \
             allowed_models, created_at, revoked_at FROM {table} WHERE prefix = $1"
        );
        let row = sqlx::query(&query)
            .bind(prefix)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let rate_limits: Json<RateLimits> = row.try_get("rate_limits")?;
        let allowed_models: Option<Json<Vec<String>>> = row.try_get("allowed_models")?;

        Ok(Some(ApiKey {
            id: keystone_core::ApiKeyId::new(row.get::<String, _>("id")),
            tenant_id: TenantId::new(row.get::<String, _>("tenant_id")),
            prefix: row.get("prefix"),
            secret_hash: row.get("secret_hash"),
            salt: row.get("salt"),
            enabled: row.get("enabled"),
            rate_limits: rate_limits.0,
            allowed_models: allowed_models.map(|Json(v)| v),
            created_at: row.get("created_at"),
            revoked_at: row.get("revoked_at"),
        }))
    }

    async fn load_catalog(&self) -> Result<Catalog, StoreError> {
        let table = self.config.catalog_routes_table();
        let query = format!(
            "SELECT model, provider_id, upstream_model, capabilities, weight, \
             input_price_micros_per_million, output_price_micros_per_million, enabled FROM {table}"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut routes = Vec::with_capacity(rows.len());
        for row in rows {
            let capabilities: Json<Vec<Capability>> = row.try_get("capabilities")?;
            routes.push(Route {
                model: keystone_core::ModelId::new(row.get::<String, _>("model")),
                provider_id: keystone_core::ProviderId::new(row.get::<String, _>("provider_id")),
                upstream_model: row.get("upstream_model"),
                capabilities: capabilities.0,
                weight: u32::try_from(row.get::<i32, _>("weight")).unwrap_or(1),
                input_price_micros_per_million: row.get("input_price_micros_per_million"),
                output_price_micros_per_million: row.get("output_price_micros_per_million"),
                enabled: row.get("enabled"),
            });
        }
        Ok(Catalog { routes })
    }

    async fn record_guardrail_event(&self, event: &GuardrailEvent) -> Result<(), StoreError> {
        let table = self.config.guardrail_events_table();
        let query = format!(
            "INSERT INTO {table} \
             (id, tenant_id, api_key_id, request_id, stage, verdict, matched_rule, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        sqlx::query(&query)
            .bind(event.id)
            .bind(event.tenant_id.as_str())
            .bind(event.api_key_id.as_str())
            .bind(event.request_id)
            .bind(serde_json::to_string(&event.stage)?.trim_matches('"'))
            .bind(serde_json::to_string(&event.verdict)?.trim_matches('"'))
            .bind(&event.matched_rule)
            .bind(event.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_idempotent_response(
        &self,
        tenant_id: &TenantId,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let table = self.config.idempotency_cache_table();
        let query = format!(
            "SELECT request_id, outcome, status_code, created_at FROM {table} \
             WHERE tenant_id = $1 AND idempotency_key = $2"
        );
        let row = sqlx::query(&query)
            .bind(tenant_id.as_str())
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| IdempotencyRecord {
            request_id: r.get("request_id"),
            outcome: r.get("outcome"),
            status_code: u16::try_from(r.get::<i32, _>("status_code")).unwrap_or(0),
            created_at: r.get("created_at"),
        }))
    }

    async fn budget_status(
        &self,
        tenant_id: &TenantId,
        window: BudgetWindow,
        limit: MicroUsd,
    ) -> Result<BudgetStatus, StoreError> {
        let now = Utc::now();
        let (start, end) = window.boundaries(now);

        // `RollingDays` slides on every call, so it can never hit the same
        // `window_start` bucket twice; read its usage straight out of the
        // usage log instead of the bucket-counter table.
        let used = if matches!(window, BudgetWindow::RollingDays(_)) {
            self.sum_usage_between(tenant_id, start, end).await?
        } else {
            let table = self.config.budget_windows_table();
            let query = format!(
                "SELECT used_micros FROM {table} \
                 WHERE tenant_id = $1 AND window_label = $2 AND window_start = $3"
            );
            let row = sqlx::query(&query)
                .bind(tenant_id.as_str())
                .bind(window.label())
                .bind(start)
                .fetch_optional(&self.pool)
                .await?;
            MicroUsd(row.map_or(0, |r| r.get::<i64, _>("used_micros")))
        };

        Ok(BudgetStatus {
            tenant_id: tenant_id.clone(),
            window,
            used,
            limit,
            remaining: limit.saturating_sub(used),
            resets_at: end,
        })
    }

    #[tracing::instrument(skip(self, request, usage), fields(request_id = %request.id, tenant_id = %request.tenant_id))]
    async fn record_usage_transaction(
        &self,
        request: &RequestRecord,
        usage: Option<&UsageRecord>,
        budget_window: BudgetWindow,
        budget_limit: MicroUsd,
    ) -> Result<BudgetStatus, StoreError> {
        tracing::debug!("recording request outcome and usage delta");
        let mut tx = self.pool.begin().await?;

        let request_log = self.config.request_log_table();
        let insert_request = format!(
            "INSERT INTO {request_log} \
             (id, tenant_id, api_key_id, model, endpoint, outcome, status_code, latency_ms, \
              idempotency_key, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        sqlx::query(&insert_request)
            .bind(request.id)
            .bind(request.tenant_id.as_str())
            .bind(request.api_key_id.as_str())
            .bind(request.model.as_ref().map(keystone_core::ModelId::as_str))
            .bind(&request.endpoint)
            .bind(serde_json::to_string(&request.outcome)?.trim_matches('"'))
            .bind(i32::from(request.status_code))
            .bind(i64::try_from(request.latency_ms).unwrap_or(i64::MAX))
            .bind(&request.idempotency_key)
            .bind(request.created_at)
            .execute(&mut *tx)
            .await?;

        let cost_micros = usage.map_or(MicroUsd::ZERO, |u| u.cost_micros);

        if let Some(usage) = usage {
            let usage_log = self.config.usage_log_table();
            let insert_usage = format!(
                "INSERT INTO {usage_log} \
                 (id, request_id, tenant_id, api_key_id, model, provider_id, prompt_tokens, \
                  completion_tokens, cost_micros, cost_cents, recorded_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
            );
            sqlx::query(&insert_usage)
                .bind(usage.id)
                .bind(usage.request_id)
                .bind(usage.tenant_id.as_str())
                .bind(usage.api_key_id.as_str())
                .bind(usage.model.as_str())
                .bind(usage.provider_id.as_str())
                .bind(i64::try_from(usage.prompt_tokens).unwrap_or(i64::MAX))
                .bind(i64::try_from(usage.completion_tokens).unwrap_or(i64::MAX))
                .bind(usage.cost_micros.0)
                .bind(usage.cost_cents)
                .bind(usage.recorded_at)
                .execute(&mut *tx)
                .await?;
        }

        let now = Utc::now();
        let (start, end) = budget_window.boundaries(now);

        let used = if matches!(budget_window, BudgetWindow::RollingDays(_)) {
            let usage_log = self.config.usage_log_table();
            let query = format!(
                "SELECT COALESCE(SUM(cost_micros), 0) AS total FROM {usage_log} \
                 WHERE tenant_id = $1 AND recorded_at >= $2 AND recorded_at < $3"
            );
            let row = sqlx::query(&query)
                .bind(request.tenant_id.as_str())
                .bind(start)
                .bind(end)
                .fetch_one(&mut *tx)
                .await?;
            MicroUsd(row.get::<i64, _>("total"))
        } else {
            let budget_windows = self.config.budget_windows_table();
            let upsert_budget = format!(
                "INSERT INTO {budget_windows} (tenant_id, window_label, window_start, used_micros) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (tenant_id, window_label, window_start) \
                 DO UPDATE SET used_micros = {budget_windows}.used_micros + EXCLUDED.used_micros \
                 RETURNING used_micros"
            );
            let row = sqlx::query(&upsert_budget)
                .bind(request.tenant_id.as_str())
                .bind(budget_window.label())
                .bind(start)
                .bind(cost_micros.0)
                .fetch_one(&mut *tx)
                .await?;
            MicroUsd(row.get::<i64, _>("used_micros"))
        };

        if let Some(key) = &request.idempotency_key {
            let idempotency_cache = self.config.idempotency_cache_table();
            let insert_idempotency = format!(
                "INSERT INTO {idempotency_cache} \
                 (tenant_id, idempotency_key, request_id, outcome, status_code, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (tenant_id, idempotency_key) DO NOTHING"
            );
            sqlx::query(&insert_idempotency)
                .bind(request.tenant_id.as_str())
                .bind(key)
                .bind(request.id)
                .bind(serde_json::to_string(&request.outcome)?.trim_matches('"'))
                .bind(i32::from(request.status_code))
                .bind(request.created_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(BudgetStatus {
            tenant_id: request.tenant_id.clone(),
            window: budget_window,
            used,
            limit: budget_limit,
            remaining: budget_limit.saturating_sub(used),
            resets_at: end,
        })
    }
}
