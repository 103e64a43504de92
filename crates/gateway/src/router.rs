use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};

use keystone_core::{Capability, Catalog, HealthRecord, HealthState, HealthThresholds, ModelId, ProviderId, Route};
use keystone_provider::ProviderRoute;

/// Per-model-alias rollup returned by [`RouterEngine::health_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AliasHealth {
    pub healthy: u32,
    pub total: u32,
}

/// Selects and tracks the health of upstream routes for a public model name
/// (C4). Holds the live catalog behind an atomically-swapped pointer so
/// `Reload` never blocks an in-flight `SelectRoutes`.
pub struct RouterEngine {
    catalog: RwLock<Arc<Catalog>>,
    providers: HashMap<ProviderId, Arc<dyn ProviderRoute>>,
    health: DashMap<(ModelId, ProviderId), HealthRecord>,
    thresholds: HealthThresholds,
    health_interval: Duration,
}

impl RouterEngine {
    #[must_use]
    pub fn new(
        catalog: Catalog,
        providers: HashMap<ProviderId, Arc<dyn ProviderRoute>>,
        thresholds: HealthThresholds,
        health_interval: Duration,
    ) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(catalog)),
            providers,
            health: DashMap::new(),
            thresholds,
            health_interval,
        }
    }

    /// Atomically swap in a freshly loaded catalog snapshot.
    pub async fn reload(&self, snapshot: Catalog) {
        *self.catalog.write().await = Arc::new(snapshot);
        info!(routes = self.catalog.read().await.routes.len(), "catalog reloaded");
    }

    /// The provider adapter backing `id`, if one is registered.
    #[must_use]
    pub fn provider(&self, id: &ProviderId) -> Option<Arc<dyn ProviderRoute>> {
        self.providers.get(id).cloned()
    }

    fn health_of(&self, model: &ModelId, provider: &ProviderId) -> HealthRecord {
        self.health
            .get(&(model.clone(), provider.clone()))
            .map(|r| *r)
            .unwrap_or_default()
    }

    /// Ordered route candidates for `model` supporting `capability`: healthy
    /// routes first (weighted by `weight` within that cohort), then degraded,
    /// then offline, so a request can still succeed during an outage.
    pub async fn select_routes(&self, model: &ModelId, capability: Capability) -> Vec<Route> {
        let catalog = Arc::clone(&*self.catalog.read().await);
        let mut healthy = Vec::new();
        let mut degraded = Vec::new();
        let mut offline = Vec::new();

        for route in catalog.routes_for(model, capability) {
            if !route.enabled {
                continue;
            }
            match self.health_of(model, &route.provider_id).state {
                HealthState::Healthy => healthy.push(route.clone()),
                HealthState::Degraded => degraded.push(route.clone()),
                HealthState::Offline => offline.push(route.clone()),
            }
        }

        weighted_shuffle(&mut healthy);
        degraded.sort_by(|a, b| b.weight.cmp(&a.weight));
        offline.sort_by(|a, b| b.weight.cmp(&a.weight));

        healthy.into_iter().chain(degraded).chain(offline).collect()
    }

    pub fn report_success(&self, model: &ModelId, provider: &ProviderId) {
        let key = (model.clone(), provider.clone());
        let updated = self.health_of(model, provider).on_success();
        self.health.insert(key, updated);
    }

    pub fn report_failure(&self, model: &ModelId, provider: &ProviderId) {
        let key = (model.clone(), provider.clone());
        let updated = self.health_of(model, provider).on_failure(self.thresholds);
        if updated.state != HealthState::Healthy {
            warn!(%model, %provider, state = %updated.state, "route health degraded");
        }
        self.health.insert(key, updated);
    }

    /// Aggregate healthy/total route counts per model alias.
    pub async fn health_status(&self) -> HashMap<ModelId, AliasHealth> {
        let catalog = Arc::clone(&*self.catalog.read().await);
        let mut status: HashMap<ModelId, AliasHealth> = HashMap::new();
        for route in &catalog.routes {
            let entry = status.entry(route.model.clone()).or_default();
            entry.total += 1;
            if self.health_of(&route.model, &route.provider_id).is_eligible_for_selection() {
                entry.healthy += 1;
            }
        }
        status
    }

    /// Probe every non-healthy route whose cooldown has elapsed, restoring
    /// it to `Healthy` on a successful `health_check` and otherwise leaving
    /// its state untouched (a failed probe does not re-arm the
    /// consecutive-failure counter).
    async fn probe_offline_routes(&self) {
        let catalog = Arc::clone(&*self.catalog.read().await);
        let now = Utc::now();
        for route in &catalog.routes {
            if !route.enabled {
                continue;
            }
            let key = (route.model.clone(), route.provider_id.clone());
            let record = self.health_of(&route.model, &route.provider_id);
            if record.state == HealthState::Healthy {
                continue;
            }
            if !record.is_probe_due(now, self.thresholds.probe_interval_secs) {
                continue;
            }
            let Some(provider) = self.providers.get(&route.provider_id) else {
                continue;
            };
            self.health.insert(key, record.probed_at(now));
            debug!(model = %route.model, provider = %route.provider_id, "probing route health");
            match provider.health_check().await {
                Ok(()) => self.report_success(&route.model, &route.provider_id),
                Err(err) => {
                    debug!(error = %err, model = %route.model, provider = %route.provider_id, "health probe failed");
                }
            }
        }
    }

    /// Spawn the background recovery prober. Runs until the returned handle
    /// is aborted or the process exits.
    pub fn spawn_prober(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.health_interval);
            loop {
                ticker.tick().await;
                self.probe_offline_routes().await;
            }
        })
    }
}

/// Order `routes` by weight-proportional random sampling without
/// replacement: heavier routes are more likely to land earlier, but every
/// route is included exactly once.
fn weighted_shuffle(routes: &mut Vec<Route>) {
    if routes.len() <= 1 {
        return;
    }
    let mut rng = rand::thread_rng();
    let mut pool = std::mem::take(routes);
    let mut ordered = Vec::with_capacity(pool.len());

    while !pool.is_empty() {
        let total_weight: u64 = pool.iter().map(|r| u64::from(r.weight.max(1))).sum();
        let mut pick = rng.gen_range(0..total_weight.max(1));
        let mut chosen = 0;
        for (idx, route) in pool.iter().enumerate() {
            let weight = u64::from(route.weight.max(1));
            if pick < weight {
                chosen = idx;
                break;
            }
            pick -= weight;
        }
        ordered.push(pool.remove(chosen));
    }

    *routes = ordered;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(provider: &str, weight: u32) -> Route {
        Route {
            model: ModelId::new("gpt-test"),
            provider_id: ProviderId::new(provider),
            upstream_model: "upstream".into(),
            capabilities: vec![Capability::Chat],
            weight,
            input_price_micros_per_million: 1,
            output_price_micros_per_million: 1,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn select_routes_prefers_healthy_over_offline() {
        let catalog = Catalog {
            routes: vec![route("a", 1), route("b", 1)],
        };
        let engine = RouterEngine::new(catalog, HashMap::new(), HealthThresholds::default(), Duration::from_secs(60));
        let model = ModelId::new("gpt-test");
        let provider_a = ProviderId::new("a");

        for _ in 0..HealthThresholds::default().offline_after {
            engine.report_failure(&model, &provider_a);
        }

        let routes = engine.select_routes(&model, Capability::Chat).await;
        assert_eq!(routes[0].provider_id, ProviderId::new("b"));
        assert_eq!(routes[1].provider_id, ProviderId::new("a"));
    }

    #[tokio::test]
    async fn select_routes_excludes_disabled_routes() {
        let mut disabled = route("b", 1);
        disabled.enabled = false;
        let catalog = Catalog {
            routes: vec![route("a", 1), disabled],
        };
        let engine = RouterEngine::new(catalog, HashMap::new(), HealthThresholds::default(), Duration::from_secs(60));
        let routes = engine.select_routes(&ModelId::new("gpt-test"), Capability::Chat).await;
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].provider_id, ProviderId::new("a"));
    }

    #[tokio::test]
    async fn reload_replaces_catalog_atomically() {
        let engine = RouterEngine::new(
            Catalog { routes: vec![route("a", 1)] },
            HashMap::new(),
            HealthThresholds::default(),
            Duration::from_secs(60),
        );
        engine.reload(Catalog { routes: vec![route("a", 1), route("b", 1)] }).await;
        let routes = engine.select_routes(&ModelId::new("gpt-test"), Capability::Chat).await;
        assert_eq!(routes.len(), 2);
    }

    #[tokio::test]
    async fn weighted_shuffle_includes_every_route_once() {
        let mut routes = vec![route("a", 10), route("b", 1), route("c", 5)];
        weighted_shuffle(&mut routes);
        assert_eq!(routes.len(), 3);
        let mut ids: Vec<_> = routes.iter().map(|r| r.provider_id.as_str().to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
