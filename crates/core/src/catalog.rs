use serde::{Deserialize, Serialize};

use crate::types::{ModelId, ProviderId};

/// A capability a route can serve. Requests are matched to routes whose
/// capability set includes the one the endpoint requires; a route lacking
/// the needed capability is excluded from selection rather than failing at
/// request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    ChatStream,
    Embed,
    ImageGenerate,
    ImageEdit,
    ImageVariation,
    Transcribe,
    Translate,
    Tts,
}

/// One upstream implementation of a public model name.
///
/// A single public `model` may fan out to several routes across different
/// providers (for failover and weighted load distribution); each route
/// names the upstream model identifier the provider actually expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub model: ModelId,
    pub provider_id: ProviderId,
    pub upstream_model: String,
    pub capabilities: Vec<Capability>,
    pub weight: u32,
    pub input_price_micros_per_million: i64,
    pub output_price_micros_per_million: i64,
    /// Disabled routes stay in the catalog (for audit/history) but are
    /// excluded by the router before selection ever sees them.
    pub enabled: bool,
}

impl Route {
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// The full set of routes behind a public model name, as reloaded
/// atomically by the router engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Catalog {
    pub routes: Vec<Route>,
}

impl Catalog {
    #[must_use]
    pub fn models(&self) -> Vec<ModelId> {
        let mut seen = Vec::new();
        for route in &self.routes {
            if !seen.contains(&route.model) {
                seen.push(route.model.clone());
            }
        }
        seen
    }

    #[must_use]
    pub fn routes_for(&self, model: &ModelId, capability: Capability) -> Vec<&Route> {
        self.routes
            .iter()
            .filter(|r| &r.model == model && r.supports(capability))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(model: &str, provider: &str, weight: u32, caps: Vec<Capability>) -> Route {
        Route {
            model: ModelId::new(model),
            provider_id: ProviderId::new(provider),
            upstream_model: model.to_string(),
            capabilities: caps,
            weight,
            input_price_micros_per_million: 1_000_000,
            output_price_micros_per_million: 2_000_000,
            enabled: true,
        }
    }

    #[test]
    fn routes_for_filters_by_capability() {
        let catalog = Catalog {
            routes: vec![
                route("gpt-4o-mini", "openai", 1, vec![Capability::Chat]),
                route("gpt-4o-mini", "azure", 1, vec![Capability::Embed]),
            ],
        };
        let chat_routes = catalog.routes_for(&ModelId::new("gpt-4o-mini"), Capability::Chat);
        assert_eq!(chat_routes.len(), 1);
        assert_eq!(chat_routes[0].provider_id, ProviderId::new("openai"));
    }

    #[test]
    fn models_dedups_across_routes() {
        let catalog = Catalog {
            routes: vec![
                route("gpt-4o-mini", "openai", 1, vec![Capability::Chat]),
                route("gpt-4o-mini", "azure", 1, vec![Capability::Chat]),
            ],
        };
        assert_eq!(catalog.models(), vec![ModelId::new("gpt-4o-mini")]);
    }
}
