use std::sync::Arc;

use uuid::Uuid;

use crate::api_key::ApiKey;
use crate::guardrail::GuardrailPolicy;
use crate::tenant::Tenant;

/// The immutable value C1 produces once per request and threads through the
/// rest of the pipeline. Nothing downstream re-authenticates or re-resolves
/// the tenant; they read it off this struct.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub tenant: Arc<Tenant>,
    pub api_key: Arc<ApiKey>,
    pub effective_guardrail_policy: Arc<GuardrailPolicy>,
}

impl RequestContext {
    #[must_use]
    pub fn new(tenant: Tenant, api_key: ApiKey, effective_guardrail_policy: GuardrailPolicy) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            tenant: Arc::new(tenant),
            api_key: Arc::new(api_key),
            effective_guardrail_policy: Arc::new(effective_guardrail_policy),
        }
    }
}
