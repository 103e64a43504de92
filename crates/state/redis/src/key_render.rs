use keystone_state::StateKey;

/// Render a [`StateKey`] into a Redis key string with the given prefix.
///
/// The format is `prefix:tenant:kind:id`.
#[must_use]
pub fn render_key(prefix: &str, key: &StateKey) -> String {
    format!("{}:{}:{}:{}", prefix, key.tenant, key.kind, key.id)
}

#[cfg(test)]
mod tests {
    use keystone_state::KeyKind;

    use super::*;

    #[test]
    fn renders_standard_key() {
        let key = StateKey::new("tenant-1", KeyKind::Idempotency, "abc-123");
        let rendered = render_key("keystone", &key);
        assert_eq!(rendered, "keystone:tenant-1:idempotency:abc-123");
    }

    #[test]
    fn renders_custom_kind() {
        let key = StateKey::new("t", KeyKind::Custom("my_kind".into()), "id-1");
        let rendered = render_key("pfx", &key);
        assert_eq!(rendered, "pfx:t:my_kind:id-1");
    }

    #[test]
    fn renders_all_builtin_kinds() {
        let kinds = [
            (KeyKind::RateLimitRpm, "rate_limit_rpm"),
            (KeyKind::RateLimitTpm, "rate_limit_tpm"),
            (KeyKind::ParallelSlot, "parallel_slot"),
            (KeyKind::Idempotency, "idempotency"),
            (KeyKind::RouteHealth, "route_health"),
            (KeyKind::BudgetCounter, "budget_counter"),
            (KeyKind::Lock, "lock"),
        ];
        for (kind, expected_segment) in kinds {
            let key = StateKey::new("t", kind, "id");
            let rendered = render_key("p", &key);
            assert_eq!(rendered, format!("p:t:{expected_segment}:id"));
        }
    }
}
