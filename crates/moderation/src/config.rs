/// Configuration for the HTTP moderation webhook.
///
/// Mirrors the per-tenant `moderation{enabled, provider, url, header, value,
/// timeout_ms}` policy fields: `header`/`value` carry whatever credential
/// the webhook expects (commonly `Authorization: Bearer ...`), so the client
/// stays provider-agnostic.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Webhook endpoint invoked with `{stage, content}`.
    pub url: String,
    /// Header name to attach for authentication, if any.
    pub header: Option<String>,
    /// Header value to attach for authentication, if any.
    pub value: Option<String>,
    /// Bounded request timeout; the spec default is 3000ms.
    pub timeout_ms: u64,
}

impl ModerationConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            header: None,
            value: None,
            timeout_ms: 3_000,
        }
    }

    #[must_use]
    pub fn with_auth(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_3000ms() {
        let config = ModerationConfig::new("https://mod.example/check");
        assert_eq!(config.timeout_ms, 3_000);
        assert!(config.header.is_none());
    }

    #[test]
    fn with_auth_sets_header_and_value() {
        let config =
            ModerationConfig::new("https://mod.example/check").with_auth("Authorization", "Bearer tok");
        assert_eq!(config.header.as_deref(), Some("Authorization"));
        assert_eq!(config.value.as_deref(), Some("Bearer tok"));
    }
}
