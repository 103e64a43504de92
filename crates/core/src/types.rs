use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! newtype_string {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
        #[cfg_attr(feature = "openapi", schema(value_type = String))]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Return the inner string as a str slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(TenantId, "A tenant identifier for multi-tenant isolation.");
newtype_string!(ApiKeyId, "Identifier of an issued API key (not the secret itself).");
newtype_string!(ProviderId, "Identifies a configured upstream provider instance.");
newtype_string!(ModelId, "A public model name exposed to callers, e.g. `gpt-4o-mini`.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_from_str() {
        let t = TenantId::from("acme");
        assert_eq!(t.as_str(), "acme");
        assert_eq!(&*t, "acme");
    }

    #[test]
    fn newtype_from_string() {
        let m = ModelId::from("gpt-4o-mini".to_string());
        assert_eq!(m.to_string(), "gpt-4o-mini");
    }

    #[test]
    fn newtype_serde_roundtrip() {
        let id = ApiKeyId::new("key_123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"key_123\"");
        let back: ApiKeyId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn newtype_display() {
        let p = ProviderId::new("openai-primary");
        assert_eq!(format!("{p}"), "openai-primary");
    }
}
