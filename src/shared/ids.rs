use super::serde_ext::parse_via_string;
use serde::{Deserialize, Deserializer, Serialize};

pub fn validate_identifier_value(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Ok(());
    }
    Err(format!(
        "{kind} must use only ASCII letters, digits, '-' or '_'"
    ))
}

/// 24 lowercase hex chars: big-endian unix seconds then 8 random bytes.
pub fn generate_object_id() -> Result<String, getrandom::Error> {
    let mut random = [0u8; 8];
    getrandom::getrandom(&mut random)?;
    let secs = super::time::now_secs().clamp(0, u32::MAX as i64) as u32;
    let mut raw = Vec::with_capacity(12);
    raw.extend_from_slice(&secs.to_be_bytes());
    raw.extend_from_slice(&random);
    Ok(hex_encode(&raw))
}

/// Opaque bearer token handed to interpreters for API callbacks.
pub fn generate_token() -> Result<String, getrandom::Error> {
    let mut random = [0u8; 32];
    getrandom::getrandom(&mut random)?;
    Ok(hex_encode(&random))
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

macro_rules! define_id_type {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, String> {
                validate_identifier_value($kind, raw)?;
                Ok(Self(raw.to_string()))
            }

            pub fn generate() -> Result<Self, getrandom::Error> {
                generate_object_id().map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.as_str()
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                parse_via_string(deserializer, $kind, Self::parse)
            }
        }
    };
}

define_id_type!(UserId, "user id");
define_id_type!(TeamId, "team id");
define_id_type!(OrganizationId, "organization id");
define_id_type!(CredentialId, "credential id");
define_id_type!(ProjectId, "project id");
define_id_type!(InventoryId, "inventory id");
define_id_type!(TemplateId, "template id");
define_id_type!(JobId, "job id");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_reject_path_like_values() {
        assert!(JobId::parse("5a1b2c").is_ok());
        assert!(JobId::parse("").is_err());
        let err = ProjectId::parse("../etc").expect_err("traversal rejected");
        assert!(err.contains("project id"));
    }

    #[test]
    fn generated_ids_are_24_hex_and_unique() {
        let a = JobId::generate().expect("generate");
        let b = JobId::generate().expect("generate");
        assert_eq!(a.as_str().len(), 24);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn ids_deserialize_through_validation() {
        let ok: TemplateId = serde_json::from_str("\"tpl-1\"").expect("valid");
        assert_eq!(ok.as_str(), "tpl-1");
        let err = serde_json::from_str::<TemplateId>("\"a b\"").expect_err("space rejected");
        assert!(err.to_string().contains("invalid template id"));
    }
}
