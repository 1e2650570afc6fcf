//! Identifier newtypes shared across the synthesis core.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}{}", $prefix, Uuid::new_v4()))
            }

            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(JobId, "job_");
string_id!(LeaseToken, "lease_");
string_id!(UserId, "");
string_id!(DocumentId, "");

/// Content-addressed hash identifying a `(text, model, voice, params)`
/// variant. Computed by [`crate::wire::compute_variant_hash`].
///
/// Deliberately omits the audio codec — see DESIGN.md's Open Question (1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantHash(pub String);

impl VariantHash {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A model slug, e.g. `"kokoro"`. Also the Redis queue namespace (`queue:{M}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSlug(pub String);

impl ModelSlug {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ModelSlug {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ModelSlug {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_round_trips_through_string() {
        let id = JobId::new();
        let back = JobId::from_string(id.as_str().to_string());
        assert_eq!(id, back);
    }

    #[test]
    fn distinct_ids_are_distinct() {
        assert_ne!(JobId::new(), JobId::new());
    }
}
