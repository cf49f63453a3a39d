//! Identity types
//!
//! Ids travel over the wire as plain strings. Generated ids carry a
//! readable prefix so logs show what kind of object they point at.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random, prefixed id
            pub fn generate() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::new_v4().simple()))
            }

            /// Wrap an existing id string
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id_type!(TaskId, "task", "Unique identifier for a task tracked by a task server");
define_id_type!(MessageId, "msg", "Unique identifier for a message");
define_id_type!(AgentId, "agent", "Identifier of an agent endpoint (process-local, set at startup)");
define_id_type!(ProductId, "prod", "Unique identifier for a seller listing");
define_id_type!(SettlementId, "settle", "Identifier returned by a payment executor for a settled transfer");
