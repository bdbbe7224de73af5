//! Participant identities.
//!
//! An [`Identity`] is whatever stable token the host uses to recognise one
//! participant across requests (user id, session cookie, device id). The
//! engine only ever compares and hashes its string form.

use serde::{Deserialize, Serialize};

/// Stable identifier of one experiment participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh anonymous identity (random UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&String> for Identity {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

macro_rules! identity_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Identity {
            fn from(n: $t) -> Self {
                Self(n.to_string())
            }
        })*
    };
}

identity_from_int!(u32, u64, usize, i32, i64);
