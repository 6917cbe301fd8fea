//! Newtype identifiers shared across coordination-core crates.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing string as this id type without validation.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
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

string_id!(InstanceId, "Opaque identifier for a bot replica process.");
string_id!(GroupId, "Media-group identifier assigned by the chat platform.");
string_id!(MessageId, "Chat-platform message identifier.");
string_id!(LockName, "Name of a distributed lock (e.g. `task:123`).");

/// A fence token attached to one successful lock acquisition.
///
/// Freshly generated on every acquisition (including steals); a holder
/// must compare its own version against the remote record before acting
/// on the assumption that it still holds the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockVersion(pub String);

impl LockVersion {
    /// Generate a new cryptographically unpredictable fence token.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex_encode(&bytes))
    }
}

impl fmt::Display for LockVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_version_is_unique() {
        let a = LockVersion::generate();
        let b = LockVersion::generate();
        assert_ne!(a, b);
        assert_eq!(a.0.len(), 32);
    }

    #[test]
    fn instance_id_displays_as_string() {
        let id = InstanceId::from("replica-1");
        assert_eq!(id.to_string(), "replica-1");
    }
}
