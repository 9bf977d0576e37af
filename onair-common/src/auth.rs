//! Token generation, API key digests and roles
//!
//! Pure functions only. HTTP enforcement lives in the service crate.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Random bytes behind a live token (hex-encoded to 64 chars)
pub const TOKEN_BYTES: usize = 32;

/// Caller role attached to an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Dj,
    /// Audio engines reporting telemetry
    Executor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Dj => "dj",
            Role::Executor => "executor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "dj" => Ok(Role::Dj),
            "executor" => Ok(Role::Executor),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Generate an opaque bearer token: 32 random bytes as lowercase hex
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    to_hex(&bytes)
}

/// SHA-256 of an API key, as 64 lowercase hex characters
///
/// Config files store only this digest, never the key itself.
pub fn digest_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
