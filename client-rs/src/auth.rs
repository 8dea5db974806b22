//! Project keys and handshake signing
//!
//! Key format: `<P>-<identity>-<secret>` where `P` is one of:
//! - `R` : read (subscribe)
//! - `W` : write (publish)
//! - `A` : admin
//!
//! The handshake carries a base64 claims document and the XOR of one
//! HMAC-SHA256 per key over that document, so the server can check every
//! permission the client claims without the secrets crossing the wire.

use crate::error::{Result, SwitchboardError};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Permission granted by a project key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl Permission {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'R' => Some(Permission::Read),
            'W' => Some(Permission::Write),
            'A' => Some(Permission::Admin),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Permission::Read => 'R',
            Permission::Write => 'W',
            Permission::Admin => 'A',
        }
    }
}

/// A single parsed project key
#[derive(Clone)]
pub struct ProjectKey {
    permission: Permission,
    identity: String,
    secret: String,
}

impl ProjectKey {
    /// Parse and validate a key string
    pub fn parse(key: &str) -> Result<Self> {
        let mut parts = key.trim().splitn(3, '-');
        let (perm, identity, secret) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(i), Some(s)) => (p, i, s),
            _ => {
                return Err(SwitchboardError::AuthKey(
                    "expected <permission>-<identity>-<secret>".to_string(),
                ))
            }
        };

        let mut chars = perm.chars();
        let permission = match (chars.next().and_then(Permission::from_char), chars.next()) {
            (Some(p), None) => p,
            _ => {
                return Err(SwitchboardError::AuthKey(format!(
                    "unknown permission '{}'",
                    perm
                )))
            }
        };

        if identity.is_empty() || !identity.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SwitchboardError::AuthKey(
                "identity must be non-empty hex".to_string(),
            ));
        }

        if secret.is_empty() {
            return Err(SwitchboardError::AuthKey("secret is empty".to_string()));
        }

        Ok(Self {
            permission,
            identity: identity.to_ascii_lowercase(),
            secret: secret.to_string(),
        })
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn secret(&self) -> &[u8] {
        self.secret.as_bytes()
    }
}

impl fmt::Debug for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProjectKey({}-{}-[REDACTED])",
            self.permission.as_char(),
            self.identity
        )
    }
}

/// The signed claims sent in the session handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub identity: String,
    pub permissions: String,
    /// Unix milliseconds at signing time
    pub timestamp: u64,
    /// Session to resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl Claims {
    pub fn encode(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(auth: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(auth)
            .map_err(|e| SwitchboardError::AuthKey(format!("claims decode error: {}", e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Permissions claimed, in key order
    pub fn permission_set(&self) -> Vec<Permission> {
        self.permissions.chars().filter_map(Permission::from_char).collect()
    }
}

/// Handshake payload for `session-create` / `session-resume`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedHandshake {
    pub auth: String,
    pub hmac: String,
}

/// A validated set of keys sharing one identity
#[derive(Debug, Clone)]
pub struct Credentials {
    identity: String,
    keys: Vec<ProjectKey>,
}

impl Credentials {
    /// Parse keys; all must share one identity and no permission may repeat
    pub fn from_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self> {
        if keys.is_empty() {
            return Err(SwitchboardError::AuthKey("no keys supplied".to_string()));
        }

        let mut parsed: Vec<ProjectKey> = Vec::with_capacity(keys.len());
        for key in keys {
            let key = ProjectKey::parse(key.as_ref())?;
            if let Some(first) = parsed.first() {
                if first.identity != key.identity {
                    return Err(SwitchboardError::AuthKey(
                        "keys belong to different identities".to_string(),
                    ));
                }
            }
            if parsed.iter().any(|k| k.permission == key.permission) {
                return Err(SwitchboardError::AuthKey(format!(
                    "duplicate '{}' key",
                    key.permission.as_char()
                )));
            }
            parsed.push(key);
        }
        parsed.sort_by_key(|k| k.permission);

        Ok(Self {
            identity: parsed[0].identity.clone(),
            keys: parsed,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Permission letters, e.g. `"RW"`
    pub fn permissions(&self) -> String {
        self.keys.iter().map(|k| k.permission.as_char()).collect()
    }

    /// Sign a handshake, optionally asking to resume `uuid`
    pub fn sign(&self, timestamp: u64, uuid: Option<&str>) -> Result<SignedHandshake> {
        let claims = Claims {
            identity: self.identity.clone(),
            permissions: self.permissions(),
            timestamp,
            uuid: uuid.map(str::to_string),
        };
        let auth = claims.encode()?;
        let hmac = signature(self.keys.iter().map(ProjectKey::secret), &auth)?;
        Ok(SignedHandshake { auth, hmac })
    }
}

/// XOR of HMAC-SHA256(secret, auth) over every secret, base64 encoded
pub fn signature<'a>(secrets: impl IntoIterator<Item = &'a [u8]>, auth: &str) -> Result<String> {
    let mut combined = [0u8; 32];
    for secret in secrets {
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| SwitchboardError::AuthKey(e.to_string()))?;
        mac.update(auth.as_bytes());
        for (acc, byte) in combined.iter_mut().zip(mac.finalize().into_bytes()) {
            *acc ^= byte;
        }
    }
    Ok(URL_SAFE_NO_PAD.encode(combined))
}

/// Current time in unix milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
