//! Key ring and handshake verification

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use switchboard_client::auth::{signature, Claims, Permission, ProjectKey, SignedHandshake};
use thiserror::Error;

/// Largest accepted distance between a handshake timestamp and the broker clock
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("malformed handshake: {0}")]
    Malformed(String),

    #[error("unknown identity '{0}'")]
    UnknownIdentity(String),

    #[error("handshake timestamp outside the accepted window")]
    ClockSkew,

    #[error("signature mismatch")]
    InvalidSignature,

    #[error("{0} permission required")]
    PermissionDenied(&'static str),
}

impl AuthError {
    /// Status code reported to the client
    pub fn code(&self) -> u16 {
        match self {
            AuthError::PermissionDenied(_) => 403,
            _ => 401,
        }
    }
}

/// An authenticated session owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub identity: String,
    pub permissions: Vec<Permission>,
}

impl Principal {
    fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission) || self.permissions.contains(&Permission::Admin)
    }

    pub fn can_subscribe(&self) -> Result<(), AuthError> {
        if self.has(Permission::Read) {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied("read"))
        }
    }

    pub fn can_publish(&self) -> Result<(), AuthError> {
        if self.has(Permission::Write) {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied("write"))
        }
    }
}

/// Secrets known to the broker, by identity and permission
#[derive(Clone, Default)]
pub struct KeyRing {
    identities: HashMap<String, BTreeMap<Permission, String>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ring from key strings, e.g. `["R-abc123-secret", "W-abc123-other"]`
    pub fn from_keys<I, S>(keys: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ring = Self::new();
        for key in keys {
            ring.add(key.as_ref())?;
        }
        Ok(ring)
    }

    /// Add one key; a later key for the same identity and permission replaces the earlier one
    pub fn add(&mut self, key: &str) -> Result<(), AuthError> {
        let key = ProjectKey::parse(key).map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        let secret = String::from_utf8_lossy(key.secret()).into_owned();
        self.identities
            .entry(key.identity().to_string())
            .or_default()
            .insert(key.permission(), secret);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    /// Check a signed handshake against the ring
    ///
    /// Returns the principal and the session uuid the client asked to resume.
    pub fn verify(
        &self,
        handshake: &SignedHandshake,
        now_millis: u64,
    ) -> Result<(Principal, Option<String>), AuthError> {
        let claims =
            Claims::decode(&handshake.auth).map_err(|e| AuthError::Malformed(e.to_string()))?;

        let secrets = self
            .identities
            .get(&claims.identity)
            .ok_or_else(|| AuthError::UnknownIdentity(claims.identity.clone()))?;

        if now_millis.abs_diff(claims.timestamp) > MAX_CLOCK_SKEW.as_millis() as u64 {
            return Err(AuthError::ClockSkew);
        }

        let permissions = claims.permission_set();
        if permissions.is_empty() || permissions.len() != claims.permissions.chars().count() {
            return Err(AuthError::Malformed(format!(
                "bad permissions '{}'",
                claims.permissions
            )));
        }

        let mut claimed = Vec::with_capacity(permissions.len());
        for permission in &permissions {
            match secrets.get(permission) {
                Some(secret) => claimed.push(secret.as_bytes()),
                None => return Err(AuthError::InvalidSignature),
            }
        }

        let expected = signature(claimed, &handshake.auth)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        if !constant_time_eq(&expected, &handshake.hmac) {
            return Err(AuthError::InvalidSignature);
        }

        let principal = Principal {
            identity: claims.identity,
            permissions,
        };
        Ok((principal, claims.uuid))
    }
}

/// Compare two base64 MACs without an early exit
fn constant_time_eq(expected: &str, received: &str) -> bool {
    let (Ok(a), Ok(b)) = (URL_SAFE_NO_PAD.decode(expected), URL_SAFE_NO_PAD.decode(received))
    else {
        return false;
    };
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identities: Vec<_> = self.identities.keys().collect();
        write!(f, "KeyRing({:?}, [REDACTED])", identities)
    }
}
