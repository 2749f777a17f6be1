//! Credential checks for the HTTP service.
//!
//! The core pipeline never sees credentials; the server asks an injected
//! [`Authenticator`] before accepting an upload.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

/// Environment variable holding the admin user name.
pub const ADMIN_USER_ENV: &str = "SHEET2PDF_ADMIN_USER";
/// Environment variable holding the hex SHA-256 digest of the admin password.
pub const ADMIN_PASSWORD_SHA256_ENV: &str = "SHEET2PDF_ADMIN_PASSWORD_SHA256";

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
}

/// Decides whether a username/password pair may upload.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> Option<Principal>;
}

/// A single user whose password is known only by its SHA-256 digest.
#[derive(Clone)]
pub struct StaticAuthenticator {
    username: String,
    password_sha256: [u8; 32],
    configured: bool,
}

impl fmt::Debug for StaticAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticAuthenticator")
            .field("username", &self.username)
            .field("configured", &self.configured)
            .finish()
    }
}

impl StaticAuthenticator {
    /// Build from a user name and a hex digest. A missing or malformed
    /// digest yields an authenticator that rejects every login.
    pub fn new(username: impl Into<String>, password_sha256_hex: &str) -> Self {
        let mut digest = [0u8; 32];
        let configured = hex::decode_to_slice(password_sha256_hex.trim(), &mut digest).is_ok();
        if !configured {
            tracing::warn!("Admin password is not configured; all logins will be rejected");
        }
        Self {
            username: username.into(),
            password_sha256: digest,
            configured,
        }
    }

    /// Read [`ADMIN_USER_ENV`] (default `admin`) and [`ADMIN_PASSWORD_SHA256_ENV`].
    pub fn from_env() -> Self {
        let user = std::env::var(ADMIN_USER_ENV).unwrap_or_else(|_| "admin".to_string());
        let hash = std::env::var(ADMIN_PASSWORD_SHA256_ENV).unwrap_or_default();
        Self::new(user, &hash)
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, username: &str, password: &str) -> Option<Principal> {
        if !self.configured {
            return None;
        }
        let digest = Sha256::digest(password.as_bytes());
        // Evaluate both comparisons so timing does not reveal which failed.
        let user_ok = username.as_bytes().ct_eq(self.username.as_bytes());
        let pass_ok = digest.as_slice().ct_eq(&self.password_sha256);
        bool::from(user_ok & pass_ok).then(|| Principal {
            username: self.username.clone(),
        })
    }
}

/// Hex SHA-256 of `password`, for producing [`ADMIN_PASSWORD_SHA256_ENV`] values.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Parse an `Authorization: Basic …` header value into `(user, password)`.
pub fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}
