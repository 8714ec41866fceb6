use std::fmt;

use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::{
    errors::{Error, Result},
    validator::Validator,
};

/// A password credential: the Argon2 hash that gets persisted and, for the
/// lifetime of a request, the plaintext it was derived from.
#[derive(Clone, Default)]
pub struct Password {
    plaintext: Option<String>,
    hash: Option<String>,
}

impl Password {
    pub const fn empty() -> Self {
        Self {
            plaintext: None,
            hash: None,
        }
    }

    /// Wraps a hash loaded from the store.
    pub fn from_hash(hash: String) -> Self {
        Self {
            plaintext: None,
            hash: Some(hash),
        }
    }

    pub fn set(&mut self, plain: &str) -> Result<()> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                Error::HashingFailure(e.to_string())
            })?
            .to_string();
        self.plaintext = Some(plain.to_string());
        self.hash = Some(hash);
        Ok(())
    }

    /// Derives a new credential on the blocking pool.
    pub async fn derive(plain: String) -> Result<Self> {
        tokio::task::spawn_blocking(move || -> Result<Password> {
            let mut password = Password::empty();
            password.set(&plain)?;
            Ok(password)
        })
        .await
        .map_err(|e| Error::HashingFailure(e.to_string()))?
    }

    /// `Ok(false)` on mismatch; an error only when the stored hash is unusable.
    pub fn matches(&self, plain: &str) -> Result<bool> {
        let hash = self
            .hash
            .as_deref()
            .ok_or_else(|| Error::HashingFailure("no password hash set".into()))?;
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            Error::HashingFailure(e.to_string())
        })?;
        match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => {
                error!(error = %e, "argon2 verify_password error");
                Err(Error::HashingFailure(e.to_string()))
            }
        }
    }

    pub fn plaintext(&self) -> Option<&str> {
        self.plaintext.as_deref()
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// The hash to persist.
    ///
    /// # Panics
    /// When no hash was ever set: persisting such a user is a caller bug.
    pub fn require_hash(&self) -> &str {
        match self.hash.as_deref() {
            Some(hash) => hash,
            None => panic!("missing password hash for user"),
        }
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Password")
            .field("plaintext", &self.plaintext.as_ref().map(|_| "[redacted]"))
            .field("hash", &self.hash.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// [`Password::matches`] on the blocking pool.
pub async fn verify(password: Password, plain: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || password.matches(&plain))
        .await
        .map_err(|e| Error::HashingFailure(e.to_string()))?
}

pub fn validate_plaintext(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(password.len() >= 8, "password", "must be at least 8 bytes long");
    v.check(
        password.len() <= 72,
        "password",
        "must not be more than 72 bytes long",
    );
}
