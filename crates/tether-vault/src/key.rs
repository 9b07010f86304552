//! Process-wide vault key.
//!
//! The key is resolved once at startup and then handed to [`crate::Vault::new`].
//! Nothing in this module reads the environment; callers pass in whatever
//! value their configuration layer found.

use rand::{rngs::OsRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::VaultError;

/// Key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Where the active key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Supplied by the operator; bundles survive restarts.
    Configured,
    /// Generated for this process only.
    Ephemeral,
}

impl KeySource {
    pub fn is_durable(&self) -> bool {
        matches!(self, KeySource::Configured)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeySource::Configured => "configured",
            KeySource::Ephemeral => "ephemeral",
        }
    }
}

/// 256-bit symmetric key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    bytes: [u8; KEY_LEN],
}

impl VaultKey {
    /// Generate a new key from the OS CSPRNG.
    pub fn generate() -> Result<Self, VaultError> {
        let mut bytes = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| VaultError::Entropy(e.to_string()))?;
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Parse a key from 64 hex characters.
    pub fn from_hex(raw: &str) -> Result<Self, VaultError> {
        let trimmed = raw.trim();
        if trimmed.len() != KEY_LEN * 2 {
            return Err(VaultError::InvalidKey(format!(
                "expected {} hex characters, got {}",
                KEY_LEN * 2,
                trimmed.len()
            )));
        }

        let mut bytes = [0u8; KEY_LEN];
        hex::decode_to_slice(trimmed, &mut bytes)
            .map_err(|_| VaultError::InvalidKey("key is not valid hex".into()))?;
        Ok(Self { bytes })
    }

    /// Pick the key for this process.
    ///
    /// A non-blank configured value must parse; it is never replaced by a
    /// random key. A missing or blank value yields an ephemeral key.
    pub fn resolve(configured: Option<&str>) -> Result<(Self, KeySource), VaultError> {
        match configured.map(str::trim).filter(|v| !v.is_empty()) {
            Some(raw) => Ok((Self::from_hex(raw)?, KeySource::Configured)),
            None => Ok((Self::generate()?, KeySource::Ephemeral)),
        }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey(..)")
    }
}
