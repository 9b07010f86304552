use thiserror::Error;

/// Errors raised while configuring the vault or sealing a payload.
///
/// These are fatal for the operation that hit them. Opening a bundle never
/// returns one of these; see [`DecryptionFailed`].
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid vault key: {0}")]
    InvalidKey(String),

    #[error("random source unavailable: {0}")]
    Entropy(String),

    #[error("encryption failed")]
    Encryption,
}

/// A bundle could not be opened.
///
/// Carries no detail on purpose: malformed hex, a wrong key and a forged tag
/// all look the same to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("could not decrypt")]
pub struct DecryptionFailed;
