//! Credential vault for Tether.
//!
//! This crate provides:
//! - A process-wide 256-bit [`VaultKey`], either configured or generated at startup
//! - [`Vault::encrypt`], producing an [`EncryptedBundle`] of hex `iv`, `content` and `tag`
//! - [`Vault::decrypt`], which fails closed with a single [`DecryptionFailed`] error
//!
//! # Design
//!
//! Bundles use AES-256-GCM with a fresh 16-byte IV per call and a detached
//! 16-byte authentication tag. A bundle is only valid as a whole: changing any
//! of its fields makes decryption fail.
//!
//! A generated key is never written anywhere. Bundles sealed under it cannot be
//! opened after the process restarts unless the operator supplies a fixed key.

#![forbid(unsafe_code)]

pub mod bundle;
pub mod error;
pub mod key;
pub mod vault;

pub use bundle::{EncryptedBundle, IV_LEN, TAG_LEN};
pub use error::{DecryptionFailed, VaultError};
pub use key::{KeySource, VaultKey, KEY_LEN};
pub use vault::Vault;
