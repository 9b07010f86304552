//! The sealed record handed to session stores.

use serde::{Deserialize, Serialize};

use crate::error::DecryptionFailed;

/// IV length in bytes.
pub const IV_LEN: usize = 16;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Result of one vault encryption.
///
/// All three fields are lowercase hex. Stores must treat the bundle as one
/// opaque record: the tag covers the IV and content, so a partial update
/// leaves a bundle that will not open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptedBundle {
    pub iv: String,
    pub content: String,
    pub tag: String,
}

impl EncryptedBundle {
    pub(crate) fn from_parts(iv: &[u8; IV_LEN], content: &[u8], tag: &[u8]) -> Self {
        Self {
            iv: hex::encode(iv),
            content: hex::encode(content),
            tag: hex::encode(tag),
        }
    }

    pub(crate) fn iv_bytes(&self) -> Result<[u8; IV_LEN], DecryptionFailed> {
        decode_fixed(&self.iv)
    }

    pub(crate) fn tag_bytes(&self) -> Result<[u8; TAG_LEN], DecryptionFailed> {
        decode_fixed(&self.tag)
    }

    pub(crate) fn content_bytes(&self) -> Result<Vec<u8>, DecryptionFailed> {
        ensure_canonical(&self.content)?;
        hex::decode(&self.content).map_err(|_| DecryptionFailed)
    }
}

/// Only lowercase hex is accepted, so each byte has exactly one spelling.
fn ensure_canonical(field: &str) -> Result<(), DecryptionFailed> {
    if field
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        Ok(())
    } else {
        Err(DecryptionFailed)
    }
}

fn decode_fixed<const N: usize>(field: &str) -> Result<[u8; N], DecryptionFailed> {
    ensure_canonical(field)?;
    let mut out = [0u8; N];
    hex::decode_to_slice(field, &mut out).map_err(|_| DecryptionFailed)?;
    Ok(out)
}
