//! AES-256-GCM sealing of session payloads.

use aes_gcm::{
    aead::{consts::U16, generic_array::GenericArray, AeadInPlace, KeyInit},
    aes::Aes256,
    AesGcm,
};
use rand::{rngs::OsRng, RngCore};

use crate::bundle::{EncryptedBundle, IV_LEN};
use crate::error::{DecryptionFailed, VaultError};
use crate::key::VaultKey;

/// AES-256-GCM with a 16-byte IV and the default 16-byte tag.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Encrypts and decrypts opaque payloads under one fixed key.
///
/// Immutable after construction, so a single instance can be shared
/// behind an `Arc` by every request handler.
pub struct Vault {
    cipher: Aes256Gcm16,
}

impl Vault {
    pub fn new(key: VaultKey) -> Self {
        let cipher = Aes256Gcm16::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Seal `plaintext` under a fresh random IV.
    ///
    /// Fails only if the OS random source is unavailable or the cipher
    /// refuses the input; both are fatal for the caller.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedBundle, VaultError> {
        let mut iv = [0u8; IV_LEN];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|e| VaultError::Entropy(e.to_string()))?;

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", buffer.as_mut_slice())
            .map_err(|_| VaultError::Encryption)?;

        Ok(EncryptedBundle::from_parts(&iv, &buffer, &tag))
    }

    /// Open a bundle produced by [`Vault::encrypt`] under the same key.
    ///
    /// Every failure, from bad hex to a forged tag, yields the same
    /// [`DecryptionFailed`].
    pub fn decrypt(&self, bundle: &EncryptedBundle) -> Result<String, DecryptionFailed> {
        let iv = bundle.iv_bytes()?;
        let tag = bundle.tag_bytes()?;
        let mut buffer = bundle.content_bytes()?;

        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                b"",
                buffer.as_mut_slice(),
                GenericArray::from_slice(&tag),
            )
            .map_err(|_| DecryptionFailed)?;

        String::from_utf8(buffer).map_err(|_| DecryptionFailed)
    }

    /// [`Vault::decrypt`] with the failure collapsed to `None`.
    pub fn decrypt_opt(&self, bundle: &EncryptedBundle) -> Option<String> {
        self.decrypt(bundle).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::TAG_LEN;

    fn test_vault() -> Vault {
        Vault::new(VaultKey::from_bytes([7u8; 32]))
    }

    fn assert_zeroize_on_drop<T: zeroize::ZeroizeOnDrop>() {}

    #[test]
    fn test_round_keys_wiped_on_drop() {
        assert_zeroize_on_drop::<Aes256>();
        assert_zeroize_on_drop::<VaultKey>();
    }

    #[test]
    fn test_roundtrip() {
        let vault = test_vault();
        let bundle = vault.encrypt("hello vault").unwrap();
        assert_eq!(vault.decrypt(&bundle).unwrap(), "hello vault");
    }

    #[test]
    fn test_empty_plaintext() {
        let vault = test_vault();
        let bundle = vault.encrypt("").unwrap();
        assert!(bundle.content.is_empty());
        assert_eq!(bundle.tag.len(), TAG_LEN * 2);
        assert_eq!(vault.decrypt(&bundle).unwrap(), "");
    }

    #[test]
    fn test_ciphertext_length_matches_plaintext() {
        let vault = test_vault();
        let bundle = vault.encrypt("twelve bytes").unwrap();
        assert_eq!(bundle.content.len(), "twelve bytes".len() * 2);
    }

    #[test]
    fn test_swapped_iv_fails() {
        let vault = test_vault();
        let a = vault.encrypt("first").unwrap();
        let b = vault.encrypt("second").unwrap();
        let mixed = EncryptedBundle {
            iv: b.iv.clone(),
            content: a.content.clone(),
            tag: a.tag.clone(),
        };
        assert_eq!(vault.decrypt(&mixed), Err(DecryptionFailed));
        assert!(vault.decrypt_opt(&mixed).is_none());
    }

    #[test]
    fn test_truncated_content_fails() {
        let vault = test_vault();
        let mut bundle = vault.encrypt("payload to truncate").unwrap();
        bundle.content.truncate(bundle.content.len() - 2);
        assert_eq!(vault.decrypt(&bundle), Err(DecryptionFailed));
    }

    #[test]
    fn test_non_hex_fails() {
        let vault = test_vault();
        let mut bundle = vault.encrypt("x").unwrap();
        bundle.iv = "not hex at all".into();
        assert_eq!(vault.decrypt(&bundle), Err(DecryptionFailed));
    }
}
