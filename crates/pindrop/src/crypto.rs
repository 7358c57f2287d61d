//! payload cipher: aes-256-gcm keyed from the pake export key
//!
//! key = hkdf-sha512 over the export key with domain-separated labels.
//! sealed blob layout: 12-byte random nonce || ciphertext.

use aes_gcm::aead::{Aead, KeyInit, Nonce as AeadNonce};
use aes_gcm::Aes256Gcm;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;

use crate::{Error, Result};

pub const NONCE_LEN: usize = 12;
pub const AES_KEY_LEN: usize = 32;

const HKDF_SALT: &[u8] = b"pindrop:export-key:v1";
const HKDF_INFO: &[u8] = b"pindrop:aes256-gcm:v1";

type CipherNonce = AeadNonce<Aes256Gcm>;

/// derive the payload key from a pake export key
pub fn derive_payload_key(export_key: &[u8]) -> Result<[u8; AES_KEY_LEN]> {
    if export_key.is_empty() {
        return Err(Error::InvalidInput("export key must not be empty".into()));
    }
    let hkdf = Hkdf::<Sha512>::new(Some(HKDF_SALT), export_key);
    let mut key = [0u8; AES_KEY_LEN];
    hkdf.expand(HKDF_INFO, &mut key)
        .map_err(|_| Error::InvalidInput("unable to derive payload key".into()))?;
    Ok(key)
}

/// encrypt data under the export key, fresh nonce per call
pub fn encrypt_payload(export_key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let key = derive_payload_key(export_key)?;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| Error::InvalidInput("unable to derive payload key".into()))?;
    let nonce_ga = CipherNonce::from(nonce);
    let ciphertext = cipher
        .encrypt(&nonce_ga, data)
        .map_err(|_| Error::InvalidInput("payload encryption failed".into()))?;
    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// decrypt a sealed blob. any structural or authentication failure is
/// DecryptionFailed, nothing more specific leaks out.
pub fn decrypt_payload(export_key: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        tracing::debug!(len = sealed.len(), "sealed payload too short");
        return Err(Error::DecryptionFailed);
    }
    let key = derive_payload_key(export_key)?;
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| Error::DecryptionFailed)?;
    let nonce_ga = CipherNonce::from(nonce);
    cipher.decrypt(&nonce_ga, ciphertext).map_err(|_| {
        tracing::debug!("payload authentication failed");
        Error::DecryptionFailed
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"test export key material";

    #[test]
    fn test_roundtrip() {
        let sealed = encrypt_payload(KEY, b"hello world").unwrap();
        let opened = decrypt_payload(KEY, &sealed).unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[test]
    fn test_roundtrip_empty() {
        let sealed = encrypt_payload(KEY, b"").unwrap();
        assert_eq!(decrypt_payload(KEY, &sealed).unwrap(), b"");
    }

    #[test]
    fn test_nonce_is_fresh() {
        let a = encrypt_payload(KEY, b"same input").unwrap();
        let b = encrypt_payload(KEY, b"same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt_payload(KEY, b"hello").unwrap();
        let result = decrypt_payload("другой ключ".as_bytes(), &sealed);
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut sealed = encrypt_payload(KEY, b"hello").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            decrypt_payload(KEY, &sealed),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_truncated_blob_fails() {
        assert!(matches!(
            decrypt_payload(KEY, &[0u8; 4]),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_empty_export_key_rejected() {
        assert!(matches!(
            encrypt_payload(b"", b"data"),
            Err(Error::InvalidInput(_))
        ));
    }
}
