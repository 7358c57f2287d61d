//! sealed payload envelopes
//!
//! what the server stores and returns: a payload kind, a display name, and
//! aes-256-gcm ciphertext under a key derived from the pake export key. the
//! server never sees plaintext or the key.

use serde::{Deserialize, Serialize};

use crate::crypto::{decrypt_payload, encrypt_payload};
use crate::error::Result;
use crate::opaque::ExportKey;
use crate::transport::b64;

/// suffix appended to every sealed name
pub const ENCRYPTED_SUFFIX: &str = ".encrypted";

const TEXT_SEALED_NAME: &str = "message.encrypted";

/// wire tag distinguishing a pasted message from an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Text,
    File,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Text => "text",
            PayloadKind::File => "file",
        }
    }
}

/// plaintext secret as the caller provides it
#[derive(Clone)]
pub enum SecretPayload {
    Text(String),
    File { name: String, bytes: Vec<u8> },
}

impl SecretPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            SecretPayload::Text(_) => PayloadKind::Text,
            SecretPayload::File { .. } => PayloadKind::File,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SecretPayload::Text(text) => text.len(),
            SecretPayload::File { bytes, .. } => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// contents stay out of logs
impl std::fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretPayload::Text(text) => f
                .debug_struct("SecretPayload::Text")
                .field("len", &text.len())
                .finish(),
            SecretPayload::File { name, bytes } => f
                .debug_struct("SecretPayload::File")
                .field("name", name)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

/// sealed payload as stored and returned by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub payload_type: PayloadKind,
    pub file_name: String,
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
}

/// name shown after reveal: the sealed name with one `.encrypted` stripped
pub fn restore_file_name(sealed_name: &str) -> String {
    let bytes = sealed_name.as_bytes();
    let suffix = ENCRYPTED_SUFFIX.as_bytes();
    if bytes.len() > suffix.len() {
        let tail = &bytes[bytes.len() - suffix.len()..];
        // ascii-only suffix, so the cut always lands on a char boundary
        if tail.eq_ignore_ascii_case(suffix) {
            return sealed_name[..bytes.len() - suffix.len()].to_owned();
        }
    }
    sealed_name.to_owned()
}

fn sealed_name(payload: &SecretPayload) -> String {
    match payload {
        SecretPayload::Text(_) => TEXT_SEALED_NAME.to_owned(),
        SecretPayload::File { name, .. } => format!("{name}{ENCRYPTED_SUFFIX}"),
    }
}

/// encrypts `payload` under a key derived from `export_key`
pub fn seal_payload(export_key: &ExportKey, payload: &SecretPayload) -> Result<Envelope> {
    let plaintext = match payload {
        SecretPayload::Text(text) => text.as_bytes(),
        SecretPayload::File { bytes, .. } => bytes.as_slice(),
    };
    let sealed = encrypt_payload(export_key.as_bytes(), plaintext)?;
    Ok(Envelope {
        payload_type: payload.kind(),
        file_name: sealed_name(payload),
        payload: sealed,
    })
}

/// decrypts a revealed envelope back to plaintext bytes
pub fn open_payload(export_key: &ExportKey, envelope: &Envelope) -> Result<Vec<u8>> {
    decrypt_payload(export_key.as_bytes(), &envelope.payload)
}
