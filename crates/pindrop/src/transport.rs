//! client-to-server boundary
//!
//! one trait, four calls, mirroring the server endpoints. byte fields cross
//! json transports base64-encoded; field casing follows the server contract
//! (camelCase on the opaque endpoints, snake_case on the secrets endpoints).
//! implementations: [`crate::loopback::LoopbackServer`] (server feature) and
//! [`crate::http::HttpTransport`] (network feature).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::Envelope;

/// server-issued identifier naming one stored secret
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretId(String);

impl SecretId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecretId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecretId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// server-issued one-time login session token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// POST /opaque/register/start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterStartRequest {
    #[serde(with = "b64")]
    pub request: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterStartReply {
    #[serde(rename = "secretId")]
    pub secret_id: SecretId,
    #[serde(with = "b64")]
    pub response: Vec<u8>,
}

/// POST /secrets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSecretRequest {
    pub secret_id: SecretId,
    #[serde(with = "b64")]
    pub opaque_upload: Vec<u8>,
    /// server default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_minutes: Option<u32>,
    #[serde(flatten)]
    pub envelope: Envelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSecretReply {
    pub secret_id: SecretId,
    pub expires_in_minutes: u32,
}

/// POST /opaque/login/start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginStartRequest {
    #[serde(rename = "secretId")]
    pub secret_id: SecretId,
    #[serde(with = "b64")]
    pub request: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginStartReply {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
    #[serde(with = "b64")]
    pub response: Vec<u8>,
}

/// POST /secrets/reveal; the success reply is the stored [`Envelope`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealRequest {
    pub secret_id: SecretId,
    pub session_id: SessionId,
    #[serde(with = "b64")]
    pub finalization: Vec<u8>,
}

/// body of every non-2xx reply. `code` is machine-readable and present on
/// current servers; `error` keeps the human string older clients match on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// transport-level failure. the orchestrators classify these into the
/// user-facing taxonomy; implementations never do that themselves.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// server answered non-2xx
    #[error("server rejected request (status {status})")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },

    /// connection or io failure, no server answer
    #[error("network error: {0}")]
    Network(String),

    /// 2xx reply whose body did not decode
    #[error("malformed server reply: {0}")]
    Decode(String),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn register_start(
        &self,
        request: &RegisterStartRequest,
    ) -> TransportResult<RegisterStartReply>;

    async fn create_secret(
        &self,
        request: &CreateSecretRequest,
    ) -> TransportResult<CreateSecretReply>;

    async fn login_start(&self, request: &LoginStartRequest) -> TransportResult<LoginStartReply>;

    async fn reveal_secret(&self, request: &RevealRequest) -> TransportResult<Envelope>;
}

/// serde helpers for base64 byte fields
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
