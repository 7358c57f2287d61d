//! in-process server
//!
//! a [`Transport`] backed by a [`ServerExchange`] and an in-memory secret
//! store, answering with the same statuses, messages and codes as the http
//! server. exists so the whole client flow can run in one process, mostly
//! under test.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::classify::{PIN_REJECTED_CODE, PIN_REJECTED_MESSAGE};
use crate::envelope::Envelope;
use crate::server::{ServerError, ServerExchange};
use crate::transport::{
    CreateSecretReply, CreateSecretRequest, LoginStartReply, LoginStartRequest,
    RegisterStartReply, RegisterStartRequest, RevealRequest, SecretId, Transport, TransportError,
    TransportResult,
};

/// secrets not claimed within this window are swept
pub const DEFAULT_SECRET_TTL: Duration = Duration::from_secs(15 * 60);

const SECRET_ID_BYTES: usize = 16;

struct StoredSecret {
    record: Vec<u8>,
    envelope: Envelope,
    expires_at: Instant,
}

/// in-memory pin-secret server
pub struct LoopbackServer {
    exchange: ServerExchange,
    secrets: Mutex<HashMap<SecretId, StoredSecret>>,
    default_ttl: Duration,
}

impl Default for LoopbackServer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackServer {
    pub fn new() -> Self {
        Self {
            exchange: ServerExchange::new(),
            secrets: Mutex::new(HashMap::new()),
            default_ttl: DEFAULT_SECRET_TTL,
        }
    }

    /// ttl applied when a create request names none
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.exchange = self.exchange.with_session_ttl(ttl);
        self
    }

    pub fn exchange(&self) -> &ServerExchange {
        &self.exchange
    }

    fn secrets(&self) -> std::sync::MutexGuard<'_, HashMap<SecretId, StoredSecret>> {
        self.secrets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn secret_count(&self) -> usize {
        self.secrets().len()
    }

    /// drops expired secrets and login sessions
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let removed = {
            let mut secrets = self.secrets();
            let before = secrets.len();
            secrets.retain(|_, secret| secret.expires_at > now);
            before - secrets.len()
        };
        removed + self.exchange.sweep_sessions()
    }

    fn rejected(status: u16, message: &str) -> TransportError {
        TransportError::Rejected {
            status,
            code: None,
            message: Some(message.to_owned()),
        }
    }

    /// rejection a wrong pin could have caused, always carrying the code
    fn pin_rejected(status: u16) -> TransportError {
        TransportError::Rejected {
            status,
            code: Some(PIN_REJECTED_CODE.to_owned()),
            message: Some(PIN_REJECTED_MESSAGE.to_owned()),
        }
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackServer {
    async fn register_start(
        &self,
        request: &RegisterStartRequest,
    ) -> TransportResult<RegisterStartReply> {
        if request.request.is_empty() {
            return Err(Self::rejected(400, "request is required"));
        }

        let mut raw = [0u8; SECRET_ID_BYTES];
        OsRng.fill_bytes(&mut raw);
        let secret_id = SecretId::from(hex::encode(raw));

        let response = self
            .exchange
            .registration_response(&secret_id, &request.request)
            .map_err(|e| match e {
                ServerError::Malformed(detail) => {
                    Self::rejected(400, &format!("invalid request: {detail}"))
                }
                _ => Self::rejected(500, "opaque registration failed"),
            })?;
        Ok(RegisterStartReply { secret_id, response })
    }

    async fn create_secret(
        &self,
        request: &CreateSecretRequest,
    ) -> TransportResult<CreateSecretReply> {
        if let Some(0) = request.ttl_minutes {
            return Err(Self::rejected(
                400,
                "TTL must be a positive number of minutes",
            ));
        }
        if request.secret_id.is_empty() {
            return Err(Self::rejected(400, "secret ID is required"));
        }
        if request.opaque_upload.is_empty() {
            return Err(Self::rejected(400, "opaque upload is required"));
        }
        if ServerExchange::validate_upload(&request.opaque_upload).is_err() {
            return Err(Self::rejected(400, "invalid opaque upload"));
        }
        if request.envelope.payload.is_empty() {
            return Err(Self::rejected(400, "File or message is required"));
        }

        let ttl = match request.ttl_minutes {
            Some(minutes) => Duration::from_secs(u64::from(minutes) * 60),
            None => self.default_ttl,
        };
        self.secrets().insert(
            request.secret_id.clone(),
            StoredSecret {
                record: request.opaque_upload.clone(),
                envelope: request.envelope.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(CreateSecretReply {
            secret_id: request.secret_id.clone(),
            expires_in_minutes: request
                .ttl_minutes
                .unwrap_or((self.default_ttl.as_secs() / 60) as u32),
        })
    }

    async fn login_start(&self, request: &LoginStartRequest) -> TransportResult<LoginStartReply> {
        if request.secret_id.is_empty() {
            return Err(Self::rejected(400, "secretId is required"));
        }

        let record = {
            let mut secrets = self.secrets();
            let secret = secrets
                .get(&request.secret_id)
                .ok_or_else(|| Self::pin_rejected(404))?;
            if Instant::now() >= secret.expires_at {
                secrets.remove(&request.secret_id);
                return Err(Self::rejected(410, "secret expired"));
            }
            secret.record.clone()
        };

        let (session_id, response) = self
            .exchange
            .login_start(&request.secret_id, &record, &request.request)
            .map_err(|_| Self::rejected(500, "opaque login failed"))?;
        Ok(LoginStartReply { session_id, response })
    }

    async fn reveal_secret(&self, request: &RevealRequest) -> TransportResult<Envelope> {
        if request.session_id.is_empty() || request.finalization.is_empty() {
            return Err(Self::rejected(400, "session_id and finalization are required"));
        }

        self.exchange
            .login_finish(&request.session_id, &request.secret_id, &request.finalization)
            .map_err(|e| match e {
                ServerError::Malformed(_) => Self::rejected(400, "invalid finalization"),
                ServerError::SessionExpired => Self::rejected(400, "session expired, try again"),
                _ => Self::pin_rejected(400),
            })?;

        // single use: gone before the envelope leaves the server
        let secret = self
            .secrets()
            .remove(&request.secret_id)
            .ok_or_else(|| Self::pin_rejected(404))?;
        if Instant::now() >= secret.expires_at {
            return Err(Self::rejected(410, "secret expired"));
        }
        Ok(secret.envelope)
    }
}
