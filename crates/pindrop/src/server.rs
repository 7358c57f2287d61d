//! server side of the pake handshake
//!
//! [`ServerExchange`] owns the long-lived server setup and the in-memory
//! table of pending login sessions. storage of secrets is not its business;
//! callers hand it record blobs and it hands back protocol messages.
//!
//! login sessions are single use and expire after [`DEFAULT_SESSION_TTL`].
//! a malformed finalization does not consume the session, matching the
//! deployed behavior where a client may retry with a well-formed message.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use opaque_ke::{
    CredentialFinalization, CredentialRequest, RegistrationRequest, RegistrationUpload,
    ServerLogin, ServerLoginStartParameters, ServerRegistration, ServerSetup,
};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::opaque::PinSuite;
use crate::transport::{SecretId, SessionId};

/// how long a started login may wait for its finalization
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(120);

const SESSION_ID_BYTES: usize = 16;

#[derive(Debug, Error)]
pub enum ServerError {
    /// a client-sent blob failed to deserialize
    #[error("malformed client message: {0}")]
    Malformed(String),

    #[error("opaque session not found")]
    SessionNotFound,

    #[error("opaque session expired")]
    SessionExpired,

    /// finalization did not verify, or it named the wrong secret
    #[error("pin verification failed")]
    PinVerificationFailed,

    /// internal protocol failure, not attributable to the client
    #[error("opaque protocol failure: {0}")]
    Protocol(String),
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

struct LoginSession {
    secret_id: SecretId,
    state: ServerLogin<PinSuite>,
    expires_at: Instant,
}

/// pake server state: one setup keypair plus pending login sessions
pub struct ServerExchange {
    setup: ServerSetup<PinSuite>,
    session_ttl: Duration,
    sessions: Mutex<HashMap<SessionId, LoginSession>>,
}

impl Default for ServerExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerExchange {
    /// fresh setup keypair; registrations made against it are only usable
    /// while this exchange (or one restored from its bytes) is alive
    pub fn new() -> Self {
        Self {
            setup: ServerSetup::new(&mut OsRng),
            session_ttl: DEFAULT_SESSION_TTL,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// restores the setup persisted by [`Self::setup_bytes`]
    pub fn from_setup_bytes(bytes: &[u8]) -> ServerResult<Self> {
        let setup = ServerSetup::deserialize(bytes)
            .map_err(|e| ServerError::Protocol(format!("setup deserialize: {e:?}")))?;
        Ok(Self {
            setup,
            session_ttl: DEFAULT_SESSION_TTL,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_session_ttl(mut self, session_ttl: Duration) -> Self {
        self.session_ttl = session_ttl;
        self
    }

    /// setup keypair for persistence across restarts
    pub fn setup_bytes(&self) -> Vec<u8> {
        self.setup.serialize().to_vec()
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, LoginSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// answers a registration start message for `secret_id`
    pub fn registration_response(
        &self,
        secret_id: &SecretId,
        request: &[u8],
    ) -> ServerResult<Vec<u8>> {
        let request = RegistrationRequest::<PinSuite>::deserialize(request)
            .map_err(|e| ServerError::Malformed(format!("registration request: {e:?}")))?;
        let started = ServerRegistration::<PinSuite>::start(
            &self.setup,
            request,
            secret_id.as_str().as_bytes(),
        )
        .map_err(|e| ServerError::Protocol(format!("registration start: {e:?}")))?;
        Ok(started.message.serialize().to_vec())
    }

    /// checks that an uploaded registration record parses before storage
    pub fn validate_upload(upload: &[u8]) -> ServerResult<()> {
        RegistrationUpload::<PinSuite>::deserialize(upload)
            .map(|_| ())
            .map_err(|e| ServerError::Malformed(format!("registration upload: {e:?}")))
    }

    /// answers a login start message against a stored record, opening a
    /// single-use session bound to `secret_id`
    pub fn login_start(
        &self,
        secret_id: &SecretId,
        record: &[u8],
        request: &[u8],
    ) -> ServerResult<(SessionId, Vec<u8>)> {
        let upload = RegistrationUpload::<PinSuite>::deserialize(record)
            .map_err(|e| ServerError::Protocol(format!("stored record: {e:?}")))?;
        let record = ServerRegistration::<PinSuite>::finish(upload);
        let request = CredentialRequest::<PinSuite>::deserialize(request)
            .map_err(|e| ServerError::Malformed(format!("credential request: {e:?}")))?;

        let started = ServerLogin::<PinSuite>::start(
            &mut OsRng,
            &self.setup,
            Some(record),
            request,
            secret_id.as_str().as_bytes(),
            ServerLoginStartParameters::default(),
        )
        .map_err(|e| ServerError::Protocol(format!("login start: {e:?}")))?;

        let mut raw = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut raw);
        let session_id = SessionId::from(hex::encode(raw));

        self.sessions().insert(
            session_id.clone(),
            LoginSession {
                secret_id: secret_id.clone(),
                state: started.state,
                expires_at: Instant::now() + self.session_ttl,
            },
        );
        tracing::debug!(session_id = %session_id, "login session opened");
        Ok((session_id, started.message.serialize().to_vec()))
    }

    /// verifies the finalization and consumes the session. the session is
    /// only consumed once the finalization parses.
    pub fn login_finish(
        &self,
        session_id: &SessionId,
        secret_id: &SecretId,
        finalization: &[u8],
    ) -> ServerResult<()> {
        let finalization = CredentialFinalization::<PinSuite>::deserialize(finalization)
            .map_err(|e| ServerError::Malformed(format!("finalization: {e:?}")))?;

        let session = self
            .sessions()
            .remove(session_id)
            .ok_or(ServerError::SessionNotFound)?;
        if Instant::now() >= session.expires_at {
            return Err(ServerError::SessionExpired);
        }
        if session.secret_id != *secret_id {
            tracing::debug!(session_id = %session_id, "session bound to a different secret");
            return Err(ServerError::PinVerificationFailed);
        }

        session
            .state
            .finish(finalization)
            .map(|_| ())
            .map_err(|_| ServerError::PinVerificationFailed)
    }

    /// drops expired sessions, returning how many were removed
    pub fn sweep_sessions(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        before - sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opaque::{ExportKey, OpaqueClient, PinPake};
    use crate::pin::Pin;

    fn pin() -> Pin {
        Pin::parse("842119").unwrap()
    }

    fn register(exchange: &ServerExchange, secret_id: &SecretId, pin: &Pin) -> Vec<u8> {
        let pake = OpaqueClient;
        let started = pake.registration_start(pin).unwrap();
        let response = exchange
            .registration_response(secret_id, &started.message)
            .unwrap();
        let finished = pake
            .registration_finish(started.handle, pin, &response)
            .unwrap();
        finished.upload
    }

    fn login(
        exchange: &ServerExchange,
        secret_id: &SecretId,
        record: &[u8],
        pin: &Pin,
    ) -> (SessionId, Vec<u8>, ExportKey) {
        let pake = OpaqueClient;
        let started = pake.login_start(pin).unwrap();
        let (session_id, response) = exchange
            .login_start(secret_id, record, &started.message)
            .unwrap();
        let finished = pake.login_finish(started.handle, pin, &response).unwrap();
        (session_id, finished.finalization, finished.export_key)
    }

    #[test]
    fn test_full_handshake_verifies() {
        let exchange = ServerExchange::new();
        let secret_id = SecretId::from("s-1");
        let record = register(&exchange, &secret_id, &pin());
        ServerExchange::validate_upload(&record).unwrap();

        let (session_id, finalization, _) = login(&exchange, &secret_id, &record, &pin());
        exchange
            .login_finish(&session_id, &secret_id, &finalization)
            .unwrap();
    }

    #[test]
    fn test_export_key_stable_across_login() {
        let exchange = ServerExchange::new();
        let secret_id = SecretId::from("s-1");
        let pake = OpaqueClient;

        let started = pake.registration_start(&pin()).unwrap();
        let response = exchange
            .registration_response(&secret_id, &started.message)
            .unwrap();
        let finished = pake
            .registration_finish(started.handle, &pin(), &response)
            .unwrap();

        let (_, _, login_key) = login(&exchange, &secret_id, &finished.upload, &pin());
        assert_eq!(finished.export_key.as_bytes(), login_key.as_bytes());
    }

    #[test]
    fn test_session_is_single_use() {
        let exchange = ServerExchange::new();
        let secret_id = SecretId::from("s-1");
        let record = register(&exchange, &secret_id, &pin());

        let (session_id, finalization, _) = login(&exchange, &secret_id, &record, &pin());
        exchange
            .login_finish(&session_id, &secret_id, &finalization)
            .unwrap();
        let again = exchange.login_finish(&session_id, &secret_id, &finalization);
        assert!(matches!(again, Err(ServerError::SessionNotFound)));
    }

    #[test]
    fn test_malformed_finalization_keeps_session() {
        let exchange = ServerExchange::new();
        let secret_id = SecretId::from("s-1");
        let record = register(&exchange, &secret_id, &pin());

        let (session_id, finalization, _) = login(&exchange, &secret_id, &record, &pin());
        let garbage = exchange.login_finish(&session_id, &secret_id, b"not a finalization");
        assert!(matches!(garbage, Err(ServerError::Malformed(_))));
        // the session survived the malformed attempt
        exchange
            .login_finish(&session_id, &secret_id, &finalization)
            .unwrap();
    }

    #[test]
    fn test_session_bound_to_secret() {
        let exchange = ServerExchange::new();
        let secret_id = SecretId::from("s-1");
        let record = register(&exchange, &secret_id, &pin());

        let (session_id, finalization, _) = login(&exchange, &secret_id, &record, &pin());
        let other = SecretId::from("s-2");
        let result = exchange.login_finish(&session_id, &other, &finalization);
        assert!(matches!(result, Err(ServerError::PinVerificationFailed)));
    }

    #[test]
    fn test_expired_session_rejected() {
        let exchange = ServerExchange::new().with_session_ttl(Duration::ZERO);
        let secret_id = SecretId::from("s-1");
        let record = register(&exchange, &secret_id, &pin());

        let (session_id, finalization, _) = login(&exchange, &secret_id, &record, &pin());
        let result = exchange.login_finish(&session_id, &secret_id, &finalization);
        assert!(matches!(result, Err(ServerError::SessionExpired)));
    }

    #[test]
    fn test_sweep_drops_expired_sessions() {
        let exchange = ServerExchange::new().with_session_ttl(Duration::ZERO);
        let secret_id = SecretId::from("s-1");
        let record = register(&exchange, &secret_id, &pin());
        let _ = login(&exchange, &secret_id, &record, &pin());
        assert_eq!(exchange.session_count(), 1);
        assert_eq!(exchange.sweep_sessions(), 1);
        assert_eq!(exchange.session_count(), 0);
    }

    #[test]
    fn test_setup_survives_serialization() {
        let exchange = ServerExchange::new();
        let secret_id = SecretId::from("s-1");
        let record = register(&exchange, &secret_id, &pin());

        let restored = ServerExchange::from_setup_bytes(&exchange.setup_bytes()).unwrap();
        let (session_id, finalization, _) = login(&restored, &secret_id, &record, &pin());
        restored
            .login_finish(&session_id, &secret_id, &finalization)
            .unwrap();
    }

    #[test]
    fn test_registration_rejects_garbage_request() {
        let exchange = ServerExchange::new();
        let result = exchange.registration_response(&SecretId::from("s-1"), b"junk");
        assert!(matches!(result, Err(ServerError::Malformed(_))));
    }
}
