//! opaque pake client: cipher suite, single-use handles, provider seam
//!
//! a handle wraps the in-flight client state between start and finish.
//! finish takes the handle by value, so a handle can neither be reused nor
//! finished twice; an abandoned handle drops with its state. the provider
//! is a trait with associated handle types so tests can swap in an
//! instrumented stub and count issue/consume/drop.

use std::fmt;

use argon2::Argon2;
use opaque_ke::ciphersuite::CipherSuite;
use opaque_ke::errors::ProtocolError;
use opaque_ke::key_exchange::tripledh::TripleDh;
use opaque_ke::{
    ClientLogin, ClientLoginFinishParameters, ClientRegistration,
    ClientRegistrationFinishParameters, CredentialResponse, Identifiers, RegistrationResponse,
    Ristretto255,
};
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::pin::Pin;
use crate::{Error, Result};

/// cipher suite shared by client and server: ristretto255 oprf and key
/// exchange, triple-dh, argon2id stretching of the pin
pub struct PinSuite;

impl CipherSuite for PinSuite {
    type OprfCs = Ristretto255;
    type KeGroup = Ristretto255;
    type KeyExchange = TripleDh;
    type Ksf = Argon2<'static>;
}

/// client-only symmetric key output of the pake. never serialized, never
/// transmitted, zeroized on drop. everything sealed for a secret derives
/// from this.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ExportKey(Vec<u8>);

impl ExportKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ExportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExportKey(..)")
    }
}

/// start output: the single-use handle plus the wire message for the server
pub struct StartedRegistration<H> {
    pub handle: H,
    pub message: Vec<u8>,
}

/// registration finish output
pub struct FinishedRegistration {
    /// record upload the server stores alongside the secret
    pub upload: Vec<u8>,
    pub export_key: ExportKey,
}

/// start output: the single-use handle plus the wire message for the server
pub struct StartedLogin<H> {
    pub handle: H,
    pub message: Vec<u8>,
}

/// login finish output
pub struct FinishedLogin {
    /// ke3 finalization proving the pin to the server
    pub finalization: Vec<u8>,
    pub export_key: ExportKey,
}

/// pake provider seam. the real provider is [`OpaqueClient`]; tests use
/// stubs whose handles track their own disposal.
pub trait PinPake: Send + Sync {
    type RegistrationHandle: Send;
    type LoginHandle: Send;

    fn registration_start(
        &self,
        pin: &Pin,
    ) -> Result<StartedRegistration<Self::RegistrationHandle>>;

    fn registration_finish(
        &self,
        handle: Self::RegistrationHandle,
        pin: &Pin,
        response: &[u8],
    ) -> Result<FinishedRegistration>;

    fn login_start(&self, pin: &Pin) -> Result<StartedLogin<Self::LoginHandle>>;

    fn login_finish(
        &self,
        handle: Self::LoginHandle,
        pin: &Pin,
        response: &[u8],
    ) -> Result<FinishedLogin>;
}

/// in-flight registration state, consumed by `registration_finish`
pub struct RegistrationHandle {
    state: ClientRegistration<PinSuite>,
}

/// in-flight login state, consumed by `login_finish`
pub struct LoginHandle {
    state: ClientLogin<PinSuite>,
}

/// pake provider backed by opaque-ke
#[derive(Clone, Copy, Default)]
pub struct OpaqueClient;

impl PinPake for OpaqueClient {
    type RegistrationHandle = RegistrationHandle;
    type LoginHandle = LoginHandle;

    fn registration_start(&self, pin: &Pin) -> Result<StartedRegistration<RegistrationHandle>> {
        let mut rng = OsRng;
        let start = ClientRegistration::<PinSuite>::start(&mut rng, pin.as_bytes()).map_err(|e| {
            tracing::debug!(error = %e, "client registration start failed");
            Error::RegistrationStartFailed("could not start pin registration".into())
        })?;
        Ok(StartedRegistration {
            handle: RegistrationHandle { state: start.state },
            message: start.message.serialize().to_vec(),
        })
    }

    fn registration_finish(
        &self,
        handle: RegistrationHandle,
        pin: &Pin,
        response: &[u8],
    ) -> Result<FinishedRegistration> {
        let response = RegistrationResponse::<PinSuite>::deserialize(response).map_err(|e| {
            tracing::debug!(error = %e, "registration response did not parse");
            Error::ProtocolResponseInvalid
        })?;
        let mut rng = OsRng;
        let ksf = Argon2::default();
        let params = ClientRegistrationFinishParameters::new(Identifiers::default(), Some(&ksf));
        let finish = handle
            .state
            .finish(&mut rng, pin.as_bytes(), response, params)
            .map_err(|e| {
                tracing::debug!(error = %e, "client registration finish failed");
                Error::RegistrationFinishFailed
            })?;
        Ok(FinishedRegistration {
            upload: finish.message.serialize().to_vec(),
            export_key: ExportKey::new(finish.export_key.to_vec()),
        })
    }

    fn login_start(&self, pin: &Pin) -> Result<StartedLogin<LoginHandle>> {
        let mut rng = OsRng;
        let start = ClientLogin::<PinSuite>::start(&mut rng, pin.as_bytes()).map_err(|e| {
            tracing::debug!(error = %e, "client login start failed");
            Error::LoginInitFailed("could not start pin login".into())
        })?;
        Ok(StartedLogin {
            handle: LoginHandle { state: start.state },
            message: start.message.serialize().to_vec(),
        })
    }

    fn login_finish(
        &self,
        handle: LoginHandle,
        pin: &Pin,
        response: &[u8],
    ) -> Result<FinishedLogin> {
        let response = CredentialResponse::<PinSuite>::deserialize(response).map_err(|e| {
            tracing::debug!(error = %e, "credential response did not parse");
            Error::ProtocolResponseInvalid
        })?;
        let ksf = Argon2::default();
        let params = ClientLoginFinishParameters::new(None, Identifiers::default(), Some(&ksf));
        let finish = handle
            .state
            .finish(pin.as_bytes(), response, params)
            .map_err(|e| match e {
                // the ke fails client-side when the pin does not match the record
                ProtocolError::InvalidLoginError => Error::InvalidPin,
                other => {
                    tracing::debug!(error = %other, "client login finish failed");
                    Error::LoginFinishFailed
                }
            })?;
        Ok(FinishedLogin {
            finalization: finish.message.serialize().to_vec(),
            export_key: ExportKey::new(finish.export_key.to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_start_produces_message() {
        let pin = Pin::parse("842119").unwrap();
        let started = OpaqueClient.registration_start(&pin).unwrap();
        assert!(!started.message.is_empty());
    }

    #[test]
    fn test_registration_finish_rejects_garbage_response() {
        let pin = Pin::parse("842119").unwrap();
        let started = OpaqueClient.registration_start(&pin).unwrap();
        let result = OpaqueClient.registration_finish(started.handle, &pin, b"not a response");
        assert!(matches!(result, Err(Error::ProtocolResponseInvalid)));
    }

    #[test]
    fn test_login_finish_rejects_garbage_response() {
        let pin = Pin::parse("842119").unwrap();
        let started = OpaqueClient.login_start(&pin).unwrap();
        let result = OpaqueClient.login_finish(started.handle, &pin, b"not a response");
        assert!(matches!(result, Err(Error::ProtocolResponseInvalid)));
    }

    #[test]
    fn test_export_key_debug_is_opaque() {
        let key = ExportKey::new(vec![1, 2, 3]);
        assert_eq!(format!("{key:?}"), "ExportKey(..)");
    }
}
