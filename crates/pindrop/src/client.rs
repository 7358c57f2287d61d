//! sender-side orchestration
//!
//! [`Client`] drives the pake and the transport without holding state between
//! calls; every protocol state lives in a by-value handle that a single call
//! consumes. [`Client::create`] is the whole sender flow: register the pin,
//! seal the payload, upload both.

use crate::classify::{stage_error, RejectionMatcher, Stage};
use crate::envelope::{seal_payload, SecretPayload};
use crate::error::{Error, Result};
use crate::opaque::{ExportKey, OpaqueClient, PinPake, StartedRegistration};
use crate::pin::Pin;
use crate::transport::{CreateSecretRequest, RegisterStartRequest, SecretId, Transport};

/// outcome of [`Client::register`]: everything the upload step needs
#[derive(Debug)]
pub struct Registration {
    pub secret_id: SecretId,
    pub upload: Vec<u8>,
    pub export_key: ExportKey,
}

/// outcome of [`Client::create`]
#[derive(Debug, Clone)]
pub struct CreatedSecret {
    pub secret_id: SecretId,
    pub sealed_name: String,
    pub expires_in_minutes: u32,
}

/// pin-secret exchange client over any [`Transport`]
pub struct Client<T, P = OpaqueClient>
where
    T: Transport,
    P: PinPake,
{
    pub(crate) transport: T,
    pub(crate) pake: P,
    pub(crate) matcher: RejectionMatcher,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pake: OpaqueClient,
            matcher: RejectionMatcher::default(),
        }
    }
}

impl<T, P> Client<T, P>
where
    T: Transport,
    P: PinPake,
{
    /// swaps the pake provider, keeping transport and matcher
    pub fn with_pake<Q: PinPake>(self, pake: Q) -> Client<T, Q> {
        Client {
            transport: self.transport,
            pake,
            matcher: self.matcher,
        }
    }

    pub fn with_matcher(mut self, matcher: RejectionMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// the underlying transport, mostly for loopback inspection in tests
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// registers `pin` with the server and returns the finished record.
    ///
    /// the registration handle produced by the first pake step is consumed
    /// exactly once: either by the finish step, or by dropping it when the
    /// server round trip fails in between.
    pub async fn register(&self, pin: &Pin) -> Result<Registration> {
        let StartedRegistration { handle, message } = self.pake.registration_start(pin)?;

        let request = RegisterStartRequest { request: message };
        let reply = match self.transport.register_start(&request).await {
            Ok(reply) => reply,
            Err(failure) => {
                drop(handle);
                return Err(stage_error(&self.matcher, Stage::RegisterStart, failure));
            }
        };
        if reply.secret_id.is_empty() || reply.response.is_empty() {
            drop(handle);
            return Err(Error::ProtocolResponseInvalid);
        }

        let finished = self.pake.registration_finish(handle, pin, &reply.response)?;
        tracing::debug!(secret_id = %reply.secret_id, "pin registered");
        Ok(Registration {
            secret_id: reply.secret_id,
            upload: finished.upload,
            export_key: finished.export_key,
        })
    }

    /// registers, seals and uploads in one call. `ttl_minutes` of `None`
    /// leaves expiry to the server default.
    pub async fn create(
        &self,
        pin: &Pin,
        payload: &SecretPayload,
        ttl_minutes: Option<u32>,
    ) -> Result<CreatedSecret> {
        let registration = self.register(pin).await?;
        let envelope = seal_payload(&registration.export_key, payload)?;
        let sealed_name = envelope.file_name.clone();

        let request = CreateSecretRequest {
            secret_id: registration.secret_id,
            opaque_upload: registration.upload,
            ttl_minutes,
            envelope,
        };
        let reply = self
            .transport
            .create_secret(&request)
            .await
            .map_err(|failure| stage_error(&self.matcher, Stage::CreateSecret, failure))?;

        tracing::info!(
            secret_id = %reply.secret_id,
            expires_in_minutes = reply.expires_in_minutes,
            "secret stored"
        );
        Ok(CreatedSecret {
            secret_id: reply.secret_id,
            sealed_name,
            expires_in_minutes: reply.expires_in_minutes,
        })
    }
}
