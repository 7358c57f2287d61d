//! receiver-side orchestration
//!
//! reveal is a straight line: login start, login finish, fetch, decrypt.
//! each step consumes the previous step's state by value, so no half-done
//! login can be resumed or reused after a failure.

use crate::classify::{stage_error, Stage};
use crate::client::Client;
use crate::envelope::{open_payload, restore_file_name, Envelope, PayloadKind};
use crate::error::{Error, Result};
use crate::opaque::{ExportKey, FinishedLogin, PinPake, StartedLogin};
use crate::pin::Pin;
use crate::transport::{LoginStartRequest, RevealRequest, SecretId, SessionId, Transport};

/// decrypted secret handed back to the caller
pub enum RevealResult {
    Text(String),
    File { name: String, bytes: Vec<u8> },
}

// contents stay out of logs
impl std::fmt::Debug for RevealResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevealResult::Text(text) => f
                .debug_struct("RevealResult::Text")
                .field("len", &text.len())
                .finish(),
            RevealResult::File { name, bytes } => f
                .debug_struct("RevealResult::File")
                .field("name", name)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

struct LoginStarted<H> {
    handle: H,
    session_id: SessionId,
    response: Vec<u8>,
}

struct LoginFinished {
    session_id: SessionId,
    finalization: Vec<u8>,
    export_key: ExportKey,
}

struct Revealed {
    envelope: Envelope,
    export_key: ExportKey,
}

impl<T, P> Client<T, P>
where
    T: Transport,
    P: PinPake,
{
    /// fetches and decrypts the secret behind `secret_id`, deleting it on the
    /// server. a wrong pin, an already-claimed secret and an unknown id all
    /// fail the same way, with [`Error::InvalidPin`].
    pub async fn reveal(&self, secret_id: &SecretId, pin: &Pin) -> Result<RevealResult> {
        let started = self.login_start(secret_id, pin).await?;
        let finished = self.login_finish(started, pin)?;
        let revealed = self.fetch_envelope(secret_id, finished).await?;
        self.open_result(revealed)
    }

    async fn login_start(
        &self,
        secret_id: &SecretId,
        pin: &Pin,
    ) -> Result<LoginStarted<P::LoginHandle>> {
        let StartedLogin { handle, message } = self.pake.login_start(pin)?;

        let request = LoginStartRequest {
            secret_id: secret_id.clone(),
            request: message,
        };
        let reply = match self.transport.login_start(&request).await {
            Ok(reply) => reply,
            Err(failure) => {
                drop(handle);
                return Err(stage_error(&self.matcher, Stage::LoginStart, failure));
            }
        };
        if reply.session_id.is_empty() || reply.response.is_empty() {
            drop(handle);
            return Err(Error::ProtocolResponseInvalid);
        }

        Ok(LoginStarted {
            handle,
            session_id: reply.session_id,
            response: reply.response,
        })
    }

    fn login_finish(
        &self,
        started: LoginStarted<P::LoginHandle>,
        pin: &Pin,
    ) -> Result<LoginFinished> {
        let LoginStarted {
            handle,
            session_id,
            response,
        } = started;
        let FinishedLogin {
            finalization,
            export_key,
        } = self.pake.login_finish(handle, pin, &response)?;
        Ok(LoginFinished {
            session_id,
            finalization,
            export_key,
        })
    }

    async fn fetch_envelope(
        &self,
        secret_id: &SecretId,
        finished: LoginFinished,
    ) -> Result<Revealed> {
        let request = RevealRequest {
            secret_id: secret_id.clone(),
            session_id: finished.session_id,
            finalization: finished.finalization,
        };
        let envelope = self
            .transport
            .reveal_secret(&request)
            .await
            .map_err(|failure| stage_error(&self.matcher, Stage::Reveal, failure))?;
        tracing::debug!(secret_id = %secret_id, "secret revealed, decrypting");
        Ok(Revealed {
            envelope,
            export_key: finished.export_key,
        })
    }

    fn open_result(&self, revealed: Revealed) -> Result<RevealResult> {
        let bytes = open_payload(&revealed.export_key, &revealed.envelope)?;
        match revealed.envelope.payload_type {
            PayloadKind::Text => match String::from_utf8(bytes) {
                Ok(text) => Ok(RevealResult::Text(text)),
                Err(_) => {
                    tracing::debug!("text payload decrypted to invalid utf-8");
                    Err(Error::DecryptionFailed)
                }
            },
            PayloadKind::File => Ok(RevealResult::File {
                name: restore_file_name(&revealed.envelope.file_name),
                bytes,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::PIN_REJECTED_MESSAGE;
    use crate::envelope::{seal_payload, SecretPayload};
    use crate::opaque::{FinishedRegistration, StartedRegistration};
    use crate::transport::{
        CreateSecretReply, CreateSecretRequest, LoginStartReply, RegisterStartReply,
        RegisterStartRequest, TransportError, TransportResult,
    };
    use std::sync::Mutex;

    fn stub_key() -> ExportKey {
        ExportKey::new(vec![9u8; 64])
    }

    struct StubPake;

    impl PinPake for StubPake {
        type RegistrationHandle = ();
        type LoginHandle = ();

        fn registration_start(&self, _pin: &Pin) -> Result<StartedRegistration<()>> {
            Ok(StartedRegistration {
                handle: (),
                message: vec![0xaa],
            })
        }

        fn registration_finish(
            &self,
            _handle: (),
            _pin: &Pin,
            response: &[u8],
        ) -> Result<FinishedRegistration> {
            Ok(FinishedRegistration {
                upload: response.to_vec(),
                export_key: stub_key(),
            })
        }

        fn login_start(&self, _pin: &Pin) -> Result<StartedLogin<()>> {
            Ok(StartedLogin {
                handle: (),
                message: vec![0xbb],
            })
        }

        fn login_finish(&self, _handle: (), _pin: &Pin, _response: &[u8]) -> Result<FinishedLogin> {
            Ok(FinishedLogin {
                finalization: vec![0xcc],
                export_key: stub_key(),
            })
        }
    }

    #[derive(Default)]
    struct ScriptedTransport {
        login_reply: Mutex<Option<TransportResult<LoginStartReply>>>,
        reveal_reply: Mutex<Option<TransportResult<Envelope>>>,
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn register_start(
            &self,
            _request: &RegisterStartRequest,
        ) -> TransportResult<RegisterStartReply> {
            unreachable!("not used in these tests")
        }

        async fn create_secret(
            &self,
            _request: &CreateSecretRequest,
        ) -> TransportResult<CreateSecretReply> {
            unreachable!("not used in these tests")
        }

        async fn login_start(
            &self,
            _request: &LoginStartRequest,
        ) -> TransportResult<LoginStartReply> {
            self.login_reply.lock().unwrap().take().unwrap()
        }

        async fn reveal_secret(&self, _request: &RevealRequest) -> TransportResult<Envelope> {
            self.reveal_reply.lock().unwrap().take().unwrap()
        }
    }

    fn pin() -> Pin {
        Pin::parse("842119").unwrap()
    }

    fn login_ok() -> TransportResult<LoginStartReply> {
        Ok(LoginStartReply {
            session_id: SessionId::from("s1"),
            response: vec![1, 2],
        })
    }

    #[tokio::test]
    async fn test_reveal_text_round_trip() {
        let envelope =
            seal_payload(&stub_key(), &SecretPayload::Text("hello world".into())).unwrap();
        let transport = ScriptedTransport::default();
        *transport.login_reply.lock().unwrap() = Some(login_ok());
        *transport.reveal_reply.lock().unwrap() = Some(Ok(envelope));

        let client = Client::new(transport).with_pake(StubPake);
        match client.reveal(&SecretId::from("abc"), &pin()).await.unwrap() {
            RevealResult::Text(text) => assert_eq!(text, "hello world"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reveal_restores_file_name() {
        let payload = SecretPayload::File {
            name: "report.pdf".into(),
            bytes: vec![4, 5, 6],
        };
        let envelope = seal_payload(&stub_key(), &payload).unwrap();
        let transport = ScriptedTransport::default();
        *transport.login_reply.lock().unwrap() = Some(login_ok());
        *transport.reveal_reply.lock().unwrap() = Some(Ok(envelope));

        let client = Client::new(transport).with_pake(StubPake);
        match client.reveal(&SecretId::from("abc"), &pin()).await.unwrap() {
            RevealResult::File { name, bytes } => {
                assert_eq!(name, "report.pdf");
                assert_eq!(bytes, vec![4, 5, 6]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_rejection_is_invalid_pin() {
        let transport = ScriptedTransport::default();
        *transport.login_reply.lock().unwrap() = Some(Err(TransportError::Rejected {
            status: 404,
            code: Some("invalid_pin".into()),
            message: Some(PIN_REJECTED_MESSAGE.into()),
        }));
        let client = Client::new(transport).with_pake(StubPake);
        let result = client.reveal(&SecretId::from("abc"), &pin()).await;
        assert!(matches!(result, Err(Error::InvalidPin)));
    }

    #[tokio::test]
    async fn test_empty_session_id_rejected() {
        let transport = ScriptedTransport::default();
        *transport.login_reply.lock().unwrap() = Some(Ok(LoginStartReply {
            session_id: SessionId::from(""),
            response: vec![1],
        }));
        let client = Client::new(transport).with_pake(StubPake);
        let result = client.reveal(&SecretId::from("abc"), &pin()).await;
        assert!(matches!(result, Err(Error::ProtocolResponseInvalid)));
    }

    #[tokio::test]
    async fn test_text_payload_must_be_utf8() {
        let key = stub_key();
        let payload = SecretPayload::File {
            name: "blob".into(),
            bytes: vec![0xff, 0xfe, 0x00],
        };
        let mut envelope = seal_payload(&key, &payload).unwrap();
        // lie about the kind so decrypt succeeds but utf-8 decoding cannot
        envelope.payload_type = PayloadKind::Text;

        let transport = ScriptedTransport::default();
        *transport.login_reply.lock().unwrap() = Some(login_ok());
        *transport.reveal_reply.lock().unwrap() = Some(Ok(envelope));

        let client = Client::new(transport).with_pake(StubPake);
        let result = client.reveal(&SecretId::from("abc"), &pin()).await;
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[tokio::test]
    async fn test_expired_secret_keeps_server_message() {
        let transport = ScriptedTransport::default();
        *transport.login_reply.lock().unwrap() = Some(Err(TransportError::Rejected {
            status: 410,
            code: None,
            message: Some("secret expired".into()),
        }));
        let client = Client::new(transport).with_pake(StubPake);
        match client.reveal(&SecretId::from("abc"), &pin()).await {
            Err(Error::LoginInitFailed(detail)) => assert_eq!(detail, "secret expired"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
