//! transport failure classification
//!
//! turns [`TransportError`] values into the user-facing [`Error`] taxonomy.
//! wrong-pin detection is code-first: servers tag every pin-indistinguishable
//! rejection with [`PIN_REJECTED_CODE`], and the message table only exists for
//! servers that predate the code field.

use crate::error::Error;
use crate::transport::TransportError;

/// machine code attached to every rejection a wrong pin could have caused
pub const PIN_REJECTED_CODE: &str = "invalid_pin";

/// canonical human message carried alongside [`PIN_REJECTED_CODE`]
pub const PIN_REJECTED_MESSAGE: &str = "File not found or invalid PIN";

/// messages older servers used for the same rejection, english and russian
pub const LEGACY_PIN_MESSAGES: [&str; 4] = [
    "File not found or invalid PIN",
    "Invalid PIN or file already deleted",
    "Файл удален или неверный пин-код",
    "Неправильный PIN или файл уже удален",
];

/// which orchestrator call produced the failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RegisterStart,
    CreateSecret,
    LoginStart,
    Reveal,
}

/// decides whether a rejection message means "wrong pin or secret gone".
///
/// matching is equality on trimmed, lowercased text, never substring search;
/// a server message that merely mentions a pin must not flip classification.
#[derive(Debug, Clone)]
pub struct RejectionMatcher {
    messages: Vec<String>,
}

impl Default for RejectionMatcher {
    fn default() -> Self {
        Self {
            messages: LEGACY_PIN_MESSAGES
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }
}

impl RejectionMatcher {
    /// matcher recognizing only the given messages, for servers with a
    /// different legacy vocabulary
    pub fn with_messages<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            messages: messages
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    pub fn is_pin_rejection(&self, code: Option<&str>, message: Option<&str>) -> bool {
        if code == Some(PIN_REJECTED_CODE) {
            return true;
        }
        match message {
            Some(message) => {
                let normalized = message.trim().to_lowercase();
                self.messages.iter().any(|known| *known == normalized)
            }
            None => false,
        }
    }
}

impl Stage {
    fn tag(self, detail: String) -> Error {
        match self {
            Stage::RegisterStart => Error::RegistrationStartFailed(detail),
            Stage::CreateSecret => Error::CreateSecretFailed(detail),
            Stage::LoginStart => Error::LoginInitFailed(detail),
            Stage::Reveal => Error::RevealRequestFailed(detail),
        }
    }
}

/// maps a transport failure at `stage` onto the public taxonomy
pub fn stage_error(matcher: &RejectionMatcher, stage: Stage, failure: TransportError) -> Error {
    match failure {
        TransportError::Rejected {
            status,
            code,
            message,
        } => {
            if matcher.is_pin_rejection(code.as_deref(), message.as_deref()) {
                tracing::debug!(status, ?stage, "server rejection classified as pin failure");
                return Error::InvalidPin;
            }
            match message {
                Some(message) => stage.tag(message),
                None => stage.tag(format!("request failed (status {status})")),
            }
        }
        TransportError::Network(detail) => stage.tag(format!("network error: {detail}")),
        TransportError::Decode(detail) => {
            tracing::debug!(?stage, %detail, "server reply failed to decode");
            Error::ProtocolResponseInvalid
        }
    }
}
