//! error types for pindrop
//!
//! one closed taxonomy for every flow. messages are safe to show to an end
//! user as-is; primitive diagnostics never end up in them. stage variants
//! that carry a string hold the server-provided message when there was one.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// input rejected before any network or crypto call
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// wrong pin, or the secret is gone (consumed, expired, never existed).
    /// deliberately one outcome for all of those.
    #[error("invalid pin or secret already gone")]
    InvalidPin,

    /// transport succeeded but the reply is missing required fields
    #[error("invalid response from server")]
    ProtocolResponseInvalid,

    #[error("registration start failed: {0}")]
    RegistrationStartFailed(String),

    #[error("could not finish pin registration")]
    RegistrationFinishFailed,

    #[error("secret upload failed: {0}")]
    CreateSecretFailed(String),

    #[error("login start failed: {0}")]
    LoginInitFailed(String),

    #[error("could not finish pin login")]
    LoginFinishFailed,

    #[error("reveal request failed: {0}")]
    RevealRequestFailed(String),

    /// payload did not open after a successful reveal. distinct from
    /// InvalidPin: the server accepted the login, the bytes did not check out.
    #[error("decryption failed")]
    DecryptionFailed,
}
