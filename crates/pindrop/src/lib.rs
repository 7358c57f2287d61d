//! # pindrop
//!
//! one-shot pin-protected secret exchange over an opaque pake.
//!
//! the sender seals a message or file under a key only a 6-digit pin can
//! rederive, and the server stores ciphertext it cannot read. the receiver
//! proves knowledge of the pin through an opaque login and the secret is
//! deleted the moment it is handed over.
//!
//! ## flow
//!
//! ```text
//!  sender                      server                     receiver
//!    │  register/start           │                           │
//!    ├──────────────────────────▶│                           │
//!    │◀──────────────────────────┤ secretId + response       │
//!    │  finish ──▶ export key    │                           │
//!    │                           │                           │
//!    │  secrets (record +        │                           │
//!    │   aes-gcm envelope)       │                           │
//!    ├──────────────────────────▶│                           │
//!    │                           │        login/start        │
//!    │                           │◀──────────────────────────┤
//!    │                           ├──────────────────────────▶│
//!    │                           │   sessionId + response    │
//!    │                           │                           │
//!    │                           │   finish ──▶ export key   │
//!    │                           │      secrets/reveal       │
//!    │                           │◀──────────────────────────┤
//!    │          delete ◀─────────┤                           │
//!    │                           ├──────────────────────────▶│
//!    │                           │    envelope ──▶ decrypt   │
//! ```
//!
//! ## properties
//!
//! - the pin never leaves the client; the server sees only pake messages
//! - payloads are aes-256-gcm sealed under a key hkdf-derived from the
//!   pake export key, so the server stores what it cannot open
//! - secrets and login sessions are single use, wrong pin and already-gone
//!   look identical to the receiver
//! - every protocol state is a by-value handle consumed exactly once
//!
//! ## usage
//!
//! ```rust,ignore
//! use pindrop::{Client, HttpTransport, Pin, SecretPayload, RevealResult};
//!
//! let client = Client::new(HttpTransport::new("https://drop.example.net"));
//! let pin = Pin::parse("842119")?;
//!
//! // sender
//! let created = client
//!     .create(&pin, &SecretPayload::Text("hello world".into()), None)
//!     .await?;
//! println!("share this id: {}", created.secret_id);
//!
//! // receiver
//! match client.reveal(&created.secret_id, &pin).await? {
//!     RevealResult::Text(text) => println!("{text}"),
//!     RevealResult::File { name, bytes } => std::fs::write(name, bytes)?,
//! }
//! ```

pub mod classify;
pub mod client;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod opaque;
pub mod pin;
pub mod reveal;
pub mod transport;

#[cfg(feature = "server")]
pub mod loopback;
#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "network")]
pub mod http;

pub use classify::RejectionMatcher;
pub use client::{Client, CreatedSecret, Registration};
pub use envelope::{Envelope, PayloadKind, SecretPayload};
pub use error::{Error, Result};
pub use opaque::{ExportKey, OpaqueClient, PinPake};
pub use pin::Pin;
pub use reveal::RevealResult;
pub use transport::{SecretId, SessionId, Transport};

#[cfg(feature = "server")]
pub use loopback::LoopbackServer;
#[cfg(feature = "server")]
pub use server::{ServerError, ServerExchange};

#[cfg(feature = "network")]
pub use http::HttpTransport;
