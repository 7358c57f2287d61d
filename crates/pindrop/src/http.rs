//! http transport
//!
//! reqwest-backed [`Transport`] speaking the json contract of the pindrop
//! server. error bodies are parsed tolerantly: a json `{error, code}` body
//! when the server sends one, the raw text otherwise, so legacy servers
//! still classify correctly.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::envelope::Envelope;
use crate::transport::{
    CreateSecretReply, CreateSecretRequest, ErrorReply, LoginStartReply, LoginStartRequest,
    RegisterStartReply, RegisterStartRequest, RevealRequest, Transport, TransportError,
    TransportResult,
};

/// http client for a pindrop server
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// swaps the inner client, for timeouts or proxy settings
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Reply>(&self, path: &str, body: &Req) -> TransportResult<Reply>
    where
        Req: Serialize + Sync,
        Reply: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.ok();
            return Err(Self::rejection(status, body));
        }
        response
            .json::<Reply>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    fn rejection(status: StatusCode, body: Option<String>) -> TransportError {
        if let Some(reply) = body
            .as_deref()
            .and_then(|text| serde_json::from_str::<ErrorReply>(text).ok())
        {
            return TransportError::Rejected {
                status: status.as_u16(),
                code: reply.code,
                message: Some(reply.error),
            };
        }
        TransportError::Rejected {
            status: status.as_u16(),
            code: None,
            message: body.filter(|text| !text.trim().is_empty()),
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn register_start(
        &self,
        request: &RegisterStartRequest,
    ) -> TransportResult<RegisterStartReply> {
        self.post("/opaque/register/start", request).await
    }

    async fn create_secret(
        &self,
        request: &CreateSecretRequest,
    ) -> TransportResult<CreateSecretReply> {
        self.post("/secrets", request).await
    }

    async fn login_start(&self, request: &LoginStartRequest) -> TransportResult<LoginStartReply> {
        self.post("/opaque/login/start", request).await
    }

    async fn reveal_secret(&self, request: &RevealRequest) -> TransportResult<Envelope> {
        self.post("/secrets/reveal", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slashes_trimmed() {
        let transport = HttpTransport::new("https://drop.example.net//");
        assert_eq!(transport.base_url(), "https://drop.example.net");
    }

    #[test]
    fn test_rejection_parses_json_body() {
        let error = HttpTransport::rejection(
            StatusCode::NOT_FOUND,
            Some(r#"{"error":"File not found or invalid PIN","code":"invalid_pin"}"#.into()),
        );
        match error {
            TransportError::Rejected {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 404);
                assert_eq!(code.as_deref(), Some("invalid_pin"));
                assert_eq!(message.as_deref(), Some("File not found or invalid PIN"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_rejection_keeps_plain_text_body() {
        let error = HttpTransport::rejection(StatusCode::GONE, Some("secret expired".into()));
        match error {
            TransportError::Rejected { code, message, .. } => {
                assert_eq!(code, None);
                assert_eq!(message.as_deref(), Some("secret expired"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_rejection_blank_body_has_no_message() {
        let error = HttpTransport::rejection(StatusCode::BAD_GATEWAY, Some("  \n".into()));
        match error {
            TransportError::Rejected { code, message, .. } => {
                assert_eq!(code, None);
                assert_eq!(message, None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
