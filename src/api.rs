use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::header::{HeaderName, HeaderValue};

use crate::chat_manager::BuiltRequest;
use crate::error::AppError;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, AppError>> + Send>>;

/// How the client reaches the completion endpoint. The production transport
/// speaks HTTP; tests substitute scripted streams.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open_stream(&self, request: &BuiltRequest) -> Result<ByteStream, AppError>;
}

/// Connect timeout only. The overall request deadline stays unset so long
/// streams are not cut off mid-generation; idle streams are handled by the
/// caller's per-chunk timeout.
pub fn build_client(connect_timeout_ms: u64) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(connect_timeout_ms))
        .build()
        .map_err(AppError::Http)
}

pub struct HttpChatTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChatTransport {
    pub fn new(endpoint: &str) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(10_000)?,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open_stream(&self, request: &BuiltRequest) -> Result<ByteStream, AppError> {
        let mut req = self.client.post(&self.endpoint).json(&request.body);
        for (name, value) in &request.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => req = req.header(name, value),
                _ => tracing::warn!(header = %name, "skipping invalid header"),
            }
        }

        let response = req.send().await.map_err(AppError::Http)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(code = status.as_u16(), "completion endpoint rejected request");
            return Err(AppError::Status {
                code: status.as_u16(),
                message,
            });
        }

        Ok(Box::pin(response.bytes_stream().map_err(AppError::Http)))
    }
}
