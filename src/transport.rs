use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::pin::Pin;

use crate::config::GatewayConfig;
use crate::error::{AssistantError, Result};
use crate::models::ChatCompletionRequest;

/// Raw SSE body of a streamed completion
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Starts a streamed completion. Non-success statuses are errors; a stream
    /// is only handed back for a 2xx response.
    async fn stream_chat(&self, req: &ChatCompletionRequest) -> Result<ByteStream>;
}

pub struct GatewayTransport {
    client: Client,
    url: String,
    api_key: String,
}

impl GatewayTransport {
    pub fn new(client: Client, config: &GatewayConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

/// Maps a non-success gateway status onto the error taxonomy
pub fn gateway_error(status: u16, body: String) -> AssistantError {
    match status {
        429 => AssistantError::RateLimited,
        402 => AssistantError::PaymentRequired,
        _ => AssistantError::Upstream { status, body },
    }
}

#[async_trait]
impl ModelGateway for GatewayTransport {
    async fn stream_chat(&self, req: &ChatCompletionRequest) -> Result<ByteStream> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!(status = status.as_u16(), body = %body, "Model gateway error");
            return Err(gateway_error(status.as_u16(), body));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(AssistantError::from));
        Ok(Box::pin(stream))
    }
}
