use futures::StreamExt;
use futures::future::{AbortRegistration, Abortable};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::Transcript;
use crate::error::{AssistantError, Result};
use crate::models::ChatMessage;
use crate::stream::{SseDecoder, SseEvent, parse_delta};

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Consumes the chat endpoint's event stream, growing the transcript as text
/// arrives.
pub struct ChatClient {
    http: Client,
    endpoint: String,
    token: String,
}

/// Assistant entry being streamed. Unless committed, dropping it removes the
/// entry again, so an aborted or failed reply never lingers half-written.
struct PendingReply<'a> {
    transcript: &'a mut Transcript,
    rollback_to: usize,
    committed: bool,
}

impl<'a> PendingReply<'a> {
    fn open(transcript: &'a mut Transcript) -> Self {
        let rollback_to = transcript.len();
        transcript.push(ChatMessage::assistant(""));
        Self {
            transcript,
            rollback_to,
            committed: false,
        }
    }

    fn append(&mut self, fragment: &str) {
        self.transcript.append_to_last(fragment);
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.transcript.truncate(self.rollback_to);
        }
    }
}

impl ChatClient {
    pub fn new(http: Client, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }

    /// Sends `text` as a new user entry and streams the reply into the
    /// transcript. `on_delta` sees each text fragment as it arrives.
    pub async fn send(
        &self,
        transcript: &mut Transcript,
        text: &str,
        mut on_delta: impl FnMut(&str) + Send,
    ) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AssistantError::InvalidRequest("message is empty".into()));
        }
        transcript.push(ChatMessage::user(text));

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({ "messages": transcript.entries() }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            return Err(endpoint_error(status, body.error));
        }

        let mut reply = PendingReply::open(transcript);
        let mut decoder = SseDecoder::new();
        let mut full = String::new();
        let mut body = response.bytes_stream();

        let mut emit = |data: &str| {
            let Some(fragment) = parse_delta(data)
                .and_then(|d| d.content)
                .filter(|f| !f.is_empty())
            else {
                return;
            };
            reply.append(&fragment);
            on_delta(&fragment);
            full.push_str(&fragment);
        };

        let mut done = false;
        'read: while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for event in decoder.feed(&chunk) {
                match event {
                    SseEvent::Done => {
                        done = true;
                        break 'read;
                    }
                    SseEvent::Data(data) => emit(&data),
                }
            }
        }
        // A body may end on a final line with no newline
        if !done {
            if let Some(SseEvent::Data(data)) = decoder.finish() {
                emit(&data);
            }
        }

        reply.commit();
        Ok(full)
    }

    /// Like [`send`](Self::send), but resolves to `Ok(None)` when aborted
    /// through the paired `AbortHandle`. The partial reply is discarded; the
    /// user entry stays.
    pub async fn send_abortable(
        &self,
        transcript: &mut Transcript,
        text: &str,
        on_delta: impl FnMut(&str) + Send,
        registration: AbortRegistration,
    ) -> Result<Option<String>> {
        match Abortable::new(self.send(transcript, text, on_delta), registration).await {
            Ok(result) => result.map(Some),
            Err(_aborted) => {
                debug!("Chat send aborted");
                Ok(None)
            }
        }
    }
}

fn endpoint_error(status: StatusCode, message: Option<String>) -> AssistantError {
    let message = message.unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::UNAUTHORIZED => AssistantError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => AssistantError::RateLimited,
        StatusCode::PAYMENT_REQUIRED => AssistantError::PaymentRequired,
        StatusCode::BAD_REQUEST => AssistantError::InvalidRequest(message),
        _ => AssistantError::Upstream {
            status: status.as_u16(),
            body: message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use axum::body::Body;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use bytes::Bytes;
    use futures::future::AbortHandle;
    use futures::stream;
    use std::convert::Infallible;

    fn frame(text: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    async fn fake_chat(headers: HeaderMap, Json(body): Json<serde_json::Value>) -> Response {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer tok") {
            return (AxumStatus::UNAUTHORIZED, Json(json!({"error": "No autorizado"})))
                .into_response();
        }
        let last = body["messages"]
            .as_array()
            .and_then(|m| m.last())
            .and_then(|m| m["content"].as_str())
            .unwrap_or_default()
            .to_string();

        match last.as_str() {
            "limite" => (
                AxumStatus::TOO_MANY_REQUESTS,
                Json(json!({"error": "Límite de solicitudes excedido."})),
            )
                .into_response(),
            // First frame arrives, then the stream stalls forever
            "lento" => {
                let first = stream::iter(vec![Ok::<_, Infallible>(Bytes::from(frame("Pensando")))]);
                Body::from_stream(first.chain(stream::pending())).into_response()
            }
            // Last frame has no trailing newline and no [DONE]
            "sin cierre" => {
                let last = frame(" fin");
                format!("{}{}", frame("Hola"), last.trim_end()).into_response()
            }
            _ => {
                // Split a multi-byte character across two chunks
                let full = format!(
                    ": keep-alive\n\n{}data: {{broken\n\n{}data: [DONE]\n\n",
                    frame("Hola"),
                    frame(" señor")
                );
                let bytes = full.into_bytes();
                let split = full_split_point(&bytes);
                let chunks = vec![
                    Ok::<_, Infallible>(Bytes::copy_from_slice(&bytes[..split])),
                    Ok(Bytes::copy_from_slice(&bytes[split..])),
                ];
                Body::from_stream(stream::iter(chunks)).into_response()
            }
        }
    }

    // Index inside the two bytes of "ñ"
    fn full_split_point(bytes: &[u8]) -> usize {
        bytes
            .iter()
            .position(|b| *b == 0xC3)
            .map(|p| p + 1)
            .unwrap_or(bytes.len() / 2)
    }

    async fn client() -> ChatClient {
        let app = Router::new().route("/agent-chat", post(fake_chat));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        ChatClient::new(Client::new(), format!("http://{addr}/agent-chat"), "tok")
    }

    #[tokio::test]
    async fn test_streams_reply_into_transcript() {
        let client = client().await;
        let mut transcript = Transcript::new();
        let mut seen = Vec::new();

        let reply = client
            .send(&mut transcript, "hola", |d| seen.push(d.to_string()))
            .await
            .expect("reply");

        assert_eq!(reply, "Hola señor");
        assert_eq!(seen, vec!["Hola", " señor"]);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.entries()[0].role, Role::User);
        assert_eq!(transcript.last_reply(), Some("Hola señor"));
    }

    #[tokio::test]
    async fn test_unterminated_last_frame_is_kept() {
        let client = client().await;
        let mut transcript = Transcript::new();

        let reply = client
            .send(&mut transcript, "sin cierre", |_| {})
            .await
            .expect("reply");

        assert_eq!(reply, "Hola fin");
        assert_eq!(transcript.last_reply(), Some("Hola fin"));
    }

    #[tokio::test]
    async fn test_rate_limit_leaves_only_user_entry() {
        let client = client().await;
        let mut transcript = Transcript::new();

        let result = client.send(&mut transcript, "limite", |_| {}).await;
        assert!(matches!(result, Err(AssistantError::RateLimited)));
        assert_eq!(transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_token_is_unauthorized() {
        let app_client = client().await;
        let client = ChatClient::new(Client::new(), app_client.endpoint.clone(), "other");
        let mut transcript = Transcript::new();

        let result = client.send(&mut transcript, "hola", |_| {}).await;
        assert!(matches!(result, Err(AssistantError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_abort_discards_partial_reply() {
        let client = client().await;
        let mut transcript = Transcript::new();
        let (handle, registration) = AbortHandle::new_pair();

        let abort = handle.clone();
        let result = client
            .send_abortable(&mut transcript, "lento", move |_| abort.abort(), registration)
            .await
            .expect("abort is not an error");

        assert!(result.is_none());
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.entries()[0].content.as_deref(), Some("lento"));
        assert!(handle.is_aborted());
    }

    #[tokio::test]
    async fn test_empty_message_not_sent() {
        let client = client().await;
        let mut transcript = Transcript::new();
        let result = client.send(&mut transcript, "   ", |_| {}).await;
        assert!(matches!(result, Err(AssistantError::InvalidRequest(_))));
        assert!(transcript.is_empty());
    }
}
