use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

#[cfg(test)]
use mockall::automock;

use crate::config::VoiceConfig;
use crate::error::{AssistantError, Result, VoiceOperation};

/// Speech-to-text and text-to-speech against an external provider
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VoiceProvider: Send + Sync {
    async fn transcribe(&self, audio: Bytes, filename: String, mime: String) -> Result<String>;

    /// `voice_id` of `None` uses the configured default voice
    async fn synthesize(&self, text: String, voice_id: Option<String>) -> Result<Bytes>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

pub struct ElevenLabsVoice {
    client: Client,
    config: VoiceConfig,
}

impl ElevenLabsVoice {
    pub fn new(client: Client, config: VoiceConfig) -> Self {
        Self { client, config }
    }

    /// `{base}/text-to-speech/{voice_id}`. The id comes from callers, so it
    /// must be a plain identifier and is pushed as a single encoded segment.
    fn speech_url(&self, voice_id: &str) -> Result<Url> {
        let plain = !voice_id.is_empty()
            && voice_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !plain {
            return Err(AssistantError::InvalidRequest(format!(
                "invalid voice id '{voice_id}'"
            )));
        }

        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| AssistantError::Internal(format!("invalid voice base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| AssistantError::Internal("voice base url cannot carry a path".into()))?
            .pop_if_empty()
            .push("text-to-speech")
            .push(voice_id);
        Ok(url)
    }

    async fn provider_error(
        operation: VoiceOperation,
        response: reqwest::Response,
    ) -> AssistantError {
        let status = response.status().as_u16();
        let detail = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        error!(%operation, status, detail = %detail, "Voice provider error");
        AssistantError::Voice {
            operation,
            status,
            detail,
        }
    }
}

#[async_trait]
impl VoiceProvider for ElevenLabsVoice {
    async fn transcribe(&self, audio: Bytes, filename: String, mime: String) -> Result<String> {
        if audio.is_empty() {
            return Err(AssistantError::InvalidRequest("audio payload is empty".into()));
        }
        info!(bytes = audio.len(), mime = %mime, "Transcribing audio");

        let part = Part::bytes(audio.to_vec())
            .file_name(filename)
            .mime_str(&mime)?;
        let form = Form::new()
            .text("model_id", self.config.stt_model.clone())
            .text("language_code", self.config.language_code.clone())
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/speech-to-text", self.config.base_url))
            .header("xi-api-key", &self.config.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::provider_error(VoiceOperation::Transcription, response).await);
        }

        let body: TranscriptionResponse = response.json().await?;
        Ok(body.text)
    }

    async fn synthesize(&self, text: String, voice_id: Option<String>) -> Result<Bytes> {
        if text.trim().is_empty() {
            return Err(AssistantError::InvalidRequest("text is required".into()));
        }
        let voice_id = voice_id
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.config.default_voice_id.clone());
        let url = self.speech_url(&voice_id)?;
        info!(chars = text.chars().count(), voice = %voice_id, "Synthesizing speech");

        let response = self
            .client
            .post(url)
            .header("xi-api-key", &self.config.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&json!({
                "text": text,
                "model_id": self.config.tts_model,
                "voice_settings": {
                    "stability": 0.5,
                    "similarity_boost": 0.75,
                },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::provider_error(VoiceOperation::Synthesis, response).await);
        }

        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::extract::{Multipart, Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorded {
        fields: Arc<Mutex<Vec<(String, String)>>>,
        voices: Arc<Mutex<Vec<String>>>,
        other_hits: Arc<Mutex<Vec<String>>>,
    }

    async fn fake_other(State(recorded): State<Recorded>, Path(rest): Path<String>) -> StatusCode {
        recorded.other_hits.lock().await.push(rest);
        StatusCode::OK
    }

    async fn fake_stt(
        State(recorded): State<Recorded>,
        headers: HeaderMap,
        mut multipart: Multipart,
    ) -> (StatusCode, Json<serde_json::Value>) {
        if headers.get("xi-api-key").and_then(|v| v.to_str().ok()) != Some("secret") {
            return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "bad key"})));
        }
        while let Ok(Some(field)) = multipart.next_field().await {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let value = if name == "file" {
                format!("{} bytes", field.bytes().await.map(|b| b.len()).unwrap_or(0))
            } else {
                field.text().await.unwrap_or_default()
            };
            recorded.fields.lock().await.push((name, value));
        }
        (StatusCode::OK, Json(json!({"text": "factura pagada"})))
    }

    async fn fake_tts(
        State(recorded): State<Recorded>,
        Path(voice): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, Vec<u8>) {
        recorded.voices.lock().await.push(voice);
        if body["text"] == "falla" {
            return (StatusCode::UNPROCESSABLE_ENTITY, b"quota_exceeded".to_vec());
        }
        (StatusCode::OK, vec![0xFF, 0xF3, 0x44])
    }

    async fn provider(recorded: Recorded) -> ElevenLabsVoice {
        let app = Router::new()
            .route("/v1/speech-to-text", post(fake_stt))
            .route("/v1/text-to-speech/:voice", post(fake_tts))
            .route("/*rest", post(fake_other))
            .with_state(recorded);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let mut config = Config::default().voice;
        config.api_key = "secret".to_string();
        config.base_url = format!("http://{addr}/v1");
        ElevenLabsVoice::new(Client::new(), config)
    }

    #[tokio::test]
    async fn test_transcribe_sends_fixed_language() {
        let recorded = Recorded::default();
        let voice = provider(recorded.clone()).await;

        let text = voice
            .transcribe(
                Bytes::from(vec![1u8; 2048]),
                "recording.webm".into(),
                "audio/webm".into(),
            )
            .await
            .expect("transcription");
        assert_eq!(text, "factura pagada");

        let fields = recorded.fields.lock().await.clone();
        assert!(fields.contains(&("language_code".to_string(), "spa".to_string())));
        assert!(fields.contains(&("model_id".to_string(), "scribe_v1".to_string())));
        assert!(fields.contains(&("file".to_string(), "2048 bytes".to_string())));
    }

    #[tokio::test]
    async fn test_empty_audio_rejected_locally() {
        let voice = provider(Recorded::default()).await;
        let result = voice
            .transcribe(Bytes::new(), "a.webm".into(), "audio/webm".into())
            .await;
        assert!(matches!(result, Err(AssistantError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_synthesize_defaults_voice() {
        let recorded = Recorded::default();
        let voice = provider(recorded.clone()).await;

        let audio = voice
            .synthesize("Hola".into(), None)
            .await
            .expect("audio");
        assert_eq!(audio.as_ref(), &[0xFFu8, 0xF3, 0x44]);

        voice
            .synthesize("Hola".into(), Some("custom".into()))
            .await
            .expect("audio");
        let voices = recorded.voices.lock().await.clone();
        assert_eq!(voices, vec!["EXAVITQu4vr4xnSDxMaL", "custom"]);
    }

    #[tokio::test]
    async fn test_synthesis_failure_carries_detail() {
        let voice = provider(Recorded::default()).await;
        let result = voice.synthesize("falla".into(), None).await;
        match result {
            Err(AssistantError::Voice {
                operation,
                status,
                detail,
            }) => {
                assert_eq!(operation, VoiceOperation::Synthesis);
                assert_eq!(status, 422);
                assert_eq!(detail, "quota_exceeded");
            }
            other => panic!("expected voice error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_voice_id_cannot_escape_speech_path() {
        let recorded = Recorded::default();
        let voice = provider(recorded.clone()).await;

        for voice_id in ["../voices/add", "abc/../../user", "a b", "%2e%2e"] {
            let result = voice.synthesize("hola".into(), Some(voice_id.into())).await;
            assert!(
                matches!(result, Err(AssistantError::InvalidRequest(_))),
                "{voice_id} should be rejected"
            );
        }
        assert!(recorded.voices.lock().await.is_empty());
        assert!(recorded.other_hits.lock().await.is_empty());
    }

    #[test]
    fn test_speech_url_appends_encoded_segment() {
        let mut config = Config::default().voice;
        config.base_url = "https://api.elevenlabs.io/v1/".to_string();
        let voice = ElevenLabsVoice::new(Client::new(), config);

        let url = voice.speech_url("EXAVITQu4vr4xnSDxMaL").expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.elevenlabs.io/v1/text-to-speech/EXAVITQu4vr4xnSDxMaL"
        );
    }

    #[tokio::test]
    async fn test_blank_text_rejected_locally() {
        let voice = provider(Recorded::default()).await;
        let result = voice.synthesize("   ".into(), None).await;
        assert!(matches!(result, Err(AssistantError::InvalidRequest(_))));
    }
}
