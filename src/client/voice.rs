use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{AssistantError, Result, VoiceOperation};

/// Recordings smaller than this are treated as accidental taps
pub const MIN_RECORDING_BYTES: usize = 1000;

pub fn check_recording(audio: &[u8]) -> Result<()> {
    if audio.len() < MIN_RECORDING_BYTES {
        return Err(AssistantError::RecordingTooShort {
            bytes: audio.len(),
            min: MIN_RECORDING_BYTES,
        });
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct VoiceErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionBody {
    text: String,
}

/// Caller for the voice endpoint's `stt` and `tts` sub-paths
pub struct VoiceClient {
    http: Client,
    base_url: String,
}

impl VoiceClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn transcribe(&self, audio: Bytes, mime: &str) -> Result<String> {
        check_recording(&audio)?;

        let part = Part::bytes(audio.to_vec())
            .file_name("recording.webm")
            .mime_str(mime)?;
        let response = self
            .http
            .post(format!("{}/stt", self.base_url))
            .multipart(Form::new().part("audio", part))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(voice_error(VoiceOperation::Transcription, response).await);
        }
        let body: TranscriptionBody = response.json().await?;
        Ok(body.text)
    }

    pub async fn speak(&self, text: &str, voice_id: Option<&str>) -> Result<Bytes> {
        let response = self
            .http
            .post(format!("{}/tts", self.base_url))
            .json(&json!({ "text": text, "voice_id": voice_id }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(voice_error(VoiceOperation::Synthesis, response).await);
        }
        Ok(response.bytes().await?)
    }
}

async fn voice_error(operation: VoiceOperation, response: reqwest::Response) -> AssistantError {
    let status = response.status().as_u16();
    let body: VoiceErrorBody = response.json().await.unwrap_or_default();
    if status == 400 {
        return AssistantError::InvalidRequest(body.error.unwrap_or_default());
    }
    AssistantError::Voice {
        operation,
        status,
        detail: body.details.or(body.error).unwrap_or_default(),
    }
}

/// Holds at most one recording or playback task. Starting a new one aborts
/// whatever was running so the microphone and speaker are never shared.
#[derive(Default)]
pub struct MediaSlot {
    current: Mutex<Option<JoinHandle<()>>>,
}

impl MediaSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.take() {
            debug!("Releasing previous media task");
            previous.abort();
        }
        *current = Some(tokio::spawn(task));
    }

    pub fn stop(&self) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.take() {
            previous.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}
