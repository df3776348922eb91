use axum::extract::{Multipart, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use crate::error::{AssistantError, Result};

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub voice_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptionReply {
    pub text: String,
}

/// POST {voice_path}/tts
pub async fn tts(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let request: SpeechRequest = serde_json::from_slice(&body)
        .map_err(|e| AssistantError::InvalidRequest(format!("invalid speech body: {e}")))?;
    if request.text.trim().is_empty() {
        return Err(AssistantError::InvalidRequest("text is required".into()));
    }
    let audio = state.voice.synthesize(request.text, request.voice_id).await?;
    info!(bytes = audio.len(), "Speech synthesized");
    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response())
}

/// POST {voice_path}/stt with a multipart `audio` file field
pub async fn stt(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<TranscriptionReply>> {
    let mut upload: Option<(Bytes, String, String)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AssistantError::InvalidRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("audio") {
            continue;
        }
        let filename = field.file_name().unwrap_or("recording.webm").to_string();
        let mime = field.content_type().unwrap_or("audio/webm").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AssistantError::InvalidRequest(format!("unreadable audio field: {e}")))?;
        upload = Some((bytes, filename, mime));
        break;
    }

    let Some((audio, filename, mime)) = upload.filter(|(bytes, _, _)| !bytes.is_empty()) else {
        return Err(AssistantError::InvalidRequest("no audio file provided".into()));
    };

    let text = state.voice.transcribe(audio, filename, mime).await?;
    info!(chars = text.chars().count(), "Audio transcribed");
    Ok(Json(TranscriptionReply { text }))
}
