use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Longest slice of a provider diagnostic echoed back to callers
const MAX_DETAIL_CHARS: usize = 300;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Model gateway rate limit exceeded")]
    RateLimited,

    #[error("Model gateway requires payment or credits")]
    PaymentRequired,

    #[error("Model gateway returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Record store read failed: {0}")]
    DataStore(String),

    #[error("Voice provider {operation} failed ({status}): {detail}")]
    Voice {
        operation: VoiceOperation,
        status: u16,
        detail: String,
    },

    #[error("Recording too short: {bytes} bytes (minimum {min})")]
    RecordingTooShort { bytes: usize, min: usize },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceOperation {
    Transcription,
    Synthesis,
}

impl std::fmt::Display for VoiceOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceOperation::Transcription => write!(f, "transcription"),
            VoiceOperation::Synthesis => write!(f, "synthesis"),
        }
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;

impl AssistantError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AssistantError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AssistantError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AssistantError::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
            AssistantError::InvalidRequest(_) | AssistantError::RecordingTooShort { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short message shown to the end user
    pub fn user_message(&self) -> &'static str {
        match self {
            AssistantError::Unauthorized(_) => "No autorizado",
            AssistantError::RateLimited => {
                "Límite de solicitudes excedido. Intenta de nuevo en unos momentos."
            }
            AssistantError::PaymentRequired => {
                "Se requiere agregar créditos para continuar usando el asistente."
            }
            AssistantError::InvalidRequest(_) => "Solicitud inválida",
            AssistantError::RecordingTooShort { .. } => "La grabación es demasiado corta",
            AssistantError::Voice {
                operation: VoiceOperation::Transcription,
                ..
            } => "Error al transcribir el audio",
            AssistantError::Voice {
                operation: VoiceOperation::Synthesis,
                ..
            } => "Error al generar el audio",
            _ => "Error en el servicio del asistente",
        }
    }
}

impl IntoResponse for AssistantError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }

        let body = match &self {
            AssistantError::Voice { detail, .. } => json!({
                "error": self.user_message(),
                "details": truncate(detail, MAX_DETAIL_CHARS),
            }),
            _ => json!({ "error": self.user_message() }),
        };
        (status, Json(body)).into_response()
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Failures local to a single tool call. They never abort a turn: the dispatcher
/// turns them into an `{"error": ...}` payload for the model.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid tool arguments: {0}")]
    ArgumentParse(#[from] serde_json::Error),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown calculation type: {0}")]
    UnknownCalculationKind(String),

    #[error("Invalid tool argument: {0}")]
    InvalidArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AssistantError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AssistantError::RateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AssistantError::PaymentRequired.status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AssistantError::Upstream {
                status: 503,
                body: "down".into()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AssistantError::RecordingTooShort { bytes: 10, min: 1000 }.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_user_message_hides_upstream_body() {
        let err = AssistantError::Upstream {
            status: 500,
            body: "internal stack trace".into(),
        };
        assert!(!err.user_message().contains("stack trace"));
    }
}
