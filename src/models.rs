use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{AssistantError, Result};

/// Flexible number deserializer: hosted stores may hand `numeric` columns back as
/// strings, and nullable columns as `null`.
fn deserialize_flexible_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FlexibleNumber {
        Float(f64),
        String(String),
        Null,
    }

    match Option::<FlexibleNumber>::deserialize(deserializer)? {
        Some(FlexibleNumber::Float(f)) => Ok(Some(f)),
        Some(FlexibleNumber::String(s)) if s.trim().is_empty() => Ok(None),
        Some(FlexibleNumber::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(FlexibleNumber::Null) | None => Ok(None),
    }
}

// ───────────────────────────────────────────────────────────────────────────────
// Conversation
// ───────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of a conversation, in the OpenAI-compatible chat format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Assistant turn that declares pending tool calls
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// Every tool message must answer a call declared by the assistant message that
/// opened its run of tool results.
pub fn validate_tool_links(messages: &[ChatMessage]) -> Result<()> {
    let mut open_ids: Option<Vec<&str>> = None;

    for (position, message) in messages.iter().enumerate() {
        match message.role {
            Role::Tool => {
                let id = message.tool_call_id.as_deref().ok_or_else(|| {
                    AssistantError::InvalidRequest(format!(
                        "tool message at position {position} has no tool_call_id"
                    ))
                })?;
                let declared = open_ids
                    .as_ref()
                    .is_some_and(|ids| ids.contains(&id));
                if !declared {
                    return Err(AssistantError::InvalidRequest(format!(
                        "tool message at position {position} references undeclared call '{id}'"
                    )));
                }
            }
            Role::Assistant => {
                open_ids = message
                    .tool_calls
                    .as_ref()
                    .map(|calls| calls.iter().map(|c| c.id.as_str()).collect());
            }
            Role::System | Role::User => open_ids = None,
        }
    }
    Ok(())
}

/// A model-issued request to invoke a named function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: default_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

// ───────────────────────────────────────────────────────────────────────────────
// Model gateway wire format
// ───────────────────────────────────────────────────────────────────────────────

/// Chat-completions request sent to the model gateway
#[derive(Debug, Serialize, Clone)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub stream: bool,
}

/// One `data:` frame of a streamed chat completion
#[derive(Debug, Deserialize, Default)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallFragment>>,
}

/// Incremental piece of a tool call, keyed by its position in the response
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ToolCallFragment {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionFragment>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct FunctionFragment {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// ───────────────────────────────────────────────────────────────────────────────
// Domain records read from the hosted store
// ───────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExpenseRecord {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flexible_f64")]
    pub gross_value: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_flexible_f64")]
    pub amount: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_flexible_f64")]
    pub vat_paid: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_flexible_f64")]
    pub retention_source: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_flexible_f64")]
    pub retention_vat: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_flexible_f64")]
    pub retention_ica: Option<f64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl ExpenseRecord {
    /// Gross value, falling back to the plain amount column
    pub fn value(&self) -> f64 {
        self.gross_value.or(self.amount).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InvoiceRecord {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flexible_f64")]
    pub amount: Option<f64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl InvoiceRecord {
    pub fn has_status(&self, status: &str) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(status))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectRecord {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flexible_f64")]
    pub budget: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_flexible_f64")]
    pub actual_cost: Option<f64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InventoryRecord {
    #[serde(default, deserialize_with = "deserialize_flexible_f64")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_flexible_f64")]
    pub unit_cost: Option<f64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Optional restrictions a `query_database` call may carry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryFilters {
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}
