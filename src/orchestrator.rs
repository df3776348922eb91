//! Two-turn tool-calling chat.
//!
//! The first model call offers the tools and is consumed server-side. If the
//! model asked for tools they are executed and a second, tool-free call produces
//! the answer; otherwise an equivalent tool-free call is issued. Either way the
//! caller receives the final call's stream untouched.

use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tracing::info;

use crate::error::{AssistantError, Result};
use crate::models::{ChatCompletionRequest, ChatMessage, Role, validate_tool_links};
use crate::stream::{ChatStreamProcessor, Completion};
use crate::tools::{ToolDispatcher, tool_definitions};
use crate::transport::{ByteStream, ModelGateway};

pub fn system_prompt(today: NaiveDate) -> String {
    format!(
        r#"Eres un asistente contable experto en la normativa tributaria colombiana. Ayudas al usuario a entender las finanzas de su negocio y a calcular impuestos.

Fecha actual: {today}

Herramientas disponibles:
- query_database: consulta los datos reales del usuario (resumen financiero, clientes, facturas, proyectos, gastos, inventario). Úsala siempre que la pregunta dependa de sus datos; no inventes cifras.
- calculate_taxes: calcula IVA (19%), retención en la fuente según concepto (compras 2.5%, servicios 4%, arrendamientos 3.5%, transporte 1%), ReteIVA (50% del IVA), ReteICA (0.5%) o todas las deducciones juntas.

Responde en español, de forma clara y concisa. Presenta los valores en pesos colombianos con separadores de miles y explica brevemente de dónde sale cada cifra."#
    )
}

enum TurnState {
    Received(Vec<ChatMessage>),
    FirstCall(Vec<ChatMessage>),
    FirstStreamConsumed {
        messages: Vec<ChatMessage>,
        completion: Completion,
    },
    NoTools(Vec<ChatMessage>),
    ToolsPresent {
        messages: Vec<ChatMessage>,
        completion: Completion,
    },
    Streamed(ByteStream),
    Failed(AssistantError),
}

impl TurnState {
    fn name(&self) -> &'static str {
        match self {
            TurnState::Received(_) => "received",
            TurnState::FirstCall(_) => "first_call",
            TurnState::FirstStreamConsumed { .. } => "first_stream_consumed",
            TurnState::NoTools(_) => "no_tools",
            TurnState::ToolsPresent { .. } => "tools_present",
            TurnState::Streamed(_) => "streamed",
            TurnState::Failed(_) => "failed",
        }
    }
}

pub struct Orchestrator {
    gateway: Arc<dyn ModelGateway>,
    dispatcher: ToolDispatcher,
    model: String,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn ModelGateway>, dispatcher: ToolDispatcher, model: String) -> Self {
        Self {
            gateway,
            dispatcher,
            model,
        }
    }

    /// Answers one chat request for `owner_id`, returning the stream to forward
    pub async fn respond(&self, owner_id: &str, history: Vec<ChatMessage>) -> Result<ByteStream> {
        self.respond_on(owner_id, history, Local::now().date_naive())
            .await
    }

    pub async fn respond_on(
        &self,
        owner_id: &str,
        history: Vec<ChatMessage>,
        today: NaiveDate,
    ) -> Result<ByteStream> {
        let mut state = TurnState::Received(history);
        loop {
            info!(state = state.name(), owner = owner_id, "Chat turn");
            state = match state {
                TurnState::Received(history) => match self.first_messages(history, today) {
                    Ok(messages) => TurnState::FirstCall(messages),
                    Err(e) => TurnState::Failed(e),
                },
                TurnState::FirstCall(messages) => {
                    match self.first_turn(&messages).await {
                        Ok(completion) => TurnState::FirstStreamConsumed {
                            messages,
                            completion,
                        },
                        Err(e) => TurnState::Failed(e),
                    }
                }
                TurnState::FirstStreamConsumed {
                    messages,
                    completion,
                } => {
                    if completion.has_tool_calls() {
                        TurnState::ToolsPresent {
                            messages,
                            completion,
                        }
                    } else {
                        TurnState::NoTools(messages)
                    }
                }
                TurnState::NoTools(messages) => {
                    match self.gateway.stream_chat(&self.request(messages, false)).await {
                        Ok(stream) => TurnState::Streamed(stream),
                        Err(e) => TurnState::Failed(e),
                    }
                }
                TurnState::ToolsPresent {
                    messages,
                    completion,
                } => match self.second_turn(owner_id, messages, completion).await {
                    Ok(stream) => TurnState::Streamed(stream),
                    Err(e) => TurnState::Failed(e),
                },
                TurnState::Streamed(stream) => return Ok(stream),
                TurnState::Failed(e) => return Err(e),
            };
        }
    }

    /// System prompt followed by the client's history
    fn first_messages(&self, history: Vec<ChatMessage>, today: NaiveDate) -> Result<Vec<ChatMessage>> {
        if history.is_empty() {
            return Err(AssistantError::InvalidRequest("messages must not be empty".into()));
        }
        if let Some(bad) = history
            .iter()
            .find(|m| !matches!(m.role, Role::User | Role::Assistant))
        {
            return Err(AssistantError::InvalidRequest(format!(
                "role {:?} is not accepted from clients",
                bad.role
            )));
        }

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system_prompt(today)));
        messages.extend(history);
        Ok(messages)
    }

    fn request(&self, messages: Vec<ChatMessage>, offer_tools: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            tools: offer_tools.then(tool_definitions),
            tool_choice: offer_tools.then(|| "auto".to_string()),
            stream: true,
        }
    }

    async fn first_turn(&self, messages: &[ChatMessage]) -> Result<Completion> {
        let stream = self
            .gateway
            .stream_chat(&self.request(messages.to_vec(), true))
            .await?;
        let completion = ChatStreamProcessor::new().consume(stream).await?;
        info!(
            text_len = completion.content.len(),
            tool_calls = completion.tool_calls.len(),
            "First turn consumed"
        );
        Ok(completion)
    }

    async fn second_turn(
        &self,
        owner_id: &str,
        mut messages: Vec<ChatMessage>,
        completion: Completion,
    ) -> Result<ByteStream> {
        // Every result is in hand before the second call goes out
        let results = self
            .dispatcher
            .execute_all(owner_id, &completion.tool_calls)
            .await;

        let text = Some(completion.content).filter(|t| !t.is_empty());
        messages.push(ChatMessage::assistant_tool_calls(text, completion.tool_calls));
        messages.extend(results);
        validate_tool_links(&messages)?;

        self.gateway.stream_chat(&self.request(messages, false)).await
    }
}
