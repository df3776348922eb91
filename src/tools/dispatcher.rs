use futures::future::join_all;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ToolError;
use crate::models::{ChatMessage, QueryFilters, ToolCall};
use crate::query::{QueryKind, RecordQueryAdapter};
use crate::repository_traits::RecordStore;
use crate::tax::{TaxCalculationRequest, TaxCalculator};

use super::definitions::{CALCULATE_TAXES, QUERY_DATABASE};

/// Arguments of the `query_database` tool
#[derive(Debug, Deserialize)]
pub struct QueryDatabaseArgs {
    pub query_type: String,
    #[serde(default)]
    pub filters: Option<QueryFilters>,
}

/// Routes model tool calls to the query adapter or the tax calculator
pub struct ToolDispatcher {
    queries: RecordQueryAdapter,
    calculator: TaxCalculator,
}

impl ToolDispatcher {
    pub fn new(store: Arc<dyn RecordStore>, calculator: TaxCalculator) -> Self {
        Self {
            queries: RecordQueryAdapter::new(store),
            calculator,
        }
    }

    /// One tool-result message per call, in call order. A failing call only
    /// affects its own result.
    pub async fn execute_all(&self, owner_id: &str, calls: &[ToolCall]) -> Vec<ChatMessage> {
        let results = join_all(calls.iter().map(|call| self.execute(owner_id, call))).await;
        calls
            .iter()
            .zip(results)
            .map(|(call, payload)| ChatMessage::tool_result(call.id.clone(), payload.to_string()))
            .collect()
    }

    pub async fn execute(&self, owner_id: &str, call: &ToolCall) -> Value {
        info!(
            tool = %call.function.name,
            call_id = %call.id,
            "Executing tool call"
        );
        match self.try_execute(owner_id, call).await {
            Ok(value) => value,
            Err(ToolError::ArgumentParse(e)) => {
                warn!(call_id = %call.id, "Tool arguments did not parse: {}", e);
                json!({ "error": "Error al ejecutar la herramienta" })
            }
            Err(e) => {
                warn!(call_id = %call.id, "Tool call rejected: {}", e);
                json!({ "error": e.to_string() })
            }
        }
    }

    async fn try_execute(&self, owner_id: &str, call: &ToolCall) -> Result<Value, ToolError> {
        match call.function.name.as_str() {
            QUERY_DATABASE => {
                let args: QueryDatabaseArgs = serde_json::from_str(&call.function.arguments)?;
                let filters = args.filters.unwrap_or_default();
                match args.query_type.parse::<QueryKind>() {
                    Ok(kind) => Ok(self.queries.run(owner_id, kind, &filters).await),
                    Err(e) => Ok(json!({ "error": e.to_string() })),
                }
            }
            CALCULATE_TAXES => {
                let req: TaxCalculationRequest = serde_json::from_str(&call.function.arguments)?;
                let result = self.calculator.calculate(&req)?;
                Ok(serde_json::to_value(result)?)
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}
