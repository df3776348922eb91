//! Server-sent-event decoding for streamed chat completions.
//!
//! The model gateway (and, downstream, our own chat endpoint) frames a reply as
//! newline-delimited `data: {json}` lines ending with `data: [DONE]`. Network
//! chunks do not line up with those lines, so the decoder buffers raw bytes and
//! only decodes whole lines. A newline byte never occurs inside a multi-byte
//! UTF-8 sequence, so characters split across reads are reassembled intact.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::mem;
use tracing::debug;

use crate::error::Result;
use crate::models::{StreamChunk, StreamDelta, ToolCall, ToolCallFragment};

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload of a `data:` line, prefix stripped
    Data(String),
    Done,
}

/// Byte-level line buffer for an SSE body
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a network chunk and returns the events of every completed line
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(event) = parse_line(&line[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes whatever is left once the body ends without a trailing newline
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = mem::take(&mut self.pending);
        parse_line(&rest)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(raw);
    let line = text.strip_suffix('\r').unwrap_or(text.as_ref());

    // Blank separators and `:` comments carry nothing
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix(DATA_PREFIX)?;
    if data.trim() == DONE_MARKER {
        return Some(SseEvent::Done);
    }
    Some(SseEvent::Data(data.to_string()))
}

/// Parses one `data:` payload into the delta of its first choice. Malformed
/// frames yield `None` and are skipped by callers.
pub fn parse_delta(data: &str) -> Option<StreamDelta> {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk.choices.into_iter().next().and_then(|c| c.delta),
        Err(e) => {
            debug!("Skipping malformed stream frame: {}", e);
            None
        }
    }
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Rebuilds tool calls from fragments keyed by their positional index
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    slots: BTreeMap<usize, ToolCallBuilder>,
    /// Calls closed by a later call reusing their index, in closing order
    closed: Vec<(usize, ToolCallBuilder)>,
}

impl ToolCallAssembler {
    pub fn apply(&mut self, fragment: ToolCallFragment) {
        let function = fragment.function.unwrap_or_default();
        let opens_new = match (fragment.id.as_deref(), self.slots.get(&fragment.index)) {
            (Some(id), Some(open)) => open.id.as_deref() != Some(id),
            (_, None) => true,
            (None, Some(_)) => false,
        };

        if opens_new {
            let previous = self.slots.insert(
                fragment.index,
                ToolCallBuilder {
                    id: fragment.id,
                    name: function.name.unwrap_or_default(),
                    arguments: function.arguments.unwrap_or_default(),
                },
            );
            if let Some(previous) = previous {
                self.closed.push((fragment.index, previous));
            }
            return;
        }

        if let Some(open) = self.slots.get_mut(&fragment.index) {
            // The name is fixed once known; only a call that opened without one takes it later
            if open.name.is_empty() {
                if let Some(name) = function.name {
                    open.name = name;
                }
            }
            if let Some(arguments) = function.arguments {
                open.arguments.push_str(&arguments);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.closed.is_empty()
    }

    /// Closes every open call. Calls are ordered by index; calls sharing an
    /// index keep the order they arrived in.
    pub fn finish(self) -> Vec<ToolCall> {
        let mut builders = self.closed;
        builders.extend(self.slots);
        // Stable sort keeps arrival order within one index
        builders.sort_by_key(|(index, _)| *index);
        builders
            .into_iter()
            .map(|(_, b)| {
                let id = b
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                let arguments = if b.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    b.arguments
                };
                ToolCall::new(id, b.name, arguments)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Waiting,
    Accumulating,
    Complete,
}

/// Final text and tool calls of one streamed reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Consumes a streamed chat completion, collecting text and tool calls
#[derive(Debug)]
pub struct ChatStreamProcessor {
    decoder: SseDecoder,
    state: StreamState,
    content: String,
    tool_calls: ToolCallAssembler,
}

impl Default for ChatStreamProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStreamProcessor {
    pub fn new() -> Self {
        Self {
            decoder: SseDecoder::new(),
            state: StreamState::Waiting,
            content: String::new(),
            tool_calls: ToolCallAssembler::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == StreamState::Complete
    }

    /// Feeds one network chunk. Input after `[DONE]` is ignored.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.is_complete() {
            return;
        }
        for event in self.decoder.feed(bytes) {
            self.handle(event);
            if self.is_complete() {
                break;
            }
        }
    }

    fn handle(&mut self, event: SseEvent) {
        match event {
            SseEvent::Done => self.state = StreamState::Complete,
            SseEvent::Data(data) => {
                let Some(delta) = parse_delta(&data) else {
                    return;
                };
                if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                    self.content.push_str(&text);
                    self.state = StreamState::Accumulating;
                }
                for fragment in delta.tool_calls.unwrap_or_default() {
                    self.tool_calls.apply(fragment);
                    self.state = StreamState::Accumulating;
                }
            }
        }
    }

    /// Ends the stream, flushing a trailing unterminated line
    pub fn finish(mut self) -> Completion {
        if !self.is_complete() {
            if let Some(event) = self.decoder.finish() {
                self.handle(event);
            }
            self.state = StreamState::Complete;
        }
        Completion {
            content: self.content,
            tool_calls: self.tool_calls.finish(),
        }
    }

    /// Drives a byte stream to completion
    pub async fn consume<S>(mut self, mut stream: S) -> Result<Completion>
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
    {
        while let Some(chunk) = stream.next().await {
            self.feed(&chunk?);
            if self.is_complete() {
                break;
            }
        }
        Ok(self.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantError;
    use futures::stream;

    fn text_frame(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    fn tool_frame(fragment: serde_json::Value) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"tool_calls": [fragment]}}]})
        )
    }

    fn run(chunks: Vec<Vec<u8>>) -> Completion {
        let mut processor = ChatStreamProcessor::new();
        for chunk in chunks {
            processor.feed(&chunk);
        }
        processor.finish()
    }

    #[test]
    fn test_text_accumulates_and_skips_malformed_frames() {
        let body = format!(
            ": keep-alive\n{}data: {{not json\n{}data: [DONE]\n",
            text_frame("Hola"),
            text_frame(" mundo")
        );
        let completion = run(vec![body.into_bytes()]);
        assert_eq!(completion.content, "Hola mundo");
        assert!(!completion.has_tool_calls());
    }

    #[test]
    fn test_tool_call_reassembled_by_index() {
        let body = [
            tool_frame(serde_json::json!({"index": 0, "id": "a", "function": {"name": "calculate_taxes"}})),
            tool_frame(serde_json::json!({"index": 0, "function": {"arguments": "{\"base_amount\":"}})),
            tool_frame(serde_json::json!({"index": 0, "function": {"arguments": "100}"}})),
            "data: [DONE]\n".to_string(),
        ]
        .concat();
        let completion = run(vec![body.into_bytes()]);
        assert_eq!(completion.tool_calls.len(), 1);
        let call = &completion.tool_calls[0];
        assert_eq!(call.id, "a");
        assert_eq!(call.function.name, "calculate_taxes");
        assert_eq!(call.function.arguments, r#"{"base_amount":100}"#);
    }

    #[test]
    fn test_parallel_tool_calls_keep_index_order() {
        let body = [
            tool_frame(serde_json::json!({"index": 1, "id": "b", "function": {"name": "query_database", "arguments": "{\"query_type\":"}})),
            tool_frame(serde_json::json!({"index": 0, "id": "a", "function": {"name": "calculate_taxes", "arguments": "{}"}})),
            tool_frame(serde_json::json!({"index": 1, "function": {"name": "ignored", "arguments": "\"clients\"}"}})),
        ]
        .concat();
        let completion = run(vec![body.into_bytes()]);
        let ids: Vec<_> = completion.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(completion.tool_calls[1].function.name, "query_database");
        assert_eq!(
            completion.tool_calls[1].function.arguments,
            r#"{"query_type":"clients"}"#
        );
    }

    #[test]
    fn test_new_id_at_same_index_closes_previous_call() {
        let mut assembler = ToolCallAssembler::default();
        assembler.apply(ToolCallFragment {
            index: 0,
            id: Some("a".into()),
            function: Some(crate::models::FunctionFragment {
                name: Some("calculate_taxes".into()),
                arguments: Some("{\"x\":1}".into()),
            }),
        });
        assembler.apply(ToolCallFragment {
            index: 0,
            id: Some("b".into()),
            function: Some(crate::models::FunctionFragment {
                name: Some("query_database".into()),
                arguments: None,
            }),
        });
        let calls = assembler.finish();
        let ids: Vec<_> = calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(calls[0].function.name, "calculate_taxes");
        assert_eq!(calls[0].function.arguments, "{\"x\":1}");
        assert_eq!(calls[1].function.name, "query_database");
        assert_eq!(calls[1].function.arguments, "{}");
    }

    #[test]
    fn test_multibyte_characters_split_across_chunks() {
        let body = format!("{}data: [DONE]\n", text_frame("¿Cuánto IVA? ñ"));
        let bytes = body.into_bytes();
        // Split inside the two-byte 'á'
        let split = bytes
            .iter()
            .position(|b| *b == 0xC3)
            .expect("multi-byte char present")
            + 1;
        let completion = run(vec![bytes[..split].to_vec(), bytes[split..].to_vec()]);
        assert_eq!(completion.content, "¿Cuánto IVA? ñ");
    }

    #[test]
    fn test_carriage_returns_and_trailing_line() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\r\n\r\ndata: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}";
        let completion = run(vec![body.as_bytes().to_vec()]);
        assert_eq!(completion.content, "ab");
    }

    #[test]
    fn test_state_machine() {
        let mut processor = ChatStreamProcessor::new();
        assert_eq!(processor.state(), StreamState::Waiting);
        processor.feed(text_frame("x").as_bytes());
        assert_eq!(processor.state(), StreamState::Accumulating);
        processor.feed(b"data: [DONE]\n");
        assert_eq!(processor.state(), StreamState::Complete);
        processor.feed(text_frame("ignored").as_bytes());
        assert_eq!(processor.finish().content, "x");
    }

    #[tokio::test]
    async fn test_consume_stream() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from(text_frame("Hola"))),
            Ok(Bytes::from(text_frame(" mundo"))),
            Ok(Bytes::from_static(b"data: [DONE]\n")),
        ];
        let completion = ChatStreamProcessor::new()
            .consume(stream::iter(chunks))
            .await
            .expect("stream should complete");
        assert_eq!(completion.content, "Hola mundo");
    }

    #[tokio::test]
    async fn test_consume_propagates_read_errors() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from(text_frame("Hola"))),
            Err(AssistantError::Internal("connection reset".into())),
        ];
        let result = ChatStreamProcessor::new().consume(stream::iter(chunks)).await;
        assert!(result.is_err());
    }
}
