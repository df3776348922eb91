/// Tools the model may call during a chat turn
pub mod definitions;
pub mod dispatcher;

pub use definitions::{CALCULATE_TAXES, QUERY_DATABASE, tool_definitions};
pub use dispatcher::ToolDispatcher;
