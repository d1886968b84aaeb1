//! Built-in tools.

use async_trait::async_trait;
use serde_json::{json, Value};

use cowork_core::{traits::Tool, types::ToolOutput, types::CHAT_ACTION, Result};

// =============================================================================
// Echo Tool
// =============================================================================

/// Simple echo tool for testing.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the input message back"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let message = match args.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "No message provided".to_string(),
        };

        Ok(ToolOutput::text(format!("Echo: {}", message)))
    }
}

// =============================================================================
// Chat Tool
// =============================================================================

/// Answers a chat plan directly with the response the planner wrote.
pub struct ChatTool;

#[async_trait]
impl Tool for ChatTool {
    fn name(&self) -> &str {
        CHAT_ACTION
    }

    fn description(&self) -> &str {
        "Reply to the user without touching any files"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "response": {
                    "type": "string",
                    "description": "The reply shown to the user"
                }
            },
            "required": ["response"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        match args.get("response").and_then(|v| v.as_str()) {
            Some(response) => Ok(ToolOutput::text(response)),
            None => Ok(ToolOutput::error("chat_op requires a 'response' argument")),
        }
    }
}
