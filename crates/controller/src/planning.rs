//! Plan generation through the reasoning service.

use serde_json::Value;
use std::sync::Arc;

use cowork_core::{
    traits::{ChatMessage, LlmClient, ToolRegistry},
    types::Plan,
    Error, Result,
};

use crate::parser::parse_lenient;

const PLANNER_PROMPT: &str = r#"You turn a user request into a plan of steps.

Respond with JSON only:
{"steps": [{"id": "snake_case_id", "description": "...", "action": "<capability>", "args": {...}, "depends_on": ["other_id"]}]}

Rules:
- `python` runs code (arg `code`), `shell` runs a command (arg `command`).
- An argument equal to a step id receives that step's whole output;
  `step_id['key']` receives one entry of it.
- Inside `code` and `command`, earlier outputs are variables named by
  step id (`result = len(list_all)`, `ls "$base_dir"`).
- For plain conversation, answer with one step: {"id": "reply", "action": "chat_op", "args": {"response": "..."}}.

Available capabilities: "#;

/// Turns a request into a validated plan.
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    tools: Option<Arc<dyn ToolRegistry>>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, tools: None }
    }

    /// List the registry's capabilities in the request.
    pub fn with_tools(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Generate a plan. Any failure is a plan generation error.
    pub async fn generate(&self, request: &str) -> Result<Plan> {
        let mut capabilities = vec!["python".to_string(), "shell".to_string()];
        if let Some(tools) = &self.tools {
            capabilities.extend(tools.list().await?);
        }

        let messages = vec![
            ChatMessage::system(format!("{}{}", PLANNER_PROMPT, capabilities.join(", "))),
            ChatMessage::user(request),
        ];
        let response = self
            .llm
            .chat(&messages)
            .await
            .map_err(|e| Error::plan_generation(format!("reasoning service failed: {}", e)))?;

        let plan = parse_plan(&response.content)?;
        tracing::info!(steps = plan.steps.len(), "Plan generated");
        Ok(plan)
    }
}

/// Parse and validate a plan from a raw response.
///
/// Accepts `{"steps": [...]}` or a bare array of steps.
pub fn parse_plan(raw: &str) -> Result<Plan> {
    let value = parse_lenient(raw)
        .or_else(|| bare_array(raw))
        .ok_or_else(|| Error::plan_generation("response is not valid JSON"))?;

    let value = match value {
        Value::Array(steps) => serde_json::json!({ "steps": steps }),
        other => other,
    };
    let plan: Plan = serde_json::from_value(value)
        .map_err(|e| Error::plan_generation(format!("response is not a plan: {}", e)))?;
    if plan.steps.is_empty() {
        return Err(Error::plan_generation("plan has no steps"));
    }
    plan.validate()
        .map_err(|e| Error::plan_generation(e.to_string()))?;
    Ok(plan)
}

fn bare_array(raw: &str) -> Option<Value> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}
