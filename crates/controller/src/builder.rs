//! Builder for ReActController.

use std::sync::Arc;

use cowork_core::{
    config::AgentConfig,
    traits::{ConfirmationGate, LlmClient, NoOpProgressSink, ProgressSink},
    Error, Result,
};

use crate::executor::StepDispatcher;
use crate::parser::DecisionParser;
use crate::react::ReActController;

/// Builder for constructing a ReActController.
pub struct ReActBuilder {
    config: AgentConfig,
    llm: Option<Arc<dyn LlmClient>>,
    dispatcher: Option<Arc<StepDispatcher>>,
    gate: Option<Arc<dyn ConfirmationGate>>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl ReActBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: AgentConfig::default(),
            llm: None,
            dispatcher: None,
            gate: None,
            progress: None,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the LLM client.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Set the dispatcher that runs actions.
    pub fn with_dispatcher(mut self, dispatcher: Arc<StepDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Set the gate for destructive actions. Without one they are declined.
    pub fn with_confirmation_gate(mut self, gate: Arc<dyn ConfirmationGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Build the controller.
    pub fn build(self) -> Result<ReActController> {
        let llm = self
            .llm
            .ok_or_else(|| Error::Config("ReAct controller needs an LLM client".into()))?;
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| Error::Config("ReAct controller needs a dispatcher".into()))?;

        Ok(ReActController {
            config: self.config,
            llm,
            dispatcher,
            gate: self.gate,
            progress: self.progress.unwrap_or_else(|| Arc::new(NoOpProgressSink)),
            parser: DecisionParser::new(),
        })
    }
}

impl Default for ReActBuilder {
    fn default() -> Self {
        Self::new()
    }
}
