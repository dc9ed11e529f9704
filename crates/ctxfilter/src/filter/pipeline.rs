//! Request body transformation pipeline
//!
//! Runs the prompt rewriter, the tool pruner and the context negotiator over a
//! decoded request. The input envelope is never modified; callers get a new
//! envelope plus a report of what changed.

use serde::Serialize;

use super::context::ensure_context_size;
use super::prompt::{FilterStats, rewrite};
use super::tools::{ToolStats, prune};
use super::types::RequestEnvelope;
use crate::config::Config;

/// Everything the pipeline did to one request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    pub prompt: FilterStats,
    /// `None` when the request had no tools or tool pruning is disabled
    pub tools: Option<ToolStats>,
    pub context_size_injected: bool,
}

impl PipelineReport {
    /// Whether the output differs from the input
    pub fn changed(&self) -> bool {
        self.prompt.original_size != self.prompt.filtered_size
            || !self.prompt.sections_removed.is_empty()
            || self
                .tools
                .as_ref()
                .is_some_and(|t| t.original_size != t.final_size)
            || self.context_size_injected
    }
}

/// Composes the request transformations over one configuration
#[derive(Debug, Clone, Copy)]
pub struct Pipeline<'a> {
    config: &'a Config,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Transform `envelope` into the request that is sent upstream
    pub fn apply(&self, envelope: &RequestEnvelope) -> (RequestEnvelope, PipelineReport) {
        let mut output = envelope.clone();
        let mut report = PipelineReport::default();

        let (messages, prompt_stats) = rewrite(envelope.messages(), envelope.model(), &self.config.filter);
        if envelope.messages.is_some() {
            output.messages = Some(messages);
        }
        report.prompt = prompt_stats;

        if self.config.tools.enabled {
            if let Some(tools) = envelope.tools.as_deref().filter(|t| !t.is_empty()) {
                let (pruned, tool_stats) = prune(tools, &self.config.tools);
                output.tools = Some(pruned);
                report.tools = Some(tool_stats);
            }
        }

        if self.config.context.auto_inject {
            let (options, injected) = ensure_context_size(
                envelope.options.as_ref(),
                &self.config.context.option_key,
                self.config.context.default_size,
            );
            output.options = Some(options);
            report.context_size_injected = injected;
        }

        (output, report)
    }
}
