//! Content transformation for chat-completion requests

mod classifier;
mod context;
mod pipeline;
mod prompt;
pub mod sections;
mod tools;
mod types;

pub use classifier::is_small_model;
pub use context::ensure_context_size;
pub use pipeline::{Pipeline, PipelineReport};
pub use prompt::{FilterStats, MINIMAL_ENV, SectionRemoval, rewrite, rewrite_content};
pub use tools::{TRUNCATION_MARKER, ToolStats, canonical_name, prune, truncate_description};
pub use types::{Message, RequestEnvelope, Role, ToolDefinition, ToolFunction};
