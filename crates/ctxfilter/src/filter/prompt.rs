//! System prompt rewriting for small models
//!
//! Coding agents prepend a repository tree, an environment block and whole
//! instruction files to the system prompt. Small models drown in that, so the
//! rewriter strips those sections and leaves a minimal environment stub.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::time::{Duration, Instant};

use super::classifier::is_small_model;
use super::sections::{DEFAULT_SECTIONS, Section};
use super::types::{Message, Role};
use crate::config::FilterConfig;

/// Environment block appended to every rewritten system prompt
pub const MINIMAL_ENV: &str = "<env>
  Working directory: (current directory)
  Platform: linux
  Today's date: (current date)
</env>";

/// Characters removed for one section name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionRemoval {
    pub name: String,
    pub size: usize,
}

/// What the rewriter did to one request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterStats {
    pub is_small_model: bool,
    /// Characters across all system messages before rewriting
    pub original_size: usize,
    /// Characters across all system messages after rewriting
    pub filtered_size: usize,
    pub sections_removed: Vec<SectionRemoval>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl FilterStats {
    fn passthrough(is_small_model: bool) -> Self {
        Self {
            is_small_model,
            ..Self::default()
        }
    }

    /// Reduction of the system prompt size in percent
    pub fn reduction_percent(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        (self.original_size as f64 - self.filtered_size as f64) / self.original_size as f64 * 100.0
    }

    fn record(&mut self, name: &str, size: usize) {
        match self.sections_removed.iter_mut().find(|s| s.name == name) {
            Some(existing) => existing.size += size,
            None => self.sections_removed.push(SectionRemoval {
                name: name.to_string(),
                size,
            }),
        }
    }
}

fn serialize_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64() * 1000.0)
}

/// Strip agent context from the system messages of a small-model request.
///
/// Returns new messages; the input is not modified. Non-system messages and
/// system messages without plain string content are copied unchanged.
pub fn rewrite(messages: &[Message], model: &str, config: &FilterConfig) -> (Vec<Message>, FilterStats) {
    let small = is_small_model(model, &config.small_models);
    if !config.enabled || !small {
        return (messages.to_vec(), FilterStats::passthrough(small));
    }

    let started = Instant::now();
    let mut stats = FilterStats::passthrough(true);

    let rewritten = messages
        .iter()
        .map(|message| match (&message.role, message.text()) {
            (Role::System, Some(content)) => {
                let filtered = rewrite_content(content, &DEFAULT_SECTIONS, &mut stats);
                stats.original_size += content.chars().count();
                stats.filtered_size += filtered.chars().count();

                let mut message = message.clone();
                message.content = Some(Value::String(filtered));
                message
            }
            _ => message.clone(),
        })
        .collect();

    stats.elapsed = started.elapsed();
    (rewritten, stats)
}

/// Remove `sections` from one system prompt and append [`MINIMAL_ENV`]
pub fn rewrite_content(content: &str, sections: &[Section], stats: &mut FilterStats) -> String {
    // A stub left by an earlier rewrite must not close an unterminated `<env>`
    let mut remaining = content
        .trim_end()
        .strip_suffix(MINIMAL_ENV)
        .unwrap_or(content)
        .to_string();

    // Removing one section can join text into another; repeat until stable
    loop {
        let mut changed = false;
        for section in sections {
            let (rest, removed) = section.extract_all(&remaining);
            if removed > 0 {
                tracing::debug!(section = section.name, size = removed, "Removed prompt section");
                stats.record(section.name, removed);
                changed = true;
            }
            remaining = rest;
        }
        if !changed {
            break;
        }
    }

    let trimmed = remaining.trim();
    if trimmed.is_empty() {
        MINIMAL_ENV.to_string()
    } else {
        format!("{trimmed}\n\n{MINIMAL_ENV}")
    }
}
