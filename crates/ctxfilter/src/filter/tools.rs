//! Tool list pruning
//!
//! Agents often advertise the same tool twice (`read` and `index_read`) and
//! ship multi-paragraph descriptions. Every tool definition is part of the
//! prompt, so the pruner drops duplicates, optionally everything outside an
//! allow-list, and shortens long descriptions.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

use super::types::ToolDefinition;
use crate::config::ToolsConfig;

/// Marker appended to truncated descriptions
pub const TRUNCATION_MARKER: &str = "...";

/// What the pruner did to one tool list
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolStats {
    pub original_count: usize,
    pub final_count: usize,
    /// Serialized JSON size of the input list in bytes
    pub original_size: usize,
    /// Serialized JSON size of the output list in bytes
    pub final_size: usize,
    pub dropped_duplicates: usize,
    pub dropped_non_essential: usize,
    pub truncated: usize,
    pub reduction_percent: f64,
}

impl ToolStats {
    pub fn dropped(&self) -> usize {
        self.dropped_duplicates + self.dropped_non_essential
    }
}

/// Filter, deduplicate and truncate `tools` according to `config`.
///
/// Rules run per tool in input order: duplicate check, allow-list check,
/// description truncation. Only tools that survive every rule count as kept
/// for later duplicate checks.
pub fn prune(tools: &[ToolDefinition], config: &ToolsConfig) -> (Vec<ToolDefinition>, ToolStats) {
    let mut stats = ToolStats {
        original_count: tools.len(),
        original_size: serialized_size(tools),
        ..ToolStats::default()
    };

    let mut kept_names: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(tools.len());

    for tool in tools {
        let name = tool.name();
        let canonical = canonical_name(name, &config.dedup_prefix);

        // Tools without a function name (provider built-ins) are never duplicates
        let named = !canonical.is_empty();

        if config.dedup && named && kept_names.contains(canonical) {
            tracing::debug!(tool = name, "Dropping duplicate tool");
            stats.dropped_duplicates += 1;
            continue;
        }

        if config.essential_only && !config.essential_tools.iter().any(|t| t == name) {
            tracing::debug!(tool = name, "Dropping non-essential tool");
            stats.dropped_non_essential += 1;
            continue;
        }

        if named {
            kept_names.insert(canonical.to_string());
        }

        let mut tool = tool.clone();
        if config.truncate_descriptions && truncate_description(&mut tool, config.max_description_length) {
            stats.truncated += 1;
        }
        kept.push(tool);
    }

    stats.final_count = kept.len();
    stats.final_size = serialized_size(&kept);
    stats.reduction_percent = reduction_percent(stats.original_size, stats.final_size);

    (kept, stats)
}

/// Name with the duplicate prefix stripped
pub fn canonical_name<'a>(name: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return name;
    }
    match name.strip_prefix(prefix) {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => name,
    }
}

/// Cut the description to `max_chars` characters plus [`TRUNCATION_MARKER`].
///
/// Returns whether the description was shortened.
pub fn truncate_description(tool: &mut ToolDefinition, max_chars: usize) -> bool {
    let Some(Value::String(description)) = tool.function.as_mut().and_then(|f| f.description.as_mut()) else {
        return false;
    };

    match description.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            description.truncate(cut);
            description.push_str(TRUNCATION_MARKER);
            true
        }
        None => false,
    }
}

fn serialized_size(tools: &[ToolDefinition]) -> usize {
    serde_json::to_vec(tools).map(|v| v.len()).unwrap_or(0)
}

fn reduction_percent(original: usize, remaining: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (original as f64 - remaining as f64) / original as f64 * 100.0
}
