//! Context window negotiation
//!
//! Ollama loads models with a small default window unless the request says
//! otherwise. The negotiator fills in a default without touching caller values.

use serde_json::{Map, Value};

/// Return `options` with `key` set to `default_size` unless the caller already
/// chose a value. The flag reports whether the default was injected.
///
/// Any existing value, including `null` or a non-number, is left alone.
pub fn ensure_context_size(
    options: Option<&Map<String, Value>>,
    key: &str,
    default_size: u64,
) -> (Map<String, Value>, bool) {
    let mut options = options.cloned().unwrap_or_default();
    if options.contains_key(key) {
        return (options, false);
    }

    options.insert(key.to_string(), Value::from(default_size));
    (options, true)
}
