/// Whether `model_name` belongs to the configured small-model list.
///
/// Case-insensitive substring match, so `"llama3.2:1b"` also matches
/// `"llama3.2:1b-instruct-q4_K_M"`. Empty list entries never match.
pub fn is_small_model<S: AsRef<str>>(model_name: &str, known: &[S]) -> bool {
    if model_name.is_empty() {
        return false;
    }

    let model = model_name.to_lowercase();
    known.iter().any(|entry| {
        let entry = entry.as_ref();
        !entry.is_empty() && model.contains(&entry.to_lowercase())
    })
}
