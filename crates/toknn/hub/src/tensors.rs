//! Which tensor holds a model's input or output embeddings.

/// Tensor names tried, in order, for input embeddings.
pub const INPUT_TENSOR_CANDIDATES: &[&str] = &[
    "model.embed_tokens.weight",
    "language_model.model.embed_tokens.weight",
];

/// Tensor names tried, in order, for output embeddings.
pub const OUTPUT_TENSOR_CANDIDATES: &[&str] = &["lm_head.weight", "language_model.lm_head.weight"];

/// Default candidate names for `role`.
#[must_use]
pub fn default_candidates(role: toknn_core::EmbeddingRole) -> Vec<String> {
    let names = match role {
        toknn_core::EmbeddingRole::Input => INPUT_TENSOR_CANDIDATES,
        toknn_core::EmbeddingRole::Output => OUTPUT_TENSOR_CANDIDATES,
    };
    names.iter().map(ToString::to_string).collect()
}

/// First candidate present in `available`.
///
/// The error lists every candidate tried and the available names that look
/// like embeddings, to help pick an override.
pub fn resolve_tensor_name<S: AsRef<str>>(
    available: &[S],
    candidates: &[String],
    role: toknn_core::EmbeddingRole,
) -> eyre::Result<String> {
    if let Some(found) = candidates
        .iter()
        .find(|c| available.iter().any(|a| a.as_ref() == c.as_str()))
    {
        return Ok(found.clone());
    }

    let mut embed_head: Vec<&str> = available
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| {
            let lower = name.to_lowercase();
            lower.contains("embed") || lower.contains("head")
        })
        .collect();
    embed_head.sort_unstable();

    eyre::bail!(
        "no known {role} tensor found, tried {candidates:?}; available tensors containing 'embed' or 'head': {embed_head:?}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use toknn_core::EmbeddingRole;

    #[test]
    fn test_first_candidate_wins() {
        let available = ["lm_head.weight", "language_model.lm_head.weight"];
        let candidates = default_candidates(EmbeddingRole::Output);
        let name = resolve_tensor_name(&available, &candidates, EmbeddingRole::Output).unwrap();
        assert_eq!(name, "lm_head.weight");
    }

    #[test]
    fn test_second_candidate_used() {
        let available = ["language_model.model.embed_tokens.weight", "vision.patch_embed.weight"];
        let candidates = default_candidates(EmbeddingRole::Input);
        let name = resolve_tensor_name(&available, &candidates, EmbeddingRole::Input).unwrap();
        assert_eq!(name, "language_model.model.embed_tokens.weight");
    }

    #[test]
    fn test_override_replaces_defaults() {
        let available = ["model.embed_tokens.weight", "transformer.wte.weight"];
        let name = resolve_tensor_name(
            &available,
            &["transformer.wte.weight".to_string()],
            EmbeddingRole::Input,
        )
        .unwrap();
        assert_eq!(name, "transformer.wte.weight");
    }

    #[test]
    fn test_missing_tensor_lists_hints() {
        let available = ["transformer.wte.weight", "model.Embed_in.weight", "mlp.up.weight"];
        let err = resolve_tensor_name(
            &available,
            &default_candidates(EmbeddingRole::Input),
            EmbeddingRole::Input,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("model.embed_tokens.weight"), "{msg}");
        assert!(msg.contains("model.Embed_in.weight"), "{msg}");
        assert!(!msg.contains("mlp.up.weight"), "{msg}");
    }
}
