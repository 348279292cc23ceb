//! Model routing and downgrade tables
//!
//! Pure lookups: which provider serves a model id, and which cheaper model
//! produces the fast first sentence for it.

/// Where a model id is served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    pub provider: String,
    /// Model id without any `provider/` prefix
    pub model: String,
}

const ALIASES: &[(&str, &str)] = &[
    ("opus", "claude-opus-4-5-20251101"),
    ("sonnet", "claude-sonnet-4-20250514"),
    ("haiku", "claude-3-5-haiku-20241022"),
];

const PREFIX_ROUTES: &[(&str, &str)] = &[
    ("claude", "anthropic"),
    ("gpt-", "openai"),
    ("chatgpt", "openai"),
    ("o1", "openai"),
    ("o3", "openai"),
    ("o4", "openai"),
    ("gemini", "gemini"),
    ("sonar", "perplexity"),
    ("llama", "groq"),
    ("meta-llama", "groq"),
    ("mixtral", "groq"),
    ("gemma", "groq"),
    ("qwen", "groq"),
    ("deepseek-r1-distill", "groq"),
];

/// Model fragments that already mark a small, fast model
const FAST_MARKERS: &[&str] = &["mini", "nano", "haiku", "flash", "instant", "8b", "lite"];

/// Downgrade table, first matching prefix wins
const FAST_VARIANTS: &[(&str, &str)] = &[
    ("claude-opus", "claude-3-5-haiku-20241022"),
    ("claude-sonnet", "claude-3-5-haiku-20241022"),
    ("claude-3-7-sonnet", "claude-3-5-haiku-20241022"),
    ("claude-3-5-sonnet", "claude-3-5-haiku-20241022"),
    ("claude-3-opus", "claude-3-5-haiku-20241022"),
    ("gpt-5", "gpt-5-mini"),
    ("gpt-4.1", "gpt-4.1-mini"),
    ("gpt-4o", "gpt-4o-mini"),
    ("gpt-4", "gpt-4o-mini"),
    ("chatgpt-4o", "gpt-4o-mini"),
    ("o1", "o4-mini"),
    ("o3", "o4-mini"),
    ("gemini-2.5-pro", "gemini-2.5-flash"),
    ("gemini-2.0-pro", "gemini-2.0-flash"),
    ("gemini-1.5-pro", "gemini-1.5-flash"),
    ("sonar-reasoning", "sonar"),
    ("sonar-pro", "sonar"),
    ("sonar-deep-research", "sonar"),
    ("llama-3.3-70b", "llama-3.1-8b-instant"),
    ("llama-3.1-70b", "llama-3.1-8b-instant"),
    ("llama3-70b", "llama-3.1-8b-instant"),
    ("mixtral", "llama-3.1-8b-instant"),
];

/// Expand short aliases ("sonnet") to full model ids
pub fn normalize_model(model: &str) -> String {
    let trimmed = model.trim();
    ALIASES
        .iter()
        .find(|(alias, _)| trimmed.eq_ignore_ascii_case(alias))
        .map(|(_, full)| full.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Resolve the provider serving `model`.
///
/// An explicit `provider/model` id wins; otherwise the id prefix decides,
/// falling back to `default_provider`.
pub fn route(model: &str, default_provider: &str) -> ModelRoute {
    let model = normalize_model(model);

    if let Some((provider, rest)) = model.split_once('/') {
        if is_known_provider(provider) {
            return ModelRoute {
                provider: provider.to_string(),
                model: rest.to_string(),
            };
        }
    }

    let lowered = model.to_lowercase();
    let provider = PREFIX_ROUTES
        .iter()
        .find(|(prefix, _)| lowered.starts_with(prefix))
        .map(|(_, provider)| *provider)
        .unwrap_or(default_provider);

    ModelRoute {
        provider: provider.to_string(),
        model,
    }
}

/// Cheaper, faster sibling of `model`; unknown models pass through.
///
/// A `provider/` prefix is kept.
pub fn fast_variant(model: &str) -> String {
    let model = normalize_model(model);
    let (prefix, id) = match model.split_once('/') {
        Some((provider, rest)) if is_known_provider(provider) => (Some(provider), rest),
        _ => (None, model.as_str()),
    };

    let lowered = id.to_lowercase();
    let fast = if FAST_MARKERS.iter().any(|m| lowered.contains(m)) {
        id.to_string()
    } else {
        FAST_VARIANTS
            .iter()
            .find(|(from, _)| lowered.starts_with(from))
            .map(|(_, to)| to.to_string())
            .unwrap_or_else(|| id.to_string())
    };

    match prefix {
        Some(provider) => format!("{}/{}", provider, fast),
        None => fast,
    }
}

fn is_known_provider(id: &str) -> bool {
    matches!(id, "openai" | "anthropic" | "groq" | "gemini" | "perplexity")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_routing() {
        assert_eq!(route("claude-sonnet-4-20250514", "openai").provider, "anthropic");
        assert_eq!(route("gpt-4o", "anthropic").provider, "openai");
        assert_eq!(route("o3-mini", "anthropic").provider, "openai");
        assert_eq!(route("gemini-2.5-pro", "openai").provider, "gemini");
        assert_eq!(route("sonar-pro", "openai").provider, "perplexity");
        assert_eq!(route("llama-3.3-70b-versatile", "openai").provider, "groq");
        assert_eq!(route("my-local-model", "groq").provider, "groq");
    }

    #[test]
    fn test_explicit_provider_prefix() {
        let r = route("groq/openai/gpt-oss-120b", "openai");
        assert_eq!(r.provider, "groq");
        assert_eq!(r.model, "openai/gpt-oss-120b");

        let r = route("meta-llama/llama-4-scout", "openai");
        assert_eq!(r.provider, "groq");
        assert_eq!(r.model, "meta-llama/llama-4-scout");
    }

    #[test]
    fn test_aliases() {
        let r = route("Sonnet", "openai");
        assert_eq!(r.provider, "anthropic");
        assert_eq!(r.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn test_fast_variants() {
        assert_eq!(fast_variant("claude-opus-4-5-20251101"), "claude-3-5-haiku-20241022");
        assert_eq!(fast_variant("gpt-4o"), "gpt-4o-mini");
        assert_eq!(fast_variant("gpt-4.1"), "gpt-4.1-mini");
        assert_eq!(fast_variant("gemini-2.5-pro"), "gemini-2.5-flash");
        assert_eq!(fast_variant("sonar-pro"), "sonar");
        assert_eq!(fast_variant("llama-3.3-70b-versatile"), "llama-3.1-8b-instant");
    }

    #[test]
    fn test_fast_models_and_unknowns_pass_through() {
        assert_eq!(fast_variant("gpt-4o-mini"), "gpt-4o-mini");
        assert_eq!(fast_variant("gemini-2.5-flash"), "gemini-2.5-flash");
        assert_eq!(fast_variant("my-local-model"), "my-local-model");
    }

    #[test]
    fn test_fast_variant_keeps_provider_prefix() {
        assert_eq!(fast_variant("openai/gpt-4o"), "openai/gpt-4o-mini");
    }
}
