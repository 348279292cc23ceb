//! Read-only configuration boundary

/// Credentials and preferences supplied by the surrounding application
pub trait ConfigProvider: Send + Sync {
    /// API key for a provider id such as `openai` or `anthropic`
    fn api_key(&self, provider: &str) -> Option<String>;

    /// System prompt prepended to every turn
    fn system_prompt(&self) -> String;

    /// Maximum sentences per turn (1..=10)
    fn sentence_budget(&self) -> usize;

    /// Whether the two-phase fast-first strategy is enabled
    fn faster_first(&self) -> bool;
}
