//! Prompt construction
//!
//! Builds the message lists for a regular turn, the fast first-sentence
//! request and the continuation request.

use voice_turn_core::Message;

/// JSON key the first-sentence request asks for
pub const FIRST_SENTENCE_KEY: &str = "first_sentence";

/// Prompt builder for one request
#[derive(Debug, Default)]
pub struct PromptBuilder {
    system: Vec<String>,
    messages: Vec<Message>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base system prompt with the sentence budget folded in
    pub fn system_prompt(mut self, base: &str, max_sentences: usize) -> Self {
        let base = base.trim();
        if !base.is_empty() {
            self.system.push(base.to_string());
        }
        self.system.push(format!(
            "Keep the answer to at most {} {}. Write plain spoken sentences: no markdown, \
             lists, headings or emoji.",
            max_sentences,
            if max_sentences == 1 { "sentence" } else { "sentences" }
        ));
        self
    }

    /// Ask for exactly one sentence, preferably as `{"first_sentence": "..."}`
    pub fn first_sentence_instruction(mut self) -> Self {
        self.system.push(format!(
            "Reply with exactly one complete sentence that begins the answer. Respond with \
             JSON only, in the form {{\"{}\": \"...\"}}.",
            FIRST_SENTENCE_KEY
        ));
        self
    }

    /// Continue after an already spoken first sentence
    pub fn continuation_instruction(mut self, remaining: usize) -> Self {
        self.system.push(format!(
            "Your previous message is the first sentence of the answer and has already been \
             spoken. Continue the answer with at most {} more {}. Do not repeat or rephrase \
             the first sentence.",
            remaining,
            if remaining == 1 { "sentence" } else { "sentences" }
        ));
        self
    }

    /// Add conversation history
    pub fn with_history(mut self, history: &[Message]) -> Self {
        self.messages.extend(history.iter().cloned());
        self
    }

    /// Append prior assistant content
    pub fn with_assistant(mut self, content: &str) -> Self {
        self.messages.push(Message::assistant(content.trim()));
        self
    }

    /// Build the final message list: one system message, then the conversation
    pub fn build(self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if !self.system.is_empty() {
            messages.push(Message::system(self.system.join("\n\n")));
        }
        messages.extend(self.messages);
        messages
    }
}

/// Pull the sentence out of a first-sentence reply.
///
/// Accepts the requested JSON (optionally inside a code fence), JSON with
/// surrounding chatter, or plain text.
pub fn parse_first_sentence_reply(raw: &str) -> String {
    let text = strip_code_fence(raw.trim());

    if let (Some(open), Some(close)) = (text.find('{'), text.rfind('}')) {
        if open < close {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text[open..=close]) {
                if let Some(sentence) = value.get(FIRST_SENTENCE_KEY).and_then(|v| v.as_str()) {
                    return sentence.trim().to_string();
                }
            }
        }
    }

    text.trim().trim_matches('"').trim().to_string()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_turn_core::Role;

    #[test]
    fn test_regular_prompt() {
        let history = vec![Message::user("Who was the 44th president?")];
        let messages = PromptBuilder::new()
            .system_prompt("You are a helpful assistant.", 3)
            .with_history(&history)
            .build();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.starts_with("You are a helpful assistant."));
        assert!(messages[0].content.contains("at most 3 sentences"));
        assert_eq!(messages[1], history[0]);
    }

    #[test]
    fn test_continuation_prompt() {
        let history = vec![Message::user("Tell me about Obama")];
        let messages = PromptBuilder::new()
            .system_prompt("", 5)
            .continuation_instruction(4)
            .with_history(&history)
            .with_assistant("Obama was the 44th president. ")
            .build();

        assert_eq!(messages.len(), 3);
        assert!(messages[0].content.contains("at most 4 more sentences"));
        assert_eq!(messages[2], Message::assistant("Obama was the 44th president."));
    }

    #[test]
    fn test_parse_json_reply() {
        assert_eq!(
            parse_first_sentence_reply(r#"{"first_sentence": "Obama was the 44th president."}"#),
            "Obama was the 44th president."
        );
    }

    #[test]
    fn test_parse_fenced_reply() {
        let raw = "```json\n{\"first_sentence\": \"Paris is the capital of France.\"}\n```";
        assert_eq!(parse_first_sentence_reply(raw), "Paris is the capital of France.");
    }

    #[test]
    fn test_parse_lenient_reply() {
        assert_eq!(
            parse_first_sentence_reply("Sure! {\"first_sentence\":\"It is sunny.\"} Hope that helps"),
            "It is sunny."
        );
        assert_eq!(parse_first_sentence_reply("\"Just text.\""), "Just text.");
        assert_eq!(parse_first_sentence_reply("  "), "");
        assert_eq!(parse_first_sentence_reply("{\"other\": 1}"), "{\"other\": 1}");
    }
}
