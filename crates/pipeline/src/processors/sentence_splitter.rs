//! Sentence boundary splitting for speakable output
//!
//! A '.', '!' or '?' ends a sentence only when it is followed by whitespace
//! (or the end of text) and the next visible character is uppercase or a
//! digit. Periods after known abbreviations and initials ("Dr.", "U.S.",
//! "J. K.") never end a sentence. Spans shorter than the minimum
//! length keep accumulating so that short fragments are merged.

/// Default minimum sentence length in characters
pub const DEFAULT_MIN_SENTENCE_CHARS: usize = 20;

const TERMINATORS: &[char] = &['.', '!', '?'];

const CLOSERS: &[char] = &['"', '\'', ')', ']', '\u{201D}', '\u{2019}'];

const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "inc", "ltd", "mt", "ft",
    "approx", "dept", "est", "fig", "gen", "gov", "sen", "rep", "capt", "lt", "col", "sgt",
];

/// Collapse all whitespace runs to single spaces and trim
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits text into sentences suitable for speech
#[derive(Debug, Clone, Copy)]
pub struct SentenceSplitter {
    min_chars: usize,
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SENTENCE_CHARS)
    }
}

impl SentenceSplitter {
    /// Create a splitter with the given minimum sentence length
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    pub fn min_chars(&self) -> usize {
        self.min_chars
    }

    /// Split text into sentences.
    ///
    /// No sentence is shorter than the minimum unless it is the only one.
    pub fn split(&self, text: &str) -> Vec<String> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = normalized.chars().collect();
        let mut sentences: Vec<String> = Vec::new();
        let mut start = 0;
        let mut i = 0;

        while i < chars.len() {
            match boundary_end(&chars, i, true) {
                Some(end) => {
                    let span = collect_trimmed(&chars[start..end]);
                    if self.long_enough(&span) {
                        sentences.push(span);
                        start = end;
                    }
                    i = end;
                }
                None => i += 1,
            }
        }

        let remainder = collect_trimmed(&chars[start..]);
        if !remainder.is_empty() {
            match sentences.last_mut() {
                Some(last) if !self.long_enough(&remainder) => {
                    last.push(' ');
                    last.push_str(&remainder);
                }
                _ => sentences.push(remainder),
            }
        }

        sentences
    }

    /// Split off the first sentence that meets the minimum length.
    ///
    /// Without such a boundary the whole (normalized) text is `first` and
    /// `rest` is empty.
    pub fn extract_first(&self, text: &str) -> (String, String) {
        let normalized = normalize(text);
        let chars: Vec<char> = normalized.chars().collect();

        let mut i = 0;
        while i < chars.len() {
            match boundary_end(&chars, i, true) {
                Some(end) => {
                    let first = collect_trimmed(&chars[..end]);
                    if self.long_enough(&first) {
                        return (first, collect_trimmed(&chars[end..]));
                    }
                    i = end;
                }
                None => i += 1,
            }
        }

        (normalized, String::new())
    }

    pub(crate) fn long_enough(&self, span: &str) -> bool {
        span.chars().count() >= self.min_chars
    }
}

pub(crate) fn collect_trimmed(chars: &[char]) -> String {
    normalize(&chars.iter().collect::<String>())
}

/// If `chars[i]` ends a sentence, return the index just past it (closing
/// quotes and brackets included).
///
/// With `complete == false` the text may still grow, so a terminator whose
/// following characters have not arrived yet is not a boundary.
pub(crate) fn boundary_end(chars: &[char], i: usize, complete: bool) -> Option<usize> {
    if !TERMINATORS.contains(&chars[i]) {
        return None;
    }

    // "?!" and "..." end on their last character
    match chars.get(i + 1) {
        Some(next) if TERMINATORS.contains(next) => return None,
        None if !complete => return None,
        _ => {}
    }

    let mut end = i + 1;
    while end < chars.len() && CLOSERS.contains(&chars[end]) {
        end += 1;
    }

    if end < chars.len() && !chars[end].is_whitespace() {
        return None;
    }

    let next_visible = chars[end..].iter().find(|c| !c.is_whitespace());
    match next_visible {
        None if complete => {}
        None => return None,
        Some(c) if c.is_uppercase() || c.is_ascii_digit() => {}
        Some(_) => return None,
    }

    if chars[i] == '.' && is_abbreviation(chars, i, complete) {
        return None;
    }

    Some(end)
}

fn is_abbreviation(chars: &[char], dot: usize, complete: bool) -> bool {
    let mut start = dot;
    while start > 0 && (chars[start - 1].is_alphabetic() || chars[start - 1] == '.') {
        start -= 1;
    }
    let word: String = chars[start..dot].iter().collect::<String>().to_lowercase();
    if word.is_empty() {
        return false;
    }

    let last_segment = word.rsplit('.').next().unwrap_or("");
    if last_segment.chars().count() == 1 {
        // "U.S.", "e.g." or a run of initials like "J. K."; a lone letter
        // such as "vitamin C." still ends the sentence
        return word.contains('.')
            || initial_follows(chars, dot, complete)
            || initial_precedes(chars, start);
    }

    ABBREVIATIONS.contains(&last_segment)
}

/// Whether the next word is a single letter with its own period
fn initial_follows(chars: &[char], dot: usize, complete: bool) -> bool {
    let Some(offset) = chars[dot + 1..].iter().position(|c| !c.is_whitespace()) else {
        return false;
    };
    let letter = dot + 1 + offset;
    if !chars[letter].is_alphabetic() {
        return false;
    }
    match chars.get(letter + 1) {
        Some(&next) => next == '.',
        None => !complete,
    }
}

/// Whether the word starting at `start` follows a single-letter initial
fn initial_precedes(chars: &[char], start: usize) -> bool {
    let mut end = start;
    while end > 0 && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    if end == start || end < 2 || chars[end - 1] != '.' || !chars[end - 2].is_alphabetic() {
        return false;
    }
    end == 2 || !chars[end - 3].is_alphanumeric()
}
