//! crates/crms_ussd_core/src/input.rs
//!
//! Splits the accumulated USSD text into the keystroke tokens entered so far.
//! The gateway resends the full history on every callback, joined by `*`.

/// Separator the gateway places between successive user entries.
pub const INPUT_DELIMITER: char = '*';

/// The tokenized input of one callback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedInput {
    tokens: Vec<String>,
}

impl ParsedInput {
    pub fn parse(text: &str) -> Self {
        let tokens = text
            .split(INPUT_DELIMITER)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Self { tokens }
    }

    /// Menu depth equals the number of tokens entered so far.
    pub fn depth(&self) -> usize {
        self.tokens.len()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.tokens.last().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_text_is_depth_zero() {
        assert_eq!(ParsedInput::parse("").depth(), 0);
        assert_eq!(ParsedInput::parse("   ").depth(), 0);
        assert!(ParsedInput::parse("\t").tokens().is_empty());
    }

    #[test]
    fn tokens_follow_entry_order() {
        let input = ParsedInput::parse("4*1234*ABC123");
        assert_eq!(input.depth(), 3);
        assert_eq!(input.get(0), Some("4"));
        assert_eq!(input.get(1), Some("1234"));
        assert_eq!(input.last(), Some("ABC123"));
    }

    #[test]
    fn empty_segments_are_dropped() {
        let input = ParsedInput::parse("1**1234*");
        assert_eq!(input.tokens(), &["1".to_string(), "1234".to_string()]);
        assert_eq!(input.depth(), input.tokens().len());
    }

    #[test]
    fn depth_always_matches_token_count() {
        for text in ["", "1", "1*2", "1*2*3", " * ", "2* 9999 *X"] {
            let input = ParsedInput::parse(text);
            assert_eq!(input.depth(), input.tokens().len(), "text {:?}", text);
        }
    }
}
