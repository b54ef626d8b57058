/**
Data model shared by every stage of an evaluation: tokens, labeled spans and annotated samples.
Offsets are half-open and count unicode scalar values (`char`s) of the text, not bytes.
*/
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// A token of the text with its character offsets.
pub struct Token {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Token {
    pub fn new(start: usize, end: usize, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// A labeled range of characters, such as a person name or a phone number.
pub struct Span {
    #[serde(alias = "start_position")]
    pub start: usize,
    #[serde(alias = "end_position")]
    pub end: usize,
    pub entity_type: String,
}

impl Span {
    pub fn new(start: usize, end: usize, entity_type: impl Into<String>) -> Self {
        Self {
            start,
            end,
            entity_type: entity_type.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Number of characters shared by the span and the range `[start, end)`.
    pub(crate) fn overlap(&self, start: usize, end: usize) -> usize {
        self.end.min(end).saturating_sub(self.start.max(start))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// An annotated text of the corpus. The spans are the gold spans.
pub struct Sample {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "full_text")]
    pub text: String,
    #[serde(default)]
    pub tokens: Vec<Token>,
    #[serde(default)]
    pub spans: Vec<Span>,
}

impl Sample {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        tokens: Vec<Token>,
        spans: Vec<Span>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            tokens,
            spans,
        }
    }

    /// Length of the text in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Checks that the tokens are sorted, do not overlap and lie inside the text.
    pub fn validate(&self) -> Result<(), OffsetError> {
        validate_tokens(&self.tokens, self.char_len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Offsets that cannot be laid over the text or over its tokens.
pub enum OffsetError {
    #[error("Span [{start}, {end}) of type `{entity_type}` lies outside of the text of length {text_len}")]
    SpanOutOfBounds {
        start: usize,
        end: usize,
        entity_type: String,
        text_len: usize,
    },
    #[error("Span [{start}, {end}) of type `{entity_type}` starts after its end")]
    InvertedSpan {
        start: usize,
        end: usize,
        entity_type: String,
    },
    #[error("Token {index} [{start}, {end}) lies outside of the text of length {text_len}")]
    TokenOutOfBounds {
        index: usize,
        start: usize,
        end: usize,
        text_len: usize,
    },
    #[error("Token {index} [{start}, {end}) overlaps the previous token ending at {previous_end}")]
    UnorderedTokens {
        index: usize,
        start: usize,
        end: usize,
        previous_end: usize,
    },
}

pub(crate) fn validate_tokens(tokens: &[Token], text_len: usize) -> Result<(), OffsetError> {
    let mut previous_end = 0;
    for (index, token) in tokens.iter().enumerate() {
        if token.start > token.end || token.end > text_len {
            return Err(OffsetError::TokenOutOfBounds {
                index,
                start: token.start,
                end: token.end,
                text_len,
            });
        }
        if token.start < previous_end {
            return Err(OffsetError::UnorderedTokens {
                index,
                start: token.start,
                end: token.end,
                previous_end,
            });
        }
        previous_end = token.end;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap() {
        let span = Span::new(3, 8, "PERSON");
        assert_eq!(span.overlap(0, 3), 0);
        assert_eq!(span.overlap(0, 4), 1);
        assert_eq!(span.overlap(4, 6), 2);
        assert_eq!(span.overlap(7, 12), 1);
        assert_eq!(span.overlap(8, 12), 0);
    }

    #[test]
    fn test_validate_tokens() {
        let sample = Sample::new(
            "0",
            "John lives",
            vec![Token::new(0, 4, "John"), Token::new(5, 10, "lives")],
            vec![],
        );
        assert!(sample.validate().is_ok());

        let overlapping = Sample::new(
            "1",
            "John lives",
            vec![Token::new(0, 4, "John"), Token::new(3, 10, "n lives")],
            vec![],
        );
        assert_eq!(
            overlapping.validate(),
            Err(OffsetError::UnorderedTokens {
                index: 1,
                start: 3,
                end: 10,
                previous_end: 4
            })
        );

        let outside = Sample::new("2", "John", vec![Token::new(0, 5, "John ")], vec![]);
        assert!(matches!(
            outside.validate(),
            Err(OffsetError::TokenOutOfBounds { index: 0, .. })
        ));
    }

    #[test]
    fn test_char_len_counts_chars() {
        let sample = Sample::new("0", "Zoë à Paris", vec![], vec![]);
        assert_eq!(sample.char_len(), 11);
    }

    #[test]
    fn test_deserialize_corpus_field_names() {
        let record = r#"{
            "full_text": "My name is Dana",
            "spans": [{"entity_type": "PERSON", "start_position": 11, "end_position": 15}]
        }"#;
        let sample: Sample = serde_json::from_str(record).unwrap();
        assert_eq!(sample.text, "My name is Dana");
        assert_eq!(sample.spans, vec![Span::new(11, 15, "PERSON")]);
        assert!(sample.tokens.is_empty());
        assert!(sample.id.is_empty());
    }
}
