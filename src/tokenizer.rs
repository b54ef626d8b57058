/**
Splitting of a text into tokens carrying character offsets.
*/
use crate::span::Token;
use unicode_segmentation::UnicodeSegmentation;

/// Splits a text into ordered, non-overlapping tokens. Offsets count `char`s.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<Token>;
}

#[derive(Debug, Clone, Copy, Default)]
/// Splits the text on unicode word boundaries (UAX #29). Whitespace is dropped, punctuation marks
/// are tokens of their own.
pub struct UnicodeWordTokenizer;

impl Tokenizer for UnicodeWordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        // Segments come in order, so char offsets are counted incrementally
        let mut char_offset = 0;
        let mut byte_offset = 0;
        for (byte_start, segment) in text.split_word_bound_indices() {
            char_offset += text[byte_offset..byte_start].chars().count();
            let len = segment.chars().count();
            if !segment.trim().is_empty() {
                tokens.push(Token::new(char_offset, char_offset + len, segment));
            }
            char_offset += len;
            byte_offset = byte_start + segment.len();
        }
        tokens
    }
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> Vec<Token> + Send + Sync,
{
    fn tokenize(&self, text: &str) -> Vec<Token> {
        self(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::validate_tokens;
    use quickcheck::QuickCheck;

    #[test]
    fn test_tokenize_sentence() {
        let tokens = UnicodeWordTokenizer.tokenize("John lives in Paris.");
        assert_eq!(
            tokens,
            vec![
                Token::new(0, 4, "John"),
                Token::new(5, 10, "lives"),
                Token::new(11, 13, "in"),
                Token::new(14, 19, "Paris"),
                Token::new(19, 20, "."),
            ]
        );
    }

    #[test]
    fn test_tokenize_counts_chars() {
        let tokens = UnicodeWordTokenizer.tokenize("Zoë  à Paris");
        assert_eq!(
            tokens,
            vec![
                Token::new(0, 3, "Zoë"),
                Token::new(5, 6, "à"),
                Token::new(7, 12, "Paris"),
            ]
        );
    }

    #[test]
    fn test_closure_tokenizer() {
        let whole = |text: &str| vec![Token::new(0, text.chars().count(), text)];
        assert_eq!(whole.tokenize("abc"), vec![Token::new(0, 3, "abc")]);
    }

    #[test]
    fn test_propertie_tokens_are_valid() {
        fn tokens_are_valid(text: String) -> bool {
            let tokens = UnicodeWordTokenizer.tokenize(&text);
            let chars: Vec<char> = text.chars().collect();
            validate_tokens(&tokens, chars.len()).is_ok()
                && tokens
                    .iter()
                    .all(|t| chars[t.start..t.end].iter().collect::<String>() == t.text)
        }
        let mut qc = QuickCheck::new().tests(1000);
        qc.quickcheck(tokens_are_valid as fn(String) -> bool)
    }
}
