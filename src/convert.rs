/**
Conversion of character-offset spans into one tag per token.
*/
use crate::scheme::{RunPosition, Scheme, OUTSIDE};
use crate::span::{validate_tokens, OffsetError, Span, Token};
use itertools::Itertools;
use std::cmp::Reverse;
use tracing::warn;

/// Converts the labeled spans of a text into one tag per token, following the given scheme.
///
/// A token takes the type of the span it intersects by at least one character. When a token
/// intersects several spans, the span starting first wins, then the one overlapping the token the
/// most, then the one listed first. Consecutive tokens assigned to the same span form a run, and
/// the tags of a run are built by the scheme. Empty spans are ignored.
///
/// ```rust
/// use spaneval::{convert, Scheme, Span, Token};
///
/// let text = "John lives in Paris";
/// let tokens = vec![
///     Token::new(0, 4, "John"),
///     Token::new(5, 10, "lives"),
///     Token::new(11, 13, "in"),
///     Token::new(14, 19, "Paris"),
/// ];
/// let spans = vec![Span::new(0, 4, "PERSON"), Span::new(14, 19, "LOCATION")];
/// let tags = convert(text, &tokens, &spans, Scheme::BIO).unwrap();
/// assert_eq!(tags, vec!["B-PERSON", "O", "O", "B-LOCATION"]);
/// ```
pub fn convert(
    text: &str,
    tokens: &[Token],
    spans: &[Span],
    scheme: Scheme,
) -> Result<Vec<String>, OffsetError> {
    let text_len = text.chars().count();
    validate_tokens(tokens, text_len)?;
    let spans = checked_spans(spans, text_len)?;

    let assignment: Vec<Option<usize>> = tokens
        .iter()
        .map(|token| assign_span(&spans, token))
        .collect();

    let mut tags = Vec::with_capacity(tokens.len());
    for (span_index, run) in &assignment.iter().chunk_by(|a| **a) {
        let len = run.count();
        match span_index {
            None => tags.extend(std::iter::repeat(String::from(OUTSIDE)).take(len)),
            Some(i) => {
                let entity_type = &spans[i].entity_type;
                tags.extend((0..len).map(|j| scheme.tag(RunPosition::new(j, len), entity_type)))
            }
        }
    }
    Ok(tags)
}

/// Rejects spans that do not fit in the text and drops empty ones.
fn checked_spans(spans: &[Span], text_len: usize) -> Result<Vec<&Span>, OffsetError> {
    let mut kept = Vec::with_capacity(spans.len());
    for span in spans {
        if span.start > span.end {
            return Err(OffsetError::InvertedSpan {
                start: span.start,
                end: span.end,
                entity_type: span.entity_type.clone(),
            });
        }
        if span.end > text_len {
            return Err(OffsetError::SpanOutOfBounds {
                start: span.start,
                end: span.end,
                entity_type: span.entity_type.clone(),
                text_len,
            });
        }
        if span.is_empty() {
            warn!(
                start = span.start,
                entity_type = %span.entity_type,
                "dropping empty span"
            );
            continue;
        }
        kept.push(span);
    }
    Ok(kept)
}

/// Index of the span owning the token, if any.
fn assign_span(spans: &[&Span], token: &Token) -> Option<usize> {
    spans
        .iter()
        .enumerate()
        .filter_map(|(i, s)| {
            let overlap = s.overlap(token.start, token.end);
            (overlap > 0).then_some((s.start, Reverse(overlap), i))
        })
        .min()
        .map(|(_, _, i)| i)
}
