/**
This module describes the tagging schemes supported by the crate. It knows how to build the tag of
a token from its position in a run of tokens, how to split a tag into its prefix and its entity
type, and how to decode a sequence of tags back into chunks of tokens.
*/
use enum_iterator::{all, Sequence};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Tag given to a token that is not part of any entity.
pub const OUTSIDE: &str = "O";

/// Separates the prefix from the entity type, as in `B-PERSON`.
const DELIMITER: char = '-';

#[allow(clippy::upper_case_acronyms)]
#[derive(
    Debug, Clone, Copy, Sequence, Hash, Eq, PartialEq, Ord, PartialOrd, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
/// Enumeration of the supported schemes. They indicate how the boundaries of an entity are encoded
/// in the tags of its tokens.
pub enum Scheme {
    /// Every token of an entity is tagged with the bare entity type.
    #[default]
    IO,
    /// `B-` on the first token of an entity, `I-` on the following ones.
    BIO,
    /// `U-` on single token entities, else `B-`, `I-`, ..., `L-`.
    BILOU,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unrecognized tagging scheme `{name}`. Expected one of: {expected}")]
/// The scheme name could not be parsed into a `Scheme`.
pub struct InvalidSchemeError {
    name: String,
    expected: String,
}

impl InvalidSchemeError {
    fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            expected: all::<Scheme>().map(|s| s.as_str()).join(", "),
        }
    }
}

impl FromStr for Scheme {
    type Err = InvalidSchemeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "IO" => Ok(Scheme::IO),
            "BIO" | "IOB" | "IOB2" => Ok(Scheme::BIO),
            "BILOU" | "BILUO" => Ok(Scheme::BILOU),
            _ => Err(InvalidSchemeError::new(s)),
        }
    }
}

impl TryFrom<String> for Scheme {
    type Error = InvalidSchemeError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scheme> for String {
    fn from(value: Scheme) -> Self {
        String::from(value.as_str())
    }
}

impl Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, PartialEq, Hash, Clone, Copy, Sequence, Eq)]
/// Prefix of a tag. It indicates the place of a token inside an entity.
pub(crate) enum Prefix {
    O,
    B,
    I,
    L,
    U,
    /// Tag without any prefix, such as `PERSON` in the IO scheme.
    Bare,
}

impl Prefix {
    fn as_char(&self) -> Option<char> {
        match self {
            Prefix::O => Some('O'),
            Prefix::B => Some('B'),
            Prefix::I => Some('I'),
            Prefix::L => Some('L'),
            Prefix::U => Some('U'),
            Prefix::Bare => None,
        }
    }
}

impl TryFrom<char> for Prefix {
    type Error = char;
    fn try_from(value: char) -> Result<Self, Self::Error> {
        match value {
            'B' => Ok(Self::B),
            'I' => Ok(Self::I),
            'L' => Ok(Self::L),
            'U' => Ok(Self::U),
            c => Err(c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A tag split into its prefix and its entity type. The entity type is `None` for the outside tag.
pub(crate) struct ParsedTag<'a> {
    pub(crate) prefix: Prefix,
    pub(crate) entity_type: Option<&'a str>,
}

/// Splits a tag into its prefix and its entity type. Anything that is neither `O` nor of the form
/// `X-TYPE` with `X` one of `B`, `I`, `L` or `U` is treated as a bare IO tag.
pub(crate) fn parse_tag(tag: &str) -> ParsedTag<'_> {
    if tag == OUTSIDE {
        return ParsedTag {
            prefix: Prefix::O,
            entity_type: None,
        };
    }
    let mut chars = tag.chars();
    if let (Some(first), Some(DELIMITER)) = (chars.next(), chars.next()) {
        if let Ok(prefix) = Prefix::try_from(first) {
            // Both the prefix and the delimiter are ascii
            let rest = &tag[2..];
            let entity_type = if rest.is_empty() { "_" } else { rest };
            return ParsedTag {
                prefix,
                entity_type: Some(entity_type),
            };
        }
    }
    ParsedTag {
        prefix: Prefix::Bare,
        entity_type: Some(tag),
    }
}

/// Returns the entity type of a tag, without its prefix. Returns `None` for the outside tag.
///
/// ```rust
/// use spaneval::entity_type;
///
/// assert_eq!(entity_type("B-PERSON"), Some("PERSON"));
/// assert_eq!(entity_type("PERSON"), Some("PERSON"));
/// assert_eq!(entity_type("O"), None);
/// ```
pub fn entity_type(tag: &str) -> Option<&str> {
    parse_tag(tag).entity_type
}

/// Rebuilds a tag from the prefix of `tag` and a new entity type. The outside tag is returned as
/// is.
pub(crate) fn with_entity_type(tag: &str, new_type: &str) -> String {
    match parse_tag(tag).prefix.as_char() {
        Some('O') => String::from(OUTSIDE),
        Some(c) => format!("{c}{DELIMITER}{new_type}"),
        None => String::from(new_type),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Position of a token inside a run of tokens belonging to the same span.
pub(crate) enum RunPosition {
    Single,
    First,
    Middle,
    Last,
}

impl RunPosition {
    /// Position of the token at `index` in a run of `len` tokens.
    pub(crate) fn new(index: usize, len: usize) -> Self {
        match (index, len) {
            (_, 1) => Self::Single,
            (0, _) => Self::First,
            (i, l) if i + 1 == l => Self::Last,
            _ => Self::Middle,
        }
    }
}

#[derive(Debug, Hash, Clone, PartialEq, Eq, PartialOrd, Ord)]
/// A chunk is a run of tokens carrying the same entity. `start` and `end` are token indices, `end`
/// is exclusive.
pub struct Chunk<'a> {
    pub start: usize,
    pub end: usize,
    pub tag: Cow<'a, str>,
}

impl<'a> Chunk<'a> {
    pub(crate) fn new(start: usize, end: usize, tag: Cow<'a, str>) -> Self {
        Chunk { start, end, tag }
    }
    pub fn into_owned(self) -> Chunk<'static> {
        Chunk::new(self.start, self.end, Cow::Owned(self.tag.into_owned()))
    }
}

impl<'a> Display for Chunk<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.tag, self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Tag `{tag}` at index {index} is not allowed in the {scheme} scheme")]
/// Encountered a tag whose prefix does not belong to the scheme.
pub struct InvalidTag {
    pub tag: String,
    pub index: usize,
    pub scheme: Scheme,
}

impl Scheme {
    const IO_ALLOWED_PREFIXES: [Prefix; 3] = [Prefix::O, Prefix::I, Prefix::Bare];
    const IO_INSIDE_PATTERNS: [(Prefix, Prefix); 4] = [
        (Prefix::Bare, Prefix::Bare),
        (Prefix::I, Prefix::I),
        (Prefix::Bare, Prefix::I),
        (Prefix::I, Prefix::Bare),
    ];

    const BIO_ALLOWED_PREFIXES: [Prefix; 3] = [Prefix::O, Prefix::B, Prefix::I];
    const BIO_INSIDE_PATTERNS: [(Prefix, Prefix); 2] =
        [(Prefix::B, Prefix::I), (Prefix::I, Prefix::I)];

    const BILOU_ALLOWED_PREFIXES: [Prefix; 5] =
        [Prefix::O, Prefix::B, Prefix::I, Prefix::L, Prefix::U];
    const BILOU_INSIDE_PATTERNS: [(Prefix, Prefix); 4] = [
        (Prefix::B, Prefix::I),
        (Prefix::B, Prefix::L),
        (Prefix::I, Prefix::I),
        (Prefix::I, Prefix::L),
    ];
    const BILOU_END_PREFIXES: [Prefix; 2] = [Prefix::L, Prefix::U];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::IO => "IO",
            Scheme::BIO => "BIO",
            Scheme::BILOU => "BILOU",
        }
    }

    fn allowed_prefixes(&self) -> &'static [Prefix] {
        match self {
            Scheme::IO => &Self::IO_ALLOWED_PREFIXES,
            Scheme::BIO => &Self::BIO_ALLOWED_PREFIXES,
            Scheme::BILOU => &Self::BILOU_ALLOWED_PREFIXES,
        }
    }

    /// Pairs of (previous prefix, current prefix) continuing a chunk. The entity types of both
    /// tokens must also be equal.
    fn inside_patterns(&self) -> &'static [(Prefix, Prefix)] {
        match self {
            Scheme::IO => &Self::IO_INSIDE_PATTERNS,
            Scheme::BIO => &Self::BIO_INSIDE_PATTERNS,
            Scheme::BILOU => &Self::BILOU_INSIDE_PATTERNS,
        }
    }

    /// Prefixes closing their chunk.
    fn end_prefixes(&self) -> &'static [Prefix] {
        match self {
            Scheme::BILOU => &Self::BILOU_END_PREFIXES,
            _ => &[],
        }
    }

    /// Builds the tag of a token given its position inside its run.
    pub(crate) fn tag(&self, position: RunPosition, entity_type: &str) -> String {
        let prefix = match (self, position) {
            (Scheme::IO, _) => return String::from(entity_type),
            (Scheme::BIO, RunPosition::Single | RunPosition::First) => 'B',
            (Scheme::BIO, _) => 'I',
            (Scheme::BILOU, RunPosition::Single) => 'U',
            (Scheme::BILOU, RunPosition::First) => 'B',
            (Scheme::BILOU, RunPosition::Middle) => 'I',
            (Scheme::BILOU, RunPosition::Last) => 'L',
        };
        format!("{prefix}{DELIMITER}{entity_type}")
    }

    /// Checks that every tag of the sequence uses a prefix allowed by this scheme.
    pub fn validate<S: AsRef<str>>(&self, tags: &[S]) -> Result<(), InvalidTag> {
        let allowed = self.allowed_prefixes();
        for (index, tag) in tags.iter().enumerate() {
            let tag = tag.as_ref();
            if !allowed.contains(&parse_tag(tag).prefix) {
                return Err(InvalidTag {
                    tag: String::from(tag),
                    index,
                    scheme: *self,
                });
            }
        }
        Ok(())
    }

    /// Decodes a sequence of tags into chunks. Decoding is lenient: a token whose prefix does not
    /// continue the previous token (see the inside patterns) or whose type differs from it opens a
    /// new chunk, even when its prefix says otherwise.
    ///
    /// ```rust
    /// use spaneval::Scheme;
    ///
    /// let tags = ["B-PER", "I-PER", "O", "B-LOC"];
    /// let chunks: Vec<_> = Scheme::BIO
    ///     .decode(&tags)
    ///     .into_iter()
    ///     .map(|c| (c.start, c.end, c.tag.into_owned()))
    ///     .collect();
    /// assert_eq!(chunks, vec![(0, 2, String::from("PER")), (3, 4, String::from("LOC"))]);
    /// ```
    pub fn decode<'a, S: AsRef<str>>(&self, tags: &'a [S]) -> Vec<Chunk<'a>> {
        let mut chunks = Vec::new();
        let mut current: Option<(usize, Prefix, &'a str)> = None;
        for (index, tag) in tags.iter().enumerate() {
            let parsed = parse_tag(tag.as_ref());
            let entity_type = match parsed.entity_type {
                Some(t) => t,
                None => {
                    if let Some((start, _, t)) = current.take() {
                        chunks.push(Chunk::new(start, index, Cow::Borrowed(t)));
                    }
                    continue;
                }
            };
            let continues = match current {
                Some((_, prev_prefix, prev_type)) => {
                    prev_type == entity_type
                        && self
                            .inside_patterns()
                            .contains(&(prev_prefix, parsed.prefix))
                }
                None => false,
            };
            if continues {
                if let Some((start, _, t)) = current {
                    current = Some((start, parsed.prefix, t));
                }
            } else {
                if let Some((start, _, t)) = current.take() {
                    chunks.push(Chunk::new(start, index, Cow::Borrowed(t)));
                }
                current = Some((index, parsed.prefix, entity_type));
            }
            if self.end_prefixes().contains(&parsed.prefix) {
                if let Some((start, _, t)) = current.take() {
                    chunks.push(Chunk::new(start, index + 1, Cow::Borrowed(t)));
                }
            }
        }
        if let Some((start, _, t)) = current {
            chunks.push(Chunk::new(start, tags.len(), Cow::Borrowed(t)));
        }
        chunks
    }
}
