/**
Mapping of entity labels from the taxonomy of a dataset (or of a model) to the taxonomy the
evaluation is scored in.
*/
use crate::scheme::{parse_tag, with_entity_type, OUTSIDE};
use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Add, AddAssign};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome of mapping a single label.
pub enum Mapped<'a> {
    /// The label maps to this target type, which is in scope.
    Kept(&'a str),
    /// The label has no entry in the mapping table.
    Unmapped,
    /// The label maps to `O` or to a type outside of the keep set.
    OutOfScope,
}

impl<'a> Mapped<'a> {
    pub fn kept(&self) -> Option<&'a str> {
        match *self {
            Mapped::Kept(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Tallies of the labels that did not survive a remapping, keyed by source label. Spans are
/// counted once, tags once per token.
pub struct RemapStats {
    pub unmapped: BTreeMap<String, usize>,
    pub out_of_scope: BTreeMap<String, usize>,
}

impl RemapStats {
    pub fn is_empty(&self) -> bool {
        self.unmapped.is_empty() && self.out_of_scope.is_empty()
    }

    pub fn merge(&mut self, other: &RemapStats) {
        for (label, count) in &other.unmapped {
            *self.unmapped.entry(label.clone()).or_default() += count;
        }
        for (label, count) in &other.out_of_scope {
            *self.out_of_scope.entry(label.clone()).or_default() += count;
        }
    }

    fn record(&mut self, label: &str, mapped: Mapped) {
        let tally = match mapped {
            Mapped::Kept(_) => return,
            Mapped::Unmapped => &mut self.unmapped,
            Mapped::OutOfScope => &mut self.out_of_scope,
        };
        *tally.entry(String::from(label)).or_default() += 1;
    }
}

impl Add for RemapStats {
    type Output = RemapStats;
    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl AddAssign for RemapStats {
    fn add_assign(&mut self, rhs: Self) {
        self.merge(&rhs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Maps source labels to target labels, many to one, and restricts the targets to a keep set.
///
/// A mapper without a mapping table is the identity: every label maps to itself and only the keep
/// set applies. A mapper without a keep set keeps every target type.
///
/// ```rust
/// use spaneval::{Mapped, TaxonomyMapper};
///
/// let mapper = TaxonomyMapper::new([("FIRST_NAME", "PERSON"), ("CITY", "LOCATION")])
///     .with_keep_set(["PERSON"]);
/// assert_eq!(mapper.map_label("FIRST_NAME"), Mapped::Kept("PERSON"));
/// assert_eq!(mapper.map_label("CITY"), Mapped::OutOfScope);
/// assert_eq!(mapper.map_label("IBAN"), Mapped::Unmapped);
/// ```
pub struct TaxonomyMapper {
    mapping: Option<BTreeMap<String, String>>,
    keep_set: Option<BTreeSet<String>>,
}

impl TaxonomyMapper {
    pub fn new<K, V>(mapping: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            mapping: Some(
                mapping
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            keep_set: None,
        }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    pub fn with_keep_set<S: Into<String>>(mut self, keep_set: impl IntoIterator<Item = S>) -> Self {
        self.keep_set = Some(keep_set.into_iter().map(Into::into).collect());
        self
    }

    pub(crate) fn with_optional_keep_set(mut self, keep_set: Option<BTreeSet<String>>) -> Self {
        self.keep_set = keep_set;
        self
    }

    /// The declared target entity set: the keep set when there is one, else the targets of the
    /// mapping table. Empty for an identity mapper without keep set.
    pub fn target_types(&self) -> BTreeSet<String> {
        match (&self.keep_set, &self.mapping) {
            (Some(keep), _) => keep.clone(),
            (None, Some(mapping)) => mapping
                .values()
                .filter(|t| *t != OUTSIDE)
                .cloned()
                .collect(),
            (None, None) => BTreeSet::new(),
        }
    }

    pub fn map_label<'a>(&'a self, label: &'a str) -> Mapped<'a> {
        let target = match &self.mapping {
            Some(mapping) => match mapping.get(label) {
                Some(t) => t.as_str(),
                None => return Mapped::Unmapped,
            },
            None => label,
        };
        if target == OUTSIDE {
            return Mapped::OutOfScope;
        }
        match &self.keep_set {
            Some(keep) if !keep.contains(target) => Mapped::OutOfScope,
            _ => Mapped::Kept(target),
        }
    }

    /// Remaps the spans, dropping those whose label is unmapped or out of scope.
    pub fn remap_spans(&self, spans: &[Span]) -> (Vec<Span>, RemapStats) {
        let mut stats = RemapStats::default();
        let mut remapped = Vec::with_capacity(spans.len());
        for span in spans {
            let mapped = self.map_label(&span.entity_type);
            match mapped {
                Mapped::Kept(target) => {
                    remapped.push(Span::new(span.start, span.end, target));
                }
                _ => {
                    debug!(label = %span.entity_type, outcome = ?mapped, "dropping span");
                    stats.record(&span.entity_type, mapped);
                }
            }
        }
        (remapped, stats)
    }

    /// Remaps the entity type of each tag and keeps its prefix. Tags whose label is unmapped or out
    /// of scope become `O`.
    pub fn remap_tags<S: AsRef<str>>(&self, tags: &[S]) -> (Vec<String>, RemapStats) {
        let mut stats = RemapStats::default();
        let remapped = tags
            .iter()
            .map(|tag| {
                let tag = tag.as_ref();
                let parsed = parse_tag(tag);
                let Some(label) = parsed.entity_type else {
                    return String::from(OUTSIDE);
                };
                match self.map_label(label) {
                    Mapped::Kept(target) => with_entity_type(tag, target),
                    mapped => {
                        stats.record(label, mapped);
                        String::from(OUTSIDE)
                    }
                }
            })
            .collect();
        (remapped, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn dataset_to_analyzer() -> TaxonomyMapper {
        TaxonomyMapper::new([
            ("PERSON", "PERSON"),
            ("FIRST_NAME", "PERSON"),
            ("EMAIL", "EMAIL_ADDRESS"),
            ("CITY", "LOCATION"),
            ("ADDRESS", "LOCATION"),
            ("DATE", "DATE_TIME"),
            ("TITLE", "O"),
        ])
    }

    #[rstest]
    #[case("FIRST_NAME", Mapped::Kept("PERSON"))]
    #[case("ADDRESS", Mapped::Kept("LOCATION"))]
    #[case("TITLE", Mapped::OutOfScope)]
    #[case("DATE", Mapped::OutOfScope)]
    #[case("IBAN", Mapped::Unmapped)]
    fn test_map_label(#[case] label: &str, #[case] expected: Mapped) {
        let mapper = dataset_to_analyzer().with_keep_set(["PERSON", "EMAIL_ADDRESS", "LOCATION"]);
        assert_eq!(mapper.map_label(label), expected)
    }

    #[test]
    fn test_identity() {
        let mapper = TaxonomyMapper::identity();
        assert_eq!(mapper.map_label("ANYTHING"), Mapped::Kept("ANYTHING"));
        let mapper = TaxonomyMapper::identity().with_keep_set(["PERSON"]);
        assert_eq!(mapper.map_label("PERSON"), Mapped::Kept("PERSON"));
        assert_eq!(mapper.map_label("NRP"), Mapped::OutOfScope);
    }

    #[test]
    fn test_target_types() {
        let expected: BTreeSet<String> = ["DATE_TIME", "EMAIL_ADDRESS", "LOCATION", "PERSON"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(dataset_to_analyzer().target_types(), expected);
        let keep = dataset_to_analyzer().with_keep_set(["PERSON"]);
        assert_eq!(keep.target_types().len(), 1);
        assert!(TaxonomyMapper::identity().target_types().is_empty());
    }

    #[test]
    fn test_remap_spans() {
        let mapper = dataset_to_analyzer().with_keep_set(["PERSON", "LOCATION"]);
        let spans = vec![
            Span::new(0, 4, "FIRST_NAME"),
            Span::new(5, 9, "TITLE"),
            Span::new(10, 15, "CITY"),
            Span::new(16, 20, "IBAN"),
            Span::new(21, 25, "IBAN"),
        ];
        let (remapped, stats) = mapper.remap_spans(&spans);
        assert_eq!(
            remapped,
            vec![Span::new(0, 4, "PERSON"), Span::new(10, 15, "LOCATION")]
        );
        assert_eq!(stats.unmapped.get("IBAN"), Some(&2));
        assert_eq!(stats.out_of_scope.get("TITLE"), Some(&1));
        assert_eq!(stats.out_of_scope.len(), 1);
    }

    #[test]
    fn test_remap_tags_keeps_prefix() {
        let mapper = dataset_to_analyzer().with_keep_set(["PERSON", "LOCATION"]);
        let tags = vec!["B-FIRST_NAME", "I-FIRST_NAME", "O", "U-CITY", "B-IBAN", "TITLE"];
        let (remapped, stats) = mapper.remap_tags(&tags);
        assert_eq!(
            remapped,
            vec!["B-PERSON", "I-PERSON", "O", "U-LOCATION", "O", "O"]
        );
        assert_eq!(stats.unmapped.get("IBAN"), Some(&1));
        assert_eq!(stats.out_of_scope.get("TITLE"), Some(&1));
    }

    #[test]
    fn test_merge_stats() {
        let mut left = RemapStats::default();
        left.unmapped.insert(String::from("IBAN"), 2);
        let mut right = RemapStats::default();
        right.unmapped.insert(String::from("IBAN"), 1);
        right.out_of_scope.insert(String::from("TITLE"), 4);
        let total = left.clone() + right.clone();
        assert_eq!(total.unmapped.get("IBAN"), Some(&3));
        assert_eq!(total.out_of_scope.get("TITLE"), Some(&4));
        left += right;
        assert_eq!(left, total);
        assert!(RemapStats::default().is_empty());
    }
}
