/**
Accumulation of the agreement between gold and predicted tag sequences, per entity type.
*/
use crate::scheme::{entity_type, Scheme};
use ahash::{AHashMap, AHashSet};
use enum_iterator::Sequence;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use thiserror::Error;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Sequence, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
/// What is compared between the gold and the predicted sequences.
pub enum ScoringMode {
    /// Every token is compared on its own. The support counts gold tokens.
    #[default]
    Token,
    /// Chunks are decoded with the scheme and must match exactly (start, end and type). The
    /// support counts gold chunks.
    Entity,
}

impl Display for ScoringMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringMode::Token => write!(f, "token"),
            ScoringMode::Entity => write!(f, "entity"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Impossible to parse `{0}` into a scoring mode. Expected `token` or `entity`")]
pub struct ScoringModeParsingError(String);

impl FromStr for ScoringMode {
    type Err = ScoringModeParsingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "token" => Ok(ScoringMode::Token),
            "entity" | "span" => Ok(ScoringMode::Entity),
            _ => Err(ScoringModeParsingError(String::from(s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// The gold and predicted inputs cannot be compared position by position.
pub enum AlignmentError {
    #[error("The gold sequence has {gold} tags but the predicted sequence has {predicted}")]
    Sequence { gold: usize, predicted: usize },
    #[error("There are {gold} gold sequences but {predicted} predicted sequences")]
    Corpus { gold: usize, predicted: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Confusion counters of a single entity type.
pub struct ConfusionEntry {
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub support: usize,
}

impl Add for ConfusionEntry {
    type Output = ConfusionEntry;
    fn add(self, rhs: Self) -> Self::Output {
        ConfusionEntry {
            true_positive: self.true_positive + rhs.true_positive,
            false_positive: self.false_positive + rhs.false_positive,
            false_negative: self.false_negative + rhs.false_negative,
            support: self.support + rhs.support,
        }
    }
}

impl AddAssign for ConfusionEntry {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Confusion counters of every entity type seen so far. Confusions are merged by addition, in any
/// order.
pub struct Confusion {
    entries: AHashMap<String, ConfusionEntry>,
}

impl Confusion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_type: &str) -> Option<&ConfusionEntry> {
        self.entries.get(entity_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfusionEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sum of the counters of every entity type.
    pub fn total(&self) -> ConfusionEntry {
        self.entries
            .values()
            .fold(ConfusionEntry::default(), |acc, e| acc + *e)
    }

    fn entry(&mut self, entity_type: &str) -> &mut ConfusionEntry {
        self.entries.entry(String::from(entity_type)).or_default()
    }

    pub fn merge(&mut self, other: &Confusion) {
        for (entity_type, entry) in other.entries.iter() {
            *self.entry(entity_type) += *entry;
        }
    }

    /// Accumulates a pair of sequences with the given scoring mode.
    pub fn accumulate<G, P>(
        &mut self,
        gold: &[G],
        predicted: &[P],
        scheme: Scheme,
        mode: ScoringMode,
    ) -> Result<(), AlignmentError>
    where
        G: AsRef<str>,
        P: AsRef<str>,
    {
        match mode {
            ScoringMode::Token => self.accumulate_tokens(gold, predicted),
            ScoringMode::Entity => self.accumulate_entities(gold, predicted, scheme),
        }
    }

    /// Compares the sequences token by token, ignoring the prefixes of the tags.
    pub fn accumulate_tokens<G, P>(&mut self, gold: &[G], predicted: &[P]) -> Result<(), AlignmentError>
    where
        G: AsRef<str>,
        P: AsRef<str>,
    {
        check_alignment(gold, predicted)?;
        for (g, p) in gold.iter().zip(predicted) {
            match (entity_type(g.as_ref()), entity_type(p.as_ref())) {
                (Some(g), Some(p)) if g == p => {
                    let entry = self.entry(g);
                    entry.true_positive += 1;
                    entry.support += 1;
                }
                (Some(g), p) => {
                    let entry = self.entry(g);
                    entry.false_negative += 1;
                    entry.support += 1;
                    if let Some(p) = p {
                        self.entry(p).false_positive += 1;
                    }
                }
                (None, Some(p)) => self.entry(p).false_positive += 1,
                (None, None) => {}
            }
        }
        Ok(())
    }

    /// Decodes the sequences into chunks and counts exact matches.
    pub fn accumulate_entities<G, P>(
        &mut self,
        gold: &[G],
        predicted: &[P],
        scheme: Scheme,
    ) -> Result<(), AlignmentError>
    where
        G: AsRef<str>,
        P: AsRef<str>,
    {
        check_alignment(gold, predicted)?;
        let gold_chunks = scheme.decode(gold);
        let pred_chunks = scheme.decode(predicted);
        let gold_set: AHashSet<(usize, usize, &str)> = gold_chunks
            .iter()
            .map(|c| (c.start, c.end, c.tag.as_ref()))
            .collect();
        let pred_set: AHashSet<(usize, usize, &str)> = pred_chunks
            .iter()
            .map(|c| (c.start, c.end, c.tag.as_ref()))
            .collect();
        for chunk in gold_set.iter() {
            let matched = pred_set.contains(chunk);
            let entry = self.entry(chunk.2);
            entry.support += 1;
            if matched {
                entry.true_positive += 1;
            } else {
                entry.false_negative += 1;
            }
        }
        for chunk in pred_set.difference(&gold_set) {
            self.entry(chunk.2).false_positive += 1;
        }
        Ok(())
    }
}

fn check_alignment<G, P>(gold: &[G], predicted: &[P]) -> Result<(), AlignmentError> {
    if gold.len() != predicted.len() {
        return Err(AlignmentError::Sequence {
            gold: gold.len(),
            predicted: predicted.len(),
        });
    }
    Ok(())
}

impl Add for Confusion {
    type Output = Confusion;
    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl AddAssign for Confusion {
    fn add_assign(&mut self, rhs: Self) {
        for (entity_type, entry) in rhs.entries {
            *self.entries.entry(entity_type).or_default() += entry;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::QuickCheck;

    fn entry(tp: usize, fp: usize, fn_: usize, support: usize) -> ConfusionEntry {
        ConfusionEntry {
            true_positive: tp,
            false_positive: fp,
            false_negative: fn_,
            support,
        }
    }

    #[test]
    fn test_accumulate_tokens() {
        let gold = vec!["B-PER", "I-PER", "O", "B-LOC", "B-ORG"];
        let pred = vec!["B-PER", "B-PER", "B-LOC", "O", "B-LOC"];
        let mut confusion = Confusion::new();
        confusion.accumulate_tokens(&gold, &pred).unwrap();
        assert_eq!(confusion.get("PER"), Some(&entry(2, 0, 0, 2)));
        assert_eq!(confusion.get("LOC"), Some(&entry(0, 2, 1, 1)));
        assert_eq!(confusion.get("ORG"), Some(&entry(0, 0, 1, 1)));
        assert_eq!(confusion.len(), 3);
    }

    #[test]
    fn test_accumulate_entities() {
        let gold = vec!["B-PER", "I-PER", "O", "B-LOC", "B-ORG"];
        let pred = vec!["B-PER", "B-PER", "B-LOC", "O", "B-ORG"];
        let mut confusion = Confusion::new();
        confusion
            .accumulate_entities(&gold, &pred, Scheme::BIO)
            .unwrap();
        assert_eq!(confusion.get("PER"), Some(&entry(0, 2, 1, 1)));
        assert_eq!(confusion.get("LOC"), Some(&entry(0, 1, 1, 1)));
        assert_eq!(confusion.get("ORG"), Some(&entry(1, 0, 0, 1)));
    }

    #[test]
    fn test_absent_types_are_absent() {
        let gold = vec!["O", "B-PER"];
        let mut confusion = Confusion::new();
        confusion.accumulate_tokens(&gold, &gold).unwrap();
        assert!(confusion.get("LOC").is_none());
        assert_eq!(confusion.len(), 1);
    }

    #[test]
    fn test_alignment_error() {
        let mut confusion = Confusion::new();
        let err = confusion
            .accumulate(&["O", "O"], &["O"], Scheme::BIO, ScoringMode::Token)
            .unwrap_err();
        assert_eq!(
            err,
            AlignmentError::Sequence {
                gold: 2,
                predicted: 1
            }
        );
        assert!(confusion.is_empty());
    }

    #[test]
    fn test_scoring_mode_from_str() {
        assert_eq!("Token".parse::<ScoringMode>().unwrap(), ScoringMode::Token);
        assert_eq!("entity".parse::<ScoringMode>().unwrap(), ScoringMode::Entity);
        assert!("strict".parse::<ScoringMode>().is_err());
    }

    #[test]
    fn test_propertie_merge_is_order_independent() {
        fn merge_order(sequences: Vec<(Vec<bool>, Vec<bool>)>) -> bool {
            let as_tags = |v: &[bool]| -> Vec<&str> {
                v.iter().map(|b| if *b { "B-A" } else { "O" }).collect()
            };
            let partials: Vec<Confusion> = sequences
                .iter()
                .map(|(g, p)| {
                    let len = g.len().min(p.len());
                    let mut c = Confusion::new();
                    c.accumulate_tokens(&as_tags(&g[..len]), &as_tags(&p[..len]))
                        .unwrap();
                    c
                })
                .collect();
            let forward = partials
                .iter()
                .cloned()
                .fold(Confusion::new(), |acc, c| acc + c);
            let mut backward = Confusion::new();
            for c in partials.iter().rev() {
                backward.merge(c);
            }
            forward == backward
        }
        let mut qc = QuickCheck::new().tests(500);
        qc.quickcheck(merge_order as fn(Vec<(Vec<bool>, Vec<bool>)>) -> bool)
    }
}
