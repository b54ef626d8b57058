/**
This modules gives a few tools to prettyprint the output of an evaluation, for every entity type
and for the overall averages, and to serialize it.
*/
use crate::confusion::ScoringMode;
use crate::metrics::{EvaluationResult, Metric, SampleCounts, TypeMetrics};
use crate::scheme::Scheme;
use crate::taxonomy::RemapStats;
use itertools::multizip;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, HashSet};
use std::fmt::Display;
use std::hash::Hash;

/// The reporter holds the metrics of every entity type and the overall averages of an evaluation.
/// It displays them as a dataframe: the averages first, then the entity types by descending
/// support and by name. It can be consumed into a `HashSet` of rows.
///
/// # Example
///
/// ```rust
/// use spaneval::{score, Reporter, Scheme, ScoringMode};
///
/// let gold = vec![vec!["B-PERSON", "O", "O", "B-LOCATION"]];
/// let pred = vec![vec!["B-PERSON", "O", "O", "O"]];
/// let result = score(&gold, &pred, Scheme::BIO, 1.0, ScoringMode::Token).unwrap();
/// let reporter = Reporter::from(&result);
///
/// let expected_report =
/// "Class, Precision, Recall, Fscore, Support, TP, FP, FN
/// Overall_Micro, 1, 0.5, 0.6666666666666666, 2, 1, 0, 1
/// Overall_Macro, 0.5, 0.5, 0.5, 2, 1, 0, 1
/// Overall_Weighted, 0.5, 0.5, 0.5, 2, 1, 0, 1
/// LOCATION, 0, 0, 0, 1, 0, 0, 1
/// PERSON, 1, 1, 1, 1, 1, 0, 0
/// Scheme: BIO, Mode: token, Beta: 1, Scored: 1, Skipped: 0 (offsets: 0, alignment: 0, malformed: 0), Failed predictions: 0, Cancelled: 0\n";
///
/// assert_eq!(expected_report, reporter.to_string());
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Reporter {
    rows: BTreeSet<ReportRowInner>,
    summary: RunSummary,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
/// Parameters and sample accounting of the run behind a report.
pub struct RunSummary {
    pub scheme: Scheme,
    pub mode: ScoringMode,
    pub beta: f64,
    pub samples: SampleCounts,
    pub complete: bool,
    /// Gold labels dropped by the remapping of the scored samples.
    #[serde(default)]
    pub gold_remap: RemapStats,
    /// Predicted labels dropped by the remapping of the scored samples.
    #[serde(default)]
    pub prediction_remap: RemapStats,
}

impl From<&EvaluationResult> for Reporter {
    fn from(result: &EvaluationResult) -> Self {
        let mut reporter = Reporter {
            rows: BTreeSet::new(),
            summary: RunSummary {
                scheme: result.scheme,
                mode: result.mode,
                beta: result.beta,
                samples: result.samples,
                complete: result.complete,
                gold_remap: result.gold_remap.clone(),
                prediction_remap: result.prediction_remap.clone(),
            },
        };
        let kinds = [RowKind::Micro, RowKind::Macro, RowKind::Weighted];
        let averages = [&result.micro, &result.macro_average, &result.weighted];
        for (kind, metrics) in multizip((kinds, averages)) {
            reporter.insert(ReportRowInner::new(kind.to_string(), kind, metrics));
        }
        for (name, metrics) in result.per_type.iter() {
            reporter.insert(ReportRowInner::new(name.clone(), RowKind::Entity, metrics));
        }
        reporter
    }
}

/// By converting the reporter into a `HashSet` of `ReportRow`, you lose the ordering of the rows.
/// If you mean to consume the data without prettyprinting it, this is not a problem.
impl From<Reporter> for HashSet<ReportRow> {
    fn from(value: Reporter) -> Self {
        value.rows.into_iter().map(ReportRow::from).collect()
    }
}

impl Reporter {
    fn insert(&mut self, row: ReportRowInner) -> bool {
        self.rows.insert(row)
    }

    /// Rows in display order.
    pub fn rows(&self) -> impl Iterator<Item = ReportRow> + '_ {
        self.rows.iter().cloned().map(ReportRow::from)
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// The Reporter struct acts as a dataframe when displayed.
impl Display for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Class, Precision, Recall, Fscore, Support, TP, FP, FN")?;
        for row in self.rows.iter() {
            writeln!(f, "{}", row)?
        }
        writeln!(f, "{}", self.summary)
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = &self.samples;
        write!(
            f,
            "Scheme: {}, Mode: {}, Beta: {}, Scored: {}, Skipped: {} (offsets: {}, alignment: {}, malformed: {}), Failed predictions: {}, Cancelled: {}",
            self.scheme,
            self.mode,
            self.beta,
            s.scored,
            s.skipped(),
            s.skipped_offset,
            s.skipped_alignment,
            s.malformed_predictions,
            s.failed_predictions,
            s.cancelled
        )?;
        if !self.complete {
            write!(f, ", INCOMPLETE")?;
        }
        Ok(())
    }
}

/// Kind of a row. The averages come before the entity types.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Serialize, Deserialize)]
pub enum RowKind {
    Micro,
    Macro,
    Weighted,
    Entity,
}

impl Display for RowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str_content = match self {
            Self::Micro => "Overall_Micro",
            Self::Macro => "Overall_Macro",
            Self::Weighted => "Overall_Weighted",
            Self::Entity => "Entity",
        };
        write!(f, "{}", str_content)
    }
}

#[derive(Debug, Clone)]
/// Metrics of a single line of the report.
pub struct ReportRow {
    /// The entity type, such as "PERSON" or "LOCATION", or the name of the average.
    pub name: String,
    pub kind: RowKind,
    pub precision: f64,
    pub recall: f64,
    pub fscore: f64,
    pub support: usize,
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    /// Metrics whose denominator was 0, reported as 0.
    pub ill_defined: Vec<Metric>,
}

impl Hash for ReportRow {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.kind.hash(state)
    }
}

impl PartialEq for ReportRow {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.kind == other.kind
    }
}
impl Eq for ReportRow {}

impl From<ReportRowInner> for ReportRow {
    fn from(value: ReportRowInner) -> Self {
        Self {
            name: value.name,
            kind: value.kind,
            precision: value.precision,
            recall: value.recall,
            fscore: value.fscore,
            support: value.support,
            true_positive: value.true_positive,
            false_positive: value.false_positive,
            false_negative: value.false_negative,
            ill_defined: value.ill_defined,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
/// Row as stored by the reporter. Rows are ordered by kind, then by descending support, then by
/// name, and are equal when this ordering says so.
pub(crate) struct ReportRowInner {
    pub(crate) name: String,
    pub(crate) kind: RowKind,
    pub(crate) precision: f64,
    pub(crate) recall: f64,
    pub(crate) fscore: f64,
    pub(crate) support: usize,
    pub(crate) true_positive: usize,
    pub(crate) false_positive: usize,
    pub(crate) false_negative: usize,
    #[serde(default)]
    pub(crate) ill_defined: Vec<Metric>,
}

impl ReportRowInner {
    fn new(name: String, kind: RowKind, metrics: &TypeMetrics) -> Self {
        ReportRowInner {
            name,
            kind,
            precision: metrics.precision,
            recall: metrics.recall,
            fscore: metrics.f_beta,
            support: metrics.support,
            true_positive: metrics.true_positive,
            false_positive: metrics.false_positive,
            false_negative: metrics.false_negative,
            ill_defined: metrics.ill_defined.clone(),
        }
    }

    fn sort_key(&self) -> (RowKind, Reverse<usize>, &str) {
        (self.kind, Reverse(self.support), &self.name)
    }
}

impl PartialEq for ReportRowInner {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for ReportRowInner {}

impl PartialOrd for ReportRowInner {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReportRowInner {
    fn cmp(&self, other: &Self) -> Ordering {
        // Averages are unique per kind, whatever their support
        match (self.kind, other.kind) {
            (RowKind::Entity, RowKind::Entity) => self.sort_key().cmp(&other.sort_key()),
            (k1, k2) => k1.cmp(&k2),
        }
    }
}

/// The row acts as a line in a dataframe when displayed.
impl Display for ReportRowInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {}, {}, {}, {}",
            self.name,
            self.precision,
            self.recall,
            self.fscore,
            self.support,
            self.true_positive,
            self.false_positive,
            self.false_negative
        )
    }
}
