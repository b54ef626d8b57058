/**
This module computes the metrics (precision, recall, f-beta score and support) of every entity
type from the accumulated confusion, along with their micro, macro and weighted averages.
*/
use crate::confusion::{AlignmentError, Confusion, ConfusionEntry, ScoringMode};
use crate::scheme::Scheme;
use crate::taxonomy::RemapStats;
use ndarray::{prelude::*, Zip};
use ndarray_stats::{errors::MultiInputError, SummaryStatisticsExt};
use num::Num;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::ops::{Add, AddAssign};
use thiserror::Error;
use tracing::debug;

const WARN_FOR: [Metric; 3] = [Metric::Precision, Metric::Recall, Metric::FScore];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    Precision,
    Recall,
    FScore,
}

impl Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error(transparent)]
    Alignment(#[from] AlignmentError),
    #[error("Beta must be positive and finite, got {0}")]
    InvalidBeta(f64),
    #[error("Could not compute the weighted average: {0}")]
    Statistics(#[from] MultiInputError),
}

pub(crate) fn check_beta(beta: f64) -> Result<(), ScoreError> {
    if beta.is_finite() && beta > 0.0 {
        Ok(())
    } else {
        Err(ScoreError::InvalidBeta(beta))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
/// What happened to the samples of a run. Only `scored` samples contribute to the metrics.
pub struct SampleCounts {
    pub scored: usize,
    /// Offsets of the spans or tokens did not fit the text.
    pub skipped_offset: usize,
    /// Gold and predicted sequences had different lengths.
    pub skipped_alignment: usize,
    /// The predictor kept failing; scored as if nothing had been predicted.
    pub failed_predictions: usize,
    /// The predictor returned something unusable; the sample was skipped.
    pub malformed_predictions: usize,
    pub cancelled: usize,
}

impl SampleCounts {
    pub fn skipped(&self) -> usize {
        self.skipped_offset + self.skipped_alignment + self.malformed_predictions
    }
    pub fn total(&self) -> usize {
        self.scored + self.skipped() + self.cancelled
    }
}

impl Add for SampleCounts {
    type Output = SampleCounts;
    fn add(self, rhs: Self) -> Self::Output {
        SampleCounts {
            scored: self.scored + rhs.scored,
            skipped_offset: self.skipped_offset + rhs.skipped_offset,
            skipped_alignment: self.skipped_alignment + rhs.skipped_alignment,
            failed_predictions: self.failed_predictions + rhs.failed_predictions,
            malformed_predictions: self.malformed_predictions + rhs.malformed_predictions,
            cancelled: self.cancelled + rhs.cancelled,
        }
    }
}

impl AddAssign for SampleCounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Metrics of an entity type or of an average. For averages, the counters are the sums over every
/// entity type.
pub struct TypeMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f_beta: f64,
    pub support: usize,
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    /// Metrics whose denominator was zero. They are reported as 0.
    pub ill_defined: Vec<Metric>,
}

impl TypeMetrics {
    pub fn is_ill_defined(&self, metric: Metric) -> bool {
        self.ill_defined.contains(&metric)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Immutable snapshot of an evaluation.
pub struct EvaluationResult {
    pub per_type: BTreeMap<String, TypeMetrics>,
    pub micro: TypeMetrics,
    pub macro_average: TypeMetrics,
    pub weighted: TypeMetrics,
    pub beta: f64,
    pub scheme: Scheme,
    pub mode: ScoringMode,
    pub samples: SampleCounts,
    pub gold_remap: RemapStats,
    pub prediction_remap: RemapStats,
    /// False when the run was cancelled before every sample was processed.
    pub complete: bool,
}

impl EvaluationResult {
    /// Computes the metrics of the accumulated confusion. The sample accounting is left empty.
    ///
    /// * `beta`: weight of the recall in the f-beta score. Must be positive and finite.
    /// * `parallel`: run the vectorized divisions on the rayon pool.
    pub fn from_confusion(
        confusion: &Confusion,
        beta: f64,
        scheme: Scheme,
        mode: ScoringMode,
        parallel: bool,
    ) -> Result<Self, ScoreError> {
        check_beta(beta)?;
        let mut entries: Vec<(&str, &ConfusionEntry)> = confusion.iter().collect();
        entries.sort_unstable_by_key(|(name, _)| *name);

        let counts = |f: fn(&ConfusionEntry) -> usize| -> Array1<f64> {
            entries.iter().map(|(_, e)| f(e) as f64).collect()
        };
        let tp = counts(|e| e.true_positive);
        let fp = counts(|e| e.false_positive);
        let fn_ = counts(|e| e.false_negative);
        let support = counts(|e| e.support);

        let per_type_prf = precision_recall_fbeta(&tp, &fp, &fn_, beta, parallel);
        let per_type = entries
            .iter()
            .enumerate()
            .map(|(i, (name, entry))| {
                let metrics = per_type_prf.metrics_at(i, entry);
                for metric in metrics.ill_defined.iter() {
                    debug!(entity_type = name, %metric, "ill-defined metric set to 0");
                }
                (String::from(*name), metrics)
            })
            .collect();

        let total = confusion.total();
        let micro_prf = precision_recall_fbeta(
            &array![tp.sum()],
            &array![fp.sum()],
            &array![fn_.sum()],
            beta,
            false,
        );
        let micro = micro_prf.metrics_at(0, &total);

        let supported: Vec<usize> = support
            .iter()
            .enumerate()
            .filter_map(|(i, s)| (*s > 0.0).then_some(i))
            .collect();
        let macro_average = if supported.is_empty() {
            TypeMetrics::undefined(&total)
        } else {
            let mean = |a: &Array1<f64>| a.select(Axis(0), &supported).mean().unwrap_or(0.0);
            TypeMetrics {
                precision: mean(&per_type_prf.precision),
                recall: mean(&per_type_prf.recall),
                f_beta: mean(&per_type_prf.f_beta),
                ..TypeMetrics::undefined(&total)
            }
            .defined()
        };

        let weighted = if total.support == 0 {
            TypeMetrics::undefined(&total)
        } else {
            TypeMetrics {
                precision: per_type_prf.precision.weighted_mean(&support)?,
                recall: per_type_prf.recall.weighted_mean(&support)?,
                f_beta: per_type_prf.f_beta.weighted_mean(&support)?,
                ..TypeMetrics::undefined(&total)
            }
            .defined()
        };

        Ok(EvaluationResult {
            per_type,
            micro,
            macro_average,
            weighted,
            beta,
            scheme,
            mode,
            samples: SampleCounts::default(),
            gold_remap: RemapStats::default(),
            prediction_remap: RemapStats::default(),
            complete: true,
        })
    }
}

impl TypeMetrics {
    /// Zeroed metrics, all flagged as ill-defined, carrying the given counters.
    fn undefined(entry: &ConfusionEntry) -> Self {
        TypeMetrics {
            precision: 0.0,
            recall: 0.0,
            f_beta: 0.0,
            support: entry.support,
            true_positive: entry.true_positive,
            false_positive: entry.false_positive,
            false_negative: entry.false_negative,
            ill_defined: WARN_FOR.to_vec(),
        }
    }

    fn defined(mut self) -> Self {
        self.ill_defined.clear();
        self
    }
}

/// Precision, recall and f-beta of every entity type, along with the masks of the well-defined
/// values (`1` where the denominator was not zero, `0` elsewhere).
struct PrecisionRecallFBeta {
    precision: Array1<f64>,
    recall: Array1<f64>,
    f_beta: Array1<f64>,
    precision_mask: Array1<f64>,
    recall_mask: Array1<f64>,
    f_beta_mask: Array1<f64>,
}

impl PrecisionRecallFBeta {
    fn metrics_at(&self, i: usize, entry: &ConfusionEntry) -> TypeMetrics {
        let masks = [&self.precision_mask, &self.recall_mask, &self.f_beta_mask];
        let ill_defined = WARN_FOR
            .iter()
            .zip(masks)
            .filter(|(_, mask)| mask[i] == 0.0)
            .map(|(metric, _)| *metric)
            .collect();
        TypeMetrics {
            precision: self.precision[i],
            recall: self.recall[i],
            f_beta: self.f_beta[i],
            support: entry.support,
            true_positive: entry.true_positive,
            false_positive: entry.false_positive,
            false_negative: entry.false_negative,
            ill_defined,
        }
    }
}

fn precision_recall_fbeta(
    tp: &Array1<f64>,
    fp: &Array1<f64>,
    fn_: &Array1<f64>,
    beta: f64,
    parallel: bool,
) -> PrecisionRecallFBeta {
    let (precision, precision_mask) = prf_divide(tp.view(), tp + fp, parallel);
    let (recall, recall_mask) = prf_divide(tp.view(), tp + fn_, parallel);
    let beta2 = beta.powi(2);
    let numerator = (1.0 + beta2) * &precision * &recall;
    let denominator = beta2 * &precision + &recall;
    let (f_beta, f_beta_mask) = prf_divide(numerator.view(), denominator, parallel);
    PrecisionRecallFBeta {
        precision,
        recall,
        f_beta,
        precision_mask,
        recall_mask,
        f_beta_mask,
    }
}

/// Element-wise division where a zero denominator gives a zero result. Returns the result and the
/// mask of the non-zero denominators.
fn prf_divide<I: Num + Copy + Send + Sync>(
    numerator: ArrayView1<I>,
    denominator: Array1<I>,
    parallel: bool,
) -> (Array1<I>, Array1<I>) {
    let (result, zero_mask) = if parallel {
        par_prf_divide_results_and_mask(numerator, denominator)
    } else {
        prf_divide_results_and_mask(numerator, denominator)
    };
    (result * &zero_mask, zero_mask)
}

/// This function computes the result in parallel. For a synchronous
/// version of this function, see `prf_divide_results_and_mask`.
fn par_prf_divide_results_and_mask<I: Num + Copy + Send + Sync>(
    numerator: ArrayView1<I>,
    mut denominator: Array1<I>,
) -> (Array1<I>, Array1<I>) {
    let zero_mask = Zip::from(&denominator).par_map_collect(|d| {
        if *d == I::zero() {
            I::zero()
        } else {
            I::one()
        }
    });
    denominator.par_mapv_inplace(|v| if v == I::zero() { I::one() } else { v });
    (&numerator / &denominator, zero_mask)
}

fn prf_divide_results_and_mask<I: Num + Copy>(
    numerator: ArrayView1<I>,
    mut denominator: Array1<I>,
) -> (Array1<I>, Array1<I>) {
    let zero_mask =
        Zip::from(&denominator).map_collect(|d| if *d == I::zero() { I::zero() } else { I::one() });
    denominator.mapv_inplace(|v| if v == I::zero() { I::one() } else { v });
    (&numerator / &denominator, zero_mask)
}

/// Scores a corpus of gold and predicted tag sequences. Every pair must have the same length, and
/// both lists must hold the same number of sequences.
///
/// ```rust
/// use spaneval::{score, Scheme, ScoringMode};
///
/// let gold = vec![vec!["B-PERSON", "O", "O", "B-LOCATION"]];
/// let pred = vec![vec!["B-PERSON", "O", "O", "O"]];
/// let result = score(&gold, &pred, Scheme::BIO, 1.0, ScoringMode::Token).unwrap();
/// assert_eq!(result.per_type["PERSON"].f_beta, 1.0);
/// assert_eq!(result.per_type["LOCATION"].recall, 0.0);
/// ```
pub fn score<G, P>(
    gold: &[Vec<G>],
    predicted: &[Vec<P>],
    scheme: Scheme,
    beta: f64,
    mode: ScoringMode,
) -> Result<EvaluationResult, ScoreError>
where
    G: AsRef<str>,
    P: AsRef<str>,
{
    check_beta(beta)?;
    if gold.len() != predicted.len() {
        return Err(AlignmentError::Corpus {
            gold: gold.len(),
            predicted: predicted.len(),
        }
        .into());
    }
    let mut confusion = Confusion::new();
    for (g, p) in gold.iter().zip(predicted) {
        confusion.accumulate(g, p, scheme, mode)?;
    }
    let mut result = EvaluationResult::from_confusion(&confusion, beta, scheme, mode, false)?;
    result.samples.scored = gold.len();
    Ok(result)
}
