/**
Runs a corpus through the whole pipeline: gold spans are remapped and converted to tags, the model
is asked for its prediction, which is remapped and converted the same way, and both sequences are
accumulated into the confusion. Samples are processed in parallel, and a failing sample never stops
the run.
*/
use crate::config::EvaluationConfig;
use crate::confusion::Confusion;
use crate::convert::convert;
use crate::dataset::DatasetLoader;
use crate::error::Result;
use crate::metrics::{EvaluationResult, SampleCounts};
use crate::predict::{Prediction, PredictionError, Predictor, Retry};
use crate::scheme::OUTSIDE;
use crate::span::Sample;
use crate::taxonomy::{RemapStats, TaxonomyMapper};
use rayon::prelude::*;
use std::ops::Add;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
/// Stops a running evaluation. Samples not yet started when the token fires are counted as
/// cancelled, and the result is marked as incomplete. A sample whose predictor is still retrying
/// when the token fires is cancelled too.
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per worker state, merged by addition once every sample has been processed.
#[derive(Debug, Default)]
struct Accumulator {
    confusion: Confusion,
    samples: SampleCounts,
    gold_remap: RemapStats,
    prediction_remap: RemapStats,
}

impl Add for Accumulator {
    type Output = Accumulator;
    fn add(mut self, rhs: Self) -> Self::Output {
        self.confusion += rhs.confusion;
        self.samples += rhs.samples;
        self.gold_remap += rhs.gold_remap;
        self.prediction_remap += rhs.prediction_remap;
        self
    }
}

/// Evaluates a predictor against annotated samples.
///
/// ```rust
/// use spaneval::{
///     EvaluationConfigBuilder, Evaluator, Prediction, PredictionError, Predictor, Sample, Span,
///     Token,
/// };
///
/// struct FindsJohn;
///
/// impl Predictor for FindsJohn {
///     fn predict(&self, sample: &Sample) -> Result<Prediction, PredictionError> {
///         let spans = sample
///             .text
///             .find("John")
///             .map(|start| vec![Span::new(start, start + 4, "PERSON")])
///             .unwrap_or_default();
///         Ok(Prediction::Spans(spans))
///     }
/// }
///
/// let config = EvaluationConfigBuilder::new()
///     .scheme_name("BIO")
///     .keep_set(["PERSON", "LOCATION"])
///     .build()
///     .unwrap();
/// let sample = Sample::new(
///     "0",
///     "John lives in Paris",
///     vec![
///         Token::new(0, 4, "John"),
///         Token::new(5, 10, "lives"),
///         Token::new(11, 13, "in"),
///         Token::new(14, 19, "Paris"),
///     ],
///     vec![Span::new(0, 4, "PERSON"), Span::new(14, 19, "LOCATION")],
/// );
/// let result = Evaluator::new(config, FindsJohn).evaluate(&[sample]).unwrap();
/// assert_eq!(result.per_type["PERSON"].f_beta, 1.0);
/// assert_eq!(result.per_type["LOCATION"].false_negative, 1);
/// assert_eq!(result.samples.scored, 1);
/// ```
pub struct Evaluator<P> {
    config: EvaluationConfig,
    predictor: Retry<P>,
    gold_mapper: TaxonomyMapper,
    prediction_mapper: TaxonomyMapper,
    cancellation: CancellationToken,
}

impl<P: Predictor> Evaluator<P> {
    /// The predictor is retried following the retry policy of the configuration.
    pub fn new(config: EvaluationConfig, predictor: P) -> Self {
        let cancellation = CancellationToken::new();
        let predictor =
            Retry::new(predictor, config.retry_policy()).with_cancellation(cancellation.clone());
        Self {
            gold_mapper: config.gold_mapper(),
            prediction_mapper: config.prediction_mapper(),
            config,
            predictor,
            cancellation,
        }
    }

    /// Replaces the cancellation token, which also stops the retries of the predictor.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.predictor = self.predictor.with_cancellation(token.clone());
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn evaluate_dataset<D: DatasetLoader + ?Sized>(&self, dataset: &D) -> Result<EvaluationResult> {
        let samples = dataset.load()?;
        self.evaluate(&samples)
    }

    pub fn evaluate(&self, samples: &[Sample]) -> Result<EvaluationResult> {
        info!(
            samples = samples.len(),
            scheme = %self.config.scheme,
            mode = %self.config.mode,
            concurrency = self.config.concurrency,
            "starting evaluation"
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency)
            .build()?;
        let total = pool.install(|| {
            samples
                .par_iter()
                .fold(Accumulator::default, |mut acc, sample| {
                    self.process(sample, &mut acc);
                    acc
                })
                .reduce(Accumulator::default, Accumulator::add)
        });

        report_unmapped("gold", &total.gold_remap);
        report_unmapped("prediction", &total.prediction_remap);

        let mut result = EvaluationResult::from_confusion(
            &total.confusion,
            self.config.beta,
            self.config.scheme,
            self.config.mode,
            self.config.parallel_metrics,
        )?;
        result.complete = total.samples.cancelled == 0;
        result.samples = total.samples;
        result.gold_remap = total.gold_remap;
        result.prediction_remap = total.prediction_remap;
        info!(
            scored = result.samples.scored,
            skipped = result.samples.skipped(),
            failed_predictions = result.samples.failed_predictions,
            cancelled = result.samples.cancelled,
            micro_f = result.micro.f_beta,
            "evaluation done"
        );
        if !result.complete {
            warn!(cancelled = result.samples.cancelled, "evaluation was cancelled");
        }
        Ok(result)
    }

    /// Scores one sample. The remap tallies and the failure count of a sample only reach the
    /// accumulator once the sample is scored.
    fn process(&self, sample: &Sample, acc: &mut Accumulator) {
        if self.cancellation.is_cancelled() {
            acc.samples.cancelled += 1;
            return;
        }
        let scheme = self.config.scheme;
        if let Err(e) = sample.validate() {
            warn!(sample_id = %sample.id, error = %e, "skipping sample");
            acc.samples.skipped_offset += 1;
            return;
        }

        let (gold_spans, gold_remap) = self.gold_mapper.remap_spans(&sample.spans);
        let gold = match convert(&sample.text, &sample.tokens, &gold_spans, scheme) {
            Ok(tags) => tags,
            Err(e) => {
                warn!(sample_id = %sample.id, error = %e, "skipping sample");
                acc.samples.skipped_offset += 1;
                return;
            }
        };

        let (predicted, prediction_remap, failed) = match self.predicted_tags(sample) {
            Ok(Predicted::Tags { tags, remap }) => (tags, remap, false),
            Ok(Predicted::Failed(e)) if self.cancellation.is_cancelled() => {
                debug!(sample_id = %sample.id, error = %e, "prediction abandoned on cancellation");
                acc.samples.cancelled += 1;
                return;
            }
            Ok(Predicted::Failed(e)) => {
                warn!(sample_id = %sample.id, error = %e, "prediction failed, scoring it as empty");
                let empty = vec![String::from(OUTSIDE); sample.tokens.len()];
                (empty, RemapStats::default(), true)
            }
            Err(e) => {
                warn!(sample_id = %sample.id, error = %e, "skipping sample with malformed prediction");
                acc.samples.malformed_predictions += 1;
                return;
            }
        };

        match acc
            .confusion
            .accumulate(&gold, &predicted, scheme, self.config.mode)
        {
            Ok(()) => {
                acc.samples.scored += 1;
                if failed {
                    acc.samples.failed_predictions += 1;
                }
                acc.gold_remap += gold_remap;
                acc.prediction_remap += prediction_remap;
                debug!(sample_id = %sample.id, tokens = gold.len(), "scored sample");
            }
            Err(e) => {
                warn!(sample_id = %sample.id, error = %e, "skipping sample");
                acc.samples.skipped_alignment += 1;
            }
        }
    }

    /// Predicted tags of the sample, in the target taxonomy. An unusable prediction is an error.
    fn predicted_tags(&self, sample: &Sample) -> std::result::Result<Predicted, PredictionError> {
        let scheme = self.config.scheme;
        match self.predictor.predict(sample) {
            Ok(Prediction::Spans(spans)) => {
                let (spans, remap) = self.prediction_mapper.remap_spans(&spans);
                let tags = convert(&sample.text, &sample.tokens, &spans, scheme)
                    .map_err(|e| PredictionError::Malformed(e.to_string()))?;
                Ok(Predicted::Tags { tags, remap })
            }
            Ok(Prediction::Tags(tags)) => {
                scheme
                    .validate(&tags)
                    .map_err(|e| PredictionError::Malformed(e.to_string()))?;
                let (tags, remap) = self.prediction_mapper.remap_tags(&tags);
                Ok(Predicted::Tags { tags, remap })
            }
            Err(e @ PredictionError::Malformed(_)) => Err(e),
            Err(e) => Ok(Predicted::Failed(e)),
        }
    }
}

/// What the model gave for a sample.
enum Predicted {
    Tags { tags: Vec<String>, remap: RemapStats },
    /// The predictor kept failing after its retries.
    Failed(PredictionError),
}

fn report_unmapped(side: &str, stats: &RemapStats) {
    for (label, count) in stats.unmapped.iter() {
        warn!(side, label = %label, count, "unmapped entity label, treated as no entity");
    }
}
