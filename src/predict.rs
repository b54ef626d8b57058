/**
The interface of the model under evaluation, and adapters around it.
*/
use crate::dataset::DatasetError;
use crate::evaluator::CancellationToken;
use crate::span::{Sample, Span};
use serde::{Deserialize, Serialize};
use serde_jsonlines::json_lines;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// What a model returns for a sample: either one tag per token, or character spans.
pub enum Prediction {
    Tags(Vec<String>),
    Spans(Vec<Span>),
}

impl Prediction {
    /// A successful prediction without any entity.
    pub fn empty() -> Self {
        Prediction::Spans(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredictionError {
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Prediction timed out after {0:?}")]
    Timeout(Duration),
    #[error("Malformed prediction: {0}")]
    Malformed(String),
}

impl PredictionError {
    /// Transport failures and timeouts may succeed on a new attempt, malformed responses will not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PredictionError::Malformed(_))
    }
}

/// The model under evaluation. Implementations are called from several threads at once.
pub trait Predictor: Send + Sync {
    fn predict(&self, sample: &Sample) -> Result<Prediction, PredictionError>;
}

impl<P: Predictor + ?Sized> Predictor for &P {
    fn predict(&self, sample: &Sample) -> Result<Prediction, PredictionError> {
        (**self).predict(sample)
    }
}

impl<P: Predictor + ?Sized> Predictor for Box<P> {
    fn predict(&self, sample: &Sample) -> Result<Prediction, PredictionError> {
        (**self).predict(sample)
    }
}

impl<P: Predictor + ?Sized> Predictor for Arc<P> {
    fn predict(&self, sample: &Sample) -> Result<Prediction, PredictionError> {
        (**self).predict(sample)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of attempts after the first one.
    pub max_retries: usize,
    /// Wait before the first retry. It doubles after each retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Retries the transient failures of the wrapped predictor. Once its cancellation token fires,
/// the last failure is returned instead of waiting for a new attempt.
pub struct Retry<P> {
    inner: P,
    policy: RetryPolicy,
    cancellation: CancellationToken,
}

impl<P: Predictor> Retry<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

impl<P: Predictor> Predictor for Retry<P> {
    fn predict(&self, sample: &Sample) -> Result<Prediction, PredictionError> {
        let mut wait = self.policy.backoff;
        let mut attempt = 0;
        loop {
            match self.inner.predict(sample) {
                Err(e)
                    if e.is_retryable()
                        && attempt < self.policy.max_retries
                        && !self.cancellation.is_cancelled() =>
                {
                    attempt += 1;
                    warn!(
                        sample_id = %sample.id,
                        attempt,
                        max_retries = self.policy.max_retries,
                        error = %e,
                        "prediction failed, retrying"
                    );
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                    if self.cancellation.is_cancelled() {
                        return Err(e);
                    }
                    wait = wait.saturating_mul(2);
                }
                result => return result,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PredictionRecord {
    id: String,
    #[serde(flatten)]
    prediction: Prediction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Predictions computed ahead of time, keyed by sample id.
pub struct PrecomputedPredictor {
    predictions: HashMap<String, Prediction>,
}

impl PrecomputedPredictor {
    pub fn new(predictions: HashMap<String, Prediction>) -> Self {
        Self { predictions }
    }

    /// Reads one prediction per line, such as `{"id": "7", "spans": [...]}` or
    /// `{"id": "7", "tags": ["O", "B-PERSON"]}`.
    pub fn from_json_lines(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let mut predictions = HashMap::new();
        let records =
            json_lines::<PredictionRecord, _>(path).map_err(|source| DatasetError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        for (line, record) in records.enumerate() {
            let record = record.map_err(|source| DatasetError::Record {
                path: path.to_path_buf(),
                line: line + 1,
                source,
            })?;
            if predictions
                .insert(record.id.clone(), record.prediction)
                .is_some()
            {
                warn!(id = %record.id, "duplicated prediction, keeping the last one");
            }
        }
        debug!(path = %path.display(), count = predictions.len(), "loaded predictions");
        Ok(Self { predictions })
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

impl Predictor for PrecomputedPredictor {
    fn predict(&self, sample: &Sample) -> Result<Prediction, PredictionError> {
        self.predictions.get(&sample.id).cloned().ok_or_else(|| {
            PredictionError::Malformed(format!("no prediction for sample `{}`", sample.id))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with the given errors, in order, then succeeds.
    pub(crate) struct Flaky {
        pub(crate) errors: Vec<PredictionError>,
        pub(crate) calls: AtomicUsize,
    }

    impl Flaky {
        pub(crate) fn new(errors: Vec<PredictionError>) -> Self {
            Self {
                errors,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Predictor for Flaky {
        fn predict(&self, _sample: &Sample) -> Result<Prediction, PredictionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.errors.get(call) {
                Some(e) => Err(e.clone()),
                None => Ok(Prediction::empty()),
            }
        }
    }

    fn no_wait(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::ZERO,
        }
    }

    fn sample() -> Sample {
        Sample::new("0", "text", vec![], vec![])
    }

    #[test]
    fn test_retry_until_success() {
        let flaky = Flaky::new(vec![
            PredictionError::Transport(String::from("reset")),
            PredictionError::Timeout(Duration::from_secs(1)),
        ]);
        let retry = Retry::new(&flaky, no_wait(3));
        assert_eq!(retry.predict(&sample()), Ok(Prediction::empty()));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_exactly_max_retries() {
        let transport = PredictionError::Transport(String::from("refused"));
        let flaky = Flaky::new(vec![transport.clone(); 10]);
        let retry = Retry::new(&flaky, no_wait(3));
        assert_eq!(retry.predict(&sample()), Err(transport));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_malformed_is_not_retried() {
        let malformed = PredictionError::Malformed(String::from("not json"));
        let flaky = Flaky::new(vec![malformed.clone()]);
        let retry = Retry::new(&flaky, no_wait(3));
        assert_eq!(retry.predict(&sample()), Err(malformed));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_retry_once_cancelled() {
        let transport = PredictionError::Transport(String::from("refused"));
        let flaky = Flaky::new(vec![transport.clone(); 10]);
        let token = CancellationToken::new();
        let retry = Retry::new(&flaky, no_wait(3)).with_cancellation(token.clone());
        token.cancel();
        assert_eq!(retry.predict(&sample()), Err(transport));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_precomputed_predictor() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"id": "a", "spans": [{{"start": 0, "end": 4, "entity_type": "PERSON"}}]}}"#
        )
        .unwrap();
        writeln!(file, r#"{{"id": "b", "tags": ["O", "B-LOCATION"]}}"#).unwrap();
        let predictor = PrecomputedPredictor::from_json_lines(file.path()).unwrap();
        assert_eq!(predictor.len(), 2);

        let a = Sample::new("a", "John", vec![], vec![]);
        assert_eq!(
            predictor.predict(&a),
            Ok(Prediction::Spans(vec![Span::new(0, 4, "PERSON")]))
        );
        let b = Sample::new("b", "in Paris", vec![], vec![]);
        assert_eq!(
            predictor.predict(&b),
            Ok(Prediction::Tags(vec![
                String::from("O"),
                String::from("B-LOCATION")
            ]))
        );
        let missing = Sample::new("c", "", vec![], vec![]);
        assert!(matches!(
            predictor.predict(&missing),
            Err(PredictionError::Malformed(_))
        ));
    }

    #[test]
    fn test_precomputed_predictor_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": "a", "tags": []}}"#).unwrap();
        writeln!(file, r#"{{"id": "b"}}"#).unwrap();
        let err = PrecomputedPredictor::from_json_lines(file.path()).unwrap_err();
        assert!(matches!(err, DatasetError::Record { line: 2, .. }));
    }
}
