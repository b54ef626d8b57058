/*
 * This modules contains the configuration of an evaluation. The `EvaluationConfig` is built with
 * the `EvaluationConfigBuilder` or read from a json file, and it is validated once, before any
 * sample is processed.
*/
use crate::confusion::ScoringMode;
use crate::metrics::check_beta;
use crate::predict::RetryPolicy;
use crate::scheme::{InvalidSchemeError, Scheme};
use crate::taxonomy::TaxonomyMapper;
use either::Either as LeftOrRight;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Scheme(#[from] InvalidSchemeError),
    #[error("Beta must be positive and finite, got {0}")]
    InvalidBeta(f64),
    #[error("The concurrency limit must be at least 1")]
    ZeroConcurrency,
    #[error("Provide a set of entities to keep, or set `all_fields`")]
    EmptyKeepSet,
    #[error("Could not read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid configuration in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
/// Validated configuration of an evaluation.
pub struct EvaluationConfig {
    /// Tagging scheme of the gold and predicted sequences.
    pub scheme: Scheme,
    /// Dataset label -> target label. `None` keeps the dataset labels as they are.
    pub gold_mapping: Option<BTreeMap<String, String>>,
    /// Model label -> target label. `None` keeps the model labels as they are.
    pub prediction_mapping: Option<BTreeMap<String, String>>,
    /// Target entity types that are scored. Ignored when `all_fields` is set.
    pub keep_set: BTreeSet<String>,
    pub all_fields: bool,
    pub beta: f64,
    pub mode: ScoringMode,
    /// Maximum number of samples processed at the same time.
    pub concurrency: usize,
    /// Run the vectorized metric computations on the thread pool.
    pub parallel_metrics: bool,
    /// Per request timeout of the transport adapters. The evaluator itself never times out a
    /// prediction; see `PresidioAnalyzer::from_config`.
    #[serde(with = "millis")]
    pub timeout: Duration,
    pub max_retries: usize,
    #[serde(with = "millis")]
    pub backoff: Duration,
}

impl EvaluationConfig {
    /// Reads and validates a json configuration. Missing fields take their default value.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: EvaluationConfigFile =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        EvaluationConfigBuilder::from(raw).build()
    }

    /// Keep set of the run, `None` when every entity type is kept.
    pub fn keep_set(&self) -> Option<&BTreeSet<String>> {
        (!self.all_fields).then_some(&self.keep_set)
    }

    pub fn gold_mapper(&self) -> TaxonomyMapper {
        Self::mapper(&self.gold_mapping).with_optional_keep_set(self.keep_set().cloned())
    }

    pub fn prediction_mapper(&self) -> TaxonomyMapper {
        Self::mapper(&self.prediction_mapping).with_optional_keep_set(self.keep_set().cloned())
    }

    fn mapper(mapping: &Option<BTreeMap<String, String>>) -> TaxonomyMapper {
        match mapping {
            Some(m) => TaxonomyMapper::new(m.clone()),
            None => TaxonomyMapper::identity(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            scheme: Scheme::default(),
            gold_mapping: None,
            prediction_mapping: None,
            keep_set: BTreeSet::new(),
            all_fields: true,
            beta: 1.0,
            mode: ScoringMode::default(),
            concurrency: default_concurrency(),
            parallel_metrics: false,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

impl Display for EvaluationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keep = match self.keep_set() {
            Some(keep) => keep.iter().cloned().collect::<Vec<_>>().join(", "),
            None => String::from("all"),
        };
        write!(
            f,
            "Scheme: {}\n Scoring mode: {}\n Beta: {}\n Entities kept: {}\n Concurrency: {}\n Timeout: {:?}\n Retries: {} (backoff {:?})",
            self.scheme, self.mode, self.beta, keep, self.concurrency, self.timeout, self.max_retries, self.backoff
        )
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
/// Layout of a configuration file. Durations are in milliseconds.
struct EvaluationConfigFile {
    scheme: Option<String>,
    gold_mapping: Option<BTreeMap<String, String>>,
    prediction_mapping: Option<BTreeMap<String, String>>,
    keep_set: BTreeSet<String>,
    all_fields: bool,
    beta: Option<f64>,
    mode: ScoringMode,
    concurrency: Option<usize>,
    parallel_metrics: bool,
    timeout_ms: Option<u64>,
    max_retries: Option<usize>,
    backoff_ms: Option<u64>,
}

impl Default for EvaluationConfigFile {
    fn default() -> Self {
        Self {
            scheme: None,
            gold_mapping: None,
            prediction_mapping: None,
            keep_set: BTreeSet::new(),
            all_fields: false,
            beta: None,
            mode: ScoringMode::default(),
            concurrency: None,
            parallel_metrics: false,
            timeout_ms: None,
            max_retries: None,
            backoff_ms: None,
        }
    }
}

impl From<EvaluationConfigFile> for EvaluationConfigBuilder {
    fn from(raw: EvaluationConfigFile) -> Self {
        let mut builder = EvaluationConfigBuilder::new()
            .keep_set(raw.keep_set)
            .all_fields(raw.all_fields)
            .mode(raw.mode)
            .parallel_metrics(raw.parallel_metrics);
        if let Some(scheme) = raw.scheme {
            builder = builder.scheme_name(scheme);
        }
        if let Some(mapping) = raw.gold_mapping {
            builder = builder.gold_mapping(mapping);
        }
        if let Some(mapping) = raw.prediction_mapping {
            builder = builder.prediction_mapping(mapping);
        }
        if let Some(beta) = raw.beta {
            builder = builder.beta(beta);
        }
        if let Some(concurrency) = raw.concurrency {
            builder = builder.concurrency(concurrency);
        }
        if let Some(timeout) = raw.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout));
        }
        if let Some(max_retries) = raw.max_retries {
            builder = builder.max_retries(max_retries);
        }
        if let Some(backoff) = raw.backoff_ms {
            builder = builder.backoff(Duration::from_millis(backoff));
        }
        builder
    }
}

/// This builder can be used to build and customize an `EvaluationConfig`. Nothing is checked
/// before `build`.
///
/// ```rust
/// use spaneval::{EvaluationConfigBuilder, Scheme};
///
/// let config = EvaluationConfigBuilder::new()
///     .scheme_name("iob2")
///     .keep_set(["PERSON", "LOCATION"])
///     .beta(2.0)
///     .build()
///     .unwrap();
/// assert_eq!(config.scheme, Scheme::BIO);
/// assert!(EvaluationConfigBuilder::new().scheme_name("IOBES").all_fields(true).build().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct EvaluationConfigBuilder {
    /// A scheme name still to be parsed, or a scheme.
    scheme: LeftOrRight<String, Scheme>,
    gold_mapping: Option<BTreeMap<String, String>>,
    prediction_mapping: Option<BTreeMap<String, String>>,
    keep_set: BTreeSet<String>,
    all_fields: bool,
    beta: f64,
    mode: ScoringMode,
    concurrency: usize,
    parallel_metrics: bool,
    timeout: Duration,
    max_retries: usize,
    backoff: Duration,
}

impl Default for EvaluationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationConfigBuilder {
    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = LeftOrRight::Right(scheme);
        self
    }
    /// Case insensitive scheme name, such as `BIO`, `iob2` or `BILOU`.
    pub fn scheme_name(mut self, name: impl Into<String>) -> Self {
        self.scheme = LeftOrRight::Left(name.into());
        self
    }
    pub fn gold_mapping<K: Into<String>, V: Into<String>>(
        mut self,
        mapping: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.gold_mapping = Some(mapping.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }
    pub fn prediction_mapping<K: Into<String>, V: Into<String>>(
        mut self,
        mapping: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.prediction_mapping =
            Some(mapping.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }
    pub fn keep_set<S: Into<String>>(mut self, keep_set: impl IntoIterator<Item = S>) -> Self {
        self.keep_set = keep_set.into_iter().map(Into::into).collect();
        self
    }
    pub fn all_fields(mut self, all_fields: bool) -> Self {
        self.all_fields = all_fields;
        self
    }
    pub fn beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }
    pub fn mode(mut self, mode: ScoringMode) -> Self {
        self.mode = mode;
        self
    }
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
    pub fn parallel_metrics(mut self, parallel_metrics: bool) -> Self {
        self.parallel_metrics = parallel_metrics;
        self
    }
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
    pub fn new() -> Self {
        let defaults = EvaluationConfig::default();
        Self {
            scheme: LeftOrRight::Right(defaults.scheme),
            gold_mapping: None,
            prediction_mapping: None,
            keep_set: BTreeSet::new(),
            all_fields: false,
            beta: defaults.beta,
            mode: defaults.mode,
            concurrency: defaults.concurrency,
            parallel_metrics: defaults.parallel_metrics,
            timeout: defaults.timeout,
            max_retries: defaults.max_retries,
            backoff: defaults.backoff,
        }
    }
    /// Validates the configuration.
    pub fn build(self) -> Result<EvaluationConfig, ConfigError> {
        let scheme = match self.scheme {
            LeftOrRight::Left(name) => name.parse::<Scheme>()?,
            LeftOrRight::Right(scheme) => scheme,
        };
        check_beta(self.beta).map_err(|_| ConfigError::InvalidBeta(self.beta))?;
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if !self.all_fields && self.keep_set.is_empty() {
            return Err(ConfigError::EmptyKeepSet);
        }
        Ok(EvaluationConfig {
            scheme,
            gold_mapping: self.gold_mapping,
            prediction_mapping: self.prediction_mapping,
            keep_set: self.keep_set,
            all_fields: self.all_fields,
            beta: self.beta,
            mode: self.mode,
            concurrency: self.concurrency,
            parallel_metrics: self.parallel_metrics,
            timeout: self.timeout,
            max_retries: self.max_retries,
            backoff: self.backoff,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::taxonomy::Mapped;
    use rstest::rstest;
    use std::io::Write;

    fn all_fields() -> EvaluationConfigBuilder {
        EvaluationConfigBuilder::default().all_fields(true)
    }

    #[rstest]
    #[case(Scheme::IO)]
    #[case(Scheme::BIO)]
    #[case(Scheme::BILOU)]
    fn test_builder_setters_scheme(#[case] scheme: Scheme) {
        let config = all_fields().scheme(scheme).build().unwrap();
        assert_eq!(config.scheme, scheme)
    }

    #[rstest]
    #[case("io", Scheme::IO)]
    #[case("IOB", Scheme::BIO)]
    #[case("biluo", Scheme::BILOU)]
    fn test_builder_setters_scheme_name(#[case] name: &str, #[case] scheme: Scheme) {
        let config = all_fields().scheme_name(name).build().unwrap();
        assert_eq!(config.scheme, scheme)
    }

    #[test]
    fn test_defaults() {
        let config = all_fields().build().unwrap();
        assert_eq!(config.beta, 1.0);
        assert_eq!(config.mode, ScoringMode::Token);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff, Duration::from_millis(200));
        assert!(config.concurrency >= 1);
        assert!(config.keep_set().is_none());
    }

    #[rstest]
    #[case(0.0)]
    #[case(-0.5)]
    #[case(f64::INFINITY)]
    fn test_invalid_beta(#[case] beta: f64) {
        let err = all_fields().beta(beta).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBeta(_)))
    }

    #[test]
    fn test_fatal_errors() {
        assert!(matches!(
            all_fields().scheme_name("IOBES").build().unwrap_err(),
            ConfigError::Scheme(_)
        ));
        assert!(matches!(
            all_fields().concurrency(0).build().unwrap_err(),
            ConfigError::ZeroConcurrency
        ));
        assert!(matches!(
            EvaluationConfigBuilder::new().build().unwrap_err(),
            ConfigError::EmptyKeepSet
        ));
    }

    #[test]
    fn test_mappers_share_keep_set() {
        let config = EvaluationConfigBuilder::new()
            .gold_mapping([("FIRST_NAME", "PERSON"), ("CITY", "LOCATION")])
            .keep_set(["PERSON"])
            .build()
            .unwrap();
        let gold = config.gold_mapper();
        assert_eq!(gold.map_label("FIRST_NAME"), Mapped::Kept("PERSON"));
        assert_eq!(gold.map_label("CITY"), Mapped::OutOfScope);
        let prediction = config.prediction_mapper();
        assert_eq!(prediction.map_label("PERSON"), Mapped::Kept("PERSON"));
        assert_eq!(prediction.map_label("NRP"), Mapped::OutOfScope);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "scheme": "bilou",
                "gold_mapping": {{"FIRST_NAME": "PERSON", "TITLE": "O"}},
                "keep_set": ["PERSON"],
                "beta": 0.5,
                "mode": "entity",
                "concurrency": 2,
                "timeout_ms": 1500,
                "backoff_ms": 10
            }}"#
        )
        .unwrap();
        let config = EvaluationConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.scheme, Scheme::BILOU);
        assert_eq!(config.beta, 0.5);
        assert_eq!(config.mode, ScoringMode::Entity);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.backoff, Duration::from_millis(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.gold_mapping.unwrap().len(), 2);
    }

    #[test]
    fn test_from_json_file_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"scheme": "IOE2", "all_fields": true}}"#).unwrap();
        assert!(matches!(
            EvaluationConfig::from_json_file(file.path()).unwrap_err(),
            ConfigError::Scheme(_)
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"shceme": "BIO"}}"#).unwrap();
        assert!(matches!(
            EvaluationConfig::from_json_file(file.path()).unwrap_err(),
            ConfigError::Json { .. }
        ));
    }
}
