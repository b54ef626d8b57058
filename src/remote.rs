/**
Adapter for a Presidio-style analyzer service, reached over HTTP.
*/
use crate::config::EvaluationConfig;
use crate::predict::{Prediction, PredictionError, Predictor};
use crate::span::{Sample, Span};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Entity types the analyzer knows how to detect.
pub const ANALYZER_FIELDS: [&str; 20] = [
    "EMAIL_ADDRESS",
    "IP_ADDRESS",
    "US_DRIVER_LICENSE",
    "US_ITIN",
    "US_SSN",
    "ORG",
    "DOMAIN_NAME",
    "BIRTHDAY",
    "URL",
    "IBAN_CODE",
    "PERSON",
    "PHONE_NUMBER",
    "US_BANK_NUMBER",
    "CRYPTO",
    "NRP",
    "UK_NHS",
    "CREDIT_CARD",
    "DATE_TIME",
    "LOCATION",
    "US_PASSPORT",
];

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Provide a set of entities to keep, or request all fields")]
    NothingRequested,
    #[error("Could not build the http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FieldName {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct AnalyzeTemplate {
    fields: Vec<FieldName>,
}

impl AnalyzeTemplate {
    fn new(keep_set: Option<&BTreeSet<String>>) -> Self {
        let fields: Vec<String> = match keep_set {
            None => ANALYZER_FIELDS.iter().map(|f| String::from(*f)).collect(),
            Some(keep) => {
                for unsupported in keep.iter().filter(|k| !ANALYZER_FIELDS.contains(&k.as_str())) {
                    warn!(entity_type = %unsupported, "the analyzer does not detect this entity type");
                }
                keep.iter()
                    .filter(|k| ANALYZER_FIELDS.contains(&k.as_str()))
                    .cloned()
                    .collect()
            }
        };
        AnalyzeTemplate {
            fields: fields.into_iter().map(|name| FieldName { name }).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
    #[serde(rename = "analyzeTemplate")]
    analyze_template: &'a AnalyzeTemplate,
}

#[derive(Debug, Deserialize)]
struct Location {
    #[serde(default)]
    start: Option<usize>,
    end: usize,
}

#[derive(Debug, Deserialize)]
struct AnalyzerResult {
    location: Location,
    field: FieldName,
}

/// Calls the analyzer once per sample and returns the detected spans, in the analyzer's taxonomy.
pub struct PresidioAnalyzer {
    client: Client,
    endpoint: String,
    template: AnalyzeTemplate,
    timeout: Duration,
    empty_on_bad_request: bool,
}

/// This builder can be used to build and customize a `PresidioAnalyzer`.
pub struct PresidioAnalyzerBuilder {
    endpoint: String,
    keep_set: BTreeSet<String>,
    all_fields: bool,
    timeout: Duration,
    empty_on_bad_request: bool,
}

impl PresidioAnalyzerBuilder {
    pub fn keep_set<S: Into<String>>(mut self, keep_set: impl IntoIterator<Item = S>) -> Self {
        self.keep_set = keep_set.into_iter().map(Into::into).collect();
        self
    }
    pub fn all_fields(mut self, all_fields: bool) -> Self {
        self.all_fields = all_fields;
        self
    }
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    /// Treat a `400 Bad Request` or an empty body as "no entity found".
    pub fn empty_on_bad_request(mut self, empty_on_bad_request: bool) -> Self {
        self.empty_on_bad_request = empty_on_bad_request;
        self
    }
    pub fn build(self) -> Result<PresidioAnalyzer, RemoteError> {
        if !self.all_fields && self.keep_set.is_empty() {
            return Err(RemoteError::NothingRequested);
        }
        let keep_set = (!self.all_fields).then_some(&self.keep_set);
        let client = Client::builder().timeout(self.timeout).build()?;
        Ok(PresidioAnalyzer {
            client,
            endpoint: self.endpoint,
            template: AnalyzeTemplate::new(keep_set),
            timeout: self.timeout,
            empty_on_bad_request: self.empty_on_bad_request,
        })
    }
}

impl PresidioAnalyzer {
    pub fn builder(endpoint: impl Into<String>) -> PresidioAnalyzerBuilder {
        PresidioAnalyzerBuilder {
            endpoint: endpoint.into(),
            keep_set: BTreeSet::new(),
            all_fields: false,
            timeout: Duration::from_secs(30),
            empty_on_bad_request: true,
        }
    }

    /// Builder taking the timeout and the requested entity types from the run configuration.
    pub fn from_config(endpoint: impl Into<String>, config: &EvaluationConfig) -> PresidioAnalyzerBuilder {
        let builder = Self::builder(endpoint)
            .timeout(config.timeout)
            .all_fields(config.all_fields);
        match config.keep_set() {
            Some(keep) => builder.keep_set(keep.iter().cloned()),
            None => builder,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Entity types requested from the analyzer.
    pub fn requested_fields(&self) -> Vec<&str> {
        self.template
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect()
    }

    fn transport_error(&self, e: reqwest::Error) -> PredictionError {
        if e.is_timeout() {
            PredictionError::Timeout(self.timeout)
        } else {
            PredictionError::Transport(e.to_string())
        }
    }
}

/// Parses the body of a successful response. A missing start means the beginning of the text.
fn parse_response(body: &str) -> Result<Prediction, PredictionError> {
    let results: Option<Vec<AnalyzerResult>> =
        serde_json::from_str(body).map_err(|e| PredictionError::Malformed(e.to_string()))?;
    let spans = results
        .unwrap_or_default()
        .into_iter()
        .map(|r| Span::new(r.location.start.unwrap_or(0), r.location.end, r.field.name))
        .collect();
    Ok(Prediction::Spans(spans))
}

impl Predictor for PresidioAnalyzer {
    fn predict(&self, sample: &Sample) -> Result<Prediction, PredictionError> {
        let request = AnalyzeRequest {
            text: &sample.text,
            analyze_template: &self.template,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response.text().map_err(|e| self.transport_error(e))?;
        debug!(sample_id = %sample.id, %status, "analyzer responded");

        if self.empty_on_bad_request && (status == StatusCode::BAD_REQUEST || body.is_empty()) {
            return Ok(Prediction::empty());
        }
        if status.is_success() {
            parse_response(&body)
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(PredictionError::Transport(format!("{status}: {body}")))
        } else {
            Err(PredictionError::Malformed(format!("{status}: {body}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationConfigBuilder;

    #[test]
    fn test_nothing_requested() {
        let err = PresidioAnalyzer::builder("http://localhost:8080/api/v1/projects/test/analyze")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, RemoteError::NothingRequested));
    }

    #[test]
    fn test_requested_fields_restricted_to_keep_set() {
        let analyzer = PresidioAnalyzer::builder("http://localhost:8080")
            .keep_set(["PERSON", "LOCATION", "FAVORITE_COLOR"])
            .build()
            .unwrap();
        assert_eq!(analyzer.requested_fields(), vec!["LOCATION", "PERSON"]);

        let all = PresidioAnalyzer::builder("http://localhost:8080")
            .keep_set(["PERSON"])
            .all_fields(true)
            .build()
            .unwrap();
        assert_eq!(all.requested_fields().len(), ANALYZER_FIELDS.len());
    }

    #[test]
    fn test_from_config() {
        let config = EvaluationConfigBuilder::new()
            .keep_set(["PERSON", "LOCATION"])
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let analyzer = PresidioAnalyzer::from_config("http://localhost:8080", &config)
            .build()
            .unwrap();
        assert_eq!(analyzer.timeout(), Duration::from_secs(2));
        assert_eq!(analyzer.requested_fields(), vec!["LOCATION", "PERSON"]);

        let all = PresidioAnalyzer::from_config("http://localhost:8080", &EvaluationConfig::default())
            .build()
            .unwrap();
        assert_eq!(all.requested_fields().len(), ANALYZER_FIELDS.len());
        assert_eq!(all.timeout(), EvaluationConfig::default().timeout);
    }

    #[test]
    fn test_request_body() {
        let template = AnalyzeTemplate::new(Some(&BTreeSet::from([String::from("PERSON")])));
        let request = AnalyzeRequest {
            text: "John",
            analyze_template: &template,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"text": "John", "analyzeTemplate": {"fields": [{"name": "PERSON"}]}})
        );
    }

    #[test]
    fn test_parse_response() {
        let body = r#"[
            {"location": {"end": 4}, "field": {"name": "PERSON"}, "score": 0.85},
            {"location": {"start": 14, "end": 19}, "field": {"name": "LOCATION"}}
        ]"#;
        assert_eq!(
            parse_response(body),
            Ok(Prediction::Spans(vec![
                Span::new(0, 4, "PERSON"),
                Span::new(14, 19, "LOCATION")
            ]))
        );
        assert_eq!(parse_response("null"), Ok(Prediction::empty()));
        assert_eq!(parse_response("[]"), Ok(Prediction::empty()));
        assert!(matches!(
            parse_response("{\"error\": true}"),
            Err(PredictionError::Malformed(_))
        ));
    }
}
