/**
Loading of annotated corpora.
*/
use crate::span::Sample;
use crate::tokenizer::{Tokenizer, UnicodeWordTokenizer};
use serde_jsonlines::json_lines;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Could not open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid record at {}:{line}: {source}", .path.display())]
    Record {
        path: PathBuf,
        line: usize,
        source: std::io::Error,
    },
    #[error("Invalid json in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Source of the annotated samples of an evaluation.
pub trait DatasetLoader {
    fn load(&self) -> Result<Vec<Sample>, DatasetError>;
}

impl DatasetLoader for Vec<Sample> {
    fn load(&self) -> Result<Vec<Sample>, DatasetError> {
        Ok(self.clone())
    }
}

impl DatasetLoader for [Sample] {
    fn load(&self) -> Result<Vec<Sample>, DatasetError> {
        Ok(self.to_vec())
    }
}

/// Gives an id to the samples without one and tokenizes the samples without tokens.
fn prepare<T: Tokenizer>(index: usize, mut sample: Sample, tokenizer: &T) -> Sample {
    if sample.id.is_empty() {
        sample.id = index.to_string();
    }
    if sample.tokens.is_empty() && !sample.text.is_empty() {
        sample.tokens = tokenizer.tokenize(&sample.text);
    }
    sample
}

/// Reads one sample per line. The fields are those of `Sample`; the corpus names `full_text`,
/// `start_position` and `end_position` are accepted too.
pub struct JsonLinesDataset<T = UnicodeWordTokenizer> {
    path: PathBuf,
    tokenizer: T,
}

impl JsonLinesDataset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tokenizer: UnicodeWordTokenizer,
        }
    }
}

impl<T: Tokenizer> JsonLinesDataset<T> {
    pub fn with_tokenizer<U: Tokenizer>(self, tokenizer: U) -> JsonLinesDataset<U> {
        JsonLinesDataset {
            path: self.path,
            tokenizer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: Tokenizer> DatasetLoader for JsonLinesDataset<T> {
    fn load(&self) -> Result<Vec<Sample>, DatasetError> {
        let records = json_lines::<Sample, _>(&self.path).map_err(|source| DatasetError::Open {
            path: self.path.clone(),
            source,
        })?;
        let mut samples = Vec::new();
        for (index, record) in records.enumerate() {
            let sample = record.map_err(|source| DatasetError::Record {
                path: self.path.clone(),
                line: index + 1,
                source,
            })?;
            samples.push(prepare(index, sample, &self.tokenizer));
        }
        info!(path = %self.path.display(), samples = samples.len(), "loaded dataset");
        Ok(samples)
    }
}

/// Reads a json array of samples, the layout of the synthetic corpora.
pub struct JsonDataset<T = UnicodeWordTokenizer> {
    path: PathBuf,
    tokenizer: T,
}

impl JsonDataset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tokenizer: UnicodeWordTokenizer,
        }
    }
}

impl<T: Tokenizer> JsonDataset<T> {
    pub fn with_tokenizer<U: Tokenizer>(self, tokenizer: U) -> JsonDataset<U> {
        JsonDataset {
            path: self.path,
            tokenizer,
        }
    }
}

impl<T: Tokenizer> DatasetLoader for JsonDataset<T> {
    fn load(&self) -> Result<Vec<Sample>, DatasetError> {
        let file = File::open(&self.path).map_err(|source| DatasetError::Open {
            path: self.path.clone(),
            source,
        })?;
        let records: Vec<Sample> =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| DatasetError::Json {
                path: self.path.clone(),
                source,
            })?;
        let samples: Vec<Sample> = records
            .into_iter()
            .enumerate()
            .map(|(index, sample)| prepare(index, sample, &self.tokenizer))
            .collect();
        info!(path = %self.path.display(), samples = samples.len(), "loaded dataset");
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Span, Token};
    use std::io::Write;

    #[test]
    fn test_json_lines_dataset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"id": "first", "full_text": "John lives in Paris", "spans": [{{"entity_type": "PERSON", "entity_value": "John", "start_position": 0, "end_position": 4}}]}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"text": "Hi", "tokens": [{{"start": 0, "end": 2, "text": "Hi"}}]}}"#
        )
        .unwrap();
        let samples = JsonLinesDataset::new(file.path()).load().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].id, "first");
        assert_eq!(samples[0].spans, vec![Span::new(0, 4, "PERSON")]);
        assert_eq!(samples[0].tokens.len(), 4);
        assert_eq!(samples[0].tokens[3], Token::new(14, 19, "Paris"));
        assert_eq!(samples[1].id, "1");
        assert_eq!(samples[1].tokens, vec![Token::new(0, 2, "Hi")]);
    }

    #[test]
    fn test_json_lines_custom_tokenizer() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"text": "a b"}}"#).unwrap();
        let whole = |text: &str| vec![Token::new(0, text.chars().count(), text)];
        let samples = JsonLinesDataset::new(file.path())
            .with_tokenizer(whole)
            .load()
            .unwrap();
        assert_eq!(samples[0].tokens, vec![Token::new(0, 3, "a b")]);
    }

    #[test]
    fn test_json_lines_bad_record() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"text": "ok"}}"#).unwrap();
        writeln!(file, r#"{{"spans": []}}"#).unwrap();
        let err = JsonLinesDataset::new(file.path()).load().unwrap_err();
        assert!(matches!(err, DatasetError::Record { line: 2, .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = JsonLinesDataset::new("/does/not/exist.jsonl")
            .load()
            .unwrap_err();
        assert!(matches!(err, DatasetError::Open { .. }));
    }

    #[test]
    fn test_json_dataset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"full_text": "Call Dana", "spans": [{{"entity_type": "FIRST_NAME", "start_position": 5, "end_position": 9}}]}}]"#
        )
        .unwrap();
        let samples = JsonDataset::new(file.path()).load().unwrap();
        assert_eq!(samples[0].id, "0");
        assert_eq!(samples[0].tokens.len(), 2);
        assert_eq!(samples[0].spans[0].entity_type, "FIRST_NAME");
    }
}
