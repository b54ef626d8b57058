use crate::config::ConfigError;
use crate::confusion::AlignmentError;
use crate::dataset::DatasetError;
use crate::metrics::ScoreError;
use crate::predict::PredictionError;
use crate::scheme::InvalidSchemeError;
use crate::span::OffsetError;
use thiserror::Error;

/// Any error of the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scheme(#[from] InvalidSchemeError),
    #[error(transparent)]
    Offset(#[from] OffsetError),
    #[error(transparent)]
    Alignment(#[from] AlignmentError),
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("Could not serialize the report: {0}")]
    Report(#[from] serde_json::Error),
    #[error("Could not start the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
