/*!
This library evaluates entity recognition models, such as PII detectors, against an annotated
corpus. Gold annotations are character spans. They are remapped to the taxonomy of the evaluation,
converted into one tag per token under a tagging scheme, and compared with the predictions of the
model, token by token or entity by entity.

# SCHEMES
The current schemes are supported:
* IO: every token of an entity is tagged with the entity type, such as `PERSON`. Two adjacent
    entities of the same type cannot be told apart.
* BIO (also named IOB or IOB2): `B-` is given to the first token of an entity and `I-` to the
    following ones.
* BILOU (or BILUO): `U-` is given to single token entities. Longer entities start with `B-`, end
    with `L-` and have `I-` in between.

Tokens outside of any entity are tagged `O` in every scheme. Scheme names are case insensitive.

# Terminology
* A span is a range of characters of the text labeled with an entity type. Offsets count unicode
    scalar values, not bytes.
* A tag is the label of a single token, such as `B-PERSON`. It is made of a prefix and of an
    entity type.
* A chunk is a run of tokens carrying the same entity.
* The support of an entity type is the number of gold tokens (or gold chunks when scoring entities)
    of that type.

# Example
```rust
use spaneval::{convert, score, Reporter, Scheme, ScoringMode, Span, Token};

let text = "John lives in Paris";
let tokens = vec![
    Token::new(0, 4, "John"),
    Token::new(5, 10, "lives"),
    Token::new(11, 13, "in"),
    Token::new(14, 19, "Paris"),
];
let gold = convert(
    text,
    &tokens,
    &[Span::new(0, 4, "PERSON"), Span::new(14, 19, "LOCATION")],
    Scheme::BILOU,
)
.unwrap();
assert_eq!(gold, vec!["U-PERSON", "O", "O", "U-LOCATION"]);

let predicted = convert(text, &tokens, &[Span::new(0, 4, "PERSON")], Scheme::BILOU).unwrap();
let result = score(&[gold], &[predicted], Scheme::BILOU, 1.0, ScoringMode::Token).unwrap();
assert_eq!(result.micro.recall, 0.5);
println!("{}", Reporter::from(&result));
```
*/

mod config;
mod confusion;
mod convert;
mod dataset;
mod error;
mod evaluator;
mod metrics;
mod predict;
#[cfg(feature = "remote")]
pub mod remote;
mod reporter;
mod scheme;
mod span;
mod taxonomy;
mod tokenizer;

// The public api starts here
pub use config::{ConfigError, EvaluationConfig, EvaluationConfigBuilder};
pub use confusion::{AlignmentError, Confusion, ConfusionEntry, ScoringMode, ScoringModeParsingError};
pub use convert::convert;
pub use dataset::{DatasetError, DatasetLoader, JsonDataset, JsonLinesDataset};
pub use error::{Error, Result};
pub use evaluator::{CancellationToken, Evaluator};
pub use metrics::{score, EvaluationResult, Metric, SampleCounts, ScoreError, TypeMetrics};
pub use predict::{
    PrecomputedPredictor, Prediction, PredictionError, Predictor, Retry, RetryPolicy,
};
pub use reporter::{ReportRow, Reporter, RowKind, RunSummary};
pub use scheme::{entity_type, Chunk, InvalidSchemeError, InvalidTag, Scheme, OUTSIDE};
pub use span::{OffsetError, Sample, Span, Token};
pub use taxonomy::{Mapped, RemapStats, TaxonomyMapper};
pub use tokenizer::{Tokenizer, UnicodeWordTokenizer};

/// Main entrypoint of the library. Loads the dataset, runs every sample through the predictor and
/// scores the predictions, as described by the configuration.
///
/// * `config`: validated configuration, see `EvaluationConfigBuilder`.
/// * `dataset`: annotated samples, with gold spans.
/// * `predictor`: the model under evaluation.
pub fn evaluate<D, P>(config: EvaluationConfig, dataset: &D, predictor: P) -> Result<Reporter>
where
    D: DatasetLoader + ?Sized,
    P: Predictor,
{
    let result = Evaluator::new(config, predictor).evaluate_dataset(dataset)?;
    Ok(Reporter::from(&result))
}

