//! Message discovery: scoring, extraction, run accounting, and the scan loop.

pub mod classifier;
pub mod extract;
pub mod pipeline;
pub mod run;
pub mod scorer;

pub use classifier::{Classification, EventClassifier, HeuristicClassifier};
pub use pipeline::{DiscoveryPipeline, ItemError, ScanSummary};
pub use run::{RunHandle, RunRecorder};
pub use scorer::{RelevanceScorer, ScoreOutcome, ScoredMessage};
