//! Hearth: household event discovery from email.
//!
//! Scans a mailbox for messages that mention household events, scores them
//! against category packs, and stages them in an approval queue. Senders
//! outside a pack's allow-list that keep matching are surfaced as domain
//! suggestions. Historical backfill runs behind an explicit safety gate.

pub mod approval;
pub mod backfill;
pub mod db;
pub mod discovery;
pub mod error;
pub mod fingerprint;
pub mod logging;
mod migrations;
pub mod packs;
pub mod sources;
pub mod suggestions;
pub mod types;

pub use approval::{ApprovalQueue, EnqueueResult, NewApprovalItem, PendingFilter, QueueEntry};
pub use backfill::{validate as validate_backfill, BackfillOptions, BackfillPlan, BackfillReport, BackfillRunner};
pub use db::{HearthDb, SharedDb};
pub use discovery::{
    DiscoveryPipeline, EventClassifier, HeuristicClassifier, RelevanceScorer, RunRecorder,
    ScanSummary,
};
pub use error::{ErrorPayload, HearthError};
pub use fingerprint::Fingerprint;
pub use packs::{load_custom_pack, load_pack, PackConfig};
pub use sources::{CalendarSink, EmailMessage, MessageSource, SourceError};
pub use suggestions::{DomainSuggestionEngine, ObserveOutcome};
pub use types::{DiscoveryConfig, EventIntent};
