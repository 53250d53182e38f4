//! Execution telemetry for the ad-selection module.
//!
//! One stateful, single-use logger per pipeline (bidding, scoring,
//! filtering, signature verification, signal encoding). Each logger
//! enforces a strict stage ordering through an explicit state machine,
//! fails fast on misuse, and emits exactly one immutable stats record to a
//! sink at close.

pub mod bidding;
pub mod clock;
pub mod encoding;
pub mod filtering;
pub mod scoring;
pub mod signature;
pub mod sink;
pub mod stats;
pub mod tracker;

pub use bidding::BiddingExecutionLogger;
pub use clock::{Clock, MonotonicClock, StepClock};
pub use encoding::SignalEncodingLogger;
pub use filtering::FilteringExecutionLogger;
pub use scoring::ScoringExecutionLogger;
pub use signature::SignatureVerificationLogger;
pub use sink::{CollectingSink, StatsSink, TracingSink};
pub use stats::{
    BiddingProcessStats, BiddingProcessType, FilteringProcessStats, ResultCode,
    ScoringProcessStats, SignalEncodingStats, SignatureVerificationStats, StatsEvent,
    VerificationStatus, FIELD_UNSET,
};
pub use tracker::{StageTracker, LATENCY_UNAVAILABLE};
