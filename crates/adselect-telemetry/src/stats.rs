//! Immutable stats records emitted by the execution loggers.
//!
//! Each logger emits exactly one record, at close. Latency fields carry
//! [`crate::tracker::LATENCY_UNAVAILABLE`] when the stage never completed.
//! Counter fields out of scope for the active process type are zero, never
//! caller-supplied leftovers.

use serde::{Deserialize, Serialize};

/// Sentinel for integer fields that were never populated.
pub const FIELD_UNSET: i32 = -1;

/// Terminal status a pipeline closed with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Success,
    InvalidArgument,
    InternalError,
    Timeout,
}

impl ResultCode {
    pub fn code(&self) -> i32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::InvalidArgument => 1,
            ResultCode::InternalError => 2,
            ResultCode::Timeout => 3,
        }
    }
}

/// Which kind of bidding run produced a stats record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiddingProcessType {
    CustomAudience,
    Contextual,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiddingProcessStats {
    pub process_type: BiddingProcessType,
    pub fetch_decision_logic_latency_ms: i64,
    pub fetch_trusted_signals_latency_ms: i64,
    pub generate_bids_latency_ms: i64,
    pub overall_latency_ms: i64,
    pub num_of_ads_for_bidding: i32,
    pub num_of_custom_audiences: i32,
    pub num_of_contextual_ads: i32,
    pub result_code: ResultCode,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoringProcessStats {
    pub fetch_scoring_logic_latency_ms: i64,
    pub fetch_trusted_scoring_signals_latency_ms: i64,
    pub score_ads_latency_ms: i64,
    pub overall_latency_ms: i64,
    pub num_of_ads_scored: i32,
    pub result_code: ResultCode,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilteringProcessStats {
    pub app_install_filtering_latency_ms: i64,
    pub frequency_cap_filtering_latency_ms: i64,
    pub overall_latency_ms: i64,
    pub num_of_ads_filtered: i32,
    pub num_of_custom_audiences_filtered: i32,
    pub result_code: ResultCode,
}

/// Outcome of a signature verification run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    VerificationFailed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignatureVerificationStats {
    pub key_fetch_latency_ms: i64,
    pub serialization_latency_ms: i64,
    pub verification_latency_ms: i64,
    pub num_of_keys_fetched: i32,
    pub status: VerificationStatus,
    /// Failure-detail counters; all zero on a verified run.
    pub failure_unknown_error_count: i32,
    pub failure_wrong_format_count: i32,
    pub failure_signature_mismatch_count: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalEncodingStats {
    pub fetch_encoder_logic_latency_ms: i64,
    pub encode_signals_latency_ms: i64,
    pub overall_latency_ms: i64,
    pub encoded_payload_size_bytes: i32,
    pub result_code: ResultCode,
}

/// One record per logger invocation, tagged by pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StatsEvent {
    Bidding(BiddingProcessStats),
    Scoring(ScoringProcessStats),
    Filtering(FilteringProcessStats),
    SignatureVerification(SignatureVerificationStats),
    SignalEncoding(SignalEncodingStats),
}
