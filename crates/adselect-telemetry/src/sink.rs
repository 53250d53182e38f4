//! Stats sink: where closed loggers deliver their one record.
//!
//! Delivery is fire-and-forget; a sink must not fail back into the caller.

use std::sync::Mutex;

use tracing::info;

use crate::stats::StatsEvent;

pub trait StatsSink: Send + Sync {
    fn record(&self, event: StatsEvent);
}

/// Sink that emits one structured tracing event per record.
pub struct TracingSink;

impl StatsSink for TracingSink {
    fn record(&self, event: StatsEvent) {
        match event {
            StatsEvent::Bidding(stats) => info!(
                target: "adselect_telemetry",
                process_type = ?stats.process_type,
                fetch_decision_logic_latency_ms = stats.fetch_decision_logic_latency_ms,
                fetch_trusted_signals_latency_ms = stats.fetch_trusted_signals_latency_ms,
                generate_bids_latency_ms = stats.generate_bids_latency_ms,
                overall_latency_ms = stats.overall_latency_ms,
                num_of_ads_for_bidding = stats.num_of_ads_for_bidding,
                num_of_custom_audiences = stats.num_of_custom_audiences,
                num_of_contextual_ads = stats.num_of_contextual_ads,
                result_code = stats.result_code.code(),
                "Bidding stats"
            ),
            StatsEvent::Scoring(stats) => info!(
                target: "adselect_telemetry",
                fetch_scoring_logic_latency_ms = stats.fetch_scoring_logic_latency_ms,
                fetch_trusted_scoring_signals_latency_ms =
                    stats.fetch_trusted_scoring_signals_latency_ms,
                score_ads_latency_ms = stats.score_ads_latency_ms,
                overall_latency_ms = stats.overall_latency_ms,
                num_of_ads_scored = stats.num_of_ads_scored,
                result_code = stats.result_code.code(),
                "Scoring stats"
            ),
            StatsEvent::Filtering(stats) => info!(
                target: "adselect_telemetry",
                app_install_filtering_latency_ms = stats.app_install_filtering_latency_ms,
                frequency_cap_filtering_latency_ms = stats.frequency_cap_filtering_latency_ms,
                overall_latency_ms = stats.overall_latency_ms,
                num_of_ads_filtered = stats.num_of_ads_filtered,
                num_of_custom_audiences_filtered = stats.num_of_custom_audiences_filtered,
                result_code = stats.result_code.code(),
                "Filtering stats"
            ),
            StatsEvent::SignatureVerification(stats) => info!(
                target: "adselect_telemetry",
                key_fetch_latency_ms = stats.key_fetch_latency_ms,
                serialization_latency_ms = stats.serialization_latency_ms,
                verification_latency_ms = stats.verification_latency_ms,
                num_of_keys_fetched = stats.num_of_keys_fetched,
                status = ?stats.status,
                failure_unknown_error_count = stats.failure_unknown_error_count,
                failure_wrong_format_count = stats.failure_wrong_format_count,
                failure_signature_mismatch_count = stats.failure_signature_mismatch_count,
                "Signature verification stats"
            ),
            StatsEvent::SignalEncoding(stats) => info!(
                target: "adselect_telemetry",
                fetch_encoder_logic_latency_ms = stats.fetch_encoder_logic_latency_ms,
                encode_signals_latency_ms = stats.encode_signals_latency_ms,
                overall_latency_ms = stats.overall_latency_ms,
                encoded_payload_size_bytes = stats.encoded_payload_size_bytes,
                result_code = stats.result_code.code(),
                "Signal encoding stats"
            ),
        }
    }
}

/// Sink that collects records in memory, for tests.
pub struct CollectingSink {
    events: Mutex<Vec<StatsEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<StatsEvent> {
        self.events.lock().expect("sink poisoned").clone()
    }
}

impl Default for CollectingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSink for CollectingSink {
    fn record(&self, event: StatsEvent) {
        self.events.lock().expect("sink poisoned").push(event);
    }
}
