//! Execution logger for the per-buyer bidding pipeline.
//!
//! Stage order: fetch buyer decision logic, fetch trusted bidding signals,
//! generate bids. One record is emitted at close; counters that do not
//! apply to the active process type are forced to zero rather than trusted
//! from the caller.

use std::sync::Arc;

use tracing::debug;

use adselect_core::error::Result;

use crate::clock::Clock;
use crate::sink::StatsSink;
use crate::stats::{BiddingProcessStats, BiddingProcessType, ResultCode, StatsEvent};
use crate::tracker::StageTracker;

pub const FETCH_BUYER_DECISION_LOGIC: &str = "fetch_buyer_decision_logic";
pub const FETCH_TRUSTED_BIDDING_SIGNALS: &str = "fetch_trusted_bidding_signals";
pub const GENERATE_BIDS: &str = "generate_bids";

const STAGES: &[&str] = &[
    FETCH_BUYER_DECISION_LOGIC,
    FETCH_TRUSTED_BIDDING_SIGNALS,
    GENERATE_BIDS,
];

/// Single-use latency accumulator for one bidding run.
pub struct BiddingExecutionLogger {
    tracker: StageTracker,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn StatsSink>,
    process_type: BiddingProcessType,
    started_ms: i64,
    num_of_ads_for_bidding: i32,
    num_of_custom_audiences: i32,
    num_of_contextual_ads: i32,
}

impl BiddingExecutionLogger {
    pub fn new(
        process_type: BiddingProcessType,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn StatsSink>,
    ) -> Self {
        let started_ms = clock.elapsed_ms();
        debug!(?process_type, "Bidding execution logger started");
        Self {
            tracker: StageTracker::new(STAGES),
            clock,
            sink,
            process_type,
            started_ms,
            num_of_ads_for_bidding: 0,
            num_of_custom_audiences: 0,
            num_of_contextual_ads: 0,
        }
    }

    pub fn start_fetch_buyer_decision_logic(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(FETCH_BUYER_DECISION_LOGIC, now)
    }

    pub fn end_fetch_buyer_decision_logic(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(FETCH_BUYER_DECISION_LOGIC, now)
    }

    pub fn start_fetch_trusted_bidding_signals(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(FETCH_TRUSTED_BIDDING_SIGNALS, now)
    }

    pub fn end_fetch_trusted_bidding_signals(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(FETCH_TRUSTED_BIDDING_SIGNALS, now)
    }

    pub fn start_generate_bids(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(GENERATE_BIDS, now)
    }

    pub fn end_generate_bids(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(GENERATE_BIDS, now)
    }

    pub fn set_num_of_ads_for_bidding(&mut self, n: i32) {
        self.num_of_ads_for_bidding = n;
    }

    pub fn set_num_of_custom_audiences(&mut self, n: i32) {
        self.num_of_custom_audiences = n;
    }

    pub fn set_num_of_contextual_ads(&mut self, n: i32) {
        self.num_of_contextual_ads = n;
    }

    /// Close the logger and emit its stats record. Terminal: a second close
    /// is an illegal-state error and emits nothing.
    pub fn close(&mut self, result_code: ResultCode) -> Result<()> {
        self.tracker.close()?;
        let overall_latency_ms = self.clock.elapsed_ms() - self.started_ms;

        // Counters outside the active process type are discarded, not
        // trusted from the caller.
        let (num_of_ads_for_bidding, num_of_custom_audiences, num_of_contextual_ads) =
            match self.process_type {
                BiddingProcessType::CustomAudience => {
                    (self.num_of_ads_for_bidding, self.num_of_custom_audiences, 0)
                }
                BiddingProcessType::Contextual => (0, 0, self.num_of_contextual_ads),
            };

        self.sink.record(StatsEvent::Bidding(BiddingProcessStats {
            process_type: self.process_type,
            fetch_decision_logic_latency_ms: self.tracker.latency_ms(FETCH_BUYER_DECISION_LOGIC),
            fetch_trusted_signals_latency_ms: self
                .tracker
                .latency_ms(FETCH_TRUSTED_BIDDING_SIGNALS),
            generate_bids_latency_ms: self.tracker.latency_ms(GENERATE_BIDS),
            overall_latency_ms,
            num_of_ads_for_bidding,
            num_of_custom_audiences,
            num_of_contextual_ads,
            result_code,
        }));
        Ok(())
    }
}
