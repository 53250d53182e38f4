//! Execution logger for the scoring pipeline.
//!
//! Stage order: fetch scoring logic, fetch trusted scoring signals, score ads.

use std::sync::Arc;

use adselect_core::error::Result;

use crate::clock::Clock;
use crate::sink::StatsSink;
use crate::stats::{ResultCode, ScoringProcessStats, StatsEvent};
use crate::tracker::StageTracker;

pub const FETCH_SCORING_LOGIC: &str = "fetch_scoring_logic";
pub const FETCH_TRUSTED_SCORING_SIGNALS: &str = "fetch_trusted_scoring_signals";
pub const SCORE_ADS: &str = "score_ads";

const STAGES: &[&str] = &[
    FETCH_SCORING_LOGIC,
    FETCH_TRUSTED_SCORING_SIGNALS,
    SCORE_ADS,
];

pub struct ScoringExecutionLogger {
    tracker: StageTracker,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn StatsSink>,
    started_ms: i64,
    num_of_ads_scored: i32,
}

impl ScoringExecutionLogger {
    pub fn new(clock: Arc<dyn Clock>, sink: Arc<dyn StatsSink>) -> Self {
        let started_ms = clock.elapsed_ms();
        Self {
            tracker: StageTracker::new(STAGES),
            clock,
            sink,
            started_ms,
            num_of_ads_scored: 0,
        }
    }

    pub fn start_fetch_scoring_logic(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(FETCH_SCORING_LOGIC, now)
    }

    pub fn end_fetch_scoring_logic(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(FETCH_SCORING_LOGIC, now)
    }

    pub fn start_fetch_trusted_scoring_signals(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(FETCH_TRUSTED_SCORING_SIGNALS, now)
    }

    pub fn end_fetch_trusted_scoring_signals(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(FETCH_TRUSTED_SCORING_SIGNALS, now)
    }

    pub fn start_score_ads(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(SCORE_ADS, now)
    }

    pub fn end_score_ads(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(SCORE_ADS, now)
    }

    pub fn set_num_of_ads_scored(&mut self, n: i32) {
        self.num_of_ads_scored = n;
    }

    pub fn close(&mut self, result_code: ResultCode) -> Result<()> {
        self.tracker.close()?;
        let overall_latency_ms = self.clock.elapsed_ms() - self.started_ms;
        self.sink.record(StatsEvent::Scoring(ScoringProcessStats {
            fetch_scoring_logic_latency_ms: self.tracker.latency_ms(FETCH_SCORING_LOGIC),
            fetch_trusted_scoring_signals_latency_ms: self
                .tracker
                .latency_ms(FETCH_TRUSTED_SCORING_SIGNALS),
            score_ads_latency_ms: self.tracker.latency_ms(SCORE_ADS),
            overall_latency_ms,
            num_of_ads_scored: self.num_of_ads_scored,
            result_code,
        }));
        Ok(())
    }
}
