//! Execution logger for the ad-filtering pipeline.
//!
//! Stage order: app-install filtering, frequency-cap filtering.

use std::sync::Arc;

use adselect_core::error::Result;

use crate::clock::Clock;
use crate::sink::StatsSink;
use crate::stats::{FilteringProcessStats, ResultCode, StatsEvent};
use crate::tracker::StageTracker;

pub const APP_INSTALL_FILTERING: &str = "app_install_filtering";
pub const FREQUENCY_CAP_FILTERING: &str = "frequency_cap_filtering";

const STAGES: &[&str] = &[APP_INSTALL_FILTERING, FREQUENCY_CAP_FILTERING];

pub struct FilteringExecutionLogger {
    tracker: StageTracker,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn StatsSink>,
    started_ms: i64,
    num_of_ads_filtered: i32,
    num_of_custom_audiences_filtered: i32,
}

impl FilteringExecutionLogger {
    pub fn new(clock: Arc<dyn Clock>, sink: Arc<dyn StatsSink>) -> Self {
        let started_ms = clock.elapsed_ms();
        Self {
            tracker: StageTracker::new(STAGES),
            clock,
            sink,
            started_ms,
            num_of_ads_filtered: 0,
            num_of_custom_audiences_filtered: 0,
        }
    }

    pub fn start_app_install_filtering(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(APP_INSTALL_FILTERING, now)
    }

    pub fn end_app_install_filtering(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(APP_INSTALL_FILTERING, now)
    }

    pub fn start_frequency_cap_filtering(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(FREQUENCY_CAP_FILTERING, now)
    }

    pub fn end_frequency_cap_filtering(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(FREQUENCY_CAP_FILTERING, now)
    }

    pub fn set_num_of_ads_filtered(&mut self, n: i32) {
        self.num_of_ads_filtered = n;
    }

    pub fn set_num_of_custom_audiences_filtered(&mut self, n: i32) {
        self.num_of_custom_audiences_filtered = n;
    }

    pub fn close(&mut self, result_code: ResultCode) -> Result<()> {
        self.tracker.close()?;
        let overall_latency_ms = self.clock.elapsed_ms() - self.started_ms;
        self.sink.record(StatsEvent::Filtering(FilteringProcessStats {
            app_install_filtering_latency_ms: self.tracker.latency_ms(APP_INSTALL_FILTERING),
            frequency_cap_filtering_latency_ms: self.tracker.latency_ms(FREQUENCY_CAP_FILTERING),
            overall_latency_ms,
            num_of_ads_filtered: self.num_of_ads_filtered,
            num_of_custom_audiences_filtered: self.num_of_custom_audiences_filtered,
            result_code,
        }));
        Ok(())
    }
}
