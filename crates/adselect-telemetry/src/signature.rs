//! Execution logger for signature verification of signed contextual ads.
//!
//! Stage order: key fetch, serialization, verification. Failure-detail
//! counters are only meaningful on a failed run; a verified run purges them
//! before the record is emitted.

use std::sync::Arc;

use tracing::debug;

use adselect_core::error::Result;

use crate::clock::Clock;
use crate::sink::StatsSink;
use crate::stats::{SignatureVerificationStats, StatsEvent, VerificationStatus};
use crate::tracker::StageTracker;

pub const KEY_FETCH: &str = "key_fetch_for_signature_verification";
pub const SERIALIZATION: &str = "serialization_for_signature_verification";
pub const VERIFICATION: &str = "signature_verification";

const STAGES: &[&str] = &[KEY_FETCH, SERIALIZATION, VERIFICATION];

pub struct SignatureVerificationLogger {
    tracker: StageTracker,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn StatsSink>,
    num_of_keys_fetched: i32,
    failure_unknown_error_count: i32,
    failure_wrong_format_count: i32,
    failure_signature_mismatch_count: i32,
}

impl SignatureVerificationLogger {
    pub fn new(clock: Arc<dyn Clock>, sink: Arc<dyn StatsSink>) -> Self {
        Self {
            tracker: StageTracker::new(STAGES),
            clock,
            sink,
            num_of_keys_fetched: 0,
            failure_unknown_error_count: 0,
            failure_wrong_format_count: 0,
            failure_signature_mismatch_count: 0,
        }
    }

    pub fn start_key_fetch(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(KEY_FETCH, now)
    }

    pub fn end_key_fetch(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(KEY_FETCH, now)
    }

    pub fn start_serialization(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(SERIALIZATION, now)
    }

    pub fn end_serialization(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(SERIALIZATION, now)
    }

    pub fn start_verification(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(VERIFICATION, now)
    }

    pub fn end_verification(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(VERIFICATION, now)
    }

    pub fn set_num_of_keys_fetched(&mut self, n: i32) {
        self.num_of_keys_fetched = n;
    }

    pub fn add_failure_unknown_error(&mut self) {
        self.failure_unknown_error_count += 1;
    }

    pub fn add_failure_wrong_format(&mut self) {
        self.failure_wrong_format_count += 1;
    }

    pub fn add_failure_signature_mismatch(&mut self) {
        self.failure_signature_mismatch_count += 1;
    }

    /// Close the logger with the verification outcome and emit the record.
    pub fn close(&mut self, status: VerificationStatus) -> Result<()> {
        self.tracker.close()?;

        // Failure details accompany failures only.
        let (unknown, wrong_format, mismatch) = match status {
            VerificationStatus::Verified => {
                if self.failure_unknown_error_count > 0
                    || self.failure_wrong_format_count > 0
                    || self.failure_signature_mismatch_count > 0
                {
                    debug!("Purging failure details from a verified run");
                }
                (0, 0, 0)
            }
            VerificationStatus::VerificationFailed => (
                self.failure_unknown_error_count,
                self.failure_wrong_format_count,
                self.failure_signature_mismatch_count,
            ),
        };

        self.sink
            .record(StatsEvent::SignatureVerification(SignatureVerificationStats {
                key_fetch_latency_ms: self.tracker.latency_ms(KEY_FETCH),
                serialization_latency_ms: self.tracker.latency_ms(SERIALIZATION),
                verification_latency_ms: self.tracker.latency_ms(VERIFICATION),
                num_of_keys_fetched: self.num_of_keys_fetched,
                status,
                failure_unknown_error_count: unknown,
                failure_wrong_format_count: wrong_format,
                failure_signature_mismatch_count: mismatch,
            }));
        Ok(())
    }
}
