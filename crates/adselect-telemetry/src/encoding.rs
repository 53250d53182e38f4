//! Execution logger for the signal-encoding pipeline.
//!
//! Stage order: fetch encoder logic, encode signals.

use std::sync::Arc;

use adselect_core::error::Result;

use crate::clock::Clock;
use crate::sink::StatsSink;
use crate::stats::{ResultCode, SignalEncodingStats, StatsEvent};
use crate::tracker::StageTracker;

pub const FETCH_ENCODER_LOGIC: &str = "fetch_encoder_logic";
pub const ENCODE_SIGNALS: &str = "encode_signals";

const STAGES: &[&str] = &[FETCH_ENCODER_LOGIC, ENCODE_SIGNALS];

pub struct SignalEncodingLogger {
    tracker: StageTracker,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn StatsSink>,
    started_ms: i64,
    encoded_payload_size_bytes: i32,
}

impl SignalEncodingLogger {
    pub fn new(clock: Arc<dyn Clock>, sink: Arc<dyn StatsSink>) -> Self {
        let started_ms = clock.elapsed_ms();
        Self {
            tracker: StageTracker::new(STAGES),
            clock,
            sink,
            started_ms,
            encoded_payload_size_bytes: 0,
        }
    }

    pub fn start_fetch_encoder_logic(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(FETCH_ENCODER_LOGIC, now)
    }

    pub fn end_fetch_encoder_logic(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(FETCH_ENCODER_LOGIC, now)
    }

    pub fn start_encode_signals(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.start(ENCODE_SIGNALS, now)
    }

    pub fn end_encode_signals(&mut self) -> Result<()> {
        let now = self.clock.elapsed_ms();
        self.tracker.end(ENCODE_SIGNALS, now)
    }

    pub fn set_encoded_payload_size_bytes(&mut self, n: i32) {
        self.encoded_payload_size_bytes = n;
    }

    pub fn close(&mut self, result_code: ResultCode) -> Result<()> {
        self.tracker.close()?;
        let overall_latency_ms = self.clock.elapsed_ms() - self.started_ms;
        self.sink
            .record(StatsEvent::SignalEncoding(SignalEncodingStats {
                fetch_encoder_logic_latency_ms: self.tracker.latency_ms(FETCH_ENCODER_LOGIC),
                encode_signals_latency_ms: self.tracker.latency_ms(ENCODE_SIGNALS),
                overall_latency_ms,
                encoded_payload_size_bytes: self.encoded_payload_size_bytes,
                result_code,
            }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::StepClock;
    use crate::sink::CollectingSink;
    use adselect_core::error::AdSelectError;

    fn make_logger(readings: &[i64]) -> (SignalEncodingLogger, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        let clock = Arc::new(StepClock::new(readings));
        let logger = SignalEncodingLogger::new(clock, sink.clone());
        (logger, sink)
    }

    #[test]
    fn test_full_run() {
        let (mut logger, sink) = make_logger(&[0, 3, 9, 10, 45, 50]);
        logger.start_fetch_encoder_logic().unwrap();
        logger.end_fetch_encoder_logic().unwrap();
        logger.start_encode_signals().unwrap();
        logger.end_encode_signals().unwrap();
        logger.set_encoded_payload_size_bytes(2048);
        logger.close(ResultCode::Success).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            StatsEvent::SignalEncoding(stats) => {
                assert_eq!(stats.fetch_encoder_logic_latency_ms, 6);
                assert_eq!(stats.encode_signals_latency_ms, 35);
                assert_eq!(stats.overall_latency_ms, 50);
                assert_eq!(stats.encoded_payload_size_bytes, 2048);
            }
            other => panic!("Expected signal encoding stats, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_before_fetch_is_illegal_state() {
        let (mut logger, _sink) = make_logger(&[0, 3]);
        match logger.start_encode_signals() {
            Err(AdSelectError::IllegalState(msg)) => {
                assert!(msg.contains("missing start of fetch_encoder_logic"));
            }
            other => panic!("Expected IllegalState, got {:?}", other),
        }
    }

    #[test]
    fn test_close_twice_is_illegal_state() {
        let (mut logger, _sink) = make_logger(&[0]);
        logger.close(ResultCode::Success).unwrap();
        assert!(logger.close(ResultCode::Success).is_err());
    }
}
