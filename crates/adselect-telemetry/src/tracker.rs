//! Stage state machine shared by the execution loggers.
//!
//! A tracker is constructed with the ordered stage list of one pipeline.
//! Every `start`/`end` call is validated against an explicit state enum;
//! any call that does not match the current state fails with an
//! `IllegalState` error carrying a stage-specific message. Misuse is fatal
//! to the logger instance and never corrupts the latencies already taken.

use adselect_core::error::{AdSelectError, Result};

/// Sentinel latency for a stage whose start/end pair never completed.
pub const LATENCY_UNAVAILABLE: i64 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrackerState {
    /// No stage started yet.
    Idle,
    /// Stage at this index is in flight.
    InStage(usize),
    /// Stage at this index has ended; the next one may start.
    AfterStage(usize),
    /// Terminal.
    Closed,
}

/// Single-use, single-threaded stage tracker.
pub struct StageTracker {
    stages: &'static [&'static str],
    state: TrackerState,
    start_ms: Vec<Option<i64>>,
    end_ms: Vec<Option<i64>>,
}

impl StageTracker {
    pub fn new(stages: &'static [&'static str]) -> Self {
        Self {
            stages,
            state: TrackerState::Idle,
            start_ms: vec![None; stages.len()],
            end_ms: vec![None; stages.len()],
        }
    }

    /// Record the start of a stage at the given clock reading.
    ///
    /// Valid only for the first stage from the idle state, or for the stage
    /// immediately following the last ended one.
    pub fn start(&mut self, stage: &str, now_ms: i64) -> Result<()> {
        let index = self.index_of(stage)?;
        match self.state {
            TrackerState::Closed => Err(illegal_state(ALREADY_CLOSED.to_string())),
            TrackerState::InStage(current) if index <= current => {
                Err(illegal_state(repeated_start(stage)))
            }
            TrackerState::InStage(current) => {
                Err(illegal_state(missing_end(self.stages[current])))
            }
            TrackerState::Idle if index == 0 => {
                self.start_ms[index] = Some(now_ms);
                self.state = TrackerState::InStage(index);
                Ok(())
            }
            TrackerState::Idle => Err(illegal_state(missing_start(self.stages[0]))),
            TrackerState::AfterStage(last) if index == last + 1 => {
                self.start_ms[index] = Some(now_ms);
                self.state = TrackerState::InStage(index);
                Ok(())
            }
            TrackerState::AfterStage(last) if index <= last => {
                Err(illegal_state(repeated_start(stage)))
            }
            TrackerState::AfterStage(last) => {
                Err(illegal_state(missing_start(self.stages[last + 1])))
            }
        }
    }

    /// Record the end of a stage at the given clock reading.
    ///
    /// Valid only for the stage currently in flight.
    pub fn end(&mut self, stage: &str, now_ms: i64) -> Result<()> {
        let index = self.index_of(stage)?;
        match self.state {
            TrackerState::Closed => Err(illegal_state(ALREADY_CLOSED.to_string())),
            TrackerState::InStage(current) if current == index => {
                self.end_ms[index] = Some(now_ms);
                self.state = TrackerState::AfterStage(index);
                Ok(())
            }
            TrackerState::InStage(current) if index < current => {
                Err(illegal_state(repeated_end(stage)))
            }
            TrackerState::InStage(_) => Err(illegal_state(missing_start(stage))),
            TrackerState::AfterStage(last) if index <= last => {
                Err(illegal_state(repeated_end(stage)))
            }
            _ => Err(illegal_state(missing_start(stage))),
        }
    }

    /// Transition to the terminal state. A second close is an error; the
    /// pipeline may close from any non-terminal state (early failure leaves
    /// later stages with the unavailable sentinel).
    pub fn close(&mut self) -> Result<()> {
        if self.state == TrackerState::Closed {
            return Err(illegal_state(REPEATED_CLOSE.to_string()));
        }
        self.state = TrackerState::Closed;
        Ok(())
    }

    /// Latency of a completed stage, or [`LATENCY_UNAVAILABLE`] when its
    /// start/end pair never completed.
    pub fn latency_ms(&self, stage: &str) -> i64 {
        let Some(index) = self.stages.iter().position(|s| *s == stage) else {
            return LATENCY_UNAVAILABLE;
        };
        match (self.start_ms[index], self.end_ms[index]) {
            (Some(start), Some(end)) => end - start,
            _ => LATENCY_UNAVAILABLE,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == TrackerState::Closed
    }

    fn index_of(&self, stage: &str) -> Result<usize> {
        self.stages
            .iter()
            .position(|s| *s == stage)
            .ok_or_else(|| illegal_state(format!("unknown stage {}", stage)))
    }
}

pub(crate) const ALREADY_CLOSED: &str = "logger already closed";
pub(crate) const REPEATED_CLOSE: &str = "repeated close of logger";

pub(crate) fn missing_start(stage: &str) -> String {
    format!("missing start of {}", stage)
}

pub(crate) fn repeated_start(stage: &str) -> String {
    format!("repeated start of {}", stage)
}

pub(crate) fn missing_end(stage: &str) -> String {
    format!("missing end of {}", stage)
}

pub(crate) fn repeated_end(stage: &str) -> String {
    format!("repeated end of {}", stage)
}

fn illegal_state(message: String) -> AdSelectError {
    AdSelectError::IllegalState(message)
}
