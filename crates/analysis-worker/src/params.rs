//! Engine parameters as entered by the user, clamped to supported ranges.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_THINK_TIME: f64 = 1.0;
pub const DEFAULT_THREADS: u32 = 1;
pub const DEFAULT_MULTIPV: u32 = 3;

const THINK_TIME_RANGE: (f64, f64) = (0.1, 60.0);
const THREADS_RANGE: (u32, u32) = (1, 8);
const MULTIPV_RANGE: (u32, u32) = (1, 8);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    /// Seconds per position
    pub think_time: f64,
    pub threads: u32,
    pub multipv: u32,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            think_time: DEFAULT_THINK_TIME,
            threads: DEFAULT_THREADS,
            multipv: DEFAULT_MULTIPV,
        }
    }
}

impl EngineParams {
    /// Parse raw inputs; anything unparsable falls back to the default
    /// before clamping.
    pub fn from_inputs(think_time: &str, threads: &str, multipv: &str) -> Self {
        Self {
            think_time: think_time
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|t| t.is_finite())
                .unwrap_or(DEFAULT_THINK_TIME),
            threads: parse_int(threads).unwrap_or(DEFAULT_THREADS as i64) as u32,
            multipv: parse_int(multipv).unwrap_or(DEFAULT_MULTIPV as i64) as u32,
        }
        .clamped()
    }

    pub fn clamped(self) -> Self {
        let think_time = if self.think_time.is_finite() {
            self.think_time
        } else {
            DEFAULT_THINK_TIME
        };
        Self {
            think_time: think_time.clamp(THINK_TIME_RANGE.0, THINK_TIME_RANGE.1),
            threads: self.threads.clamp(THREADS_RANGE.0, THREADS_RANGE.1),
            multipv: self.multipv.clamp(MULTIPV_RANGE.0, MULTIPV_RANGE.1),
        }
    }

    /// Think time as a `Duration`, clamped first so any stored value is safe.
    pub fn think_duration(&self) -> Duration {
        Duration::from_secs_f64(self.clamped().think_time)
    }
}

/// Integers are clamped into `u32` range before the caller clamps further.
fn parse_int(raw: &str) -> Option<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .map(|v| v.clamp(0, u32::MAX as i64))
}
