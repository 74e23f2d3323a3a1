//! Fuzzer module - payload injection into HTTP request gaps
//!
//! A gap is a byte range of the raw request text. Each attempt splices one
//! payload per gap into the base request, sends it, and classifies the
//! response. Attack modes decide how gap payload lists are combined.

mod engine;
mod factory;
mod injector;
mod location;
mod payloads;
mod process;
mod processors;
mod results;
mod template;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{generate_combinations, AttackMode, Fuzzer, FuzzerConfig, FuzzerState};
pub use factory::FuzzProcessFactory;
pub use injector::{inject, splice, Spliced};
pub use location::{Combination, FuzzGap, FuzzGapSet, FuzzLocation};
pub use payloads::{Payload, PayloadKind, PayloadSet};
pub use process::{FuzzProcess, FuzzResult, FuzzResultState, FuzzerListener, ProcessState};
pub use processors::{AntiCsrfSynchronizer, MessagePreProcessor, ResultPostProcessor};
pub use results::{Entry, FuzzRecord, FuzzRecordGroup, FuzzResultsModel, STATUS_MIXED};
pub use template::{parse_marked_request, MarkedRequest, MARKER};

/// Fuzzer statistics
#[derive(Debug, Clone, Default)]
pub struct FuzzerStats {
    /// Processes that completed with a result
    pub requests_sent: usize,
    /// Processes not yet completed
    pub requests_remaining: usize,
    /// Requests per second
    pub requests_per_second: f64,
    /// Results classified as errors
    pub errors: usize,
    /// Results where a payload was reflected
    pub reflected_count: usize,
    /// Start time
    pub start_time: Option<std::time::Instant>,
    /// Elapsed time in milliseconds
    pub elapsed_ms: u64,
}

impl FuzzerStats {
    pub fn progress(&self) -> f64 {
        let total = self.requests_sent + self.requests_remaining;
        if total == 0 {
            0.0
        } else {
            self.requests_sent as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress() {
        let mut stats = FuzzerStats::default();
        assert_eq!(stats.progress(), 0.0);
        stats.requests_sent = 1;
        stats.requests_remaining = 3;
        assert_eq!(stats.progress(), 0.25);
    }
}
