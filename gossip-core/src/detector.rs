//! Phi Accrual failure detector.
//!
//! Classifies a peer as alive or dead by how surprising the current gap
//! since its last heartbeat is, given the historical distribution of its
//! heartbeat inter-arrival times. Ported from the exponential-arrival
//! formulation in `txgossip.detector.FailureDetector`, not the normal-CDF
//! variant seen elsewhere in the wild — see [`FailureDetector::phi`].

use std::collections::VecDeque;

/// Samples are seeded with this inter-arrival value (seconds) on the very
/// first heartbeat, matching the 1 Hz heartbeat cadence and avoiding a
/// division by zero in `interval_mean`.
const SEED_INTERVAL: f64 = 0.75;

/// Hard cap on the inter-arrival sample window, per peer.
const MAX_SAMPLES: usize = 1000;

/// Accrual failure detector over one peer's heartbeat inter-arrival times.
///
/// Holds no timers of its own; `phi` is a pure function of the recorded
/// history and a caller-supplied `now`.
#[derive(Debug, Clone, Default)]
pub struct FailureDetector {
    last_arrival: Option<f64>,
    intervals: VecDeque<f64>,
}

impl FailureDetector {
    pub fn new() -> Self {
        FailureDetector {
            last_arrival: None,
            intervals: VecDeque::new(),
        }
    }

    /// Record a heartbeat arrival at `arrival_time` (seconds, same clock used
    /// by `phi`). The interval since the previous arrival is appended to the
    /// sliding window; the very first arrival seeds the window with
    /// [`SEED_INTERVAL`] instead of contributing a real interval.
    pub fn add(&mut self, arrival_time: f64) {
        let interval = match self.last_arrival {
            Some(last) => arrival_time - last,
            None => SEED_INTERVAL,
        };
        self.last_arrival = Some(arrival_time);

        self.intervals.push_back(interval);
        if self.intervals.len() > MAX_SAMPLES {
            self.intervals.pop_front();
        }

        tracing::trace!(interval, arrival_time, "failure detector recorded heartbeat");
    }

    /// Arithmetic mean of the recorded inter-arrival intervals.
    ///
    /// # Panics
    ///
    /// Panics if no interval has been recorded yet. Callers must check
    /// [`FailureDetector::has_samples`] (or rely on [`FailureDetector::phi`],
    /// which never calls this on an empty window).
    pub fn interval_mean(&self) -> f64 {
        self.intervals.iter().sum::<f64>() / self.intervals.len() as f64
    }

    pub fn has_samples(&self) -> bool {
        !self.intervals.is_empty()
    }

    /// Suspicion level at `now`. Returns `0.0` if no heartbeat has ever been
    /// recorded — this is deliberate: a freshly-created peer with zero phi is
    /// what keeps `PeerState::check_suspected` from marking it alive before
    /// its first heartbeat arrives.
    ///
    /// Computed as `-log10(e^(-t/mean))`, algebraically `(t/mean) / ln(10)`;
    /// the exponential form is kept rather than simplified so traces remain
    /// bit-identical to the reference implementation this was ported from.
    pub fn phi(&self, now: f64) -> f64 {
        let Some(last) = self.last_arrival else {
            return 0.0;
        };
        let t = now - last;
        let mean = self.interval_mean();
        let exponent = -t / mean;
        -(exponent.exp().log10())
    }
}
