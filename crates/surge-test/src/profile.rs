//! Seeded QoE figures for simulated reports

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

/// Ranges the simulated client figures are drawn from
#[derive(Clone, Debug)]
pub struct QoeProfile {
    /// Startup delay range (ms)
    pub startup_ms: (f64, f64),
    /// Bitrate range (kbps)
    pub bitrate_kbps: (f64, f64),
    /// Buffer events per client
    pub buffers: (f64, f64),
    /// Buffer time range (ms)
    pub buffer_time_ms: (f64, f64),
    /// Probability that a client fails
    pub failure_prob: f64,
}

impl QoeProfile {
    /// Healthy stream
    pub fn good() -> Self {
        QoeProfile {
            startup_ms: (400.0, 900.0),
            bitrate_kbps: (2500.0, 4500.0),
            buffers: (0.0, 0.5),
            buffer_time_ms: (0.0, 200.0),
            failure_prob: 0.0,
        }
    }

    /// Struggling stream
    pub fn degraded() -> Self {
        QoeProfile {
            startup_ms: (2000.0, 6000.0),
            bitrate_kbps: (300.0, 1200.0),
            buffers: (2.0, 6.0),
            buffer_time_ms: (1500.0, 8000.0),
            failure_prob: 0.1,
        }
    }
}

impl Default for QoeProfile {
    fn default() -> Self {
        Self::good()
    }
}

/// Produces `report` payloads from a [`QoeProfile`]
pub struct ReportGenerator {
    profile: QoeProfile,
    rng: StdRng,
    failures: u64,
}

impl ReportGenerator {
    pub fn with_seed(profile: QoeProfile, seed: u64) -> Self {
        ReportGenerator {
            profile,
            rng: StdRng::seed_from_u64(seed),
            failures: 0,
        }
    }

    fn sample(&mut self, (min, max): (f64, f64)) -> f64 {
        if max <= min {
            return min;
        }
        Uniform::new(min, max).sample(&mut self.rng)
    }

    /// Metrics for a node currently running `target` clients
    pub fn next_metrics(&mut self, target: u64) -> Value {
        let failed = (0..target)
            .filter(|_| self.rng.gen_bool(self.profile.failure_prob.clamp(0.0, 1.0)))
            .count() as u64;
        self.failures += failed;
        let connected = target - failed;

        json!({
            "connected": connected,
            "avgStartup": self.sample(self.profile.startup_ms),
            "avgBitrate": self.sample(self.profile.bitrate_kbps),
            "avgBuffers": self.sample(self.profile.buffers),
            "avgBufferTime": self.sample(self.profile.buffer_time_ms),
            "cpu": self.rng.gen_range(0.05..0.95),
            "mem": self.rng.gen_range(0.1..0.8),
            "clients": target,
            "failures": self.failures,
        })
    }
}
