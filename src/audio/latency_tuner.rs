//! watches the queue depth and steers the resampler.
//!
//! The receiver cannot change how fast the sender's clock runs, but it can
//! play slightly faster or slower.  The tuner smooths the number of samples
//! sitting in the pipeline (the "niq" signal), compares it against the
//! target latency, and runs a small PI loop whose output multiplies the
//! resampler ratio.  Profiles trade convergence speed against audibility.
use log::warn;

use serde::{Deserialize, Serialize};

use crate::audio::sample_spec::SampleSpec;
use crate::common::stream_stats::MicroTimer;
use crate::utils::get_coef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LatencyProfile {
    /// fast convergence, small pitch wobble allowed
    Responsive,
    /// slow imperceptible correction
    Gradual,
    /// monitor only, the peer side runs the tuning
    Intact,
}

/// the only latency signal backend there is right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LatencyBackend {
    /// number of incoming queued samples
    Niq,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct LatencyConfig {
    pub profile: LatencyProfile,
    pub backend: LatencyBackend,
    pub target_latency_ns: i64,
    pub min_latency_ns: i64,
    pub max_latency_ns: i64,
}

impl Default for LatencyConfig {
    fn default() -> LatencyConfig {
        LatencyConfig {
            profile: LatencyProfile::Gradual,
            backend: LatencyBackend::Niq,
            target_latency_ns: 200_000_000,
            min_latency_ns: 20_000_000,
            max_latency_ns: 1_000_000_000,
        }
    }
}

// how long latency may sit outside the bounds before we complain
const GRACE_US: u128 = 2_000_000;

struct ProfileGains {
    kp: f64,
    ki: f64,
    max_delta: f64,
}

fn gains(profile: LatencyProfile) -> ProfileGains {
    match profile {
        LatencyProfile::Responsive => ProfileGains {
            kp: 5e-3,
            ki: 1e-4,
            max_delta: 0.01,
        },
        LatencyProfile::Gradual => ProfileGains {
            kp: 1e-3,
            ki: 2e-5,
            max_delta: 0.003,
        },
        LatencyProfile::Intact => ProfileGains {
            kp: 0.0,
            ki: 0.0,
            max_delta: 0.0,
        },
    }
}

pub struct LatencyTuner {
    config: LatencyConfig,
    spec: SampleSpec,
    target_samples: f64,
    min_samples: f64,
    max_samples: f64,

    smoothing_coef: f64,
    smoothed_depth: f64,
    primed: bool,
    integrator: f64,
    scaling: f64,

    violation_timer: Option<MicroTimer>,
    violations: usize,
    e2e_latency_ns: i64,
}

impl LatencyTuner {
    pub fn new(config: LatencyConfig, spec: SampleSpec) -> LatencyTuner {
        LatencyTuner {
            config: config,
            spec: spec,
            target_samples: spec.ns_to_samples_per_chan(config.target_latency_ns) as f64,
            min_samples: spec.ns_to_samples_per_chan(config.min_latency_ns) as f64,
            max_samples: spec.ns_to_samples_per_chan(config.max_latency_ns) as f64,
            // depth updates come once per refresh tick, ballpark 100Hz
            smoothing_coef: get_coef(0.5, 100.0f64).min(1.0),
            smoothed_depth: 0.0,
            primed: false,
            integrator: 0.0,
            scaling: 1.0,
            violation_timer: None,
            violations: 0,
            e2e_latency_ns: 0,
        }
    }
    /// the factor the resampler should use; None when profile is Intact
    pub fn scaling(&self) -> Option<f64> {
        match self.config.profile {
            LatencyProfile::Intact => None,
            _ => Some(self.scaling),
        }
    }
    pub fn smoothed_depth(&self) -> f64 {
        self.smoothed_depth
    }
    /// bound violations that outlived the grace period
    pub fn violations(&self) -> usize {
        self.violations
    }
    /// RTT-derived end to end latency reported by the control loop
    pub fn report_e2e_latency(&mut self, latency_ns: i64) -> () {
        self.e2e_latency_ns = latency_ns;
    }
    pub fn e2e_latency_ns(&self) -> i64 {
        self.e2e_latency_ns
    }
    pub fn target_latency_ns(&self) -> i64 {
        self.config.target_latency_ns
    }
    /// current queue depth converted back to nanoseconds
    pub fn current_latency_ns(&self) -> i64 {
        self.spec.samples_per_chan_to_ns(self.smoothed_depth as usize)
    }

    /// feed one queue depth observation, in per-channel samples
    pub fn update(&mut self, queued_samples: usize, now_us: u128) -> () {
        let depth = queued_samples as f64;
        if !self.primed {
            self.smoothed_depth = depth;
            self.primed = true;
        } else {
            self.smoothed_depth = depth * self.smoothing_coef
                + (1.0 - self.smoothing_coef) * self.smoothed_depth;
        }

        self.check_bounds(now_us);

        let g = gains(self.config.profile);
        if g.max_delta == 0.0 {
            return;
        }
        // positive error: queue too deep, play faster to drain it
        let err = (self.smoothed_depth - self.target_samples) / self.target_samples;
        self.integrator = (self.integrator + err).clamp(-100.0, 100.0);
        self.scaling =
            (1.0 + g.kp * err + g.ki * self.integrator).clamp(1.0 - g.max_delta, 1.0 + g.max_delta);
    }

    fn check_bounds(&mut self, now_us: u128) -> () {
        let out_of_bounds =
            self.smoothed_depth < self.min_samples || self.smoothed_depth > self.max_samples;
        if !out_of_bounds {
            self.violation_timer = None;
            return;
        }
        match &self.violation_timer {
            None => {
                self.violation_timer = Some(MicroTimer::new(now_us, GRACE_US));
            }
            Some(timer) => {
                if timer.expired(now_us) {
                    self.violations += 1;
                    warn!(
                        "latency tuner: depth {:.0} samples outside [{:.0}, {:.0}] past grace period",
                        self.smoothed_depth, self.min_samples, self.max_samples
                    );
                    self.violation_timer = Some(MicroTimer::new(now_us, GRACE_US));
                }
            }
        }
    }
}
