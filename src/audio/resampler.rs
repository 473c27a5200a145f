//! variable ratio resampler driven by the latency tuner.
//!
//! The base ratio maps the packet stream rate to the local playout rate,
//! and the tuner nudges a scaling factor around 1.0 to soak up clock drift
//! between sender and receiver.  The builtin backend interpolates with a
//! Catmull-Rom cubic (or linear on the low profile); the speex names are
//! accepted for config compatibility and resolve to builtin when the crate
//! is built without them.
use log::{info, warn};

use serde::{Deserialize, Serialize};

use crate::audio::sample_spec::SampleSpec;

/// hard clamp on the tuner's scaling input
const MIN_SCALING: f64 = 0.5;
const MAX_SCALING: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ResamplerBackend {
    /// resolved to a concrete backend at construction time
    Default,
    Builtin,
    Speex,
    SpeexDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ResamplerProfile {
    Low,
    Medium,
    High,
}

/// pick the backend that will actually run
pub fn select_backend(requested: ResamplerBackend) -> ResamplerBackend {
    match requested {
        ResamplerBackend::Default => {
            info!("resampler: default backend resolved to builtin");
            ResamplerBackend::Builtin
        }
        ResamplerBackend::Builtin => ResamplerBackend::Builtin,
        ResamplerBackend::Speex | ResamplerBackend::SpeexDec => {
            warn!("resampler: speex backend not built in, falling back to builtin");
            ResamplerBackend::Builtin
        }
    }
}

pub struct Resampler {
    n_ch: usize,
    /// out_rate / in_rate
    base_ratio: f64,
    scaling: f64,
    profile: ResamplerProfile,
    /// interleaved input frames, first frame kept as interpolation history
    buffer: Vec<f32>,
    /// fractional read position in frames, relative to buffer start
    pos: f64,
}

impl Resampler {
    pub fn new(
        backend: ResamplerBackend,
        profile: ResamplerProfile,
        in_spec: SampleSpec,
        out_spec: SampleSpec,
    ) -> Resampler {
        let _ = select_backend(backend);
        Resampler {
            n_ch: in_spec.num_channels(),
            base_ratio: out_spec.rate() as f64 / in_spec.rate() as f64,
            scaling: 1.0,
            profile: profile,
            buffer: Vec::new(),
            pos: 0.0,
        }
    }
    pub fn scaling(&self) -> f64 {
        self.scaling
    }
    /// tuner entry point, silently clamped to something sane
    pub fn set_scaling(&mut self, scaling: f64) -> () {
        self.scaling = scaling.clamp(MIN_SCALING, MAX_SCALING);
    }
    /// input frames consumed per output frame
    fn step(&self) -> f64 {
        1.0 / (self.base_ratio * self.scaling)
    }
    /// how many per-channel input samples to feed for this much output
    pub fn needed_input(&self, out_per_chan: usize) -> usize {
        let frames_buffered = (self.buffer.len() / self.n_ch.max(1)) as f64;
        let need = self.pos + out_per_chan as f64 * self.step() + 3.0 - frames_buffered;
        if need <= 0.0 {
            0
        } else {
            need.ceil() as usize
        }
    }
    pub fn write_input(&mut self, samples: &[f32]) -> () {
        self.buffer.extend_from_slice(samples);
    }

    fn frame_at(&self, idx: i64, chan: usize) -> f32 {
        // clamp at the edges so startup and tail stay stable
        let frames = (self.buffer.len() / self.n_ch) as i64;
        let idx = idx.clamp(0, frames - 1);
        self.buffer[idx as usize * self.n_ch + chan]
    }

    /// produce interleaved output, returns per-channel frames written
    pub fn read_output(&mut self, out: &mut [f32]) -> usize {
        if self.n_ch == 0 || self.buffer.len() < self.n_ch {
            return 0;
        }
        let frames_buffered = (self.buffer.len() / self.n_ch) as i64;
        let out_frames = out.len() / self.n_ch;
        let step = self.step();
        let mut produced = 0;
        for k in 0..out_frames {
            let pos = self.pos + k as f64 * step;
            let ipos = pos.floor() as i64;
            // cubic needs one frame behind and two ahead
            if ipos + 2 >= frames_buffered {
                break;
            }
            let t = pos - ipos as f64;
            for c in 0..self.n_ch {
                out[k * self.n_ch + c] = match self.profile {
                    ResamplerProfile::Low => {
                        // linear is fine for the cheap profile
                        let a = self.frame_at(ipos, c);
                        let b = self.frame_at(ipos + 1, c);
                        (a as f64 + (b as f64 - a as f64) * t) as f32
                    }
                    _ => {
                        let p0 = self.frame_at(ipos - 1, c) as f64;
                        let p1 = self.frame_at(ipos, c) as f64;
                        let p2 = self.frame_at(ipos + 1, c) as f64;
                        let p3 = self.frame_at(ipos + 2, c) as f64;
                        let t2 = t * t;
                        let t3 = t2 * t;
                        (0.5
                            * (2.0 * p1
                                + (p2 - p0) * t
                                + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
                                + (3.0 * p1 - p0 - 3.0 * p2 + p3) * t3))
                            as f32
                    }
                };
            }
            produced += 1;
        }
        self.pos += produced as f64 * step;
        // drop fully consumed frames, keep one frame of history
        let drop_frames = (self.pos.floor() as i64 - 1).max(0);
        if drop_frames > 0 {
            self.buffer.drain(..drop_frames as usize * self.n_ch);
            self.pos -= drop_frames as f64;
        }
        produced
    }
}
