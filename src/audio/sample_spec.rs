//! declares what a stream of samples looks like.
//!
//! Every component that has to convert between a number of samples and a
//! span of wall clock time goes through here, so there is exactly one place
//! where that arithmetic can go wrong.
use std::fmt;

use serde::{Deserialize, Serialize};

pub const NS_PER_SEC: i64 = 1_000_000_000;

/// sample rate plus channel layout.
///
/// A "sample" in conversation can mean one value or one value per channel.
/// The convention here follows the stream timestamp: durations count frames
/// per channel, and `_overall` variants count every interleaved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SampleSpec {
    rate: u32,
    channels: u16,
}

impl SampleSpec {
    pub fn new(rate: u32, channels: u16) -> SampleSpec {
        SampleSpec {
            rate: rate,
            channels: channels,
        }
    }
    pub fn rate(&self) -> u32 {
        self.rate
    }
    pub fn num_channels(&self) -> usize {
        self.channels as usize
    }
    /// duration of n per-channel samples in nanoseconds
    pub fn samples_per_chan_to_ns(&self, n: usize) -> i64 {
        (n as i64 * NS_PER_SEC) / self.rate as i64
    }
    /// duration of n interleaved samples in nanoseconds
    pub fn samples_overall_to_ns(&self, n: usize) -> i64 {
        self.samples_per_chan_to_ns(n / self.num_channels())
    }
    /// how many per-channel samples fit in a span of nanoseconds
    pub fn ns_to_samples_per_chan(&self, ns: i64) -> usize {
        ((ns * self.rate as i64) / NS_PER_SEC) as usize
    }
    /// interleaved count for a per-channel count
    pub fn overall(&self, samples_per_chan: usize) -> usize {
        samples_per_chan * self.num_channels()
    }
}

impl fmt::Display for SampleSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{ rate: {}, channels: {} }}", self.rate, self.channels)
    }
}
