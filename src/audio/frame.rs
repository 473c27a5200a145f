//! a fixed block of interleaved samples moving through the pipeline.
//!
//! Frames only live for one pipeline tick.  Whoever reads one looks at the
//! flags to learn whether the samples are real audio, silence filled in for
//! a gap, or audio that sits next to a detected packet drop.
use std::fmt;

use crate::audio::sample_spec::SampleSpec;

/// block of interleaved samples plus capture time and flags
pub struct Frame {
    samples: Vec<f32>,
    flags: u8,
    capture_timestamp: i64,
}

impl Frame {
    /// frame contains at least some samples that did not come from silence fill
    pub const NOT_BLANK: u8 = 0x01;
    /// frame contains at least some silence filled in for missing packets
    pub const NOT_COMPLETE: u8 = 0x02;
    /// late packets were dropped while this frame was being built
    pub const PACKET_DROPS: u8 = 0x04;

    /// build a zeroed frame of the given overall (interleaved) size
    pub fn new(num_samples: usize) -> Frame {
        Frame {
            samples: vec![0.0; num_samples],
            flags: 0,
            capture_timestamp: 0,
        }
    }
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }
    pub fn flags(&self) -> u8 {
        self.flags
    }
    pub fn add_flags(&mut self, flags: u8) -> () {
        self.flags |= flags;
    }
    pub fn has_flags(&self, flags: u8) -> bool {
        self.flags & flags == flags
    }
    /// wipe samples, flags and capture time so the frame can be refilled
    pub fn clear(&mut self) -> () {
        for v in &mut self.samples {
            *v = 0.0;
        }
        self.flags = 0;
        self.capture_timestamp = 0;
    }
    /// nanoseconds when the first sample of this frame was captured, 0 if unknown
    pub fn capture_timestamp(&self) -> i64 {
        self.capture_timestamp
    }
    pub fn set_capture_timestamp(&mut self, ts: i64) -> () {
        self.capture_timestamp = ts;
    }
    /// duration in per-channel samples
    pub fn duration(&self, spec: &SampleSpec) -> usize {
        self.samples.len() / spec.num_channels()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ samples: {}, flags: {:#04x}, capture: {} }}",
            self.samples.len(),
            self.flags,
            self.capture_timestamp
        )
    }
}

/// something a frame can be pulled from (receiver side source)
pub trait FrameReader {
    fn read(&mut self, frame: &mut Frame) -> Result<(), crate::common::status::Status>;
}

/// something a frame can be pushed into (sender side sink)
pub trait FrameWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), crate::common::status::Status>;
}

#[cfg(test)]
mod test_frame {
    use super::*;

    #[test]
    fn build() {
        // You should get a zeroed frame with no flags
        let frame = Frame::new(256);
        assert_eq!(frame.num_samples(), 256);
        assert_eq!(frame.flags(), 0);
        assert_eq!(frame.capture_timestamp(), 0);
        assert!(frame.samples().iter().all(|v| *v == 0.0));
    }
    #[test]
    fn flags() {
        let mut frame = Frame::new(16);
        frame.add_flags(Frame::NOT_BLANK | Frame::PACKET_DROPS);
        assert!(frame.has_flags(Frame::NOT_BLANK));
        assert!(frame.has_flags(Frame::PACKET_DROPS));
        assert!(!frame.has_flags(Frame::NOT_COMPLETE));
    }
    #[test]
    fn duration() {
        let spec = SampleSpec::new(48000, 2);
        let frame = Frame::new(256);
        assert_eq!(frame.duration(&spec), 128);
    }
    #[test]
    fn clear() {
        let mut frame = Frame::new(4);
        frame.samples_mut()[0] = 0.5;
        frame.add_flags(Frame::NOT_BLANK);
        frame.set_capture_timestamp(1234);
        frame.clear();
        assert_eq!(frame.samples()[0], 0.0);
        assert_eq!(frame.flags(), 0);
        assert_eq!(frame.capture_timestamp(), 0);
    }
}
