//! components that turn packets back into a continuous sample stream and
//! frames into packets.
//!
//! Everything in here works on interleaved f32 samples.  The wire formats
//! live under [`crate::packet`] and the FEC codecs under [`crate::fec`].
pub mod depacketizer;
pub mod frame;
pub mod latency_tuner;
pub mod mapper;
pub mod mixer;
pub mod packetizer;
pub mod pcm;
pub mod resampler;
pub mod sample_spec;
pub mod watchdog;
