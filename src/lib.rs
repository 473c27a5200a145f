//! rtstream - Real Time Stream library
//!
//! provides the core streaming pipeline that turns a live audio stream into
//! a loss tolerant packet flow and back.  The sender side chops frames into
//! RTP packets, protects them with FEC blocks and ships them out.  The
//! receiver side routes packets into per-sender sessions, repairs what the
//! network lost, and rebuilds a continuous sample stream with bounded latency.
//!
//! Device I/O, file codecs and the CLI front ends are NOT in here.  They sit
//! on the other side of the frame and packet queues.

pub mod audio;
pub mod common;
pub mod fec;
pub mod packet;
pub mod pipeline;
pub mod rtcp;
pub mod session;
pub mod utils;
