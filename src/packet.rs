//! the typed packet and everything that reads, writes and serializes it.
use crate::common::status::Status;

pub mod encoding;
pub mod fec_headers;
pub mod interleaver;
pub mod model;
pub mod ordering;
pub mod queue;
pub mod rtcp;
pub mod rtp;
pub mod shipper;

use self::model::Packet;

/// pulls packets out of a queue or a decoding stage
pub trait PacketReader {
    /// take the next packet.  NoData means try again later.
    fn read(&mut self) -> Result<Packet, Status>;
}

/// pushes packets into a queue or the next pipeline stage
pub trait PacketWriter {
    fn write(&mut self, packet: Packet) -> Result<(), Status>;
}

/// reserves and serializes the wire representation of a packet.
///
/// Composers stack: an outer protocol may wrap an inner one, e.g. the FEC
/// composer wraps the RTP composer so source packets carry both layers.
pub trait Composer {
    /// reserve the buffer and mark the packet prepared for a payload this big
    fn prepare(&self, packet: &mut Packet, payload_size: usize) -> Result<(), Status>;
    /// serialize headers and payload into the packet buffer
    fn compose(&self, packet: &mut Packet) -> Result<(), Status>;
}

/// turns received bytes back into a typed packet.
///
/// Parsers must never panic on hostile input; anything inconsistent comes
/// back as BadFormat.
pub trait Parser {
    fn parse(&self, packet: &mut Packet, bytes: &[u8]) -> Result<(), Status>;
}
