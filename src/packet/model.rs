//! the typed packet that moves through both pipelines.
//!
//! A packet is an owned object made of optional facets.  A parsed RTP
//! packet has the rtp facet, a packet headed for the wire picks up the udp
//! facet from the shipper, FEC adds its own, and RTCP packets carry just
//! the rtcp facet.  Flags say which facets are live and how far along the
//! prepare/compose protocol the packet is.
use std::fmt;
use std::net::SocketAddr;

/// RTP facet: media header fields plus the decoded payload bytes
#[derive(Debug, Clone, Default)]
pub struct RtpFacet {
    pub source_id: u32,
    pub seqnum: u16,
    pub stream_timestamp: u32,
    /// nanoseconds when the first sample was captured, 0 means unknown
    pub capture_timestamp: i64,
    /// per-channel samples covered by this packet
    pub duration: u32,
    pub payload_type: u8,
    pub marker: bool,
    pub payload: Vec<u8>,
}

/// UDP facet: where the packet came from or where it goes
#[derive(Debug, Clone, Default)]
pub struct UdpFacet {
    pub src_addr: Option<SocketAddr>,
    pub dst_addr: Option<SocketAddr>,
}

/// FEC facet: position of this packet inside its recovery block
#[derive(Debug, Clone, Default)]
pub struct FecFacet {
    /// source block number, wraps at 16 bits
    pub block_id: u16,
    /// encoding symbol id: index within the block, repair symbols come after source
    pub esi: u16,
    /// number of source packets in the block
    pub nbsrc: u16,
    /// number of repair packets in the block
    pub nbrpr: u16,
    pub repair: bool,
    /// repair symbol bytes (repair packets only, source bytes live in the buffer)
    pub payload: Vec<u8>,
}

/// RTCP facet: raw compound payload, parsed further by the rtcp module
#[derive(Debug, Clone, Default)]
pub struct RtcpFacet {
    pub payload: Vec<u8>,
}

/// packet with optional facets, flags and the composed wire bytes
#[derive(Debug, Default)]
pub struct Packet {
    flags: u8,
    buffer: Vec<u8>,
    rtp: Option<RtpFacet>,
    udp: Option<UdpFacet>,
    fec: Option<FecFacet>,
    rtcp: Option<RtcpFacet>,
}

impl Packet {
    /// buffer space reserved, header fields may be filled in
    pub const PREPARED: u8 = 0x01;
    /// wire bytes serialized into the buffer, must happen exactly once
    pub const COMPOSED: u8 = 0x02;
    pub const RTP: u8 = 0x04;
    pub const UDP: u8 = 0x08;
    pub const FEC: u8 = 0x10;
    pub const RTCP: u8 = 0x20;
    /// packet was reconstructed by the FEC decoder, not received
    pub const RESTORED: u8 = 0x40;

    pub fn new() -> Packet {
        Packet::default()
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

    pub fn rtp(&self) -> Option<&RtpFacet> {
        self.rtp.as_ref()
    }
    pub fn rtp_mut(&mut self) -> &mut RtpFacet {
        if self.rtp.is_none() {
            self.rtp = Some(RtpFacet::default());
            self.flags |= Packet::RTP;
        }
        self.rtp.as_mut().unwrap()
    }
    pub fn udp(&self) -> Option<&UdpFacet> {
        self.udp.as_ref()
    }
    pub fn udp_mut(&mut self) -> &mut UdpFacet {
        if self.udp.is_none() {
            self.udp = Some(UdpFacet::default());
            self.flags |= Packet::UDP;
        }
        self.udp.as_mut().unwrap()
    }
    pub fn fec(&self) -> Option<&FecFacet> {
        self.fec.as_ref()
    }
    pub fn fec_mut(&mut self) -> &mut FecFacet {
        if self.fec.is_none() {
            self.fec = Some(FecFacet::default());
            self.flags |= Packet::FEC;
        }
        self.fec.as_mut().unwrap()
    }
    pub fn rtcp(&self) -> Option<&RtcpFacet> {
        self.rtcp.as_ref()
    }
    pub fn rtcp_mut(&mut self) -> &mut RtcpFacet {
        if self.rtcp.is_none() {
            self.rtcp = Some(RtcpFacet::default());
            self.flags |= Packet::RTCP;
        }
        self.rtcp.as_mut().unwrap()
    }

    /// composed wire bytes
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    /// stream timestamp of this packet, 0 for packets with no rtp facet
    pub fn stream_timestamp(&self) -> u32 {
        match &self.rtp {
            Some(rtp) => rtp.stream_timestamp,
            None => 0,
        }
    }
    /// stream timestamp one past the last sample this packet covers
    pub fn end_timestamp(&self) -> u32 {
        match &self.rtp {
            Some(rtp) => rtp.stream_timestamp.wrapping_add(rtp.duration),
            None => 0,
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.rtp {
            Some(rtp) => write!(
                f,
                "{{ flags: {:#04x}, src: {}, seq: {}, ts: {}, dur: {} }}",
                self.flags, rtp.source_id, rtp.seqnum, rtp.stream_timestamp, rtp.duration
            ),
            None => write!(f, "{{ flags: {:#04x}, bytes: {} }}", self.flags, self.buffer.len()),
        }
    }
}
