//! bit exact RTP serialization per RFC 3550.
//!
//! The composer owns the prepare/compose half of a packet's life and the
//! parser owns the other.  Neither touches the `composed` flag; the stage
//! that calls compose (shipper or FEC writer) records it so composition can
//! never happen twice.
use byteorder::{ByteOrder, NetworkEndian};

use crate::common::status::Status;
use crate::packet::model::Packet;
use crate::packet::{Composer, Parser};

pub const RTP_VERSION: u8 = 2;
pub const RTP_HEADER_SIZE: usize = 12;

/// composes the fixed 12 byte header plus payload
pub struct RtpComposer;

impl RtpComposer {
    pub fn new() -> RtpComposer {
        RtpComposer
    }
}

impl Composer for RtpComposer {
    fn prepare(&self, packet: &mut Packet, payload_size: usize) -> Result<(), Status> {
        let rtp = packet.rtp_mut();
        rtp.payload = vec![0; payload_size];
        packet
            .buffer_mut()
            .reserve(RTP_HEADER_SIZE + payload_size);
        packet.add_flags(Packet::PREPARED);
        Ok(())
    }
    fn compose(&self, packet: &mut Packet) -> Result<(), Status> {
        let rtp = match packet.rtp() {
            Some(rtp) => rtp.clone(),
            None => return Err(Status::BadOperation),
        };
        let buf = packet.buffer_mut();
        buf.clear();
        buf.resize(RTP_HEADER_SIZE + rtp.payload.len(), 0);
        buf[0] = RTP_VERSION << 6;
        buf[1] = (rtp.payload_type & 0x7f) | if rtp.marker { 0x80 } else { 0 };
        NetworkEndian::write_u16(&mut buf[2..4], rtp.seqnum);
        NetworkEndian::write_u32(&mut buf[4..8], rtp.stream_timestamp);
        NetworkEndian::write_u32(&mut buf[8..12], rtp.source_id);
        buf[RTP_HEADER_SIZE..].copy_from_slice(&rtp.payload);
        Ok(())
    }
}

/// parses wire bytes into the rtp facet
pub struct RtpParser;

impl RtpParser {
    pub fn new() -> RtpParser {
        RtpParser
    }
}

impl Parser for RtpParser {
    fn parse(&self, packet: &mut Packet, bytes: &[u8]) -> Result<(), Status> {
        if bytes.len() < RTP_HEADER_SIZE {
            return Err(Status::BadFormat);
        }
        if bytes[0] >> 6 != RTP_VERSION {
            return Err(Status::BadFormat);
        }
        let has_padding = bytes[0] & 0x20 != 0;
        let has_extension = bytes[0] & 0x10 != 0;
        let csrc_count = (bytes[0] & 0x0f) as usize;

        let mut offset = RTP_HEADER_SIZE + csrc_count * 4;
        if offset > bytes.len() {
            return Err(Status::BadFormat);
        }
        if has_extension {
            if offset + 4 > bytes.len() {
                return Err(Status::BadFormat);
            }
            let ext_words = NetworkEndian::read_u16(&bytes[offset + 2..offset + 4]) as usize;
            offset += 4 + ext_words * 4;
            if offset > bytes.len() {
                return Err(Status::BadFormat);
            }
        }
        let mut end = bytes.len();
        if has_padding {
            let pad = bytes[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(Status::BadFormat);
            }
            end -= pad;
        }

        let rtp = packet.rtp_mut();
        rtp.marker = bytes[1] & 0x80 != 0;
        rtp.payload_type = bytes[1] & 0x7f;
        rtp.seqnum = NetworkEndian::read_u16(&bytes[2..4]);
        rtp.stream_timestamp = NetworkEndian::read_u32(&bytes[4..8]);
        rtp.source_id = NetworkEndian::read_u32(&bytes[8..12]);
        rtp.payload = bytes[offset..end].to_vec();
        Ok(())
    }
}
