//! FEC payload IDs for the RS8M and LDPC-Staircase schemes.
//!
//! Both schemes ride the same 8 byte payload ID carrying the block number,
//! the encoding symbol id and the block geometry.  Source packets get it as
//! a trailer after the protected RTP bytes (so the protected symbol is the
//! plain RTP packet), repair packets lead with it followed by the repair
//! symbol.
use byteorder::{ByteOrder, NetworkEndian};

use crate::common::status::Status;
use crate::packet::model::Packet;
use crate::packet::{Composer, Parser};

pub const FEC_PAYLOAD_ID_SIZE: usize = 8;

/// block position fields shared by source trailers and repair headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecPayloadId {
    pub block_id: u16,
    pub esi: u16,
    pub nbsrc: u16,
    pub nbrpr: u16,
}

impl FecPayloadId {
    pub fn write(&self, out: &mut [u8]) -> () {
        NetworkEndian::write_u16(&mut out[0..2], self.block_id);
        NetworkEndian::write_u16(&mut out[2..4], self.esi);
        NetworkEndian::write_u16(&mut out[4..6], self.nbsrc);
        NetworkEndian::write_u16(&mut out[6..8], self.nbrpr);
    }
    pub fn read(bytes: &[u8]) -> Result<FecPayloadId, Status> {
        if bytes.len() < FEC_PAYLOAD_ID_SIZE {
            return Err(Status::BadFormat);
        }
        let id = FecPayloadId {
            block_id: NetworkEndian::read_u16(&bytes[0..2]),
            esi: NetworkEndian::read_u16(&bytes[2..4]),
            nbsrc: NetworkEndian::read_u16(&bytes[4..6]),
            nbrpr: NetworkEndian::read_u16(&bytes[6..8]),
        };
        if id.nbsrc == 0 {
            return Err(Status::BadFormat);
        }
        Ok(id)
    }
}

/// wraps an inner composer so source packets pick up the trailer.
///
/// Repair packets have no inner protocol: their buffer is the payload ID
/// followed by the raw repair symbol.
pub struct FecComposer<C: Composer> {
    inner: C,
}

impl<C: Composer> FecComposer<C> {
    pub fn new(inner: C) -> FecComposer<C> {
        FecComposer { inner: inner }
    }
}

impl<C: Composer> Composer for FecComposer<C> {
    fn prepare(&self, packet: &mut Packet, payload_size: usize) -> Result<(), Status> {
        if packet.fec().map_or(false, |f| f.repair) {
            packet.buffer_mut().reserve(FEC_PAYLOAD_ID_SIZE + payload_size);
            packet.add_flags(Packet::PREPARED);
            return Ok(());
        }
        self.inner.prepare(packet, payload_size)
    }
    fn compose(&self, packet: &mut Packet) -> Result<(), Status> {
        let fec = match packet.fec() {
            Some(fec) => fec.clone(),
            None => return Err(Status::BadOperation),
        };
        let id = FecPayloadId {
            block_id: fec.block_id,
            esi: fec.esi,
            nbsrc: fec.nbsrc,
            nbrpr: fec.nbrpr,
        };
        if fec.repair {
            let buf = packet.buffer_mut();
            buf.clear();
            buf.resize(FEC_PAYLOAD_ID_SIZE + fec.payload.len(), 0);
            id.write(&mut buf[0..FEC_PAYLOAD_ID_SIZE]);
            buf[FEC_PAYLOAD_ID_SIZE..].copy_from_slice(&fec.payload);
            return Ok(());
        }
        self.inner.compose(packet)?;
        let buf = packet.buffer_mut();
        let at = buf.len();
        buf.resize(at + FEC_PAYLOAD_ID_SIZE, 0);
        id.write(&mut buf[at..]);
        Ok(())
    }
}

/// splits the payload ID off and hands the protected bytes to the inner parser
pub struct FecParser<P: Parser> {
    inner: P,
    repair: bool,
}

impl<P: Parser> FecParser<P> {
    /// parser for the source endpoint: trailer plus nested RTP
    pub fn new_source(inner: P) -> FecParser<P> {
        FecParser {
            inner: inner,
            repair: false,
        }
    }
    /// parser for the repair endpoint: header plus opaque symbol
    pub fn new_repair(inner: P) -> FecParser<P> {
        FecParser {
            inner: inner,
            repair: true,
        }
    }
}

impl<P: Parser> Parser for FecParser<P> {
    fn parse(&self, packet: &mut Packet, bytes: &[u8]) -> Result<(), Status> {
        if bytes.len() < FEC_PAYLOAD_ID_SIZE {
            return Err(Status::BadFormat);
        }
        if self.repair {
            let id = FecPayloadId::read(&bytes[0..FEC_PAYLOAD_ID_SIZE])?;
            let fec = packet.fec_mut();
            fec.block_id = id.block_id;
            fec.esi = id.esi;
            fec.nbsrc = id.nbsrc;
            fec.nbrpr = id.nbrpr;
            fec.repair = true;
            fec.payload = bytes[FEC_PAYLOAD_ID_SIZE..].to_vec();
            return Ok(());
        }
        let split = bytes.len() - FEC_PAYLOAD_ID_SIZE;
        let id = FecPayloadId::read(&bytes[split..])?;
        self.inner.parse(packet, &bytes[..split])?;
        // keep the protected bytes around, they are the FEC symbol the
        // block decoder works on
        let buf = packet.buffer_mut();
        buf.clear();
        buf.extend_from_slice(&bytes[..split]);
        let fec = packet.fec_mut();
        fec.block_id = id.block_id;
        fec.esi = id.esi;
        fec.nbsrc = id.nbsrc;
        fec.nbrpr = id.nbrpr;
        fec.repair = false;
        Ok(())
    }
}

#[cfg(test)]
mod test_fec_headers {
    use super::*;
    use crate::packet::rtp::{RtpComposer, RtpParser};

    #[test]
    fn payload_id_round_trip() {
        let id = FecPayloadId {
            block_id: 700,
            esi: 3,
            nbsrc: 10,
            nbrpr: 5,
        };
        let mut buf = [0u8; FEC_PAYLOAD_ID_SIZE];
        id.write(&mut buf);
        assert_eq!(FecPayloadId::read(&buf).unwrap(), id);
    }
    #[test]
    fn payload_id_rejects_empty_block() {
        // nbsrc of zero cannot describe a block
        let buf = [0u8; FEC_PAYLOAD_ID_SIZE];
        assert_eq!(FecPayloadId::read(&buf), Err(Status::BadFormat));
    }
    #[test]
    fn source_packet_round_trip() {
        // a source packet is RTP bytes plus the trailer
        let composer = FecComposer::new(RtpComposer::new());
        let mut packet = Packet::new();
        composer.prepare(&mut packet, 4).unwrap();
        {
            let rtp = packet.rtp_mut();
            rtp.seqnum = 7;
            rtp.stream_timestamp = 1000;
            rtp.payload.copy_from_slice(&[9, 9, 9, 9]);
        }
        {
            let fec = packet.fec_mut();
            fec.block_id = 42;
            fec.esi = 3;
            fec.nbsrc = 10;
            fec.nbrpr = 5;
        }
        composer.compose(&mut packet).unwrap();

        let parser = FecParser::new_source(RtpParser::new());
        let mut parsed = Packet::new();
        parser.parse(&mut parsed, packet.buffer()).unwrap();
        assert_eq!(parsed.rtp().unwrap().stream_timestamp, 1000);
        assert_eq!(parsed.rtp().unwrap().payload, vec![9, 9, 9, 9]);
        let fec = parsed.fec().unwrap();
        assert_eq!(fec.block_id, 42);
        assert_eq!(fec.esi, 3);
        assert!(!fec.repair);
    }
    #[test]
    fn repair_packet_round_trip() {
        let composer = FecComposer::new(RtpComposer::new());
        let mut packet = Packet::new();
        {
            let fec = packet.fec_mut();
            fec.block_id = 42;
            fec.esi = 12;
            fec.nbsrc = 10;
            fec.nbrpr = 5;
            fec.repair = true;
            fec.payload = vec![1, 2, 3];
        }
        composer.prepare(&mut packet, 3).unwrap();
        composer.compose(&mut packet).unwrap();
        assert_eq!(packet.buffer().len(), FEC_PAYLOAD_ID_SIZE + 3);

        let parser = FecParser::new_repair(RtpParser::new());
        let mut parsed = Packet::new();
        parser.parse(&mut parsed, packet.buffer()).unwrap();
        let fec = parsed.fec().unwrap();
        assert_eq!(fec.esi, 12);
        assert!(fec.repair);
        assert_eq!(fec.payload, vec![1, 2, 3]);
    }
    #[test]
    fn truncated_is_bad_format() {
        let parser = FecParser::new_repair(RtpParser::new());
        let mut parsed = Packet::new();
        assert_eq!(parser.parse(&mut parsed, &[1, 2, 3]), Err(Status::BadFormat));
    }
}
