//! sender side of the FEC engine.
//!
//! Source packets stream through and get stamped with their block position,
//! composed, and captured as symbols.  Once a block's worth has gone by,
//! the codec derives the repair packets and they follow the sources out the
//! same door.
use log::warn;

use crate::common::status::Status;
use crate::fec::codec::BlockCodec;
use crate::packet::model::Packet;
use crate::packet::{Composer, PacketWriter};

pub struct BlockWriter<C: Composer, W: PacketWriter> {
    composer: C,
    writer: W,
    codec: BlockCodec,
    symbols: Vec<Vec<u8>>,
    sbn: u16,
    esi: u16,
    blocks_sent: usize,
}

impl<C: Composer, W: PacketWriter> BlockWriter<C, W> {
    pub fn new(composer: C, writer: W, codec: BlockCodec) -> BlockWriter<C, W> {
        BlockWriter {
            composer: composer,
            writer: writer,
            codec: codec,
            symbols: Vec::new(),
            sbn: 0,
            esi: 0,
            blocks_sent: 0,
        }
    }
    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }
    pub fn blocks_sent(&self) -> usize {
        self.blocks_sent
    }

    fn finish_block(&mut self) -> Result<(), Status> {
        // symbols must agree in size for the codec, pad stragglers
        let max_len = self.symbols.iter().map(|s| s.len()).max().unwrap_or(0);
        for symbol in &mut self.symbols {
            if symbol.len() != max_len {
                warn!(
                    "fec writer: padding short symbol {} -> {} in block {}",
                    symbol.len(),
                    max_len,
                    self.sbn
                );
                symbol.resize(max_len, 0);
            }
        }
        let repairs = self.codec.encode(&self.symbols)?;
        for (j, symbol) in repairs.into_iter().enumerate() {
            let mut packet = Packet::new();
            {
                let fec = packet.fec_mut();
                fec.block_id = self.sbn;
                fec.esi = (self.codec.nbsrc() + j) as u16;
                fec.nbsrc = self.codec.nbsrc() as u16;
                fec.nbrpr = self.codec.nbrpr() as u16;
                fec.repair = true;
                fec.payload = symbol;
            }
            self.composer.prepare(&mut packet, 0)?;
            self.composer.compose(&mut packet)?;
            packet.add_flags(Packet::COMPOSED);
            self.writer.write(packet)?;
        }
        self.symbols.clear();
        self.sbn = self.sbn.wrapping_add(1);
        self.esi = 0;
        self.blocks_sent += 1;
        Ok(())
    }
}

impl<C: Composer, W: PacketWriter> PacketWriter for BlockWriter<C, W> {
    fn write(&mut self, mut packet: Packet) -> Result<(), Status> {
        if packet.rtp().is_none() || !packet.has_flags(Packet::PREPARED) {
            return Err(Status::BadOperation);
        }
        {
            let fec = packet.fec_mut();
            fec.block_id = self.sbn;
            fec.esi = self.esi;
            fec.nbsrc = self.codec.nbsrc() as u16;
            fec.nbrpr = self.codec.nbrpr() as u16;
            fec.repair = false;
        }
        self.composer.compose(&mut packet)?;
        packet.add_flags(Packet::COMPOSED);

        // the protected symbol is everything before the payload id trailer
        let buf = packet.buffer();
        let symbol_end = buf.len() - crate::packet::fec_headers::FEC_PAYLOAD_ID_SIZE;
        self.symbols.push(buf[..symbol_end].to_vec());

        self.writer.write(packet)?;
        self.esi += 1;

        if self.symbols.len() == self.codec.nbsrc() {
            self.finish_block()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test_block_writer {
    use super::*;
    use crate::fec::codec::FecScheme;
    use crate::packet::fec_headers::FecComposer;
    use crate::packet::queue::PacketQueue;
    use crate::packet::rtp::RtpComposer;
    use crate::packet::PacketReader;

    fn writer_under_test(
        nbsrc: usize,
        nbrpr: usize,
    ) -> BlockWriter<FecComposer<RtpComposer>, PacketQueue> {
        let codec = BlockCodec::new(FecScheme::Rs8m, nbsrc, nbrpr)
            .unwrap()
            .unwrap();
        BlockWriter::new(FecComposer::new(RtpComposer::new()), PacketQueue::new(), codec)
    }

    fn source_packet(ts: u32, seq: u16) -> Packet {
        let mut packet = Packet::new();
        let composer = FecComposer::new(RtpComposer::new());
        composer.prepare(&mut packet, 8).unwrap();
        let rtp = packet.rtp_mut();
        rtp.stream_timestamp = ts;
        rtp.seqnum = seq;
        rtp.duration = 4;
        rtp.payload.copy_from_slice(&[seq as u8; 8]);
        packet
    }

    #[test]
    fn sources_pass_through_immediately() {
        // a source packet should come out composed before the block closes
        let mut bw = writer_under_test(4, 2);
        bw.write(source_packet(0, 0)).unwrap();
        let out = bw.writer_mut().read().unwrap();
        assert!(out.has_flags(Packet::COMPOSED));
        assert_eq!(out.fec().unwrap().esi, 0);
        assert!(!out.fec().unwrap().repair);
    }
    #[test]
    fn full_block_emits_repairs() {
        let mut bw = writer_under_test(4, 2);
        for n in 0..4 {
            bw.write(source_packet(n * 4, n as u16)).unwrap();
        }
        assert_eq!(bw.blocks_sent(), 1);
        let mut sources = 0;
        let mut repairs = 0;
        while let Ok(p) = bw.writer_mut().read() {
            let fec = p.fec().unwrap();
            assert_eq!(fec.block_id, 0);
            if fec.repair {
                repairs += 1;
                assert!(fec.esi >= 4);
                assert!(!p.fec().unwrap().payload.is_empty());
            } else {
                sources += 1;
            }
        }
        assert_eq!(sources, 4);
        assert_eq!(repairs, 2);
    }
    #[test]
    fn block_numbers_advance() {
        let mut bw = writer_under_test(2, 1);
        for n in 0..6 {
            bw.write(source_packet(n * 4, n as u16)).unwrap();
        }
        assert_eq!(bw.blocks_sent(), 3);
        let mut seen_blocks = vec![];
        while let Ok(p) = bw.writer_mut().read() {
            let blk = p.fec().unwrap().block_id;
            if !seen_blocks.contains(&blk) {
                seen_blocks.push(blk);
            }
        }
        assert_eq!(seen_blocks, vec![0, 1, 2]);
    }
    #[test]
    fn unprepared_packet_rejected() {
        let mut bw = writer_under_test(2, 1);
        assert_eq!(bw.write(Packet::new()), Err(Status::BadOperation));
    }
}
