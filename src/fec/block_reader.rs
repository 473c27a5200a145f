//! receiver side of the FEC engine.
//!
//! Packets come in tagged with (block id, esi).  Source packets flow out
//! again in esi order as soon as they are contiguous; a hole waits until
//! either enough symbols arrive to decode or the block gets finalized by
//! the next block showing up or the latency window running out.  Whatever
//! could not be rebuilt stays a gap and the depacketizer plays silence
//! through it.
use log::{debug, warn};

use crate::audio::pcm::PcmDecoder;
use crate::common::status::Status;
use crate::fec::codec::BlockCodec;
use crate::packet::model::Packet;
use crate::packet::ordering;
use crate::packet::rtp::RtpParser;
use crate::packet::{PacketReader, Parser};
use std::collections::VecDeque;

pub struct BlockReader {
    codec: BlockCodec,
    parser: RtpParser,
    decoder: PcmDecoder,
    /// finalize an incomplete block once it trails this many samples behind
    window_samples: u32,

    started: bool,
    cur_sbn: u16,
    sources: Vec<Option<Packet>>,
    repairs: Vec<Option<Vec<u8>>>,
    next_esi: usize,
    ready: VecDeque<Packet>,
    latest_ts: u32,
    block_start_ts: Option<u32>,

    recovered: usize,
    late_dropped: usize,
    failed_blocks: usize,
}

impl BlockReader {
    pub fn new(codec: BlockCodec, decoder: PcmDecoder, window_samples: u32) -> BlockReader {
        let nbsrc = codec.nbsrc();
        let nbrpr = codec.nbrpr();
        BlockReader {
            codec: codec,
            parser: RtpParser::new(),
            decoder: decoder,
            window_samples: window_samples,
            started: false,
            cur_sbn: 0,
            sources: (0..nbsrc).map(|_| None).collect(),
            repairs: vec![None; nbrpr],
            next_esi: 0,
            ready: VecDeque::new(),
            latest_ts: 0,
            block_start_ts: None,
            recovered: 0,
            late_dropped: 0,
            failed_blocks: 0,
        }
    }
    /// packets rebuilt by the codec so far
    pub fn recovered(&self) -> usize {
        self.recovered
    }
    pub fn late_dropped(&self) -> usize {
        self.late_dropped
    }
    /// blocks finalized with holes left in them
    pub fn failed_blocks(&self) -> usize {
        self.failed_blocks
    }
    /// per-channel samples waiting in the assembler
    pub fn queued_duration(&self) -> u32 {
        let pending: u32 = self
            .sources
            .iter()
            .flatten()
            .map(|p| p.rtp().map_or(0, |rtp| rtp.duration))
            .sum();
        pending + self.ready.iter().map(|p| p.rtp().map_or(0, |rtp| rtp.duration)).sum::<u32>()
    }

    fn accept_block(&mut self, block_id: u16) -> bool {
        if !self.started {
            self.started = true;
            self.cur_sbn = block_id;
            return true;
        }
        if ordering::blk_before(block_id, self.cur_sbn) {
            self.late_dropped += 1;
            return false;
        }
        while ordering::blk_before(self.cur_sbn, block_id) {
            self.finalize_block();
        }
        true
    }

    /// a source packet straight off the source endpoint
    pub fn write_source(&mut self, packet: Packet) -> Result<(), Status> {
        let (block_id, esi) = match packet.fec() {
            Some(fec) if !fec.repair => (fec.block_id, fec.esi as usize),
            _ => return Err(Status::BadOperation),
        };
        if esi >= self.codec.nbsrc() {
            return Err(Status::BadFormat);
        }
        if !self.accept_block(block_id) {
            return Ok(());
        }
        let ts = packet.stream_timestamp();
        self.latest_ts = if self.started && ordering::ts_before(self.latest_ts, ts) {
            ts
        } else {
            self.latest_ts
        };
        if esi == 0 || self.block_start_ts.is_none() {
            // esi 0 carries the true block start, otherwise estimate back
            let dur = packet.rtp().map_or(0, |rtp| rtp.duration);
            self.block_start_ts = Some(ts.wrapping_sub(dur.wrapping_mul(esi as u32)));
        }
        if esi >= self.next_esi && self.sources[esi].is_none() {
            self.sources[esi] = Some(packet);
        }
        Ok(())
    }

    /// a repair packet off the repair endpoint
    pub fn write_repair(&mut self, packet: Packet) -> Result<(), Status> {
        let (block_id, esi, payload) = match packet.fec() {
            Some(fec) if fec.repair => (fec.block_id, fec.esi as usize, fec.payload.clone()),
            _ => return Err(Status::BadOperation),
        };
        if esi < self.codec.nbsrc() || esi >= self.codec.nbsrc() + self.codec.nbrpr() {
            return Err(Status::BadFormat);
        }
        if !self.accept_block(block_id) {
            return Ok(());
        }
        let slot = esi - self.codec.nbsrc();
        if self.repairs[slot].is_none() {
            self.repairs[slot] = Some(payload);
        }
        Ok(())
    }

    fn received_count(&self) -> usize {
        self.sources.iter().filter(|s| s.is_some()).count()
            + self.repairs.iter().filter(|r| r.is_some()).count()
    }

    fn try_decode(&mut self) -> () {
        if self.sources.iter().all(|s| s.is_some()) {
            return;
        }
        if self.received_count() < self.codec.nbsrc() {
            return;
        }
        let symbol_len = self
            .sources
            .iter()
            .flatten()
            .map(|p| p.buffer().len())
            .chain(self.repairs.iter().flatten().map(|r| r.len()))
            .max()
            .unwrap_or(0);
        let mut symbols: Vec<Option<Vec<u8>>> = self
            .sources
            .iter()
            .map(|s| {
                s.as_ref().map(|p| {
                    let mut bytes = p.buffer().to_vec();
                    bytes.resize(symbol_len, 0);
                    bytes
                })
            })
            .collect();
        let repairs: Vec<Option<Vec<u8>>> = self
            .repairs
            .iter()
            .map(|r| {
                r.as_ref().map(|r| {
                    let mut bytes = r.clone();
                    bytes.resize(symbol_len, 0);
                    bytes
                })
            })
            .collect();
        if let Err(status) = self.codec.decode(&mut symbols, &repairs) {
            debug!("fec reader: block {} not decodable yet: {}", self.cur_sbn, status);
            return;
        }
        for (esi, symbol) in symbols.into_iter().enumerate() {
            if self.sources[esi].is_some() {
                continue;
            }
            let symbol = match symbol {
                Some(symbol) => symbol,
                None => continue,
            };
            let mut packet = Packet::new();
            if let Err(status) = self.parser.parse(&mut packet, &symbol) {
                warn!("fec reader: recovered symbol did not parse: {}", status);
                continue;
            }
            {
                let dur = self
                    .decoder
                    .decoded_sample_count(packet.rtp().map_or(0, |rtp| rtp.payload.len()));
                let rtp = packet.rtp_mut();
                rtp.duration = dur as u32;
            }
            {
                let fec = packet.fec_mut();
                fec.block_id = self.cur_sbn;
                fec.esi = esi as u16;
                fec.nbsrc = self.codec.nbsrc() as u16;
                fec.nbrpr = self.codec.nbrpr() as u16;
            }
            packet.add_flags(Packet::RESTORED);
            self.recovered += 1;
            self.sources[esi] = Some(packet);
        }
    }

    fn finalize_block(&mut self) -> () {
        self.try_decode();
        let mut holes = false;
        for esi in self.next_esi..self.codec.nbsrc() {
            match self.sources[esi].take() {
                Some(packet) => self.ready.push_back(packet),
                None => holes = true,
            }
        }
        if holes {
            self.failed_blocks += 1;
            debug!("fec reader: block {} finalized with holes", self.cur_sbn);
        }
        for repair in self.repairs.iter_mut() {
            *repair = None;
        }
        self.next_esi = 0;
        self.block_start_ts = None;
        self.cur_sbn = self.cur_sbn.wrapping_add(1);
    }

    fn window_exceeded(&self) -> bool {
        match self.block_start_ts {
            Some(start) => {
                ordering::ts_diff(self.latest_ts, start) > self.window_samples as i32
            }
            None => false,
        }
    }
}

impl PacketReader for BlockReader {
    fn read(&mut self) -> Result<Packet, Status> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                return Ok(packet);
            }
            if !self.started {
                return Err(Status::NoData);
            }
            if self.next_esi < self.codec.nbsrc() {
                if let Some(packet) = self.sources[self.next_esi].take() {
                    self.next_esi += 1;
                    return Ok(packet);
                }
                // a hole: see if the codec can fill it
                self.try_decode();
                if let Some(packet) = self.sources[self.next_esi].take() {
                    self.next_esi += 1;
                    return Ok(packet);
                }
                if self.window_exceeded() {
                    self.finalize_block();
                    continue;
                }
                return Err(Status::NoData);
            }
            // everything in the block released, wait for the next one
            if self.window_exceeded() {
                self.finalize_block();
                continue;
            }
            return Err(Status::NoData);
        }
    }
}
