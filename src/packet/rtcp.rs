//! bit exact RTCP serialization: SR, RR, SDES, BYE and XR blocks.
//!
//! Compound packets are plain concatenations with no padding between the
//! pieces.  The parser walks the length fields and refuses anything that
//! does not add up; unknown packet and block types are skipped so future
//! extensions pass through quietly.
use byteorder::{ByteOrder, NetworkEndian};

use crate::common::status::Status;
use crate::packet::model::Packet;
use crate::packet::{Composer, Parser};

pub const RTCP_VERSION: u8 = 2;
pub const PT_SR: u8 = 200;
pub const PT_RR: u8 = 201;
pub const PT_SDES: u8 = 202;
pub const PT_BYE: u8 = 203;
pub const PT_XR: u8 = 207;

const SDES_END: u8 = 0;
const SDES_CNAME: u8 = 1;
pub const XR_BLOCK_RRTR: u8 = 4;
pub const XR_BLOCK_DLRR: u8 = 5;

/// sender report body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderReport {
    pub ssrc: u32,
    /// 32.32 fixed point NTP wall clock
    pub ntp_timestamp: u64,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub byte_count: u32,
}

/// one reception report block inside an SR or RR
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportBlock {
    pub ssrc: u32,
    /// fixed point 8 bit fraction of packets lost since the last report
    pub fraction_lost: u8,
    /// 24 bit signed cumulative loss
    pub cumulative_lost: i32,
    pub last_seqnum: u32,
    pub jitter: u32,
    /// middle 32 bits of the last SR's NTP timestamp
    pub last_sr: u32,
    /// delay since that SR in 1/65536 seconds
    pub delay_last_sr: u32,
}

/// receiver reference time XR block
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XrRrtr {
    pub ntp_timestamp: u64,
}

/// delay since last RR, the echo half of the RTT measurement
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XrDlrrEntry {
    pub ssrc: u32,
    pub last_rr: u32,
    pub delay_last_rr: u32,
}

/// one piece of a compound RTCP packet
#[derive(Debug, Clone, PartialEq)]
pub enum RtcpItem {
    Sr {
        report: SenderReport,
        blocks: Vec<ReportBlock>,
    },
    Rr {
        ssrc: u32,
        blocks: Vec<ReportBlock>,
    },
    Sdes {
        ssrc: u32,
        cname: String,
    },
    Bye {
        ssrcs: Vec<u32>,
    },
    Xr {
        ssrc: u32,
        rrtr: Option<XrRrtr>,
        dlrr: Vec<XrDlrrEntry>,
    },
}

fn write_header(out: &mut Vec<u8>, count: u8, pt: u8, body_len: usize) -> () {
    // length field counts 32 bit words minus one
    let words = (body_len / 4) as u16;
    out.push(RTCP_VERSION << 6 | (count & 0x1f));
    out.push(pt);
    let mut len = [0u8; 2];
    NetworkEndian::write_u16(&mut len, words);
    out.extend_from_slice(&len);
}

fn write_report_block(out: &mut Vec<u8>, block: &ReportBlock) -> () {
    let mut buf = [0u8; 24];
    NetworkEndian::write_u32(&mut buf[0..4], block.ssrc);
    buf[4] = block.fraction_lost;
    let lost = block.cumulative_lost.clamp(-(1 << 23), (1 << 23) - 1);
    buf[5] = (lost >> 16) as u8;
    buf[6] = (lost >> 8) as u8;
    buf[7] = lost as u8;
    NetworkEndian::write_u32(&mut buf[8..12], block.last_seqnum);
    NetworkEndian::write_u32(&mut buf[12..16], block.jitter);
    NetworkEndian::write_u32(&mut buf[16..20], block.last_sr);
    NetworkEndian::write_u32(&mut buf[20..24], block.delay_last_sr);
    out.extend_from_slice(&buf);
}

fn read_report_block(bytes: &[u8]) -> ReportBlock {
    let mut lost = ((bytes[5] as i32) << 16) | ((bytes[6] as i32) << 8) | bytes[7] as i32;
    if lost & 0x0080_0000 != 0 {
        lost |= !0x00ff_ffff; // sign extend 24 bits
    }
    ReportBlock {
        ssrc: NetworkEndian::read_u32(&bytes[0..4]),
        fraction_lost: bytes[4],
        cumulative_lost: lost,
        last_seqnum: NetworkEndian::read_u32(&bytes[8..12]),
        jitter: NetworkEndian::read_u32(&bytes[12..16]),
        last_sr: NetworkEndian::read_u32(&bytes[16..20]),
        delay_last_sr: NetworkEndian::read_u32(&bytes[20..24]),
    }
}

fn compose_item(out: &mut Vec<u8>, item: &RtcpItem) -> () {
    match item {
        RtcpItem::Sr { report, blocks } => {
            write_header(out, blocks.len() as u8, PT_SR, 24 + blocks.len() * 24);
            let mut buf = [0u8; 24];
            NetworkEndian::write_u32(&mut buf[0..4], report.ssrc);
            NetworkEndian::write_u64(&mut buf[4..12], report.ntp_timestamp);
            NetworkEndian::write_u32(&mut buf[12..16], report.rtp_timestamp);
            NetworkEndian::write_u32(&mut buf[16..20], report.packet_count);
            NetworkEndian::write_u32(&mut buf[20..24], report.byte_count);
            out.extend_from_slice(&buf);
            for block in blocks {
                write_report_block(out, block);
            }
        }
        RtcpItem::Rr { ssrc, blocks } => {
            write_header(out, blocks.len() as u8, PT_RR, 4 + blocks.len() * 24);
            let mut buf = [0u8; 4];
            NetworkEndian::write_u32(&mut buf, *ssrc);
            out.extend_from_slice(&buf);
            for block in blocks {
                write_report_block(out, block);
            }
        }
        RtcpItem::Sdes { ssrc, cname } => {
            // one chunk: ssrc, CNAME item, END, padded to a word boundary
            let item_len = 2 + cname.len();
            let chunk_len = 4 + item_len + 1;
            let padded = (chunk_len + 3) & !3;
            write_header(out, 1, PT_SDES, padded);
            let mut buf = [0u8; 4];
            NetworkEndian::write_u32(&mut buf, *ssrc);
            out.extend_from_slice(&buf);
            out.push(SDES_CNAME);
            out.push(cname.len() as u8);
            out.extend_from_slice(cname.as_bytes());
            out.push(SDES_END);
            for _ in chunk_len..padded {
                out.push(0);
            }
        }
        RtcpItem::Bye { ssrcs } => {
            write_header(out, ssrcs.len() as u8, PT_BYE, ssrcs.len() * 4);
            for ssrc in ssrcs {
                let mut buf = [0u8; 4];
                NetworkEndian::write_u32(&mut buf, *ssrc);
                out.extend_from_slice(&buf);
            }
        }
        RtcpItem::Xr { ssrc, rrtr, dlrr } => {
            let mut body = 4;
            if rrtr.is_some() {
                body += 4 + 8;
            }
            if !dlrr.is_empty() {
                body += 4 + dlrr.len() * 12;
            }
            write_header(out, 0, PT_XR, body);
            let mut buf = [0u8; 4];
            NetworkEndian::write_u32(&mut buf, *ssrc);
            out.extend_from_slice(&buf);
            if let Some(rrtr) = rrtr {
                out.push(XR_BLOCK_RRTR);
                out.push(0);
                let mut len = [0u8; 2];
                NetworkEndian::write_u16(&mut len, 2);
                out.extend_from_slice(&len);
                let mut ntp = [0u8; 8];
                NetworkEndian::write_u64(&mut ntp, rrtr.ntp_timestamp);
                out.extend_from_slice(&ntp);
            }
            if !dlrr.is_empty() {
                out.push(XR_BLOCK_DLRR);
                out.push(0);
                let mut len = [0u8; 2];
                NetworkEndian::write_u16(&mut len, (dlrr.len() * 3) as u16);
                out.extend_from_slice(&len);
                for entry in dlrr {
                    let mut buf = [0u8; 12];
                    NetworkEndian::write_u32(&mut buf[0..4], entry.ssrc);
                    NetworkEndian::write_u32(&mut buf[4..8], entry.last_rr);
                    NetworkEndian::write_u32(&mut buf[8..12], entry.delay_last_rr);
                    out.extend_from_slice(&buf);
                }
            }
        }
    }
}

/// serialize a compound packet: items back to back, nothing in between
pub fn compose_compound(items: &[RtcpItem]) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        compose_item(&mut out, item);
    }
    out
}

fn parse_item(pt: u8, count: u8, body: &[u8]) -> Result<Option<RtcpItem>, Status> {
    match pt {
        PT_SR => {
            if body.len() < 24 + count as usize * 24 {
                return Err(Status::BadFormat);
            }
            let report = SenderReport {
                ssrc: NetworkEndian::read_u32(&body[0..4]),
                ntp_timestamp: NetworkEndian::read_u64(&body[4..12]),
                rtp_timestamp: NetworkEndian::read_u32(&body[12..16]),
                packet_count: NetworkEndian::read_u32(&body[16..20]),
                byte_count: NetworkEndian::read_u32(&body[20..24]),
            };
            let mut blocks = Vec::new();
            for n in 0..count as usize {
                blocks.push(read_report_block(&body[24 + n * 24..]));
            }
            Ok(Some(RtcpItem::Sr {
                report: report,
                blocks: blocks,
            }))
        }
        PT_RR => {
            if body.len() < 4 + count as usize * 24 {
                return Err(Status::BadFormat);
            }
            let ssrc = NetworkEndian::read_u32(&body[0..4]);
            let mut blocks = Vec::new();
            for n in 0..count as usize {
                blocks.push(read_report_block(&body[4 + n * 24..]));
            }
            Ok(Some(RtcpItem::Rr {
                ssrc: ssrc,
                blocks: blocks,
            }))
        }
        PT_SDES => {
            // only the first chunk's CNAME matters to the router
            if body.len() < 4 {
                return Err(Status::BadFormat);
            }
            let ssrc = NetworkEndian::read_u32(&body[0..4]);
            let mut at = 4;
            while at + 2 <= body.len() {
                let item_type = body[at];
                if item_type == SDES_END {
                    break;
                }
                let len = body[at + 1] as usize;
                if at + 2 + len > body.len() {
                    return Err(Status::BadFormat);
                }
                if item_type == SDES_CNAME {
                    let cname = String::from_utf8_lossy(&body[at + 2..at + 2 + len]).to_string();
                    return Ok(Some(RtcpItem::Sdes {
                        ssrc: ssrc,
                        cname: cname,
                    }));
                }
                at += 2 + len;
            }
            Ok(None)
        }
        PT_BYE => {
            if body.len() < count as usize * 4 {
                return Err(Status::BadFormat);
            }
            let mut ssrcs = Vec::new();
            for n in 0..count as usize {
                ssrcs.push(NetworkEndian::read_u32(&body[n * 4..n * 4 + 4]));
            }
            Ok(Some(RtcpItem::Bye { ssrcs: ssrcs }))
        }
        PT_XR => {
            if body.len() < 4 {
                return Err(Status::BadFormat);
            }
            let ssrc = NetworkEndian::read_u32(&body[0..4]);
            let mut rrtr = None;
            let mut dlrr = Vec::new();
            let mut at = 4;
            while at + 4 <= body.len() {
                let block_type = body[at];
                let block_words = NetworkEndian::read_u16(&body[at + 2..at + 4]) as usize;
                let block_len = block_words * 4;
                if at + 4 + block_len > body.len() {
                    return Err(Status::BadFormat);
                }
                let block = &body[at + 4..at + 4 + block_len];
                match block_type {
                    XR_BLOCK_RRTR => {
                        if block.len() < 8 {
                            return Err(Status::BadFormat);
                        }
                        rrtr = Some(XrRrtr {
                            ntp_timestamp: NetworkEndian::read_u64(&block[0..8]),
                        });
                    }
                    XR_BLOCK_DLRR => {
                        for entry in block.chunks_exact(12) {
                            dlrr.push(XrDlrrEntry {
                                ssrc: NetworkEndian::read_u32(&entry[0..4]),
                                last_rr: NetworkEndian::read_u32(&entry[4..8]),
                                delay_last_rr: NetworkEndian::read_u32(&entry[8..12]),
                            });
                        }
                    }
                    _ => {} // skip unknown block types
                }
                at += 4 + block_len;
            }
            Ok(Some(RtcpItem::Xr {
                ssrc: ssrc,
                rrtr: rrtr,
                dlrr: dlrr,
            }))
        }
        _ => Ok(None), // unknown packet type, skip
    }
}

/// walk a compound packet and pull out everything we understand
pub fn parse_compound(bytes: &[u8]) -> Result<Vec<RtcpItem>, Status> {
    let mut items = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        if at + 4 > bytes.len() {
            return Err(Status::BadFormat);
        }
        if bytes[at] >> 6 != RTCP_VERSION {
            return Err(Status::BadFormat);
        }
        let count = bytes[at] & 0x1f;
        let pt = bytes[at + 1];
        let body_len = NetworkEndian::read_u16(&bytes[at + 2..at + 4]) as usize * 4;
        if at + 4 + body_len > bytes.len() {
            return Err(Status::BadFormat);
        }
        if let Some(item) = parse_item(pt, count, &bytes[at + 4..at + 4 + body_len])? {
            items.push(item);
        }
        at += 4 + body_len;
    }
    Ok(items)
}

/// composer for control packets: the compound bytes live in the rtcp facet
pub struct RtcpComposer;

impl RtcpComposer {
    pub fn new() -> RtcpComposer {
        RtcpComposer
    }
}

impl Composer for RtcpComposer {
    fn prepare(&self, packet: &mut Packet, payload_size: usize) -> Result<(), Status> {
        packet.rtcp_mut().payload.reserve(payload_size);
        packet.add_flags(Packet::PREPARED);
        Ok(())
    }
    fn compose(&self, packet: &mut Packet) -> Result<(), Status> {
        let payload = match packet.rtcp() {
            Some(rtcp) => rtcp.payload.clone(),
            None => return Err(Status::BadOperation),
        };
        let buf = packet.buffer_mut();
        buf.clear();
        buf.extend_from_slice(&payload);
        Ok(())
    }
}

/// parser for control packets: validates and stores the compound bytes
pub struct RtcpParser;

impl RtcpParser {
    pub fn new() -> RtcpParser {
        RtcpParser
    }
}

impl Parser for RtcpParser {
    fn parse(&self, packet: &mut Packet, bytes: &[u8]) -> Result<(), Status> {
        parse_compound(bytes)?;
        packet.rtcp_mut().payload = bytes.to_vec();
        Ok(())
    }
}
