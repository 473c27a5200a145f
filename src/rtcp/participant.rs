//! one end of the RTCP dialogue.
//!
//! The communicator turns local stream state into compound report packets
//! on a schedule, and turns inbound compound packets into events the
//! session group acts on: clock mappings from SRs, CNAME bindings for the
//! router, BYEs, and RTT measurements closed over the RRTR/DLRR echo.
use std::collections::HashMap;

use log::debug;

use crate::common::status::Status;
use crate::common::stream_stats::MicroTimer;
use crate::packet::rtcp::{
    compose_compound, parse_compound, ReportBlock, RtcpItem, SenderReport, XrDlrrEntry, XrRrtr,
};
use crate::rtcp::reports::{
    ns_to_ntp, ns_to_units, ntp_mid32, ntp_to_ns, units_to_ns, RecvReport, SendReport,
};

/// default spacing between reports; real time audio wants much less than
/// the RFC 3550 five second tier
pub const DEFAULT_REPORT_INTERVAL_US: u128 = 200_000;

/// things the session group learns from inbound control traffic
#[derive(Debug, Clone, PartialEq)]
pub enum RtcpEvent {
    /// sender clock mapping: this rtp timestamp happened at this wall time
    SenderClock {
        ssrc: u32,
        origin_ns: i64,
        rtp_timestamp: u32,
    },
    /// a CNAME claimed this ssrc
    CnameBound { ssrc: u32, cname: String },
    /// the stream said goodbye
    Bye { ssrc: u32 },
    /// round trip closed, halved into an end to end latency estimate
    RttMeasured { ssrc: u32, rtt_ns: i64 },
    /// the remote receiver's view of our stream
    RemoteReport {
        ssrc: u32,
        fraction_lost: f64,
        jitter: u32,
    },
}

pub struct Communicator {
    cname: String,
    ssrc: u32,
    report_timer: MicroTimer,

    /// last SR seen per remote stream: (mid32 ntp, arrival ns)
    sr_seen: HashMap<u32, (u32, i64)>,
    /// last RRTR seen per remote participant: (mid32 ntp, arrival ns)
    rrtr_seen: HashMap<u32, (u32, i64)>,

    reports_sent: usize,
    reports_received: usize,
}

impl Communicator {
    pub fn new(cname: &str, ssrc: u32, now_us: u128) -> Communicator {
        Communicator {
            cname: String::from(cname),
            ssrc: ssrc,
            report_timer: MicroTimer::new(now_us, DEFAULT_REPORT_INTERVAL_US),
            sr_seen: HashMap::new(),
            rrtr_seen: HashMap::new(),
            reports_sent: 0,
            reports_received: 0,
        }
    }
    pub fn cname(&self) -> &str {
        &self.cname
    }
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }
    pub fn reports_sent(&self) -> usize {
        self.reports_sent
    }
    pub fn reports_received(&self) -> usize {
        self.reports_received
    }

    /// is it time to emit the next compound packet
    pub fn should_report(&self, now_us: u128) -> bool {
        self.report_timer.expired(now_us)
    }
    pub fn next_deadline(&self) -> u128 {
        self.report_timer.deadline()
    }

    /// receiver side compound: RR blocks + SDES CNAME + XR RRTR
    pub fn generate_receiver_report(
        &mut self,
        now_ns: i64,
        now_us: u128,
        streams: &[RecvReport],
    ) -> Vec<u8> {
        self.report_timer.reset(now_us);
        self.reports_sent += 1;
        let now_ntp = ns_to_ntp(now_ns);
        let blocks: Vec<ReportBlock> = streams
            .iter()
            .map(|stream| {
                let (last_sr, delay_last_sr) = match self.sr_seen.get(&stream.ssrc) {
                    Some((mid, arrival)) => {
                        (*mid, ns_to_units(now_ns.saturating_sub(*arrival)))
                    }
                    None => (0, 0),
                };
                ReportBlock {
                    ssrc: stream.ssrc,
                    fraction_lost: (stream.fraction_lost.clamp(0.0, 1.0) * 255.0) as u8,
                    cumulative_lost: stream.cumulative_lost.clamp(-(1 << 23), (1 << 23) - 1)
                        as i32,
                    last_seqnum: stream.last_seqnum,
                    jitter: stream.jitter,
                    last_sr: last_sr,
                    delay_last_sr: delay_last_sr,
                }
            })
            .collect();
        compose_compound(&[
            RtcpItem::Rr {
                ssrc: self.ssrc,
                blocks: blocks,
            },
            RtcpItem::Sdes {
                ssrc: self.ssrc,
                cname: self.cname.clone(),
            },
            RtcpItem::Xr {
                ssrc: self.ssrc,
                rrtr: Some(XrRrtr {
                    ntp_timestamp: now_ntp,
                }),
                dlrr: vec![],
            },
        ])
    }

    /// sender side compound: SR + SDES CNAME + XR DLRR echoes
    pub fn generate_sender_report(
        &mut self,
        now_ns: i64,
        now_us: u128,
        send: &SendReport,
    ) -> Vec<u8> {
        self.report_timer.reset(now_us);
        self.reports_sent += 1;
        let dlrr: Vec<XrDlrrEntry> = self
            .rrtr_seen
            .iter()
            .map(|(ssrc, (mid, arrival))| XrDlrrEntry {
                ssrc: *ssrc,
                last_rr: *mid,
                delay_last_rr: ns_to_units(now_ns.saturating_sub(*arrival)),
            })
            .collect();
        let mut items = vec![
            RtcpItem::Sr {
                report: SenderReport {
                    ssrc: send.ssrc,
                    ntp_timestamp: ns_to_ntp(send.origin_ns),
                    rtp_timestamp: send.rtp_timestamp,
                    packet_count: send.packet_count,
                    byte_count: send.byte_count,
                },
                blocks: vec![],
            },
            RtcpItem::Sdes {
                ssrc: self.ssrc,
                cname: self.cname.clone(),
            },
        ];
        if !dlrr.is_empty() {
            items.push(RtcpItem::Xr {
                ssrc: self.ssrc,
                rrtr: None,
                dlrr: dlrr,
            });
        }
        compose_compound(&items)
    }

    /// digest one inbound compound packet into events
    pub fn process(&mut self, bytes: &[u8], now_ns: i64) -> Result<Vec<RtcpEvent>, Status> {
        let items = parse_compound(bytes)?;
        self.reports_received += 1;
        let mut events = Vec::new();
        for item in items {
            match item {
                RtcpItem::Sr { report, .. } => {
                    self.sr_seen.insert(
                        report.ssrc,
                        (ntp_mid32(report.ntp_timestamp), now_ns),
                    );
                    events.push(RtcpEvent::SenderClock {
                        ssrc: report.ssrc,
                        origin_ns: ntp_to_ns(report.ntp_timestamp),
                        rtp_timestamp: report.rtp_timestamp,
                    });
                }
                RtcpItem::Rr { ssrc, blocks } => {
                    for block in blocks {
                        if block.ssrc == self.ssrc && block.last_sr != 0 {
                            // our SR came back: close the round trip
                            let now_mid = ntp_mid32(ns_to_ntp(now_ns));
                            let rtt_units = now_mid
                                .wrapping_sub(block.last_sr)
                                .wrapping_sub(block.delay_last_sr);
                            events.push(RtcpEvent::RttMeasured {
                                ssrc: ssrc,
                                rtt_ns: units_to_ns(rtt_units),
                            });
                        }
                        if block.ssrc == self.ssrc {
                            events.push(RtcpEvent::RemoteReport {
                                ssrc: ssrc,
                                fraction_lost: block.fraction_lost as f64 / 255.0,
                                jitter: block.jitter,
                            });
                        }
                    }
                }
                RtcpItem::Sdes { ssrc, cname } => {
                    events.push(RtcpEvent::CnameBound {
                        ssrc: ssrc,
                        cname: cname,
                    });
                }
                RtcpItem::Bye { ssrcs } => {
                    for ssrc in ssrcs {
                        events.push(RtcpEvent::Bye { ssrc: ssrc });
                    }
                }
                RtcpItem::Xr { ssrc, rrtr, dlrr } => {
                    if let Some(rrtr) = rrtr {
                        self.rrtr_seen
                            .insert(ssrc, (ntp_mid32(rrtr.ntp_timestamp), now_ns));
                    }
                    for entry in dlrr {
                        if entry.ssrc != self.ssrc || entry.last_rr == 0 {
                            continue;
                        }
                        // our RRTR echoed back: the receiver side RTT path
                        let now_mid = ntp_mid32(ns_to_ntp(now_ns));
                        let rtt_units = now_mid
                            .wrapping_sub(entry.last_rr)
                            .wrapping_sub(entry.delay_last_rr);
                        events.push(RtcpEvent::RttMeasured {
                            ssrc: ssrc,
                            rtt_ns: units_to_ns(rtt_units),
                        });
                    }
                }
            }
        }
        debug!("rtcp: processed compound with {} events", events.len());
        Ok(events)
    }
}
