//! the set of sessions behind one receiver slot.
//!
//! The group owns the sessions, the router that picks between them, the
//! shared RTCP participant, and the mixer that folds their frames into the
//! one stream the sink pulls.  Control packets come through here too, so
//! the router learns CNAME bindings and the sessions learn their sender's
//! clock.
use std::collections::HashMap;

use log::{debug, info};
use serde_json::json;

use crate::audio::frame::Frame;
use crate::audio::mixer::Mixer;
use crate::common::status::Status;
use crate::packet::model::Packet;
use crate::packet::rtcp::RtcpComposer;
use crate::packet::Composer;
use crate::rtcp::participant::{Communicator, RtcpEvent};
use crate::rtcp::reports::RecvReport;
use crate::session::receiver_session::{ReceiverSession, SessionConfig};
use crate::session::router::{CnameAction, SessionRouter};

/// hard cap on concurrent senders per slot
pub const MAX_SESSIONS: usize = 16;

pub struct SessionGroup {
    config: SessionConfig,
    sessions: HashMap<u64, ReceiverSession>,
    next_handle: u64,
    router: SessionRouter,
    communicator: Communicator,
    mixer: Mixer,
    dropped_packets: usize,
}

impl SessionGroup {
    pub fn new(
        config: SessionConfig,
        cname: &str,
        local_ssrc: u32,
        frame_samples: usize,
        now_us: u128,
    ) -> SessionGroup {
        SessionGroup {
            config: config,
            sessions: HashMap::new(),
            next_handle: 1,
            router: SessionRouter::new(),
            communicator: Communicator::new(cname, local_ssrc, now_us),
            mixer: Mixer::new(frame_samples),
            dropped_packets: 0,
        }
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }
    pub fn dropped_packets(&self) -> usize {
        self.dropped_packets
    }

    /// adopt the FEC geometry implied by the slot's endpoints.
    ///
    /// Called while endpoints are wired up, before any session exists.
    pub fn set_fec(&mut self, scheme: crate::fec::codec::FecScheme, nbsrc: usize, nbrpr: usize) -> () {
        self.config.fec_scheme = scheme;
        self.config.fec_nbsrc = nbsrc;
        self.config.fec_nbrpr = nbrpr;
    }

    fn can_create_session(&self, packet: &Packet) -> bool {
        if self.sessions.len() >= MAX_SESSIONS {
            debug!("group: session cap reached, not creating");
            return false;
        }
        // only a source packet with the right payload type opens a session
        if packet.fec().map_or(false, |fec| fec.repair) {
            return false;
        }
        match packet.rtp() {
            Some(rtp) => rtp.payload_type == self.config.payload_type,
            None => false,
        }
    }

    fn create_session(&mut self, packet: &Packet, now_us: u128) -> Result<u64, Status> {
        let rtp = packet.rtp().ok_or(Status::BadOperation)?;
        let addr = packet.udp().and_then(|udp| udp.src_addr);
        let handle = self.next_handle;
        self.next_handle += 1;
        let mut session = ReceiverSession::new(rtp.source_id, addr, &self.config, now_us)?;
        if let Some(cname) = self.router.take_pending_cname(rtp.source_id) {
            session.set_cname(&cname);
        }
        self.router.insert_session(handle, rtp.source_id, addr);
        if let Some(cname) = session.cname() {
            let cname = String::from(cname);
            self.router.bind_cname(rtp.source_id, &cname);
        }
        self.sessions.insert(handle, session);
        info!("group: session {} created, {} total", handle, self.sessions.len());
        Ok(handle)
    }

    /// a transport packet (source or repair) for this slot
    pub fn route_transport_packet(&mut self, packet: Packet, now_us: u128) -> Result<(), Status> {
        let source_id = match packet.rtp() {
            Some(rtp) => rtp.source_id,
            None => match packet.fec() {
                // repair packets carry no rtp header; the router learns
                // their ssrc binding from RTCP, until then use the address
                Some(_) => 0,
                None => {
                    self.dropped_packets += 1;
                    return Err(Status::BadFormat);
                }
            },
        };

        let handle = match self.router.find_by_source(source_id) {
            Some(handle) => Some(handle),
            None => match packet.udp().and_then(|udp| udp.src_addr) {
                Some(addr) => match self.router.find_by_addr(addr) {
                    Some(handle) => {
                        // first packet of a second stream from a known
                        // sender: bind this ssrc to the same session
                        if source_id != 0 {
                            self.router.adopt_source(handle, source_id);
                            if let Some(session) = self.sessions.get_mut(&handle) {
                                session.adopt_repair_source(source_id);
                            }
                        }
                        Some(handle)
                    }
                    None => None,
                },
                None => None,
            },
        };

        match handle {
            Some(handle) => match self.sessions.get_mut(&handle) {
                Some(session) => session.route_packet(packet, now_us),
                None => {
                    self.dropped_packets += 1;
                    Err(Status::NotFound)
                }
            },
            None => {
                if self.can_create_session(&packet) {
                    let handle = self.create_session(&packet, now_us)?;
                    self.sessions
                        .get_mut(&handle)
                        .unwrap()
                        .route_packet(packet, now_us)
                } else {
                    self.dropped_packets += 1;
                    Ok(())
                }
            }
        }
    }

    /// an RTCP compound packet from the control endpoint
    pub fn route_control_packet(
        &mut self,
        packet: &Packet,
        now_us: u128,
        now_ns: i64,
    ) -> Result<(), Status> {
        let payload = match packet.rtcp() {
            Some(rtcp) => &rtcp.payload,
            None => return Err(Status::BadOperation),
        };
        let events = self.communicator.process(payload, now_ns)?;
        for event in events {
            self.apply_event(event, now_us);
        }
        Ok(())
    }

    fn apply_event(&mut self, event: RtcpEvent, _now_us: u128) -> () {
        match event {
            RtcpEvent::SenderClock {
                ssrc,
                origin_ns,
                rtp_timestamp,
            } => {
                if let Some(handle) = self.router.find_by_source(ssrc) {
                    if let Some(session) = self.sessions.get_mut(&handle) {
                        session.notify_sender_clock(origin_ns, rtp_timestamp);
                    }
                }
            }
            RtcpEvent::CnameBound { ssrc, cname } => match self.router.bind_cname(ssrc, &cname) {
                CnameAction::SetCname(handle) | CnameAction::Unified { handle } => {
                    if let Some(session) = self.sessions.get_mut(&handle) {
                        session.set_cname(&cname);
                    }
                }
                CnameAction::Conflict { halt } => {
                    if let Some(session) = self.sessions.get_mut(&halt) {
                        session.halt();
                    }
                }
                CnameAction::None => {}
            },
            RtcpEvent::Bye { ssrc } => {
                if let Some(handle) = self.router.find_by_source(ssrc) {
                    info!("group: BYE from {:#010x}, removing session now", ssrc);
                    self.router.remove_session(handle);
                    self.sessions.remove(&handle);
                }
            }
            RtcpEvent::RttMeasured { ssrc, rtt_ns } => {
                if let Some(handle) = self.router.find_by_source(ssrc) {
                    if let Some(session) = self.sessions.get_mut(&handle) {
                        session.notify_e2e_latency(rtt_ns / 2);
                    }
                }
            }
            RtcpEvent::RemoteReport { .. } => {
                // the receiver side has nothing to steer from remote RRs
            }
        }
    }

    /// prune, tune and schedule; returns the next deadline in microseconds
    pub fn refresh(&mut self, now_us: u128) -> u128 {
        let dead: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.is_alive(now_us))
            .map(|(h, _)| *h)
            .collect();
        for handle in dead {
            info!("group: removing dead session {}", handle);
            self.router.remove_session(handle);
            self.sessions.remove(&handle);
        }
        let mut deadline = now_us + 1_000_000;
        for session in self.sessions.values_mut() {
            deadline = deadline.min(session.refresh(now_us));
        }
        deadline.min(self.communicator.next_deadline())
    }

    /// compose the periodic receiver report when it is due
    pub fn make_report(&mut self, now_us: u128, now_ns: i64) -> Option<Packet> {
        if !self.communicator.should_report(now_us) {
            return None;
        }
        let streams: Vec<RecvReport> = self
            .sessions
            .values()
            .map(|session| session.recv_report())
            .collect();
        let bytes = self
            .communicator
            .generate_receiver_report(now_ns, now_us, &streams);
        let composer = RtcpComposer::new();
        let mut packet = Packet::new();
        packet.rtcp_mut().payload = bytes;
        if composer.prepare(&mut packet, 0).is_err() {
            return None;
        }
        if composer.compose(&mut packet).is_err() {
            return None;
        }
        packet.add_flags(Packet::COMPOSED);
        Some(packet)
    }

    /// mix one frame out of every live session
    pub fn read_frame(&mut self, frame: &mut Frame, _now_us: u128) -> Result<(), Status> {
        self.mixer.mix(self.sessions.values_mut(), frame)
    }

    /// slot wide metrics plus one entry per session
    pub fn metrics(&self, now_us: u128) -> serde_json::Value {
        let sessions: Vec<serde_json::Value> = self
            .sessions
            .values()
            .map(|session| session.metrics(now_us))
            .collect();
        json!({
            "num_sessions": self.sessions.len(),
            "dropped_packets": self.dropped_packets,
            "mix_power_db": self.mixer.get_power_db(),
            "router_conflicts": self.router.conflicts(),
            "reports_sent": self.communicator.reports_sent(),
            "reports_received": self.communicator.reports_received(),
            "sessions": sessions,
        })
    }

    /// halt everything, used by slot teardown
    pub fn halt_all(&mut self) -> () {
        for session in self.sessions.values_mut() {
            session.halt();
        }
    }
}
