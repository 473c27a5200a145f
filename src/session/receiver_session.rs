//! everything the receiver keeps per remote sender.
//!
//! A session owns the whole per-stream chain: the jitter queue or FEC block
//! assembler, the depacketizer, the resampler the tuner drives, and the
//! statistics that end up in RTCP receiver reports and user metrics.  The
//! mixer pulls one frame per tick from each live session.
use std::net::SocketAddr;

use log::{debug, info};
use serde_json::json;

use crate::audio::depacketizer::Depacketizer;
use crate::audio::frame::{Frame, FrameReader};
use crate::audio::latency_tuner::{LatencyConfig, LatencyTuner};
use crate::audio::pcm::{PcmDecoder, PcmFormat};
use crate::audio::resampler::{Resampler, ResamplerBackend, ResamplerProfile};
use crate::audio::sample_spec::SampleSpec;
use crate::audio::watchdog::Watchdog;
use crate::common::status::Status;
use crate::fec::block_reader::BlockReader;
use crate::fec::codec::{BlockCodec, FecScheme};
use crate::packet::model::Packet;
use crate::packet::ordering;
use crate::packet::queue::SortedQueue;
use crate::packet::{PacketReader, PacketWriter};

/// how a session gets its ordered source packets
pub enum SessionReader {
    /// no FEC: straight out of the jitter queue
    Plain(SortedQueue),
    /// FEC: through the block assembler
    Fec(BlockReader),
}

impl SessionReader {
    fn queued_duration(&self) -> u32 {
        match self {
            SessionReader::Plain(queue) => queue.queued_duration(),
            SessionReader::Fec(reader) => reader.queued_duration(),
        }
    }
}

impl PacketReader for SessionReader {
    fn read(&mut self) -> Result<Packet, Status> {
        match self {
            SessionReader::Plain(queue) => queue.read(),
            SessionReader::Fec(reader) => reader.read(),
        }
    }
}

/// per-session knobs, filled in from the receiver pipeline config
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub packet_spec: SampleSpec,
    pub frame_spec: SampleSpec,
    pub packet_format: PcmFormat,
    pub payload_type: u8,
    pub latency: LatencyConfig,
    pub no_playback_timeout_us: u128,
    pub resampler_backend: ResamplerBackend,
    pub resampler_profile: ResamplerProfile,
    pub fec_scheme: FecScheme,
    pub fec_nbsrc: usize,
    pub fec_nbrpr: usize,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            packet_spec: SampleSpec::new(48000, 2),
            frame_spec: SampleSpec::new(48000, 2),
            packet_format: PcmFormat::S16Be,
            payload_type: 10,
            latency: LatencyConfig::default(),
            no_playback_timeout_us: 2_000_000,
            resampler_backend: ResamplerBackend::Default,
            resampler_profile: ResamplerProfile::Medium,
            fec_scheme: FecScheme::None,
            fec_nbsrc: 10,
            fec_nbrpr: 5,
        }
    }
}

pub struct ReceiverSession {
    source_id: u32,
    repair_source_id: Option<u32>,
    address: Option<SocketAddr>,
    cname: Option<String>,

    depacketizer: Depacketizer<SessionReader>,
    resampler: Resampler,
    tuner: LatencyTuner,
    watchdog: Watchdog,
    spec: SampleSpec,
    packet_spec: SampleSpec,

    // loss and jitter bookkeeping for receiver reports
    max_seqnum: Option<u16>,
    cumulative_lost: i64,
    jitter: f64,
    last_arrival_us: Option<u128>,
    last_rtp_ts: u32,

    // sender clock mapping learned from SRs
    clock_map: Option<(i64, u32)>,

    packets_received: u64,
    halted: bool,
    created_at: u128,
    now_us: u128,
}

impl ReceiverSession {
    pub fn new(
        source_id: u32,
        address: Option<SocketAddr>,
        config: &SessionConfig,
        now_us: u128,
    ) -> Result<ReceiverSession, Status> {
        let reader = match BlockCodec::new(config.fec_scheme, config.fec_nbsrc, config.fec_nbrpr)? {
            Some(codec) => {
                let window = config
                    .packet_spec
                    .ns_to_samples_per_chan(config.latency.max_latency_ns)
                    as u32;
                SessionReader::Fec(BlockReader::new(
                    codec,
                    PcmDecoder::new(config.packet_format, config.packet_spec),
                    window,
                ))
            }
            None => SessionReader::Plain(SortedQueue::new()),
        };
        info!(
            "session: created for source {:#010x} fec={}",
            source_id, config.fec_scheme
        );
        Ok(ReceiverSession {
            source_id: source_id,
            repair_source_id: None,
            address: address,
            cname: None,
            depacketizer: Depacketizer::new(
                reader,
                PcmDecoder::new(config.packet_format, config.packet_spec),
                config.packet_spec,
            ),
            resampler: Resampler::new(
                config.resampler_backend,
                config.resampler_profile,
                config.packet_spec,
                config.frame_spec,
            ),
            tuner: LatencyTuner::new(config.latency, config.packet_spec),
            watchdog: Watchdog::new(config.no_playback_timeout_us, now_us),
            spec: config.frame_spec,
            packet_spec: config.packet_spec,
            max_seqnum: None,
            cumulative_lost: 0,
            jitter: 0.0,
            last_arrival_us: None,
            last_rtp_ts: 0,
            clock_map: None,
            packets_received: 0,
            halted: false,
            created_at: now_us,
            now_us: now_us,
        })
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }
    pub fn repair_source_id(&self) -> Option<u32> {
        self.repair_source_id
    }
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }
    pub fn cname(&self) -> Option<&str> {
        self.cname.as_deref()
    }
    pub fn set_cname(&mut self, cname: &str) -> () {
        self.cname = Some(String::from(cname));
    }
    pub fn adopt_repair_source(&mut self, source_id: u32) -> () {
        self.repair_source_id = Some(source_id);
    }
    pub fn halt(&mut self) -> () {
        if !self.halted {
            info!("session: halting source {:#010x}", self.source_id);
            self.halted = true;
        }
    }
    pub fn is_halted(&self) -> bool {
        self.halted
    }
    pub fn is_alive(&self, now_us: u128) -> bool {
        !self.halted && self.watchdog.is_alive(now_us)
    }

    fn track_source_stats(&mut self, packet: &Packet, now_us: u128) -> () {
        let rtp = match packet.rtp() {
            Some(rtp) => rtp,
            None => return,
        };
        self.packets_received += 1;
        match self.max_seqnum {
            Some(max) => {
                let diff = ordering::seq_diff(rtp.seqnum, max);
                if diff > 1 {
                    self.cumulative_lost += diff as i64 - 1;
                    self.max_seqnum = Some(rtp.seqnum);
                } else if diff > 0 {
                    self.max_seqnum = Some(rtp.seqnum);
                } else {
                    // reordered arrival made up for an assumed loss
                    self.cumulative_lost = (self.cumulative_lost - 1).max(0);
                }
            }
            None => self.max_seqnum = Some(rtp.seqnum),
        }
        // RFC 3550 interarrival jitter, in timestamp units
        if let Some(last_us) = self.last_arrival_us {
            let arrival_diff = (now_us.saturating_sub(last_us)) as f64 / 1_000_000.0
                * self.packet_spec.rate() as f64;
            let ts_diff = ordering::ts_diff(rtp.stream_timestamp, self.last_rtp_ts) as f64;
            let d = (arrival_diff - ts_diff).abs();
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_arrival_us = Some(now_us);
        self.last_rtp_ts = rtp.stream_timestamp;
    }

    /// a transport packet the router decided belongs to us
    pub fn route_packet(&mut self, mut packet: Packet, now_us: u128) -> Result<(), Status> {
        self.now_us = self.now_us.max(now_us);
        let repair = packet.fec().map_or(false, |fec| fec.repair);
        if !repair {
            self.track_source_stats(&packet, now_us);
            // packets before the first SR carry no capture time; once the
            // sender clock is known, derive it from the stream timestamp
            if let Some((origin_ns, rtp_ts)) = self.clock_map {
                let rtp = packet.rtp_mut();
                if rtp.capture_timestamp == 0 {
                    let delta =
                        ordering::ts_diff(rtp.stream_timestamp, rtp_ts) as i64;
                    rtp.capture_timestamp = origin_ns
                        + delta * 1_000_000_000 / self.packet_spec.rate() as i64;
                }
            }
        }
        match self.depacketizer.reader_mut() {
            SessionReader::Plain(queue) => {
                if repair {
                    debug!("session: repair packet on a no-fec session, dropped");
                    return Ok(());
                }
                queue.write(packet)
            }
            SessionReader::Fec(reader) => {
                if repair {
                    reader.write_repair(packet)
                } else {
                    reader.write_source(packet)
                }
            }
        }
    }

    /// wall clock mapping from the sender's SR
    pub fn notify_sender_clock(&mut self, origin_ns: i64, rtp_ts: u32) -> () {
        self.clock_map = Some((origin_ns, rtp_ts));
    }
    /// e2e latency measured by the control loop
    pub fn notify_e2e_latency(&mut self, latency_ns: i64) -> () {
        self.tuner.report_e2e_latency(latency_ns);
    }

    /// periodic upkeep, returns the next deadline in microseconds
    pub fn refresh(&mut self, now_us: u128) -> u128 {
        self.now_us = self.now_us.max(now_us);
        let queued = self.depacketizer.reader_mut().queued_duration();
        self.tuner.update(queued as usize, now_us);
        if let Some(scaling) = self.tuner.scaling() {
            self.resampler.set_scaling(scaling);
        }
        // a refresh per half target latency keeps the tuner fed
        now_us + (self.tuner.target_latency_ns() / 2_000).max(1_000) as u128
    }

    /// numbers for the RTCP receiver report on this stream
    pub fn recv_report(&self) -> crate::rtcp::reports::RecvReport {
        let expected = self.packets_received + self.cumulative_lost as u64;
        crate::rtcp::reports::RecvReport {
            ssrc: self.source_id,
            fraction_lost: if expected == 0 {
                0.0
            } else {
                self.cumulative_lost as f64 / expected as f64
            },
            cumulative_lost: self.cumulative_lost,
            last_seqnum: self.max_seqnum.unwrap_or(0) as u32,
            jitter: self.jitter as u32,
        }
    }

    /// snapshot handed to metrics queries
    pub fn metrics(&self, now_us: u128) -> serde_json::Value {
        json!({
            "source_id": self.source_id,
            "cname": self.cname,
            "packets_received": self.packets_received,
            "cumulative_lost": self.cumulative_lost,
            "jitter": self.jitter,
            "late_drops": self.depacketizer.late_drops(),
            "fill_ratio": self.depacketizer.fill_ratio(),
            "e2e_latency_ns": self.tuner.e2e_latency_ns(),
            "current_latency_ns": self.tuner.current_latency_ns(),
            "latency_violations": self.tuner.violations(),
            "choppy_periods": self.watchdog.choppy_periods(),
            "age_us": now_us.saturating_sub(self.created_at),
            "halted": self.halted,
        })
    }

    /// pull one frame and run the supervision that hangs off it
    pub fn read_frame(&mut self, frame: &mut Frame, now_us: u128) -> Result<(), Status> {
        self.now_us = self.now_us.max(now_us);
        self.read(frame)
    }
}

impl FrameReader for ReceiverSession {
    fn read(&mut self, frame: &mut Frame) -> Result<(), Status> {
        frame.clear();
        let n_ch = self.spec.num_channels();
        let out_per_chan = frame.num_samples() / n_ch;
        let mut flags = 0u8;
        let mut capture_ts = 0i64;

        loop {
            let need = self.resampler.needed_input(out_per_chan);
            if need == 0 {
                break;
            }
            let mut scratch = Frame::new(need * n_ch);
            self.depacketizer.read(&mut scratch)?;
            flags |= scratch.flags();
            if capture_ts == 0 && scratch.capture_timestamp() != 0 {
                capture_ts = scratch.capture_timestamp();
            }
            self.resampler.write_input(scratch.samples());
        }
        let produced = self.resampler.read_output(frame.samples_mut());
        if produced < out_per_chan {
            flags |= Frame::NOT_COMPLETE;
        }
        frame.add_flags(flags);
        frame.set_capture_timestamp(capture_ts);
        self.watchdog.update_frame(frame, self.now_us);
        Ok(())
    }
}

#[cfg(test)]
mod test_receiver_session {
    use super::*;
    use crate::audio::pcm::PcmEncoder;

    fn config() -> SessionConfig {
        SessionConfig {
            packet_spec: SampleSpec::new(100, 2),
            frame_spec: SampleSpec::new(100, 2),
            ..Default::default()
        }
    }
    fn source_packet(ts: u32, seq: u16, value: f32) -> Packet {
        let spec = SampleSpec::new(100, 2);
        let enc = PcmEncoder::new(PcmFormat::S16Be, spec);
        let mut packet = Packet::new();
        let rtp = packet.rtp_mut();
        rtp.source_id = 0x99;
        rtp.seqnum = seq;
        rtp.stream_timestamp = ts;
        rtp.duration = 50;
        rtp.payload = vec![0u8; enc.encoded_byte_count(50)];
        let samples = vec![value; 100];
        enc.encode(&samples, &mut packet.rtp_mut().payload).unwrap();
        packet
    }

    #[test]
    fn packets_come_back_as_frames() {
        let mut session = ReceiverSession::new(0x99, None, &config(), 0).unwrap();
        for n in 0..4u32 {
            session
                .route_packet(source_packet(n * 50, n as u16, 0.3), 1000 * n as u128)
                .unwrap();
        }
        let mut frame = Frame::new(100);
        session.read_frame(&mut frame, 5000).unwrap();
        assert!(frame.has_flags(Frame::NOT_BLANK));
        for v in &frame.samples()[..90] {
            assert!((v - 0.3).abs() < 0.01);
        }
    }
    #[test]
    fn loss_shows_in_recv_report() {
        let mut session = ReceiverSession::new(0x99, None, &config(), 0).unwrap();
        session.route_packet(source_packet(0, 0, 0.1), 0).unwrap();
        // sequence 1 and 2 never arrive
        session.route_packet(source_packet(150, 3, 0.1), 1000).unwrap();
        let report = session.recv_report();
        assert_eq!(report.cumulative_lost, 2);
        assert_eq!(report.ssrc, 0x99);
        assert!(report.fraction_lost > 0.0);
    }
    #[test]
    fn clock_map_fills_missing_capture_times() {
        let mut session = ReceiverSession::new(0x99, None, &config(), 0).unwrap();
        let origin = 1_700_000_000_000_000_000i64;
        session.notify_sender_clock(origin, 0);
        session.route_packet(source_packet(100, 0, 0.2), 0).unwrap();
        let mut frame = Frame::new(100);
        session.read_frame(&mut frame, 1000).unwrap();
        // 100 samples at 100Hz past the origin is exactly one second
        assert_eq!(frame.capture_timestamp(), origin + 1_000_000_000);
    }
    #[test]
    fn halted_session_is_dead() {
        let mut session = ReceiverSession::new(0x99, None, &config(), 0).unwrap();
        assert!(session.is_alive(0));
        session.halt();
        assert!(!session.is_alive(0));
    }
    #[test]
    fn refresh_returns_future_deadline() {
        let mut session = ReceiverSession::new(0x99, None, &config(), 0).unwrap();
        let deadline = session.refresh(1_000_000);
        assert!(deadline > 1_000_000);
    }
    #[test]
    fn metrics_snapshot() {
        let mut session = ReceiverSession::new(0x99, None, &config(), 0).unwrap();
        session.set_cname("host@example");
        let m = session.metrics(10);
        assert_eq!(m["source_id"], 0x99);
        assert_eq!(m["cname"], "host@example");
        assert_eq!(m["halted"], false);
    }
}
