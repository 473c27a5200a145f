//! the receiver pipeline: endpoints in, one mixed frame stream out.
//!
//! Network threads push parsed packets through endpoint writers; the loop
//! thread drains them into the session groups on every refresh tick and the
//! audio thread pulls frames from the slot it cares about.  Control plane
//! changes ride the task channel so they serialize against all of that.
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::mpsc;
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::json;

use crate::audio::frame::Frame;
use crate::audio::latency_tuner::LatencyBackend;
use crate::common::status::Status;
use crate::packet::encoding::{Encoding, EncodingMap};
use crate::packet::fec_headers::FecParser;
use crate::packet::model::Packet;
use crate::packet::rtcp::RtcpParser;
use crate::packet::rtp::RtpParser;
use crate::packet::Parser;
use crate::pipeline::config::{
    endpoint_set_is_complete, validate_endpoint_set, Interface, Protocol, ReceiverConfig,
};
use crate::pipeline::task_queue::{task_channel, TaskReceiver, TaskSender};
use crate::session::group::SessionGroup;
use crate::session::receiver_session::SessionConfig;

/// handed to the network thread that owns one endpoint's socket
pub struct ReceiverEndpointWriter {
    iface: Interface,
    parser: Arc<dyn Parser + Send + Sync>,
    encodings: Option<Arc<EncodingMap>>,
    max_packet_size: usize,
    tx: mpsc::Sender<Packet>,
}

impl Clone for ReceiverEndpointWriter {
    fn clone(&self) -> ReceiverEndpointWriter {
        ReceiverEndpointWriter {
            iface: self.iface,
            parser: self.parser.clone(),
            encodings: self.encodings.clone(),
            max_packet_size: self.max_packet_size,
            tx: self.tx.clone(),
        }
    }
}

impl ReceiverEndpointWriter {
    pub fn interface(&self) -> Interface {
        self.iface
    }
    /// parse wire bytes and hand the packet to the pipeline thread.
    ///
    /// Runs on the network thread; parse failures stay on this side of the
    /// queue and never reach the pipeline.
    pub fn write_bytes(&self, bytes: &[u8], src_addr: Option<SocketAddr>) -> Result<(), Status> {
        if bytes.len() > self.max_packet_size {
            return Err(Status::BadFormat);
        }
        let mut packet = Packet::new();
        self.parser.parse(&mut packet, bytes)?;
        if let Some(src) = src_addr {
            packet.udp_mut().src_addr = Some(src);
        }
        if packet.rtp().is_some() {
            if let Some(encodings) = &self.encodings {
                // the payload type tells us how long the packet is
                let rtp = packet.rtp().unwrap();
                let encoding = encodings.find(rtp.payload_type).ok_or(Status::BadFormat)?;
                let dur = encoding.decoder().decoded_sample_count(rtp.payload.len());
                packet.rtp_mut().duration = dur as u32;
            }
        }
        // a closed pipeline means the slot is gone: drop quietly
        self.tx.send(packet).map_err(|_| Status::NotFound)
    }
}

struct ReceiverEndpoint {
    proto: Protocol,
    rx: mpsc::Receiver<Packet>,
}

struct ReceiverSlot {
    endpoints: HashMap<Interface, ReceiverEndpoint>,
    group: SessionGroup,
    outbound_control: VecDeque<Packet>,
}

impl ReceiverSlot {
    fn endpoint_set(&self) -> Vec<(Interface, Protocol)> {
        self.endpoints
            .iter()
            .map(|(iface, ep)| (*iface, ep.proto))
            .collect()
    }
}

pub struct ReceiverPipeline {
    config: ReceiverConfig,
    encodings: Arc<EncodingMap>,
    slots: HashMap<usize, ReceiverSlot>,
    next_slot: usize,
}

impl ReceiverPipeline {
    pub fn new(config: ReceiverConfig) -> ReceiverPipeline {
        ReceiverPipeline::with_encodings(config, EncodingMap::new())
    }
    /// like new, but with caller registered encodings on top of the statics
    pub fn with_encodings(config: ReceiverConfig, mut encodings: EncodingMap) -> ReceiverPipeline {
        // the slot's negotiated encoding always resolves, statics included
        encodings.force_register(Encoding {
            payload_type: config.common.payload_type,
            spec: config.common.packet_spec,
            format: config.common.packet_format,
        });
        ReceiverPipeline {
            config: config,
            encodings: Arc::new(encodings),
            slots: HashMap::new(),
            next_slot: 0,
        }
    }
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            packet_spec: self.config.common.packet_spec,
            frame_spec: self.config.common.frame_spec,
            packet_format: self.config.common.packet_format,
            payload_type: self.config.common.payload_type,
            latency: self.config.latency,
            no_playback_timeout_us: self.config.no_playback_timeout_us,
            resampler_backend: self.config.common.resampler_backend,
            resampler_profile: self.config.common.resampler_profile,
            fec_scheme: self.config.common.fec_scheme,
            fec_nbsrc: self.config.common.fec_nbsrc,
            fec_nbrpr: self.config.common.fec_nbrpr,
        }
    }

    pub fn create_slot(&mut self, now_us: u128) -> usize {
        let slot_id = self.next_slot;
        self.next_slot += 1;
        let frame_samples = self
            .config
            .common
            .frame_spec
            .overall(self.config.common.samples_per_frame);
        self.slots.insert(
            slot_id,
            ReceiverSlot {
                endpoints: HashMap::new(),
                group: SessionGroup::new(
                    self.session_config(),
                    &self.config.cname,
                    self.config.local_source_id,
                    frame_samples,
                    now_us,
                ),
                outbound_control: VecDeque::new(),
            },
        );
        info!("receiver: slot {} created", slot_id);
        slot_id
    }

    pub fn delete_slot(&mut self, slot_id: usize) -> Result<(), Status> {
        let mut slot = self.slots.remove(&slot_id).ok_or(Status::NotFound)?;
        slot.group.halt_all();
        slot.outbound_control.clear();
        // endpoint receivers drop here; their writers start failing and the
        // network threads just drop traffic for the dead slot
        info!("receiver: slot {} deleted", slot_id);
        Ok(())
    }

    pub fn add_endpoint(
        &mut self,
        slot_id: usize,
        iface: Interface,
        proto: Protocol,
    ) -> Result<ReceiverEndpointWriter, Status> {
        let config = &self.config.common;
        let encodings = self.encodings.clone();
        let fec_scheme = proto.fec_scheme();
        let (nbsrc, nbrpr) = (config.fec_nbsrc, config.fec_nbrpr);
        let max_packet_size = config.max_packet_size;

        let slot = self.slots.get_mut(&slot_id).ok_or(Status::NotFound)?;
        if slot.endpoints.contains_key(&iface) {
            warn!("receiver: interface already activated on slot {}", slot_id);
            return Err(Status::BadOperation);
        }
        let mut proposed = slot.endpoint_set();
        proposed.push((iface, proto));
        validate_endpoint_set(&proposed)?;

        let parser: Arc<dyn Parser + Send + Sync> = match iface {
            Interface::AudioSource => match proto {
                Protocol::Rtp => Arc::new(RtpParser::new()),
                _ => Arc::new(FecParser::new_source(RtpParser::new())),
            },
            Interface::AudioRepair => Arc::new(FecParser::new_repair(RtpParser::new())),
            Interface::AudioControl => Arc::new(RtcpParser::new()),
        };
        if iface == Interface::AudioSource {
            slot.group.set_fec(fec_scheme, nbsrc, nbrpr);
        }

        let (tx, rx) = mpsc::channel();
        slot.endpoints.insert(
            iface,
            ReceiverEndpoint {
                proto: proto,
                rx: rx,
            },
        );
        info!(
            "receiver: endpoint {:?}/{:?} added to slot {}",
            iface, proto, slot_id
        );
        Ok(ReceiverEndpointWriter {
            iface: iface,
            parser: parser,
            encodings: match iface {
                Interface::AudioSource => Some(encodings),
                _ => None,
            },
            max_packet_size: max_packet_size,
            tx: tx,
        })
    }

    /// drain the inbound queues and run every group's upkeep.
    ///
    /// Returns the next deadline in microseconds.
    pub fn refresh(&mut self, now_us: u128, now_ns: i64) -> u128 {
        let mut deadline = now_us + 1_000_000;
        for slot in self.slots.values_mut() {
            for (iface, endpoint) in slot.endpoints.iter() {
                while let Ok(packet) = endpoint.rx.try_recv() {
                    let result = match iface {
                        Interface::AudioControl => {
                            slot.group.route_control_packet(&packet, now_us, now_ns)
                        }
                        _ => slot.group.route_transport_packet(packet, now_us),
                    };
                    if let Err(status) = result {
                        debug!("receiver: packet not routed: {}", status);
                    }
                }
            }
            deadline = deadline.min(slot.group.refresh(now_us));
            if slot.endpoints.contains_key(&Interface::AudioControl) {
                if let Some(report) = slot.group.make_report(now_us, now_ns) {
                    slot.outbound_control.push_back(report);
                }
            }
        }
        deadline
    }

    /// the audio thread pulls its frames through here
    pub fn read_frame(
        &mut self,
        slot_id: usize,
        frame: &mut Frame,
        now_us: u128,
    ) -> Result<(), Status> {
        let slot = self.slots.get_mut(&slot_id).ok_or(Status::NotFound)?;
        if !endpoint_set_is_complete(&slot.endpoint_set()) {
            return Err(Status::BadOperation);
        }
        slot.group.read_frame(frame, now_us)
    }

    /// composed RTCP packets waiting for the control socket
    pub fn take_control_packet(&mut self, slot_id: usize) -> Option<Packet> {
        self.slots
            .get_mut(&slot_id)
            .and_then(|slot| slot.outbound_control.pop_front())
    }

    pub fn metrics(&self, slot_id: usize, now_us: u128) -> Result<serde_json::Value, Status> {
        let slot = self.slots.get(&slot_id).ok_or(Status::NotFound)?;
        let backend = match self.config.latency.backend {
            LatencyBackend::Niq => "niq",
        };
        Ok(json!({
            "slot": slot_id,
            "complete": endpoint_set_is_complete(&slot.endpoint_set()),
            "latency_backend": backend,
            "group": slot.group.metrics(now_us),
        }))
    }
}

/// control plane requests the loop executes between ticks
pub enum ReceiverTask {
    CreateSlot,
    DeleteSlot(usize),
    AddEndpoint {
        slot: usize,
        iface: Interface,
        proto: Protocol,
    },
    QueryMetrics(usize),
}

/// what comes back on the reply channel
pub enum ReceiverTaskResult {
    Slot(usize),
    Endpoint(ReceiverEndpointWriter),
    Metrics(serde_json::Value),
    Done,
    Failed(Status),
}

/// single threaded owner of a receiver pipeline
pub struct ReceiverLoop {
    pipeline: ReceiverPipeline,
    tasks: TaskReceiver<ReceiverTask, ReceiverTaskResult>,
}

impl ReceiverLoop {
    pub fn new(config: ReceiverConfig) -> (ReceiverLoop, TaskSender<ReceiverTask, ReceiverTaskResult>) {
        let (tx, rx) = task_channel();
        (
            ReceiverLoop {
                pipeline: ReceiverPipeline::new(config),
                tasks: rx,
            },
            tx,
        )
    }
    pub fn pipeline_mut(&mut self) -> &mut ReceiverPipeline {
        &mut self.pipeline
    }

    /// thread entry point: tick until the stop channel fires.
    ///
    /// Sleeps up to the deadline each turn so refresh runs at least as
    /// often as the sessions asked for.
    pub fn run(&mut self, stop: mpsc::Receiver<()>) -> Result<(), crate::common::box_error::BoxError> {
        use simple_error::bail;
        loop {
            match stop.try_recv() {
                Ok(()) => return Ok(()),
                Err(mpsc::TryRecvError::Disconnected) => {
                    bail!("receiver loop: stop channel lost")
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }
            let now_us = crate::utils::get_micro_time();
            let deadline = self.tick(now_us, crate::utils::get_nano_time());
            let sleep_us = deadline
                .saturating_sub(crate::utils::get_micro_time())
                .min(10_000);
            if sleep_us > 0 {
                std::thread::sleep(std::time::Duration::from_micros(sleep_us as u64));
            }
        }
    }

    /// one turn of the loop: tasks first, then the data plane refresh.
    ///
    /// Tasks see a quiescent pipeline because both run on this thread.
    pub fn tick(&mut self, now_us: u128, now_ns: i64) -> u128 {
        let pipeline = &mut self.pipeline;
        let tasks = &mut self.tasks;
        tasks.process(|task| match task {
            ReceiverTask::CreateSlot => ReceiverTaskResult::Slot(pipeline.create_slot(now_us)),
            ReceiverTask::DeleteSlot(slot) => match pipeline.delete_slot(slot) {
                Ok(()) => ReceiverTaskResult::Done,
                Err(status) => ReceiverTaskResult::Failed(status),
            },
            ReceiverTask::AddEndpoint { slot, iface, proto } => {
                match pipeline.add_endpoint(slot, iface, proto) {
                    Ok(writer) => ReceiverTaskResult::Endpoint(writer),
                    Err(status) => ReceiverTaskResult::Failed(status),
                }
            }
            ReceiverTask::QueryMetrics(slot) => match pipeline.metrics(slot, now_us) {
                Ok(metrics) => ReceiverTaskResult::Metrics(metrics),
                Err(status) => ReceiverTaskResult::Failed(status),
            },
        });
        pipeline.refresh(now_us, now_ns)
    }
}

#[cfg(test)]
mod test_receiver {
    use super::*;
    use crate::audio::pcm::{PcmEncoder, PcmFormat};
    use crate::audio::sample_spec::SampleSpec;
    use crate::packet::rtp::RtpComposer;
    use crate::packet::Composer;
    use std::thread;

    const NOW_NS: i64 = 1_700_000_000_000_000_000;

    fn config() -> ReceiverConfig {
        let mut config = ReceiverConfig::default();
        config.common.packet_spec = SampleSpec::new(100, 2);
        config.common.frame_spec = SampleSpec::new(100, 2);
        config.common.samples_per_packet = 50;
        config.common.samples_per_frame = 50;
        config
    }

    fn rtp_bytes(ssrc: u32, ts: u32, seq: u16, value: f32) -> Vec<u8> {
        let spec = SampleSpec::new(100, 2);
        let enc = PcmEncoder::new(PcmFormat::S16Be, spec);
        let composer = RtpComposer::new();
        let mut packet = Packet::new();
        composer
            .prepare(&mut packet, enc.encoded_byte_count(50))
            .unwrap();
        {
            let rtp = packet.rtp_mut();
            rtp.source_id = ssrc;
            rtp.payload_type = 10;
            rtp.seqnum = seq;
            rtp.stream_timestamp = ts;
        }
        let samples = vec![value; 100];
        let mut payload = vec![0u8; enc.encoded_byte_count(50)];
        enc.encode(&samples, &mut payload).unwrap();
        packet.rtp_mut().payload.copy_from_slice(&payload);
        composer.compose(&mut packet).unwrap();
        packet.buffer().to_vec()
    }

    #[test]
    fn bytes_in_frames_out() {
        let mut pipeline = ReceiverPipeline::new(config());
        let slot = pipeline.create_slot(0);
        let writer = pipeline
            .add_endpoint(slot, Interface::AudioSource, Protocol::Rtp)
            .unwrap();
        for n in 0..4u32 {
            writer
                .write_bytes(
                    &rtp_bytes(0x77, n * 50, n as u16, 0.25),
                    Some("10.0.0.2:4000".parse().unwrap()),
                )
                .unwrap();
        }
        pipeline.refresh(1_000, NOW_NS);
        let mut frame = Frame::new(100);
        pipeline.read_frame(slot, &mut frame, 2_000).unwrap();
        assert!(frame.has_flags(Frame::NOT_BLANK));
        for v in &frame.samples()[..90] {
            assert!((v - 0.25).abs() < 0.01);
        }
    }
    #[test]
    fn unknown_slot_is_not_found() {
        let mut pipeline = ReceiverPipeline::new(config());
        let mut frame = Frame::new(100);
        assert_eq!(
            pipeline.read_frame(99, &mut frame, 0),
            Err(Status::NotFound)
        );
        assert_eq!(pipeline.delete_slot(99), Err(Status::NotFound));
    }
    #[test]
    fn incomplete_slot_refuses_frames() {
        let mut pipeline = ReceiverPipeline::new(config());
        let slot = pipeline.create_slot(0);
        let mut frame = Frame::new(100);
        assert_eq!(
            pipeline.read_frame(slot, &mut frame, 0),
            Err(Status::BadOperation)
        );
    }
    #[test]
    fn duplicate_interface_refused() {
        let mut pipeline = ReceiverPipeline::new(config());
        let slot = pipeline.create_slot(0);
        pipeline
            .add_endpoint(slot, Interface::AudioSource, Protocol::Rtp)
            .unwrap();
        assert!(pipeline
            .add_endpoint(slot, Interface::AudioSource, Protocol::Rtp)
            .is_err());
    }
    #[test]
    fn deleted_slot_drops_inbound() {
        let mut pipeline = ReceiverPipeline::new(config());
        let slot = pipeline.create_slot(0);
        let writer = pipeline
            .add_endpoint(slot, Interface::AudioSource, Protocol::Rtp)
            .unwrap();
        pipeline.delete_slot(slot).unwrap();
        // the network thread keeps feeding bytes and just loses them
        assert_eq!(
            writer.write_bytes(&rtp_bytes(0x77, 0, 0, 0.1), None),
            Err(Status::NotFound)
        );
    }
    #[test]
    fn garbage_bytes_rejected_on_network_thread() {
        let mut pipeline = ReceiverPipeline::new(config());
        let slot = pipeline.create_slot(0);
        let writer = pipeline
            .add_endpoint(slot, Interface::AudioSource, Protocol::Rtp)
            .unwrap();
        assert_eq!(
            writer.write_bytes(&[1, 2, 3], None),
            Err(Status::BadFormat)
        );
        let oversized = vec![0u8; 100_000];
        assert_eq!(writer.write_bytes(&oversized, None), Err(Status::BadFormat));
    }
    #[test]
    fn control_tasks_serialize_through_the_loop() {
        let (mut rx_loop, control) = ReceiverLoop::new(config());
        let worker = thread::spawn(move || {
            let slot = match control.schedule_and_wait(ReceiverTask::CreateSlot).unwrap() {
                ReceiverTaskResult::Slot(slot) => slot,
                _ => panic!("expected a slot"),
            };
            let writer = match control
                .schedule_and_wait(ReceiverTask::AddEndpoint {
                    slot: slot,
                    iface: Interface::AudioSource,
                    proto: Protocol::Rtp,
                })
                .unwrap()
            {
                ReceiverTaskResult::Endpoint(writer) => writer,
                _ => panic!("expected an endpoint"),
            };
            (slot, writer)
        });
        // loop ticks until the worker got everything it asked for
        while !worker.is_finished() {
            rx_loop.tick(0, NOW_NS);
        }
        let (slot, writer) = worker.join().unwrap();
        writer
            .write_bytes(&rtp_bytes(0x77, 0, 0, 0.2), None)
            .unwrap();
        rx_loop.tick(1_000, NOW_NS);
        let metrics = rx_loop.pipeline_mut().metrics(slot, 1_000).unwrap();
        assert_eq!(metrics["group"]["num_sessions"], 1);
    }
}
