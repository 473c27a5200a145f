//! the sender pipeline: frames in, addressed wire packets out.
//!
//! The chain per slot is packetizer, then optionally the FEC block writer,
//! then optionally the interleaver, and finally one shipper per endpoint
//! stamping destinations.  The concrete chain shape is fixed when the
//! slot's endpoint set becomes complete.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::mpsc;

use log::{debug, info, warn};
use serde_json::json;

use crate::audio::frame::{Frame, FrameWriter};
use crate::audio::pcm::PcmEncoder;
use crate::audio::resampler::Resampler;
use crate::common::status::Status;
use crate::fec::block_writer::BlockWriter;
use crate::fec::codec::BlockCodec;
use crate::packet::fec_headers::FecComposer;
use crate::packet::model::Packet;
use crate::packet::queue::ChannelWriter;
use crate::packet::rtcp::RtcpComposer;
use crate::packet::rtp::RtpComposer;
use crate::packet::shipper::Shipper;
use crate::packet::interleaver::Interleaver;
use crate::packet::{Composer, PacketWriter};
use crate::pipeline::config::{
    endpoint_set_is_complete, validate_endpoint_set, Interface, Protocol, SenderConfig,
};
use crate::pipeline::task_queue::{task_channel, TaskReceiver, TaskSender};
use crate::audio::packetizer::Packetizer;
use crate::rtcp::participant::{Communicator, RtcpEvent};
use crate::rtcp::reports::SendReport;

/// routes a mixed source/repair stream onto the two endpoint shippers
pub struct SplitShipper {
    source: Shipper<FecComposer<RtpComposer>, ChannelWriter>,
    repair: Shipper<FecComposer<RtpComposer>, ChannelWriter>,
}

impl PacketWriter for SplitShipper {
    fn write(&mut self, packet: Packet) -> Result<(), Status> {
        if packet.fec().map_or(false, |fec| fec.repair) {
            self.repair.write(packet)
        } else {
            self.source.write(packet)
        }
    }
}

enum SenderChain {
    Plain(Packetizer<RtpComposer, Shipper<RtpComposer, ChannelWriter>>),
    PlainInterleaved(Packetizer<RtpComposer, Interleaver<Shipper<RtpComposer, ChannelWriter>>>),
    Fec(Packetizer<FecComposer<RtpComposer>, BlockWriter<FecComposer<RtpComposer>, SplitShipper>>),
    FecInterleaved(
        Packetizer<
            FecComposer<RtpComposer>,
            BlockWriter<FecComposer<RtpComposer>, Interleaver<SplitShipper>>,
        >,
    ),
}

impl SenderChain {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), Status> {
        match self {
            SenderChain::Plain(p) => p.write(frame),
            SenderChain::PlainInterleaved(p) => p.write(frame),
            SenderChain::Fec(p) => p.write(frame),
            SenderChain::FecInterleaved(p) => p.write(frame),
        }
    }
    fn flush(&mut self) -> Result<(), Status> {
        match self {
            SenderChain::Plain(p) => p.flush(),
            SenderChain::PlainInterleaved(p) => {
                p.flush()?;
                p.writer_mut().flush()
            }
            SenderChain::Fec(p) => p.flush(),
            SenderChain::FecInterleaved(p) => {
                p.flush()?;
                p.writer_mut().writer_mut().flush()
            }
        }
    }
    fn stats(&self) -> (u32, u32, u32) {
        match self {
            SenderChain::Plain(p) => p.stats(),
            SenderChain::PlainInterleaved(p) => p.stats(),
            SenderChain::Fec(p) => p.stats(),
            SenderChain::FecInterleaved(p) => p.stats(),
        }
    }
}

struct PendingEndpoint {
    proto: Protocol,
    dest: Option<SocketAddr>,
    tx: mpsc::Sender<Packet>,
}

struct SenderSlot {
    pending: HashMap<Interface, PendingEndpoint>,
    chain: Option<SenderChain>,
    resampler: Resampler,
    control: Option<Shipper<RtcpComposer, ChannelWriter>>,
    communicator: Communicator,
    remote_fraction_lost: f64,
    remote_jitter: u32,
    rtt_ns: i64,
}

impl SenderSlot {
    fn endpoint_set(&self) -> Vec<(Interface, Protocol)> {
        self.pending
            .iter()
            .map(|(iface, ep)| (*iface, ep.proto))
            .collect()
    }
    fn is_complete(&self) -> bool {
        self.chain.is_some()
    }
}

pub struct SenderPipeline {
    config: SenderConfig,
    slots: HashMap<usize, SenderSlot>,
    next_slot: usize,
}

impl SenderPipeline {
    pub fn new(config: SenderConfig) -> SenderPipeline {
        SenderPipeline {
            config: config,
            slots: HashMap::new(),
            next_slot: 0,
        }
    }
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn create_slot(&mut self, now_us: u128) -> usize {
        let slot_id = self.next_slot;
        self.next_slot += 1;
        self.slots.insert(
            slot_id,
            SenderSlot {
                pending: HashMap::new(),
                chain: None,
                resampler: Resampler::new(
                    self.config.common.resampler_backend,
                    self.config.common.resampler_profile,
                    self.config.common.frame_spec,
                    self.config.common.packet_spec,
                ),
                control: None,
                communicator: Communicator::new(
                    &self.config.cname,
                    self.config.source_id,
                    now_us,
                ),
                remote_fraction_lost: 0.0,
                remote_jitter: 0,
                rtt_ns: 0,
            },
        );
        info!("sender: slot {} created", slot_id);
        slot_id
    }

    pub fn delete_slot(&mut self, slot_id: usize) -> Result<(), Status> {
        let mut slot = self.slots.remove(&slot_id).ok_or(Status::NotFound)?;
        // push out whatever is still buffered before the queues close
        if let Some(chain) = slot.chain.as_mut() {
            if let Err(status) = chain.flush() {
                debug!("sender: flush on teardown failed: {}", status);
            }
        }
        info!("sender: slot {} deleted", slot_id);
        Ok(())
    }

    /// activate an interface; returns the queue the network thread drains
    pub fn add_endpoint(
        &mut self,
        slot_id: usize,
        iface: Interface,
        proto: Protocol,
        dest: Option<SocketAddr>,
    ) -> Result<mpsc::Receiver<Packet>, Status> {
        let slot = self.slots.get_mut(&slot_id).ok_or(Status::NotFound)?;
        if slot.pending.contains_key(&iface) {
            warn!("sender: interface already activated on slot {}", slot_id);
            return Err(Status::BadOperation);
        }
        let mut proposed = slot.endpoint_set();
        proposed.push((iface, proto));
        validate_endpoint_set(&proposed)?;

        let (tx, rx) = mpsc::channel();
        if iface == Interface::AudioControl {
            slot.control = Some(Shipper::new(
                RtcpComposer::new(),
                ChannelWriter::new(tx.clone()),
                dest,
            ));
        }
        slot.pending.insert(
            iface,
            PendingEndpoint {
                proto: proto,
                dest: dest,
                tx: tx,
            },
        );
        info!(
            "sender: endpoint {:?}/{:?} added to slot {}",
            iface, proto, slot_id
        );
        self.try_build_chain(slot_id)?;
        Ok(rx)
    }

    fn try_build_chain(&mut self, slot_id: usize) -> Result<(), Status> {
        let config = &self.config;
        let slot = self.slots.get_mut(&slot_id).ok_or(Status::NotFound)?;
        if slot.chain.is_some() || !endpoint_set_is_complete(&slot.endpoint_set()) {
            return Ok(());
        }
        let source = slot.pending.get(&Interface::AudioSource).unwrap();
        let encoder = PcmEncoder::new(config.common.packet_format, config.common.packet_spec);
        let scheme = source.proto.fec_scheme();

        let chain = match BlockCodec::new(scheme, config.common.fec_nbsrc, config.common.fec_nbrpr)?
        {
            None => {
                let shipper = Shipper::new(
                    RtpComposer::new(),
                    ChannelWriter::new(source.tx.clone()),
                    source.dest,
                );
                if config.interleaving {
                    SenderChain::PlainInterleaved(Packetizer::new(
                        RtpComposer::new(),
                        Interleaver::new(shipper),
                        encoder,
                        config.common.packet_spec,
                        config.common.payload_type,
                        config.source_id,
                        config.common.samples_per_packet,
                    ))
                } else {
                    SenderChain::Plain(Packetizer::new(
                        RtpComposer::new(),
                        shipper,
                        encoder,
                        config.common.packet_spec,
                        config.common.payload_type,
                        config.source_id,
                        config.common.samples_per_packet,
                    ))
                }
            }
            Some(codec) => {
                let repair = slot
                    .pending
                    .get(&Interface::AudioRepair)
                    .ok_or(Status::BadOperation)?;
                let split = SplitShipper {
                    source: Shipper::new(
                        FecComposer::new(RtpComposer::new()),
                        ChannelWriter::new(source.tx.clone()),
                        source.dest,
                    ),
                    repair: Shipper::new(
                        FecComposer::new(RtpComposer::new()),
                        ChannelWriter::new(repair.tx.clone()),
                        repair.dest,
                    ),
                };
                if config.interleaving {
                    SenderChain::FecInterleaved(Packetizer::new(
                        FecComposer::new(RtpComposer::new()),
                        BlockWriter::new(
                            FecComposer::new(RtpComposer::new()),
                            Interleaver::new(split),
                            codec,
                        ),
                        encoder,
                        config.common.packet_spec,
                        config.common.payload_type,
                        config.source_id,
                        config.common.samples_per_packet,
                    ))
                } else {
                    SenderChain::Fec(Packetizer::new(
                        FecComposer::new(RtpComposer::new()),
                        BlockWriter::new(
                            FecComposer::new(RtpComposer::new()),
                            split,
                            codec,
                        ),
                        encoder,
                        config.common.packet_spec,
                        config.common.payload_type,
                        config.source_id,
                        config.common.samples_per_packet,
                    ))
                }
            }
        };
        slot.chain = Some(chain);
        info!("sender: slot {} chain complete ({})", slot_id, scheme);
        Ok(())
    }

    /// the device thread pushes its frames through here
    pub fn write_frame(&mut self, slot_id: usize, frame: &Frame) -> Result<(), Status> {
        let config = &self.config;
        let slot = self.slots.get_mut(&slot_id).ok_or(Status::NotFound)?;
        let chain = slot.chain.as_mut().ok_or(Status::BadOperation)?;

        if config.common.frame_spec == config.common.packet_spec {
            return chain.write_frame(frame);
        }
        // rates differ: run the sender side resampler in between
        slot.resampler.write_input(frame.samples());
        let n_ch = config.common.packet_spec.num_channels();
        loop {
            let mut scratch = Frame::new(config.common.samples_per_packet * n_ch);
            let produced = slot.resampler.read_output(scratch.samples_mut());
            if produced == 0 {
                return Ok(());
            }
            scratch.set_capture_timestamp(frame.capture_timestamp());
            if produced * n_ch < scratch.num_samples() {
                let mut partial = Frame::new(produced * n_ch);
                partial
                    .samples_mut()
                    .copy_from_slice(&scratch.samples()[..produced * n_ch]);
                partial.set_capture_timestamp(frame.capture_timestamp());
                chain.write_frame(&partial)?;
                return Ok(());
            }
            chain.write_frame(&scratch)?;
        }
    }

    /// push out partial packets when the stream pauses
    pub fn flush(&mut self, slot_id: usize) -> Result<(), Status> {
        let slot = self.slots.get_mut(&slot_id).ok_or(Status::NotFound)?;
        match slot.chain.as_mut() {
            Some(chain) => chain.flush(),
            None => Ok(()),
        }
    }

    /// feedback from the remote receiver's control stream
    pub fn receive_control(
        &mut self,
        slot_id: usize,
        bytes: &[u8],
        now_ns: i64,
    ) -> Result<(), Status> {
        let slot = self.slots.get_mut(&slot_id).ok_or(Status::NotFound)?;
        let events = slot.communicator.process(bytes, now_ns)?;
        for event in events {
            match event {
                RtcpEvent::RemoteReport {
                    fraction_lost,
                    jitter,
                    ..
                } => {
                    slot.remote_fraction_lost = fraction_lost;
                    slot.remote_jitter = jitter;
                }
                RtcpEvent::RttMeasured { rtt_ns, .. } => {
                    slot.rtt_ns = rtt_ns;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// emit sender reports that are due; returns the next deadline
    pub fn refresh(&mut self, now_us: u128, now_ns: i64) -> u128 {
        let mut deadline = now_us + 1_000_000;
        for slot in self.slots.values_mut() {
            if slot.control.is_none() || slot.chain.is_none() {
                continue;
            }
            if slot.communicator.should_report(now_us) {
                let (packets, bytes, stream_ts) = slot.chain.as_ref().unwrap().stats();
                let report = slot.communicator.generate_sender_report(
                    now_ns,
                    now_us,
                    &SendReport {
                        ssrc: self.config.source_id,
                        origin_ns: now_ns,
                        rtp_timestamp: stream_ts,
                        packet_count: packets,
                        byte_count: bytes,
                    },
                );
                let mut packet = Packet::new();
                packet.rtcp_mut().payload = report;
                let composer = RtcpComposer::new();
                if composer.prepare(&mut packet, 0).is_ok() {
                    if let Err(status) = slot.control.as_mut().unwrap().write(packet) {
                        debug!("sender: control write failed: {}", status);
                    }
                }
            }
            deadline = deadline.min(slot.communicator.next_deadline());
        }
        deadline
    }

    pub fn metrics(&self, slot_id: usize) -> Result<serde_json::Value, Status> {
        let slot = self.slots.get(&slot_id).ok_or(Status::NotFound)?;
        let (packets, bytes, stream_ts) = match slot.chain.as_ref() {
            Some(chain) => chain.stats(),
            None => (0, 0, 0),
        };
        Ok(json!({
            "slot": slot_id,
            "complete": slot.is_complete(),
            "packets_sent": packets,
            "bytes_sent": bytes,
            "stream_timestamp": stream_ts,
            "remote_fraction_lost": slot.remote_fraction_lost,
            "remote_jitter": slot.remote_jitter,
            "rtt_ns": slot.rtt_ns,
            "e2e_latency_ns": slot.rtt_ns / 2,
        }))
    }
}

/// control plane requests for the sender loop
pub enum SenderTask {
    CreateSlot,
    DeleteSlot(usize),
    AddEndpoint {
        slot: usize,
        iface: Interface,
        proto: Protocol,
        dest: Option<SocketAddr>,
    },
    QueryMetrics(usize),
}

pub enum SenderTaskResult {
    Slot(usize),
    Endpoint(mpsc::Receiver<Packet>),
    Metrics(serde_json::Value),
    Done,
    Failed(Status),
}

/// single threaded owner of a sender pipeline
pub struct SenderLoop {
    pipeline: SenderPipeline,
    tasks: TaskReceiver<SenderTask, SenderTaskResult>,
}

impl SenderLoop {
    pub fn new(config: SenderConfig) -> (SenderLoop, TaskSender<SenderTask, SenderTaskResult>) {
        let (tx, rx) = task_channel();
        (
            SenderLoop {
                pipeline: SenderPipeline::new(config),
                tasks: rx,
            },
            tx,
        )
    }
    pub fn pipeline_mut(&mut self) -> &mut SenderPipeline {
        &mut self.pipeline
    }

    /// thread entry point: tick until the stop channel fires
    pub fn run(&mut self, stop: mpsc::Receiver<()>) -> Result<(), crate::common::box_error::BoxError> {
        use simple_error::bail;
        loop {
            match stop.try_recv() {
                Ok(()) => return Ok(()),
                Err(mpsc::TryRecvError::Disconnected) => {
                    bail!("sender loop: stop channel lost")
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

    pub fn tick(&mut self, now_us: u128, now_ns: i64) -> u128 {
        let pipeline = &mut self.pipeline;
        let tasks = &mut self.tasks;
        tasks.process(|task| match task {
            SenderTask::CreateSlot => SenderTaskResult::Slot(pipeline.create_slot(now_us)),
            SenderTask::DeleteSlot(slot) => match pipeline.delete_slot(slot) {
                Ok(()) => SenderTaskResult::Done,
                Err(status) => SenderTaskResult::Failed(status),
            },
            SenderTask::AddEndpoint {
                slot,
                iface,
                proto,
                dest,
            } => match pipeline.add_endpoint(slot, iface, proto, dest) {
                Ok(rx) => SenderTaskResult::Endpoint(rx),
                Err(status) => SenderTaskResult::Failed(status),
            },
            SenderTask::QueryMetrics(slot) => match pipeline.metrics(slot) {
                Ok(metrics) => SenderTaskResult::Metrics(metrics),
                Err(status) => SenderTaskResult::Failed(status),
            },
        });
        pipeline.refresh(now_us, now_ns)
    }
}
