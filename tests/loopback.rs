//! sender pipeline wired straight into a receiver pipeline.
//!
//! The "network" here is a loop that moves composed wire bytes from the
//! sender's outbound queues into the receiver's endpoint writers, dropping
//! whatever the scenario says to drop.
use std::net::SocketAddr;
use std::sync::mpsc;

use rtstream_rust::audio::frame::Frame;
use rtstream_rust::audio::latency_tuner::LatencyProfile;
use rtstream_rust::audio::sample_spec::SampleSpec;
use rtstream_rust::packet::model::Packet;
use rtstream_rust::pipeline::config::{Interface, Protocol, ReceiverConfig, SenderConfig};
use rtstream_rust::pipeline::receiver::{
    ReceiverEndpointWriter, ReceiverLoop, ReceiverPipeline, ReceiverTask, ReceiverTaskResult,
};
use rtstream_rust::pipeline::sender::SenderPipeline;

const SAMPLES_PER_PACKET: usize = 50;
const NOW_NS: i64 = 1_700_000_000_000_000_000;

fn sender_addr() -> SocketAddr {
    "9.9.9.9:5000".parse().unwrap()
}

fn sender_config(fec: bool) -> SenderConfig {
    let mut config = SenderConfig::default();
    config.common.packet_spec = SampleSpec::new(100, 2);
    config.common.frame_spec = SampleSpec::new(100, 2);
    config.common.samples_per_packet = SAMPLES_PER_PACKET;
    config.common.samples_per_frame = SAMPLES_PER_PACKET;
    config.common.fec_nbsrc = 10;
    config.common.fec_nbrpr = 5;
    let _ = fec;
    config
}

fn receiver_config() -> ReceiverConfig {
    let mut config = ReceiverConfig::default();
    config.common.packet_spec = SampleSpec::new(100, 2);
    config.common.frame_spec = SampleSpec::new(100, 2);
    config.common.samples_per_packet = SAMPLES_PER_PACKET;
    config.common.samples_per_frame = SAMPLES_PER_PACKET;
    config.common.fec_nbsrc = 10;
    config.common.fec_nbrpr = 5;
    // the peer drives the tuning in this setup, playout stays untouched
    config.latency.profile = LatencyProfile::Intact;
    config
}

struct Loopback {
    sender: SenderPipeline,
    receiver: ReceiverPipeline,
    send_slot: usize,
    recv_slot: usize,
    source_rx: mpsc::Receiver<Packet>,
    repair_rx: Option<mpsc::Receiver<Packet>>,
    source_writer: ReceiverEndpointWriter,
    repair_writer: Option<ReceiverEndpointWriter>,
}

fn build_loopback(fec: bool) -> Loopback {
    let mut sender = SenderPipeline::new(sender_config(fec));
    let mut receiver = ReceiverPipeline::new(receiver_config());
    let send_slot = sender.create_slot(0);
    let recv_slot = receiver.create_slot(0);

    if fec {
        let source_rx = sender
            .add_endpoint(
                send_slot,
                Interface::AudioSource,
                Protocol::RtpRs8m,
                Some("8.8.8.8:6000".parse().unwrap()),
            )
            .unwrap();
        let repair_rx = sender
            .add_endpoint(
                send_slot,
                Interface::AudioRepair,
                Protocol::Rs8m,
                Some("8.8.8.8:6001".parse().unwrap()),
            )
            .unwrap();
        let source_writer = receiver
            .add_endpoint(recv_slot, Interface::AudioSource, Protocol::RtpRs8m)
            .unwrap();
        let repair_writer = receiver
            .add_endpoint(recv_slot, Interface::AudioRepair, Protocol::Rs8m)
            .unwrap();
        Loopback {
            sender: sender,
            receiver: receiver,
            send_slot: send_slot,
            recv_slot: recv_slot,
            source_rx: source_rx,
            repair_rx: Some(repair_rx),
            source_writer: source_writer,
            repair_writer: Some(repair_writer),
        }
    } else {
        let source_rx = sender
            .add_endpoint(
                send_slot,
                Interface::AudioSource,
                Protocol::Rtp,
                Some("8.8.8.8:6000".parse().unwrap()),
            )
            .unwrap();
        let source_writer = receiver
            .add_endpoint(recv_slot, Interface::AudioSource, Protocol::Rtp)
            .unwrap();
        Loopback {
            sender: sender,
            receiver: receiver,
            send_slot: send_slot,
            recv_slot: recv_slot,
            source_rx: source_rx,
            repair_rx: None,
            source_writer: source_writer,
            repair_writer: None,
        }
    }
}

// value carried by packet n, distinct enough to spot misordering
fn packet_value(n: usize) -> f32 {
    0.05 + (n % 10) as f32 * 0.05
}

fn feed_frames(lb: &mut Loopback, num_packets: usize) {
    for n in 0..num_packets {
        let mut frame = Frame::new(SAMPLES_PER_PACKET * 2);
        for v in frame.samples_mut() {
            *v = packet_value(n);
        }
        frame.add_flags(Frame::NOT_BLANK);
        lb.sender.write_frame(lb.send_slot, &frame).unwrap();
    }
}

/// move wire bytes across in chronological order (each block's repairs
/// right behind its sources), dropping the source packets whose index the
/// scenario names
fn deliver(lb: &mut Loopback, drop_source_indices: &[usize]) {
    let mut sources = Vec::new();
    while let Ok(packet) = lb.source_rx.try_recv() {
        sources.push(packet);
    }
    let mut repairs = Vec::new();
    if let Some(repair_rx) = &lb.repair_rx {
        while let Ok(packet) = repair_rx.try_recv() {
            repairs.push(packet);
        }
    }
    let last_block = sources
        .iter()
        .chain(repairs.iter())
        .filter_map(|p| p.fec().map(|fec| fec.block_id))
        .max()
        .unwrap_or(0);
    for block in 0..=last_block {
        for (index, packet) in sources.iter().enumerate() {
            let in_block = packet.fec().map_or(block == 0, |fec| fec.block_id == block);
            if in_block && !drop_source_indices.contains(&index) {
                lb.source_writer
                    .write_bytes(packet.buffer(), Some(sender_addr()))
                    .unwrap();
            }
        }
        if let Some(repair_writer) = &lb.repair_writer {
            for packet in repairs.iter() {
                if packet.fec().map_or(false, |fec| fec.block_id == block) {
                    repair_writer
                        .write_bytes(packet.buffer(), Some(sender_addr()))
                        .unwrap();
                }
            }
        }
    }
}

fn read_output(lb: &mut Loopback, num_frames: usize) -> Vec<f32> {
    lb.receiver.refresh(1_000, NOW_NS);
    let mut output = Vec::new();
    for n in 0..num_frames {
        let mut frame = Frame::new(SAMPLES_PER_PACKET * 2);
        lb.receiver
            .read_frame(lb.recv_slot, &mut frame, 2_000 + n as u128)
            .unwrap();
        output.extend_from_slice(frame.samples());
    }
    output
}

#[test]
fn plain_rtp_loopback() {
    let mut lb = build_loopback(false);
    feed_frames(&mut lb, 8);
    deliver(&mut lb, &[]);
    let output = read_output(&mut lb, 8);
    // every delivered packet's samples come out in order
    for (n, chunk) in output.chunks(SAMPLES_PER_PACKET * 2).enumerate().take(7) {
        for v in chunk {
            assert!(
                (v - packet_value(n)).abs() < 0.01,
                "packet {} came out wrong",
                n
            );
        }
    }
}

#[test]
fn fec_loopback_without_loss() {
    let mut lb = build_loopback(true);
    feed_frames(&mut lb, 20);
    deliver(&mut lb, &[]);
    let output = read_output(&mut lb, 19);
    for (n, chunk) in output.chunks(SAMPLES_PER_PACKET * 2).enumerate().take(18) {
        for v in chunk {
            assert!((v - packet_value(n)).abs() < 0.01);
        }
    }
}

#[test]
fn fec_recovers_dropped_packets() {
    // drop 3 of the first block's 10 source packets; the repair stream
    // brings them back and the output matches the lossless run
    let mut reference = build_loopback(true);
    feed_frames(&mut reference, 20);
    deliver(&mut reference, &[]);
    let expected = read_output(&mut reference, 19);

    let mut lossy = build_loopback(true);
    feed_frames(&mut lossy, 20);
    deliver(&mut lossy, &[2, 5, 7]);
    let output = read_output(&mut lossy, 19);

    assert_eq!(expected.len(), output.len());
    for (n, (a, b)) in expected.iter().zip(output.iter()).enumerate() {
        assert!(
            (a - b).abs() < 0.0001,
            "sample {} diverged after recovery",
            n
        );
    }

    let metrics = lossy.receiver.metrics(lossy.recv_slot, 5_000).unwrap();
    assert_eq!(metrics["group"]["num_sessions"], 1);
}

#[test]
fn unrepaired_loss_turns_into_silence_not_noise() {
    // drop more than nbrpr packets in one block: the gap plays silence and
    // the stream picks up cleanly afterwards
    let mut lb = build_loopback(true);
    feed_frames(&mut lb, 20);
    deliver(&mut lb, &[1, 2, 3, 4, 5, 6]);
    let output = read_output(&mut lb, 19);
    for (n, chunk) in output.chunks(SAMPLES_PER_PACKET * 2).enumerate().take(18) {
        let expected = if (1..=6).contains(&n) {
            0.0
        } else {
            packet_value(n)
        };
        for v in chunk {
            assert!(
                (v - expected).abs() < 0.01,
                "packet slot {} expected {}",
                n,
                expected
            );
        }
    }
}

#[test]
fn pipeline_loop_runs_on_its_own_thread() {
    // the pipeline thread owns the loop; we steer it from here through the
    // task channel and then ask it to stop
    let (mut rx_loop, control) = ReceiverLoop::new(receiver_config());
    let (stop_tx, stop_rx) = mpsc::channel();
    let handle = std::thread::spawn(move || rx_loop.run(stop_rx));

    let slot = match control.schedule_and_wait(ReceiverTask::CreateSlot).unwrap() {
        ReceiverTaskResult::Slot(slot) => slot,
        _ => panic!("expected a slot"),
    };
    match control
        .schedule_and_wait(ReceiverTask::QueryMetrics(slot))
        .unwrap()
    {
        ReceiverTaskResult::Metrics(metrics) => assert_eq!(metrics["slot"], slot),
        _ => panic!("expected metrics"),
    }

    stop_tx.send(()).unwrap();
    handle.join().unwrap().unwrap();
}

#[test]
fn control_reports_travel_both_ways() {
    let mut sender = SenderPipeline::new(sender_config(false));
    let mut receiver = ReceiverPipeline::new(receiver_config());
    let send_slot = sender.create_slot(0);
    let recv_slot = receiver.create_slot(0);

    let source_rx = sender
        .add_endpoint(
            send_slot,
            Interface::AudioSource,
            Protocol::Rtp,
            Some("8.8.8.8:6000".parse().unwrap()),
        )
        .unwrap();
    let control_rx = sender
        .add_endpoint(
            send_slot,
            Interface::AudioControl,
            Protocol::Rtcp,
            Some("8.8.8.8:6002".parse().unwrap()),
        )
        .unwrap();
    let source_writer = receiver
        .add_endpoint(recv_slot, Interface::AudioSource, Protocol::Rtp)
        .unwrap();
    let control_writer = receiver
        .add_endpoint(recv_slot, Interface::AudioControl, Protocol::Rtcp)
        .unwrap();

    // audio flows so a session exists on the receiver
    let mut frame = Frame::new(SAMPLES_PER_PACKET * 2);
    for v in frame.samples_mut() {
        *v = 0.2;
    }
    sender.write_frame(send_slot, &frame).unwrap();
    while let Ok(packet) = source_rx.try_recv() {
        source_writer
            .write_bytes(packet.buffer(), Some(sender_addr()))
            .unwrap();
    }
    receiver.refresh(1_000, NOW_NS);

    // sender report crosses over and binds the sender's cname
    sender.refresh(1_000_000, NOW_NS);
    let sr = control_rx.try_recv().unwrap();
    control_writer
        .write_bytes(sr.buffer(), Some(sender_addr()))
        .unwrap();
    receiver.refresh(1_001_000, NOW_NS + 1_000_000);

    // receiver report comes back and lands in sender metrics
    receiver.refresh(2_000_000, NOW_NS + 5_000_000);
    let rr = receiver.take_control_packet(recv_slot).unwrap();
    sender
        .receive_control(send_slot, rr.buffer(), NOW_NS + 6_000_000)
        .unwrap();

    let recv_metrics = receiver.metrics(recv_slot, 2_000_000).unwrap();
    assert_eq!(recv_metrics["group"]["num_sessions"], 1);
    assert_eq!(
        recv_metrics["group"]["sessions"][0]["cname"],
        "sender@rtstream"
    );
    let send_metrics = sender.metrics(send_slot).unwrap();
    assert!(send_metrics["packets_sent"].as_u64().unwrap() >= 1);
}
