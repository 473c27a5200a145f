//! chops the outgoing frame stream into RTP packets.
//!
//! Packets are cut at a fixed number of samples so the FEC block geometry
//! stays uniform.  A packet can straddle frames; flush() pushes out a short
//! final packet when the stream pauses.
use crate::audio::frame::Frame;
use crate::audio::pcm::PcmEncoder;
use crate::audio::sample_spec::SampleSpec;
use crate::common::status::Status;
use crate::packet::model::Packet;
use crate::packet::{Composer, PacketWriter};

pub struct Packetizer<C: Composer, W: PacketWriter> {
    composer: C,
    writer: W,
    encoder: PcmEncoder,
    spec: SampleSpec,
    payload_type: u8,
    source_id: u32,
    samples_per_packet: usize,

    seqnum: u16,
    stream_ts: u32,
    cur: Option<Packet>,
    cur_filled: usize,

    packet_count: u32,
    byte_count: u32,
}

impl<C: Composer, W: PacketWriter> Packetizer<C, W> {
    pub fn new(
        composer: C,
        writer: W,
        encoder: PcmEncoder,
        spec: SampleSpec,
        payload_type: u8,
        source_id: u32,
        samples_per_packet: usize,
    ) -> Packetizer<C, W> {
        Packetizer {
            composer: composer,
            writer: writer,
            encoder: encoder,
            spec: spec,
            payload_type: payload_type,
            source_id: source_id,
            samples_per_packet: samples_per_packet,
            seqnum: 0,
            stream_ts: 0,
            cur: None,
            cur_filled: 0,
            packet_count: 0,
            byte_count: 0,
        }
    }
    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }
    pub fn source_id(&self) -> u32 {
        self.source_id
    }
    /// totals for the RTCP sender report
    pub fn stats(&self) -> (u32, u32, u32) {
        (self.packet_count, self.byte_count, self.stream_ts)
    }

    fn start_packet(&mut self, capture_ts: i64) -> Result<(), Status> {
        let mut packet = Packet::new();
        self.composer
            .prepare(&mut packet, self.encoder.encoded_byte_count(self.samples_per_packet))?;
        let rtp = packet.rtp_mut();
        rtp.payload_type = self.payload_type;
        rtp.source_id = self.source_id;
        rtp.seqnum = self.seqnum;
        rtp.stream_timestamp = self.stream_ts;
        rtp.capture_timestamp = capture_ts;
        self.seqnum = self.seqnum.wrapping_add(1);
        self.cur = Some(packet);
        self.cur_filled = 0;
        Ok(())
    }

    fn finish_packet(&mut self) -> Result<(), Status> {
        let mut packet = match self.cur.take() {
            Some(packet) => packet,
            None => return Ok(()),
        };
        let filled_bytes = self.encoder.encoded_byte_count(self.cur_filled);
        {
            let rtp = packet.rtp_mut();
            rtp.duration = self.cur_filled as u32;
            rtp.payload.truncate(filled_bytes);
        }
        self.stream_ts = self.stream_ts.wrapping_add(self.cur_filled as u32);
        self.packet_count += 1;
        self.byte_count += filled_bytes as u32;
        self.cur_filled = 0;
        self.writer.write(packet)
    }

    /// push out a partial packet, used when the frame stream pauses
    pub fn flush(&mut self) -> Result<(), Status> {
        if self.cur.is_some() && self.cur_filled > 0 {
            return self.finish_packet();
        }
        self.cur = None;
        Ok(())
    }
}

impl<C: Composer, W: PacketWriter> crate::audio::frame::FrameWriter for Packetizer<C, W> {
    fn write(&mut self, frame: &Frame) -> Result<(), Status> {
        let n_ch = self.spec.num_channels();
        let frame_dur = frame.num_samples() / n_ch;
        let mut pos = 0usize;
        while pos < frame_dur {
            if self.cur.is_none() {
                let capture_ts = if frame.capture_timestamp() != 0 {
                    frame.capture_timestamp() + self.spec.samples_per_chan_to_ns(pos)
                } else {
                    0
                };
                self.start_packet(capture_ts)?;
            }
            let room = self.samples_per_packet - self.cur_filled;
            let n = room.min(frame_dur - pos);
            {
                let filled = self.cur_filled;
                let at = self.encoder.encoded_byte_count(filled);
                let packet = self.cur.as_mut().unwrap();
                let samples = &frame.samples()[pos * n_ch..(pos + n) * n_ch];
                self.encoder
                    .encode(samples, &mut packet.rtp_mut().payload[at..])?;
            }
            self.cur_filled += n;
            pos += n;
            if self.cur_filled == self.samples_per_packet {
                self.finish_packet()?;
            }
        }
        Ok(())
    }
}
