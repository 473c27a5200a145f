//! turns a jittered packet stream into a continuous frame stream.
//!
//! The cursor walks the 32 bit stream timestamp space one frame at a time.
//! Samples the packets cover come out as audio, everything else comes out
//! as silence, and packets that show up behind the cursor are dropped, not
//! reordered in.  Upstream hiccups (empty queue, transient failures) also
//! come out as silence so playback never stalls.
use log::debug;

use crate::audio::frame::Frame;
use crate::audio::pcm::PcmDecoder;
use crate::audio::sample_spec::SampleSpec;
use crate::common::status::Status;
use crate::packet::ordering;
use crate::packet::model::Packet;
use crate::packet::PacketReader;

struct HeadPacket {
    packet: Packet,
    /// true once the cursor has taken samples out of it
    consumed: bool,
}

pub struct Depacketizer<R: PacketReader> {
    reader: R,
    decoder: PcmDecoder,
    spec: SampleSpec,

    head: Option<HeadPacket>,
    started: bool,
    /// cursor in per-channel samples, modular 32 bit
    next_ts: u32,
    /// capture time at the cursor, meaningful only while valid_capture_ts
    capture_ts: i64,
    valid_capture_ts: bool,

    packet_samples: u64,
    padding_samples: u64,
    late_drops: usize,
    pending_drops: bool,
}

impl<R: PacketReader> Depacketizer<R> {
    pub fn new(reader: R, decoder: PcmDecoder, spec: SampleSpec) -> Depacketizer<R> {
        Depacketizer {
            reader: reader,
            decoder: decoder,
            spec: spec,
            head: None,
            started: false,
            next_ts: 0,
            capture_ts: 0,
            valid_capture_ts: false,
            packet_samples: 0,
            padding_samples: 0,
            late_drops: 0,
            pending_drops: false,
        }
    }
    /// has the cursor locked onto the stream yet
    pub fn is_started(&self) -> bool {
        self.started
    }
    /// where the cursor is, in per-channel samples
    pub fn next_timestamp(&self) -> u32 {
        self.next_ts
    }
    pub fn late_drops(&self) -> usize {
        self.late_drops
    }
    /// fraction of output that was real audio, 1.0 when nothing was missing
    pub fn fill_ratio(&self) -> f64 {
        let total = self.packet_samples + self.padding_samples;
        if total == 0 {
            return 1.0;
        }
        self.packet_samples as f64 / total as f64
    }
    /// hand the nested reader out, sessions push packets through this
    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    fn advance(&mut self, samples_per_chan: usize) -> () {
        self.next_ts = self.next_ts.wrapping_add(samples_per_chan as u32);
        if self.valid_capture_ts {
            self.capture_ts += self.spec.samples_per_chan_to_ns(samples_per_chan);
        }
    }

    // fetch until head covers the cursor or lies ahead of it.
    // Err means no usable packet right now.
    fn fetch_head(&mut self) -> Result<(), Status> {
        loop {
            if self.head.is_none() {
                let packet = self.reader.read()?;
                if packet.rtp().is_none() {
                    debug!("depacketizer: dropping packet without rtp facet");
                    continue;
                }
                self.head = Some(HeadPacket {
                    packet: packet,
                    consumed: false,
                });
            }
            if !self.started {
                let ts = self.head.as_ref().unwrap().packet.stream_timestamp();
                self.started = true;
                self.next_ts = ts;
            }
            let head = self.head.as_ref().unwrap();
            if ordering::ts_before_eq(head.packet.end_timestamp(), self.next_ts) {
                if !head.consumed {
                    // never contributed a sample: a late arrival
                    self.late_drops += 1;
                    self.pending_drops = true;
                    debug!(
                        "depacketizer: dropping late packet ts={} cursor={}",
                        head.packet.stream_timestamp(),
                        self.next_ts
                    );
                }
                self.head = None;
                continue;
            }
            return Ok(());
        }
    }

    /// fill the frame from the cursor onward.
    ///
    /// Always succeeds: transient upstream trouble turns into silence and
    /// the depacketizer stays usable for the next read.
    pub fn read(&mut self, frame: &mut Frame) -> Result<(), Status> {
        frame.clear();
        let n_ch = self.spec.num_channels();
        let capacity = frame.num_samples() / n_ch;
        let mut written = 0usize;
        let mut padded = 0usize;
        let mut frame_cts = if self.valid_capture_ts {
            self.capture_ts
        } else {
            0
        };
        let mut frame_cts_known = self.valid_capture_ts;
        let mut any_audio = false;

        while written < capacity {
            match self.fetch_head() {
                Ok(()) => {}
                Err(Status::NoData) => break,
                Err(status) => {
                    debug!("depacketizer: transient upstream failure: {}", status);
                    break;
                }
            }
            let head_ts = self.head.as_ref().unwrap().packet.stream_timestamp();
            let head_end = self.head.as_ref().unwrap().packet.end_timestamp();

            if ordering::ts_before(self.next_ts, head_ts) {
                // gap before the packet: silence
                let gap = ordering::ts_diff(head_ts, self.next_ts) as usize;
                let n = gap.min(capacity - written);
                padded += n;
                self.advance(n);
                written += n;
                continue;
            }

            // cursor inside the packet
            let offset = ordering::ts_diff(self.next_ts, head_ts) as usize;
            let remaining = ordering::ts_diff(head_end, self.next_ts) as usize;
            let n = remaining.min(capacity - written);
            {
                let head = self.head.as_mut().unwrap();
                let rtp = head.packet.rtp().unwrap();
                let out = &mut frame.samples_mut()[written * n_ch..(written + n) * n_ch];
                let _ = self.decoder.decode(&rtp.payload, offset, out);
                if rtp.capture_timestamp != 0 {
                    let cursor_cts =
                        rtp.capture_timestamp + self.spec.samples_per_chan_to_ns(offset);
                    if !frame_cts_known {
                        frame_cts = cursor_cts - self.spec.samples_per_chan_to_ns(written);
                        if frame_cts < 0 {
                            frame_cts = 0;
                        }
                        frame_cts_known = true;
                    }
                    self.capture_ts = cursor_cts;
                    self.valid_capture_ts = true;
                }
                head.consumed = true;
            }
            any_audio = true;
            self.packet_samples += n as u64;
            self.advance(n);
            written += n;
            if ordering::ts_before_eq(head_end, self.next_ts) {
                self.head = None;
            }
        }

        if written < capacity {
            // tail silence: the cursor still moves once the stream started
            padded += capacity - written;
            if self.started {
                self.advance(capacity - written);
            }
        }
        self.padding_samples += padded as u64;

        if any_audio {
            frame.add_flags(Frame::NOT_BLANK);
        }
        if padded > 0 {
            frame.add_flags(Frame::NOT_COMPLETE);
        }
        if self.pending_drops {
            frame.add_flags(Frame::PACKET_DROPS);
            self.pending_drops = false;
        }
        frame.set_capture_timestamp(if frame_cts_known { frame_cts } else { 0 });
        Ok(())
    }
}
