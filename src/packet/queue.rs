//! packet queues used between pipeline stages.
//!
//! The plain FIFO keeps arrival order between the parser and the session
//! router.  The sorted queue is the per-session jitter buffer: packets go in
//! keyed by stream timestamp and come out oldest first no matter how the
//! network shuffled them.  The channel writer hands packets across the
//! thread boundary to the network plane.
use std::collections::VecDeque;
use std::sync::mpsc;

use crate::common::status::Status;
use crate::packet::model::Packet;
use crate::packet::ordering;
use crate::packet::{PacketReader, PacketWriter};

/// unbounded FIFO, arrival order preserved
#[derive(Default)]
pub struct PacketQueue {
    queue: VecDeque<Packet>,
}

impl PacketQueue {
    pub fn new() -> PacketQueue {
        PacketQueue {
            queue: VecDeque::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.queue.len()
    }
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl PacketWriter for PacketQueue {
    fn write(&mut self, packet: Packet) -> Result<(), Status> {
        self.queue.push_back(packet);
        Ok(())
    }
}

impl PacketReader for PacketQueue {
    fn read(&mut self) -> Result<Packet, Status> {
        self.queue.pop_front().ok_or(Status::NoData)
    }
}

/// jitter queue ordered by stream timestamp, wrap aware.
///
/// Duplicates (same timestamp) are dropped on insert.  Reads always hand
/// back the oldest packet still queued.
#[derive(Default)]
pub struct SortedQueue {
    queue: VecDeque<Packet>,
    dropped_duplicates: usize,
}

impl SortedQueue {
    pub fn new() -> SortedQueue {
        SortedQueue {
            queue: VecDeque::new(),
            dropped_duplicates: 0,
        }
    }
    pub fn len(&self) -> usize {
        self.queue.len()
    }
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
    pub fn dropped_duplicates(&self) -> usize {
        self.dropped_duplicates
    }
    /// stream timestamp of the oldest queued packet
    pub fn head_timestamp(&self) -> Option<u32> {
        self.queue.front().map(|p| p.stream_timestamp())
    }
    /// total per-channel samples resident in the queue.
    ///
    /// this is the "niq" signal the latency tuner watches
    pub fn queued_duration(&self) -> u32 {
        self.queue.iter().map(|p| match p.rtp() {
            Some(rtp) => rtp.duration,
            None => 0,
        }).sum()
    }
}

impl PacketWriter for SortedQueue {
    fn write(&mut self, packet: Packet) -> Result<(), Status> {
        let ts = packet.stream_timestamp();
        // walk from the back since packets mostly arrive in order
        let mut idx = self.queue.len();
        while idx > 0 {
            let other = self.queue[idx - 1].stream_timestamp();
            if other == ts {
                self.dropped_duplicates += 1;
                return Ok(());
            }
            if ordering::ts_before(other, ts) {
                break;
            }
            idx -= 1;
        }
        self.queue.insert(idx, packet);
        Ok(())
    }
}

impl PacketReader for SortedQueue {
    fn read(&mut self) -> Result<Packet, Status> {
        self.queue.pop_front().ok_or(Status::NoData)
    }
}

/// sends packets to another thread, typically the network send loop
pub struct ChannelWriter {
    tx: mpsc::Sender<Packet>,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<Packet>) -> ChannelWriter {
        ChannelWriter { tx: tx }
    }
}

impl PacketWriter for ChannelWriter {
    fn write(&mut self, packet: Packet) -> Result<(), Status> {
        // a closed receiver means the I/O plane is gone
        self.tx.send(packet).map_err(|_| Status::NotFound)
    }
}

#[cfg(test)]
mod test_queue {
    use super::*;

    fn packet_with_ts(ts: u32) -> Packet {
        let mut packet = Packet::new();
        let rtp = packet.rtp_mut();
        rtp.stream_timestamp = ts;
        rtp.duration = 200;
        packet
    }

    #[test]
    fn fifo_order() {
        // the plain queue should keep arrival order
        let mut q = PacketQueue::new();
        q.write(packet_with_ts(30)).unwrap();
        q.write(packet_with_ts(10)).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q.read().unwrap().stream_timestamp(), 30);
        assert_eq!(q.read().unwrap().stream_timestamp(), 10);
        assert_eq!(q.read().unwrap_err(), Status::NoData);
    }
    #[test]
    fn sorted_order() {
        // the jitter queue should undo network reordering
        let mut q = SortedQueue::new();
        q.write(packet_with_ts(400)).unwrap();
        q.write(packet_with_ts(0)).unwrap();
        q.write(packet_with_ts(200)).unwrap();
        assert_eq!(q.read().unwrap().stream_timestamp(), 0);
        assert_eq!(q.read().unwrap().stream_timestamp(), 200);
        assert_eq!(q.read().unwrap().stream_timestamp(), 400);
    }
    #[test]
    fn sorted_order_across_wrap() {
        // three packets straddling the 32 bit wrap keep their stream order
        let mut q = SortedQueue::new();
        q.write(packet_with_ts(0)).unwrap();
        q.write(packet_with_ts(200)).unwrap();
        q.write(packet_with_ts(0u32.wrapping_sub(200))).unwrap();
        assert_eq!(q.read().unwrap().stream_timestamp(), u32::MAX - 199);
        assert_eq!(q.read().unwrap().stream_timestamp(), 0);
        assert_eq!(q.read().unwrap().stream_timestamp(), 200);
    }
    #[test]
    fn duplicate_dropped() {
        let mut q = SortedQueue::new();
        q.write(packet_with_ts(100)).unwrap();
        q.write(packet_with_ts(100)).unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.dropped_duplicates(), 1);
    }
    #[test]
    fn queued_duration() {
        let mut q = SortedQueue::new();
        q.write(packet_with_ts(0)).unwrap();
        q.write(packet_with_ts(200)).unwrap();
        assert_eq!(q.queued_duration(), 400);
    }
}
