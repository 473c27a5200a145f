//! spreads consecutive packets apart on the wire.
//!
//! Burst losses take out neighbors.  By sending each window of packets in a
//! fixed shuffled order, a burst on the network turns into scattered single
//! losses that the FEC block codec can actually repair.  The delay cost is
//! bounded by the window size.
use crate::common::status::Status;
use crate::packet::model::Packet;
use crate::packet::PacketWriter;

const WINDOW: usize = 10;
// fixed shuffle of one window, chosen once so both ends stay predictable
const SEND_ORDER: [usize; WINDOW] = [7, 2, 9, 4, 0, 5, 8, 1, 6, 3];

pub struct Interleaver<W: PacketWriter> {
    writer: W,
    window: Vec<Packet>,
}

impl<W: PacketWriter> Interleaver<W> {
    pub fn new(writer: W) -> Interleaver<W> {
        Interleaver {
            writer: writer,
            window: Vec::with_capacity(WINDOW),
        }
    }
    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }
    /// send out anything still buffered, in arrival order
    pub fn flush(&mut self) -> Result<(), Status> {
        for packet in self.window.drain(..) {
            self.writer.write(packet)?;
        }
        Ok(())
    }
}

impl<W: PacketWriter> PacketWriter for Interleaver<W> {
    fn write(&mut self, packet: Packet) -> Result<(), Status> {
        self.window.push(packet);
        if self.window.len() < WINDOW {
            return Ok(());
        }
        let mut slots: Vec<Option<Packet>> = self.window.drain(..).map(Some).collect();
        for idx in SEND_ORDER {
            if let Some(packet) = slots[idx].take() {
                self.writer.write(packet)?;
            }
        }
        Ok(())
    }
}
