//! last stop before the wire.
//!
//! The shipper stamps the destination address onto outbound packets and
//! makes sure every one of them is composed exactly once.  A packet that
//! arrives here unprepared is a bug in the pipeline, not a network
//! condition, so that case halts instead of returning an error.
use crate::common::status::Status;
use crate::packet::model::Packet;
use crate::packet::{Composer, PacketWriter};
use std::net::SocketAddr;

pub struct Shipper<C: Composer, W: PacketWriter> {
    composer: C,
    writer: W,
    outbound_address: Option<SocketAddr>,
}

impl<C: Composer, W: PacketWriter> Shipper<C, W> {
    pub fn new(composer: C, writer: W, outbound_address: Option<SocketAddr>) -> Shipper<C, W> {
        Shipper {
            composer: composer,
            writer: writer,
            outbound_address: outbound_address,
        }
    }
    pub fn outbound_address(&self) -> Option<SocketAddr> {
        self.outbound_address
    }
    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}

impl<C: Composer, W: PacketWriter> PacketWriter for Shipper<C, W> {
    fn write(&mut self, mut packet: Packet) -> Result<(), Status> {
        if let Some(addr) = self.outbound_address {
            let udp = packet.udp_mut();
            if udp.dst_addr.is_none() {
                udp.dst_addr = Some(addr);
            }
        }

        if !packet.has_flags(Packet::PREPARED) {
            panic!("shipper: unexpected packet: should be prepared");
        }

        if !packet.has_flags(Packet::COMPOSED) {
            self.composer.compose(&mut packet)?;
            packet.add_flags(Packet::COMPOSED);
        }

        self.writer.write(packet)
    }
}

#[cfg(test)]
mod test_shipper {
    use super::*;
    use crate::packet::queue::PacketQueue;
    use crate::packet::PacketReader;
    use mockall::mock;
    use std::cell::Cell;
    use std::rc::Rc;

    mock! {
        Writer {}
        impl PacketWriter for Writer {
            fn write(&mut self, packet: Packet) -> Result<(), Status>;
        }
    }

    struct CountingComposer {
        compose_calls: Rc<Cell<usize>>,
    }
    impl Composer for CountingComposer {
        fn prepare(&self, packet: &mut Packet, _payload_size: usize) -> Result<(), Status> {
            packet.add_flags(Packet::PREPARED);
            Ok(())
        }
        fn compose(&self, _packet: &mut Packet) -> Result<(), Status> {
            self.compose_calls.set(self.compose_calls.get() + 1);
            Ok(())
        }
    }

    fn new_packet() -> Packet {
        let mut packet = Packet::new();
        packet.add_flags(Packet::PREPARED);
        packet.rtp_mut().payload_type = 10;
        packet
    }

    #[test]
    fn forward_write_status() {
        // whatever the downstream writer says comes back verbatim
        for code in [Ok(()), Err(Status::NoMem)] {
            let calls = Rc::new(Cell::new(0));
            let composer = CountingComposer {
                compose_calls: calls.clone(),
            };
            let mut writer = MockWriter::new();
            writer.expect_write().times(1).return_const(code);
            let mut shipper =
                Shipper::new(composer, writer, Some("127.0.0.1:123".parse().unwrap()));
            assert_eq!(shipper.write(new_packet()), code);
        }
    }
    #[test]
    fn without_address() {
        // no outbound address configured means no udp facet gets added
        let calls = Rc::new(Cell::new(0));
        let composer = CountingComposer {
            compose_calls: calls.clone(),
        };
        let mut shipper = Shipper::new(composer, PacketQueue::new(), None);
        shipper.write(new_packet()).unwrap();
        let shipped = shipper.writer_mut().read().unwrap();
        assert!(!shipped.has_flags(Packet::UDP));
        assert!(shipped.udp().is_none());
    }
    #[test]
    fn with_address() {
        // the configured address must end up as the destination
        let addr: SocketAddr = "127.0.0.1:123".parse().unwrap();
        let calls = Rc::new(Cell::new(0));
        let composer = CountingComposer {
            compose_calls: calls.clone(),
        };
        let mut shipper = Shipper::new(composer, PacketQueue::new(), Some(addr));
        shipper.write(new_packet()).unwrap();
        let shipped = shipper.writer_mut().read().unwrap();
        assert!(shipped.has_flags(Packet::UDP));
        assert_eq!(shipped.udp().unwrap().dst_addr, Some(addr));
    }
    #[test]
    fn packet_already_composed() {
        // composing twice would corrupt the wire bytes, the flag prevents it
        let calls = Rc::new(Cell::new(0));
        let composer = CountingComposer {
            compose_calls: calls.clone(),
        };
        let mut shipper =
            Shipper::new(composer, PacketQueue::new(), Some("127.0.0.1:123".parse().unwrap()));
        let mut packet = new_packet();
        packet.add_flags(Packet::COMPOSED);
        shipper.write(packet).unwrap();
        assert_eq!(calls.get(), 0);
        let shipped = shipper.writer_mut().read().unwrap();
        assert!(shipped.has_flags(Packet::COMPOSED));
    }
    #[test]
    fn packet_not_composed() {
        let calls = Rc::new(Cell::new(0));
        let composer = CountingComposer {
            compose_calls: calls.clone(),
        };
        let mut shipper =
            Shipper::new(composer, PacketQueue::new(), Some("127.0.0.1:123".parse().unwrap()));
        shipper.write(new_packet()).unwrap();
        assert_eq!(calls.get(), 1);
        let shipped = shipper.writer_mut().read().unwrap();
        assert!(shipped.has_flags(Packet::COMPOSED));
    }
    #[test]
    #[should_panic(expected = "should be prepared")]
    fn unprepared_packet_halts() {
        let calls = Rc::new(Cell::new(0));
        let composer = CountingComposer {
            compose_calls: calls.clone(),
        };
        let mut shipper = Shipper::new(composer, PacketQueue::new(), None);
        let _ = shipper.write(Packet::new());
    }
}
