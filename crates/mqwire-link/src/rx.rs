//! Streaming packet receiver.

use std::io::{self, Read};

use mqwire_core::decoder::Decoder;
use mqwire_core::packet;
use mqwire_core::{Header, PacketType, ProtocolError};

use crate::error::{LinkError, Result};
use crate::handler::PacketHandler;
use crate::transport::{SharedTransport, Transport};

/// Bounded reader over a PUBLISH payload.
///
/// Shares the transport's read position and is valid only inside
/// [`PacketHandler::on_publish`]; it reports end-of-stream at exactly the
/// payload boundary. Whatever the handler leaves unread is drained by the
/// receiver to keep the stream aligned on the next packet.
pub struct PayloadReader<'a> {
    inner: &'a mut dyn Read,
    remaining: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(inner: &'a mut dyn Read, remaining: usize) -> Self {
        Self { inner, remaining }
    }

    /// Payload bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn drain(&mut self) -> io::Result<()> {
        let mut sink = [0u8; 512];
        while self.remaining > 0 {
            let want = sink.len().min(self.remaining);
            self.inner.read_exact(&mut sink[..want])?;
            self.remaining -= want;
        }
        Ok(())
    }
}

impl Read for PayloadReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..want])?;
        self.remaining -= n;
        Ok(n)
    }
}

/// Streaming receiver: reads one packet per call, validates it against
/// the wire format, and dispatches it through a [`PacketHandler`].
///
/// Any malformed byte, transport failure or handler error closes the
/// transport exactly once and leaves the receiver poisoned; every
/// subsequent call returns [`LinkError::Closed`] until
/// [`Rx::set_transport`] installs a replacement.
pub struct Rx<T: Transport, D: Decoder> {
    transport: SharedTransport<T>,
    decoder: D,
    last_header: Option<Header>,
    error_hook: Option<Box<dyn FnMut(&LinkError)>>,
}

impl<T: Transport, D: Decoder> Rx<T, D> {
    pub fn new(transport: T, decoder: D) -> Self {
        Self::from_shared(SharedTransport::new(transport), decoder)
    }

    pub(crate) fn from_shared(transport: SharedTransport<T>, decoder: D) -> Self {
        Self {
            transport,
            decoder,
            last_header: None,
            error_hook: None,
        }
    }

    pub(crate) fn shared(&self) -> SharedTransport<T> {
        self.transport.clone()
    }

    /// Replace the transport after a closure.
    pub fn set_transport(&mut self, transport: T) {
        self.transport.set(transport);
    }

    /// Close the transport. A no-op when already closed.
    pub fn close(&mut self) -> io::Result<()> {
        self.transport.close()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Fixed header of the most recently received packet, including one
    /// whose body failed to decode.
    pub fn last_received_header(&self) -> Option<Header> {
        self.last_header
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Notification hook invoked with every receive error just before the
    /// transport is closed.
    pub fn set_error_hook(&mut self, hook: impl FnMut(&LinkError) + 'static) {
        self.error_hook = Some(Box::new(hook));
    }

    /// Read, validate and dispatch exactly one packet.
    ///
    /// Returns the total bytes consumed (fixed header plus remaining
    /// length). Blocks on the transport until a whole packet has been
    /// read; there is no partial-packet state between calls.
    pub fn read_next_packet<H: PacketHandler>(&mut self, handler: &mut H) -> Result<usize> {
        let mut guard = self.transport.borrow_mut();
        let Some(transport) = guard.as_mut() else {
            return Err(LinkError::Closed);
        };

        self.decoder.reset();

        let header = match Header::decode(&mut *transport) {
            Ok((header, _)) => header,
            Err(err) => {
                drop(guard);
                return Err(self.fail(err.into()));
            }
        };
        self.last_header = Some(header);
        log::trace!("rx {}", header);

        let result = dispatch(transport, &mut self.decoder, header, handler);
        drop(guard);

        match result {
            Ok(()) => Ok(header.size() + header.remaining_length as usize),
            // A callback refusing a PINGRESP has not desynchronized the
            // stream; surface the error without poisoning.
            Err(err @ LinkError::Callback(_)) if header.packet_type == PacketType::Pingresp => {
                Err(err)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn fail(&mut self, err: LinkError) -> LinkError {
        if let Some(hook) = self.error_hook.as_mut() {
            hook(&err);
        }
        log::debug!("rx error, closing transport: {}", err);
        if let Err(close_err) = self.transport.close() {
            log::debug!("transport close failed: {}", close_err);
        }
        err
    }
}

fn dispatch<T, D, H>(
    transport: &mut T,
    decoder: &mut D,
    header: Header,
    handler: &mut H,
) -> Result<()>
where
    T: Transport,
    D: Decoder,
    H: PacketHandler,
{
    match header.packet_type {
        PacketType::Connect => {
            let vars = packet::decode_connect(transport, header.remaining_length, decoder)?;
            handler
                .on_connect(header, &vars)
                .map_err(LinkError::Callback)
        }
        PacketType::Connack => {
            let vars = packet::decode_connack(transport, header.remaining_length)?;
            handler
                .on_connack(header, vars)
                .map_err(LinkError::Callback)
        }
        PacketType::Publish => {
            let (vars, payload_len) = packet::decode_publish(&mut *transport, &header, decoder)?;
            let mut payload = PayloadReader::new(transport, payload_len);
            match handler.on_publish(header, vars, &mut payload) {
                Ok(()) => {
                    payload.drain()?;
                    Ok(())
                }
                Err(err) => Err(LinkError::Callback(err)),
            }
        }
        PacketType::Subscribe => {
            let vars = packet::decode_subscribe(transport, header.remaining_length, decoder)?;
            handler
                .on_subscribe(header, vars)
                .map_err(LinkError::Callback)
        }
        PacketType::Unsubscribe => {
            let vars = packet::decode_unsubscribe(transport, header.remaining_length, decoder)?;
            handler
                .on_unsubscribe(header, vars)
                .map_err(LinkError::Callback)
        }
        PacketType::Suback => {
            let vars = packet::decode_suback(transport, header.remaining_length)?;
            handler
                .on_suback(header, vars)
                .map_err(LinkError::Callback)
        }
        PacketType::Puback
        | PacketType::Pubrec
        | PacketType::Pubrel
        | PacketType::Pubcomp
        | PacketType::Unsuback => {
            let packet_id = packet::decode_packet_id(transport, header.remaining_length)?;
            handler
                .on_other(header, packet_id)
                .map_err(LinkError::Callback)
        }
        PacketType::Pingreq | PacketType::Pingresp | PacketType::Disconnect => {
            if header.remaining_length != 0 {
                return Err(ProtocolError::RemainingLengthMismatch {
                    declared: header.remaining_length,
                    consumed: 0,
                }
                .into());
            }
            handler.on_other(header, 0).map_err(LinkError::Callback)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use mqwire_core::{AllocDecoder, PacketType, ProtocolError, ScratchDecoder};

    use super::*;
    use crate::handler::{HandlerResult, NullHandler};
    use crate::testutil::{Capture, Loopback};

    fn rx_over(bytes: &[u8]) -> Rx<Loopback, AllocDecoder> {
        Rx::new(Loopback::with_bytes(bytes), AllocDecoder)
    }

    #[test]
    fn test_bad_packets_poison() {
        // Each entry is an independent transport carrying one bad packet.
        let cases: &[(&str, &[u8])] = &[
            ("no contents", b""),
            ("EOF during fixed header", b"\x01"),
            ("forbidden packet type 0", b"\x00\x00"),
            ("forbidden packet type 15", b"\xf0\x00"),
            ("CONNECT body missing", b"\x10\x0a"),
            ("CONNECT empty body", b"\x10\x00"),
            ("CONNACK empty body", b"\x20\x00"),
            ("PUBLISH empty body", b"\x30\x00"),
            ("PUBACK empty body", b"\x40\x00"),
            ("SUBSCRIBE bad flags", b"\x80\x00"),
            ("SUBACK empty body", b"\x90\x00"),
            ("UNSUBSCRIBE bad flags", b"\xa0\x00"),
            ("UNSUBACK empty body", b"\xb0\x00"),
            ("PINGREQ with body", b"\xc0\x02\x00\x00"),
            ("remaining length overflow", b"\x30\xff\xff\xff\xff"),
        ];
        for (reason, bytes) in cases {
            let mut rx = rx_over(bytes);
            assert!(
                rx.read_next_packet(&mut NullHandler).is_err(),
                "expected error: {}",
                reason
            );
            assert!(rx.is_closed(), "transport not closed: {}", reason);
            assert!(
                matches!(rx.read_next_packet(&mut NullHandler), Err(LinkError::Closed)),
                "expected poisoned link: {}",
                reason
            );
        }
    }

    #[test]
    fn test_fuzz_corpus_never_panics() {
        // Seeds distilled from fuzzing a prior implementation of this
        // protocol; all of them must fail cleanly or decode cleanly.
        let corpus: &[&[u8]] = &[
            b"00\x0000",
            b"\xa2A00\x00\x06000000\x00\x06000000\x00\x0800000000",
            b"\x900000000000000000000",
            b"\x100\x00\x0400000\xec00\x00\x0200\x00\x0200\x0000",
            b"\x82000",
            b"\xa000",
            b"20\x0000",
            b"0\xfe\xff\xff",
            b"a0",
            b"A0",
            b"\x100\x0200",
            b"\x820",
            b"\x9000000",
            b"0\xee\xff\xff",
            b" 0\x00",
            b"0\xff\xc4",
            b"\x82000\x000",
            b"0",
            b"\x900",
            b"\x100",
        ];
        for bytes in corpus {
            let mut rx = Rx::new(
                Loopback::with_bytes(bytes),
                ScratchDecoder::with_capacity(2048),
            );
            let _ = rx.read_next_packet(&mut NullHandler);
        }
    }

    #[test]
    fn test_publish_payload_bounded() {
        // PUBLISH QoS1 DUP RETAIN, topic "TOP", id 0xFFFF, payload "PL",
        // followed by a PINGREQ that must stay readable.
        let wire = b"\x3b\x08\x00\x03TOP\xff\xffPL\xc0\x00";
        let mut rx = rx_over(wire);
        let mut capture = Capture::default();

        let n = rx.read_next_packet(&mut capture).unwrap();
        assert_eq!(n, 2 + 8);
        let (header, vars, payload) = &capture.publish[0];
        assert!(header.dup());
        assert!(header.retain());
        assert_eq!(header.qos(), mqwire_core::QoS::AtLeastOnce);
        assert_eq!(&vars.topic[..], b"TOP");
        assert_eq!(vars.packet_id, 0xFFFF);
        assert_eq!(&payload[..], b"PL");

        let n = rx.read_next_packet(&mut capture).unwrap();
        assert_eq!(n, 2);
        assert_eq!(capture.other, vec![(PacketType::Pingreq, 0)]);
    }

    #[test]
    fn test_publish_reader_eof_at_boundary() {
        struct BoundaryCheck;
        impl PacketHandler for BoundaryCheck {
            fn on_publish(
                &mut self,
                _header: Header,
                _vars: mqwire_core::PublishVariables,
                payload: &mut PayloadReader<'_>,
            ) -> HandlerResult {
                assert_eq!(payload.remaining(), 2);
                let mut buf = [0u8; 16];
                let n = payload.read(&mut buf)?;
                assert_eq!(n, 2);
                assert_eq!(payload.read(&mut buf)?, 0);
                assert_eq!(payload.remaining(), 0);
                Ok(())
            }
        }
        let wire = b"\x3b\x08\x00\x03TOP\xff\xffPL";
        let mut rx = rx_over(wire);
        rx.read_next_packet(&mut BoundaryCheck).unwrap();
    }

    #[test]
    fn test_unread_payload_drained() {
        // Handler ignores the payload entirely; the next packet must
        // still decode.
        let wire = b"\x30\x0c\x00\x03TOPpayload\xd0\x00";
        let mut rx = rx_over(wire);
        let n = rx.read_next_packet(&mut NullHandler).unwrap();
        assert_eq!(n, 2 + 12);

        let mut capture = Capture::default();
        rx.read_next_packet(&mut capture).unwrap();
        assert_eq!(capture.other, vec![(PacketType::Pingresp, 0)]);
    }

    #[test]
    fn test_callback_error_poisons() {
        struct Refuse;
        impl PacketHandler for Refuse {
            fn on_other(&mut self, _header: Header, _packet_id: u16) -> HandlerResult {
                Err("not today".into())
            }
        }
        let mut rx = rx_over(b"\x40\x02\x00\x01");
        match rx.read_next_packet(&mut Refuse) {
            Err(LinkError::Callback(_)) => {}
            other => panic!("expected callback error, got {:?}", other.err()),
        }
        assert!(rx.is_closed());
    }

    #[test]
    fn test_pingresp_callback_error_does_not_poison() {
        struct Refuse;
        impl PacketHandler for Refuse {
            fn on_other(&mut self, _header: Header, _packet_id: u16) -> HandlerResult {
                Err("not today".into())
            }
        }
        let mut rx = rx_over(b"\xd0\x00\xd0\x00");
        assert!(matches!(
            rx.read_next_packet(&mut Refuse),
            Err(LinkError::Callback(_))
        ));
        assert!(!rx.is_closed());
        // The stream is still aligned on the next packet.
        rx.read_next_packet(&mut NullHandler).unwrap();
    }

    #[test]
    fn test_error_hook_runs_before_close() {
        use std::cell::Cell;
        use std::rc::Rc;

        let seen = Rc::new(Cell::new(false));
        let mut rx = rx_over(b"\x00\x00");
        let hook_seen = Rc::clone(&seen);
        rx.set_error_hook(move |err| {
            assert!(matches!(
                err,
                LinkError::Protocol(ProtocolError::InvalidPacketType(0))
            ));
            hook_seen.set(true);
        });
        assert!(rx.read_next_packet(&mut NullHandler).is_err());
        assert!(seen.get());
    }

    #[test]
    fn test_last_received_header() {
        let mut rx = rx_over(b"\xc0\x00");
        assert!(rx.last_received_header().is_none());
        rx.read_next_packet(&mut NullHandler).unwrap();
        let header = rx.last_received_header().unwrap();
        assert_eq!(header.packet_type, PacketType::Pingreq);
        assert_eq!(header.remaining_length, 0);
    }

    #[test]
    fn test_scratch_decoder_too_small() {
        // CONNECT whose client id cannot fit a 4-byte scratch.
        let wire = b"\x10\x13\x00\x04MQTT\x04\x02\x00\x3c\x00\x07chatter";
        let mut rx = Rx::new(Loopback::with_bytes(wire), ScratchDecoder::with_capacity(8));
        match rx.read_next_packet(&mut NullHandler) {
            Err(LinkError::Protocol(ProtocolError::BufferExceeded { needed: 7, .. })) => {}
            other => panic!("expected BufferExceeded, got {:?}", other.err()),
        }
        assert!(rx.is_closed());
    }
}
