//! Combined receive/transmit handle over one transport.

use std::io;

use mqwire_core::decoder::Decoder;
use mqwire_core::packet::{
    ConnackVariables, ConnectVariables, PublishVariables, SubackVariables, SubscribeVariables,
    UnsubscribeVariables,
};
use mqwire_core::{Header, PacketType};

use crate::error::Result;
use crate::handler::PacketHandler;
use crate::rx::Rx;
use crate::transport::{SharedTransport, Transport};
use crate::tx::Tx;

/// A minimal MQTT 3.1.1 transport-layer handler: an [`Rx`] and a [`Tx`]
/// sharing one transport.
///
/// Both sides hold the same transport slot, so an error on either side
/// closes the one transport exactly once and poisons both until
/// [`RxTx::set_transport`] installs a replacement. Outgoing data is not
/// validated beyond the wire rules (that is up to the caller); incoming
/// data is validated strictly and a malformed packet closes the
/// connection.
pub struct RxTx<T: Transport, D: Decoder> {
    pub rx: Rx<T, D>,
    pub tx: Tx<T>,
}

impl<T: Transport, D: Decoder> RxTx<T, D> {
    pub fn new(transport: T, decoder: D) -> Self {
        let shared = SharedTransport::new(transport);
        Self {
            rx: Rx::from_shared(shared.clone(), decoder),
            tx: Tx::from_shared(shared),
        }
    }

    /// Install a new transport on both sides.
    pub fn set_transport(&mut self, transport: T) {
        // One shared slot behind rx and tx.
        self.rx.set_transport(transport);
    }

    /// Close the shared transport. A no-op when already closed.
    pub fn close(&mut self) -> io::Result<()> {
        self.rx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }

    /// Duplicate the transport and decoder handles. Error hooks are not
    /// carried over.
    pub fn shallow_copy(&self) -> Self
    where
        D: Clone,
    {
        let shared = self.rx.shared();
        Self {
            rx: Rx::from_shared(shared.clone(), self.rx.decoder().clone()),
            tx: Tx::from_shared(shared),
        }
    }

    /// Fixed header of the most recently received packet.
    pub fn last_received_header(&self) -> Option<Header> {
        self.rx.last_received_header()
    }

    /// See [`Rx::read_next_packet`].
    pub fn read_next_packet<H: PacketHandler>(&mut self, handler: &mut H) -> Result<usize> {
        self.rx.read_next_packet(handler)
    }

    /// See [`Tx::write_connect`].
    pub fn write_connect(&mut self, vars: &ConnectVariables) -> Result<usize> {
        self.tx.write_connect(vars)
    }

    /// See [`Tx::write_connack`].
    pub fn write_connack(&mut self, vars: ConnackVariables) -> Result<usize> {
        self.tx.write_connack(vars)
    }

    /// See [`Tx::write_publish`].
    pub fn write_publish(
        &mut self,
        header: Header,
        vars: &PublishVariables,
        payload: &[u8],
    ) -> Result<usize> {
        self.tx.write_publish(header, vars, payload)
    }

    /// See [`Tx::write_subscribe`].
    pub fn write_subscribe(&mut self, vars: &SubscribeVariables) -> Result<usize> {
        self.tx.write_subscribe(vars)
    }

    /// See [`Tx::write_unsubscribe`].
    pub fn write_unsubscribe(&mut self, vars: &UnsubscribeVariables) -> Result<usize> {
        self.tx.write_unsubscribe(vars)
    }

    /// See [`Tx::write_suback`].
    pub fn write_suback(&mut self, vars: &SubackVariables) -> Result<usize> {
        self.tx.write_suback(vars)
    }

    /// See [`Tx::write_identified`].
    pub fn write_identified(&mut self, packet_type: PacketType, packet_id: u16) -> Result<usize> {
        self.tx.write_identified(packet_type, packet_id)
    }

    /// See [`Tx::write_simple`].
    pub fn write_simple(&mut self, packet_type: PacketType) -> Result<usize> {
        self.tx.write_simple(packet_type)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use mqwire_core::packet::{SubscribeRequest, Will};
    use mqwire_core::{
        AllocDecoder, ConnectReturnCode, ProtocolError, QoS, ScratchDecoder, SubackCode,
    };

    use super::*;
    use crate::error::LinkError;
    use crate::handler::NullHandler;
    use crate::testutil::{Capture, Loopback};

    fn loopback() -> RxTx<Loopback, ScratchDecoder> {
        RxTx::new(Loopback::new(), ScratchDecoder::with_capacity(1500))
    }

    #[test]
    fn test_connect_loopback() {
        let mut rxtx = loopback();
        let mut vars = ConnectVariables::new_v311(&b"0w"[..]);
        vars.clean_session = false;
        vars.keep_alive = 60;
        vars.will = Some(Will {
            topic: Bytes::from_static(b"Bw"),
            message: Bytes::from_static(b"Aw"),
            qos: QoS::AtLeastOnce,
            retain: true,
        });
        vars.username = Some(Bytes::from_static(b"Cw"));
        vars.password = Some(Bytes::from_static(b"Dw"));

        let written = rxtx.write_connect(&vars).unwrap();
        let expect_header = Header::new(PacketType::Connect, 0, vars.size() as u32).unwrap();
        assert_eq!(written, expect_header.size() + vars.size());

        let mut capture = Capture::default();
        let consumed = rxtx.read_next_packet(&mut capture).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(rxtx.last_received_header(), Some(expect_header));
        assert_eq!(capture.connect, vec![vars]);
    }

    #[test]
    fn test_connect_wire_bytes() {
        // CONNECT with client id "0w", will "Bw"/"Aw" at QoS 1 retained,
        // username "Cw", password "Dw", keep-alive 60, clean session off.
        let wire = b"\x10\x1e\x00\x04MQTT\x04\xec\x00\x3c\x00\x020w\x00\x02Bw\x00\x02Aw\x00\x02Cw\x00\x02Dw";
        let mut rxtx = RxTx::new(Loopback::with_bytes(wire), AllocDecoder);
        let mut capture = Capture::default();
        rxtx.read_next_packet(&mut capture).unwrap();

        let vars = &capture.connect[0];
        assert_eq!(&vars.client_id[..], b"0w");
        assert_eq!(vars.keep_alive, 60);
        assert!(!vars.clean_session);
        let will = vars.will.as_ref().unwrap();
        assert_eq!(&will.topic[..], b"Bw");
        assert_eq!(&will.message[..], b"Aw");
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
        assert_eq!(vars.username.as_deref(), Some(&b"Cw"[..]));
        assert_eq!(vars.password.as_deref(), Some(&b"Dw"[..]));
    }

    #[test]
    fn test_connack_loopback() {
        let mut rxtx = loopback();
        let vars = ConnackVariables {
            session_present: true,
            return_code: ConnectReturnCode::Accepted,
        };
        let written = rxtx.write_connack(vars).unwrap();
        assert_eq!(written, 4);

        let mut capture = Capture::default();
        let consumed = rxtx.read_next_packet(&mut capture).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(capture.connack, vec![vars]);
    }

    #[test]
    fn test_connack_wire_bytes() {
        let mut rxtx = RxTx::new(Loopback::with_bytes(b"\x20\x02\x01\x00"), AllocDecoder);
        let mut capture = Capture::default();
        rxtx.read_next_packet(&mut capture).unwrap();
        assert_eq!(
            capture.connack,
            vec![ConnackVariables {
                session_present: true,
                return_code: ConnectReturnCode::Accepted,
            }]
        );
    }

    #[test]
    fn test_publish_loopback_qos1() {
        let mut rxtx = loopback();
        let vars = PublishVariables {
            topic: Bytes::from_static(b"TOP"),
            packet_id: u16::MAX,
        };
        let payload = b"PL";
        let remaining = (vars.size(QoS::AtLeastOnce) + payload.len()) as u32;
        let header = Header::publish(true, QoS::AtLeastOnce, true, remaining).unwrap();

        rxtx.write_publish(header, &vars, payload).unwrap();

        let mut capture = Capture::default();
        let consumed = rxtx.read_next_packet(&mut capture).unwrap();
        assert_eq!(consumed, header.size() + remaining as usize);
        assert_eq!(rxtx.last_received_header(), Some(header));

        let (got_header, got_vars, got_payload) = &capture.publish[0];
        assert_eq!(*got_header, header);
        assert_eq!(got_vars, &vars);
        assert_eq!(&got_payload[..], payload);
    }

    #[test]
    fn test_publish_loopback_qos0() {
        let mut rxtx = loopback();
        let vars = PublishVariables {
            topic: Bytes::from_static(b"pressure"),
            packet_id: 0,
        };
        let payload = b"\xa6\x32";
        let remaining = (vars.size(QoS::AtMostOnce) + payload.len()) as u32;
        let header = Header::publish(false, QoS::AtMostOnce, false, remaining).unwrap();

        rxtx.write_publish(header, &vars, payload).unwrap();

        let mut capture = Capture::default();
        rxtx.read_next_packet(&mut capture).unwrap();
        let (_, got_vars, got_payload) = &capture.publish[0];
        assert_eq!(got_vars.packet_id, 0);
        assert_eq!(&got_payload[..], payload);
    }

    #[test]
    fn test_publish_ignored_then_next_packet() {
        let mut rxtx = loopback();
        let vars = PublishVariables {
            topic: Bytes::from_static(b"now-for-something-completely-different"),
            packet_id: u16::MAX,
        };
        let payload: &[u8] = b"ertytgbhjjhundsaip;vf[oniw[aondmiksfvoWDNFOEWOPndsafr";
        let remaining = (vars.size(QoS::AtLeastOnce) + payload.len()) as u32;
        let header = Header::publish(true, QoS::AtLeastOnce, true, remaining).unwrap();
        rxtx.write_publish(header, &vars, payload).unwrap();
        rxtx.write_simple(PacketType::Pingreq).unwrap();

        // No handler interest in the publish: payload must be drained so
        // the following packet still parses.
        let consumed = rxtx.read_next_packet(&mut NullHandler).unwrap();
        assert_eq!(consumed, header.size() + remaining as usize);

        let mut capture = Capture::default();
        rxtx.read_next_packet(&mut capture).unwrap();
        assert_eq!(capture.other, vec![(PacketType::Pingreq, 0)]);
    }

    #[test]
    fn test_subscribe_loopback() {
        let mut rxtx = loopback();
        let vars = SubscribeVariables {
            packet_id: u16::MAX,
            filters: ["favorites", "the-clash", "always-watching", "k-pop"]
                .into_iter()
                .map(|f| SubscribeRequest {
                    filter: Bytes::from(f.as_bytes().to_vec()),
                    qos: QoS::ExactlyOnce,
                })
                .collect(),
        };
        let written = rxtx.write_subscribe(&vars).unwrap();

        let mut capture = Capture::default();
        let consumed = rxtx.read_next_packet(&mut capture).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(capture.subscribe, vec![vars]);
    }

    #[test]
    fn test_subscribe_wire_bytes() {
        let wire = b"\x82\x34\xff\xff\x00\x09favorites\x02\x00\x09the-clash\x02\x00\x0falways-watching\x02\x00\x05k-pop\x02";
        let mut rxtx = RxTx::new(Loopback::with_bytes(wire), AllocDecoder);
        let mut capture = Capture::default();
        rxtx.read_next_packet(&mut capture).unwrap();

        let vars = &capture.subscribe[0];
        assert_eq!(vars.packet_id, 0xFFFF);
        assert_eq!(vars.filters.len(), 4);
        assert!(vars.filters.iter().all(|req| req.qos == QoS::ExactlyOnce));
        assert_eq!(&vars.filters[3].filter[..], b"k-pop");
    }

    #[test]
    fn test_unsubscribe_loopback() {
        let mut rxtx = loopback();
        let vars = UnsubscribeVariables {
            packet_id: u16::MAX,
            filters: ["topic1", "topic2", "topic3", "semperfi"]
                .into_iter()
                .map(|f| Bytes::from(f.as_bytes().to_vec()))
                .collect(),
        };
        let written = rxtx.write_unsubscribe(&vars).unwrap();

        let mut capture = Capture::default();
        let consumed = rxtx.read_next_packet(&mut capture).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(capture.unsubscribe, vec![vars]);
    }

    #[test]
    fn test_suback_loopback() {
        let mut rxtx = loopback();
        let vars = SubackVariables {
            packet_id: u16::MAX,
            return_codes: vec![
                SubackCode::Granted(QoS::AtMostOnce),
                SubackCode::Granted(QoS::AtLeastOnce),
                SubackCode::Granted(QoS::AtMostOnce),
                SubackCode::Granted(QoS::ExactlyOnce),
                SubackCode::Failure,
                SubackCode::Granted(QoS::AtLeastOnce),
            ],
        };
        let written = rxtx.write_suback(&vars).unwrap();

        let mut capture = Capture::default();
        let consumed = rxtx.read_next_packet(&mut capture).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(capture.suback, vec![vars]);
    }

    #[test]
    fn test_pubrel_loopback() {
        let mut rxtx = loopback();
        let written = rxtx.write_identified(PacketType::Pubrel, 3232).unwrap();
        assert_eq!(written, 4);

        let mut capture = Capture::default();
        let consumed = rxtx.read_next_packet(&mut capture).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(capture.other, vec![(PacketType::Pubrel, 3232)]);
        let header = rxtx.last_received_header().unwrap();
        assert_eq!(header.flags, 0b0010);
    }

    #[test]
    fn test_pingreq_loopback() {
        let mut rxtx = loopback();
        let written = rxtx.write_simple(PacketType::Pingreq).unwrap();
        assert_eq!(written, 2);

        let mut capture = Capture::default();
        let consumed = rxtx.read_next_packet(&mut capture).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(capture.other, vec![(PacketType::Pingreq, 0)]);
    }

    #[test]
    fn test_malformed_packet_poisons_both_sides() {
        let mut rxtx = RxTx::new(Loopback::with_bytes(b"\x00\x00"), AllocDecoder);
        assert!(matches!(
            rxtx.read_next_packet(&mut NullHandler),
            Err(LinkError::Protocol(ProtocolError::InvalidPacketType(0)))
        ));
        assert!(rxtx.is_closed());

        // Both halves observe the poisoned slot.
        assert!(matches!(
            rxtx.read_next_packet(&mut NullHandler),
            Err(LinkError::Closed)
        ));
        assert!(matches!(
            rxtx.write_simple(PacketType::Pingreq),
            Err(LinkError::Closed)
        ));

        // A replacement transport revives both.
        rxtx.set_transport(Loopback::new());
        rxtx.write_simple(PacketType::Pingresp).unwrap();
        let mut capture = Capture::default();
        rxtx.read_next_packet(&mut capture).unwrap();
        assert_eq!(capture.other, vec![(PacketType::Pingresp, 0)]);
    }

    #[test]
    fn test_close_is_shared_and_idempotent() {
        let mut rxtx = loopback();
        rxtx.close().unwrap();
        assert!(rxtx.rx.is_closed());
        assert!(rxtx.tx.is_closed());
        // Second close is a no-op.
        rxtx.close().unwrap();
    }

    #[test]
    fn test_shallow_copy_shares_transport() {
        let mut rxtx = loopback();
        let mut copy = rxtx.shallow_copy();

        rxtx.write_simple(PacketType::Pingreq).unwrap();
        let mut capture = Capture::default();
        copy.read_next_packet(&mut capture).unwrap();
        assert_eq!(capture.other, vec![(PacketType::Pingreq, 0)]);

        // Closing the copy poisons the original too.
        copy.close().unwrap();
        assert!(rxtx.is_closed());
    }

    #[test]
    fn test_full_exchange_sequence() {
        let mut rxtx = loopback();
        let mut capture = Capture::default();

        rxtx.write_connect(&ConnectVariables::new_v311(&b"seq"[..]))
            .unwrap();
        rxtx.write_connack(ConnackVariables {
            session_present: false,
            return_code: ConnectReturnCode::Accepted,
        })
        .unwrap();
        let pub_vars = PublishVariables {
            topic: Bytes::from_static(b"a/b"),
            packet_id: 7,
        };
        let header =
            Header::publish(false, QoS::AtLeastOnce, false, (pub_vars.size(QoS::AtLeastOnce) + 2) as u32)
                .unwrap();
        rxtx.write_publish(header, &pub_vars, b"ok").unwrap();
        rxtx.write_identified(PacketType::Puback, 7).unwrap();
        rxtx.write_simple(PacketType::Disconnect).unwrap();

        for _ in 0..5 {
            rxtx.read_next_packet(&mut capture).unwrap();
        }
        assert_eq!(capture.connect.len(), 1);
        assert_eq!(capture.connack.len(), 1);
        assert_eq!(capture.publish.len(), 1);
        assert_eq!(
            capture.other,
            vec![(PacketType::Puback, 7), (PacketType::Disconnect, 0)]
        );
    }
}
