//! Loopback example - drive a full packet exchange over an in-memory
//! transport.
//!
//! Run with: cargo run -p mqwire-link --example loopback
//!
//! Everything written to the transport is read straight back, so one
//! RxTx plays both sides of the conversation. With a real deployment the
//! transport would be a `TcpStream` (or anything else implementing
//! `Transport`).

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use bytes::Bytes;

use mqwire_link::{
    ConnackVariables, ConnectReturnCode, ConnectVariables, Header, HandlerResult, PacketHandler,
    PacketType, PayloadReader, PublishVariables, QoS, RxTx, ScratchDecoder, SessionState,
    SubscribeRequest, SubscribeVariables, Transport,
};

/// In-memory loopback: reads return whatever was written earlier.
struct Loopback {
    buf: Option<VecDeque<u8>>,
}

impl Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let queue = match self.buf.as_mut() {
            Some(queue) => queue,
            None => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed pipe")),
        };
        let n = buf.len().min(queue.len());
        for slot in &mut buf[..n] {
            *slot = queue.pop_front().expect("length checked");
        }
        Ok(n)
    }
}

impl Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.buf.as_mut() {
            Some(queue) => {
                queue.extend(buf.iter().copied());
                Ok(buf.len())
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed pipe")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for Loopback {
    fn close(&mut self) -> io::Result<()> {
        self.buf = None;
        Ok(())
    }
}

struct Printer;

impl PacketHandler for Printer {
    fn on_connect(&mut self, _header: Header, vars: &ConnectVariables) -> HandlerResult {
        println!(
            "CONNECT  client_id={:?} keep_alive={}s",
            String::from_utf8_lossy(&vars.client_id),
            vars.keep_alive
        );
        Ok(())
    }

    fn on_connack(&mut self, _header: Header, vars: ConnackVariables) -> HandlerResult {
        println!(
            "CONNACK  session_present={} ({})",
            vars.session_present, vars.return_code
        );
        Ok(())
    }

    fn on_publish(
        &mut self,
        header: Header,
        vars: PublishVariables,
        payload: &mut PayloadReader<'_>,
    ) -> HandlerResult {
        let mut body = Vec::new();
        payload.read_to_end(&mut body)?;
        println!(
            "PUBLISH  topic={:?} qos={:?} payload={:?}",
            String::from_utf8_lossy(&vars.topic),
            header.qos(),
            String::from_utf8_lossy(&body)
        );
        Ok(())
    }

    fn on_subscribe(&mut self, _header: Header, vars: SubscribeVariables) -> HandlerResult {
        for req in &vars.filters {
            println!(
                "SUBSCRIBE  filter={:?} qos={:?}",
                String::from_utf8_lossy(&req.filter),
                req.qos
            );
        }
        Ok(())
    }

    fn on_other(&mut self, header: Header, packet_id: u16) -> HandlerResult {
        println!("{}  packet_id={}", header.packet_type, packet_id);
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = Loopback {
        buf: Some(VecDeque::new()),
    };
    let mut rxtx = RxTx::new(transport, ScratchDecoder::with_capacity(1024));

    let session = SessionState::new();
    rxtx.rx.set_error_hook(session.error_hook());
    rxtx.tx.set_error_hook(session.error_hook());
    let mut handler = session.tracker(Printer);

    // Client side of the exchange.
    let mut connect = ConnectVariables::new_v311(&b"loopback-demo"[..]);
    connect.keep_alive = 30;
    rxtx.write_connect(&connect)?;

    let subscribe = SubscribeVariables {
        packet_id: 1,
        filters: vec![SubscribeRequest {
            filter: Bytes::from_static(b"demo/#"),
            qos: QoS::AtLeastOnce,
        }],
    };
    session.track_subscribe(&subscribe);
    rxtx.write_subscribe(&subscribe)?;

    // Server side of the exchange.
    rxtx.write_connack(ConnackVariables {
        session_present: false,
        return_code: ConnectReturnCode::Accepted,
    })?;
    let publish = PublishVariables {
        topic: Bytes::from_static(b"demo/hello"),
        packet_id: 2,
    };
    let payload = b"hello from the wire";
    let header = Header::publish(
        false,
        QoS::AtLeastOnce,
        false,
        (publish.size(QoS::AtLeastOnce) + payload.len()) as u32,
    )?;
    rxtx.write_publish(header, &publish, payload)?;
    rxtx.write_identified(PacketType::Puback, 2)?;
    rxtx.write_simple(PacketType::Pingresp)?;

    // Pump every queued packet through the receiver.
    for _ in 0..6 {
        rxtx.read_next_packet(&mut handler)?;
    }

    rxtx.close()?;
    println!("done; last header: {:?}", rxtx.last_received_header());
    Ok(())
}
