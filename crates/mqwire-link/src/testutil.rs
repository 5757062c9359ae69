//! In-memory transports and a recording handler for tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use mqwire_core::packet::{
    ConnackVariables, ConnectVariables, PublishVariables, SubackVariables, SubscribeVariables,
    UnsubscribeVariables,
};
use mqwire_core::{Header, PacketType};

use crate::handler::{HandlerResult, PacketHandler};
use crate::rx::PayloadReader;
use crate::transport::Transport;

/// Loopback transport: reads back whatever was written, in order. After
/// close, every operation fails with a broken pipe.
pub(crate) struct Loopback {
    buf: Option<VecDeque<u8>>,
}

impl Loopback {
    pub(crate) fn new() -> Self {
        Self {
            buf: Some(VecDeque::new()),
        }
    }

    pub(crate) fn with_bytes(bytes: &[u8]) -> Self {
        Self {
            buf: Some(bytes.iter().copied().collect()),
        }
    }
}

fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "closed pipe")
}

impl Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let queue = self.buf.as_mut().ok_or_else(closed_pipe)?;
        let n = buf.len().min(queue.len());
        for slot in &mut buf[..n] {
            *slot = queue.pop_front().expect("length checked");
        }
        Ok(n)
    }
}

impl Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let queue = self.buf.as_mut().ok_or_else(closed_pipe)?;
        queue.extend(buf.iter().copied());
        Ok(buf.len())
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

/// Transport whose writes always fail.
#[derive(Default)]
pub(crate) struct Broken;

impl Read for Broken {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "broken"))
    }
}

impl Write for Broken {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "broken"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for Broken {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Handler that records everything it is handed; PUBLISH payloads are
/// read to completion.
#[derive(Default)]
pub(crate) struct Capture {
    pub connect: Vec<ConnectVariables>,
    pub connack: Vec<ConnackVariables>,
    pub publish: Vec<(Header, PublishVariables, Vec<u8>)>,
    pub subscribe: Vec<SubscribeVariables>,
    pub unsubscribe: Vec<UnsubscribeVariables>,
    pub suback: Vec<SubackVariables>,
    pub other: Vec<(PacketType, u16)>,
}

impl PacketHandler for Capture {
    fn on_connect(&mut self, _header: Header, vars: &ConnectVariables) -> HandlerResult {
        self.connect.push(vars.clone());
        Ok(())
    }

    fn on_connack(&mut self, _header: Header, vars: ConnackVariables) -> HandlerResult {
        self.connack.push(vars);
        Ok(())
    }

    fn on_publish(
        &mut self,
        header: Header,
        vars: PublishVariables,
        payload: &mut PayloadReader<'_>,
    ) -> HandlerResult {
        let mut bytes = Vec::new();
        payload.read_to_end(&mut bytes)?;
        self.publish.push((header, vars, bytes));
        Ok(())
    }

    fn on_subscribe(&mut self, _header: Header, vars: SubscribeVariables) -> HandlerResult {
        self.subscribe.push(vars);
        Ok(())
    }

    fn on_unsubscribe(&mut self, _header: Header, vars: UnsubscribeVariables) -> HandlerResult {
        self.unsubscribe.push(vars);
        Ok(())
    }

    fn on_suback(&mut self, _header: Header, vars: SubackVariables) -> HandlerResult {
        self.suback.push(vars);
        Ok(())
    }

    fn on_other(&mut self, header: Header, packet_id: u16) -> HandlerResult {
        self.other.push((header.packet_type, packet_id));
        Ok(())
    }
}
