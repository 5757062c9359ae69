//! Packet transmitter.

use std::io;

use mqwire_core::packet::{
    self, ConnackVariables, ConnectVariables, PublishVariables, SubackVariables,
    SubscribeVariables, UnsubscribeVariables,
};
use mqwire_core::{Header, PacketType};

use crate::error::{LinkError, Result};
use crate::transport::{SharedTransport, Transport};

/// Packet writer: encodes each packet completely into a reusable scratch
/// buffer, then emits it to the transport in a single write. No partial
/// encode is ever flushed.
///
/// Any transport write failure closes the transport exactly once and
/// poisons the slot; subsequent calls return [`LinkError::Closed`] until
/// [`Tx::set_transport`] installs a replacement. Validation failures
/// (before any byte reaches the wire) surface without closing.
pub struct Tx<T: Transport> {
    transport: SharedTransport<T>,
    scratch: Vec<u8>,
    error_hook: Option<Box<dyn FnMut(&LinkError)>>,
}

impl<T: Transport> Tx<T> {
    pub fn new(transport: T) -> Self {
        Self::from_shared(SharedTransport::new(transport))
    }

    pub(crate) fn from_shared(transport: SharedTransport<T>) -> Self {
        Self {
            transport,
            scratch: Vec::new(),
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

    /// Notification hook invoked with every transmit error just before
    /// the transport is closed.
    pub fn set_error_hook(&mut self, hook: impl FnMut(&LinkError) + 'static) {
        self.error_hook = Some(Box::new(hook));
    }

    /// Write a CONNECT packet. Returns the bytes written.
    pub fn write_connect(&mut self, vars: &ConnectVariables) -> Result<usize> {
        self.ensure_open()?;
        self.scratch.clear();
        packet::encode_connect(vars, &mut self.scratch)?;
        self.flush_scratch()
    }

    /// Write a CONNACK packet.
    pub fn write_connack(&mut self, vars: ConnackVariables) -> Result<usize> {
        self.ensure_open()?;
        self.scratch.clear();
        packet::encode_connack(vars, &mut self.scratch)?;
        self.flush_scratch()
    }

    /// Write a PUBLISH packet under a caller-built header (DUP, QoS and
    /// RETAIN are caller-controlled). The header must be a PUBLISH header
    /// whose remaining length equals `vars.size(qos) + payload.len()`,
    /// with a packet identifier present exactly when QoS is 1 or 2.
    pub fn write_publish(
        &mut self,
        header: Header,
        vars: &PublishVariables,
        payload: &[u8],
    ) -> Result<usize> {
        self.ensure_open()?;
        self.scratch.clear();
        packet::encode_publish(header, vars, payload, &mut self.scratch)?;
        self.flush_scratch()
    }

    /// Write a SUBSCRIBE packet.
    pub fn write_subscribe(&mut self, vars: &SubscribeVariables) -> Result<usize> {
        self.ensure_open()?;
        self.scratch.clear();
        packet::encode_subscribe(vars, &mut self.scratch)?;
        self.flush_scratch()
    }

    /// Write an UNSUBSCRIBE packet.
    pub fn write_unsubscribe(&mut self, vars: &UnsubscribeVariables) -> Result<usize> {
        self.ensure_open()?;
        self.scratch.clear();
        packet::encode_unsubscribe(vars, &mut self.scratch)?;
        self.flush_scratch()
    }

    /// Write a SUBACK packet.
    pub fn write_suback(&mut self, vars: &SubackVariables) -> Result<usize> {
        self.ensure_open()?;
        self.scratch.clear();
        packet::encode_suback(vars, &mut self.scratch)?;
        self.flush_scratch()
    }

    /// Write a packet whose body is a bare packet identifier: PUBACK,
    /// PUBREC, PUBREL, PUBCOMP or UNSUBACK.
    pub fn write_identified(&mut self, packet_type: PacketType, packet_id: u16) -> Result<usize> {
        self.ensure_open()?;
        self.scratch.clear();
        packet::encode_identified(packet_type, packet_id, &mut self.scratch)?;
        self.flush_scratch()
    }

    /// Write a header-only packet: PINGREQ, PINGRESP or DISCONNECT.
    pub fn write_simple(&mut self, packet_type: PacketType) -> Result<usize> {
        self.ensure_open()?;
        self.scratch.clear();
        packet::encode_simple(packet_type, &mut self.scratch)?;
        self.flush_scratch()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.transport.is_closed() {
            return Err(LinkError::Closed);
        }
        Ok(())
    }

    fn flush_scratch(&mut self) -> Result<usize> {
        let mut guard = self.transport.borrow_mut();
        let Some(transport) = guard.as_mut() else {
            return Err(LinkError::Closed);
        };
        match transport.write_all(&self.scratch) {
            Ok(()) => {
                log::trace!("tx {} bytes", self.scratch.len());
                Ok(self.scratch.len())
            }
            Err(err) => {
                drop(guard);
                Err(self.fail(err.into()))
            }
        }
    }

    fn fail(&mut self, err: LinkError) -> LinkError {
        if let Some(hook) = self.error_hook.as_mut() {
            hook(&err);
        }
        log::debug!("tx error, closing transport: {}", err);
        if let Err(close_err) = self.transport.close() {
            log::debug!("transport close failed: {}", close_err);
        }
        err
    }
}
