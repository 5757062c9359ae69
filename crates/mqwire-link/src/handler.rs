//! Packet dispatch surface for the receiver.

use mqwire_core::packet::{
    ConnackVariables, ConnectVariables, PublishVariables, SubackVariables, SubscribeVariables,
    UnsubscribeVariables,
};
use mqwire_core::Header;

use crate::rx::PayloadReader;

/// Error returned from a handler method. A non-`Ok` return closes the
/// transport and surfaces as `LinkError::Callback`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Visitor over received packets, dispatched by
/// [`Rx::read_next_packet`](crate::Rx::read_next_packet).
///
/// Every method has a default implementation that does nothing. The
/// receiver decodes the packet body either way and drains any unread
/// PUBLISH payload, so partial implementations keep the stream aligned.
pub trait PacketHandler {
    fn on_connect(&mut self, header: Header, vars: &ConnectVariables) -> HandlerResult {
        let _ = (header, vars);
        Ok(())
    }

    fn on_connack(&mut self, header: Header, vars: ConnackVariables) -> HandlerResult {
        let _ = (header, vars);
        Ok(())
    }

    /// Called with the PUBLISH variable header and a reader bounded to
    /// exactly the payload bytes. The reader shares the transport's read
    /// position and is only valid during this call: consume or copy the
    /// payload before returning. Bytes left unread are discarded.
    fn on_publish(
        &mut self,
        header: Header,
        vars: PublishVariables,
        payload: &mut PayloadReader<'_>,
    ) -> HandlerResult {
        let _ = (header, vars, payload);
        Ok(())
    }

    fn on_subscribe(&mut self, header: Header, vars: SubscribeVariables) -> HandlerResult {
        let _ = (header, vars);
        Ok(())
    }

    fn on_unsubscribe(&mut self, header: Header, vars: UnsubscribeVariables) -> HandlerResult {
        let _ = (header, vars);
        Ok(())
    }

    fn on_suback(&mut self, header: Header, vars: SubackVariables) -> HandlerResult {
        let _ = (header, vars);
        Ok(())
    }

    /// Called for PUBACK, PUBREC, PUBREL, PUBCOMP and UNSUBACK with their
    /// packet identifier, and for PINGREQ, PINGRESP and DISCONNECT with 0.
    /// The packet type is available on `header`.
    fn on_other(&mut self, header: Header, packet_id: u16) -> HandlerResult {
        let _ = (header, packet_id);
        Ok(())
    }
}

/// A handler that ignores every packet. Useful for draining a stream or
/// exercising the receiver without observing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHandler;

impl PacketHandler for NullHandler {}
