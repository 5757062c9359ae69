//! mqwire-link - Synchronous MQTT 3.1.1 link handler.
//!
//! This crate layers a transport-agnostic receive/transmit state machine
//! over the `mqwire-core` packet codec. An [`Rx`] reads one packet at a
//! time from any [`Transport`], validates it strictly, and dispatches a
//! typed event through a [`PacketHandler`]; a [`Tx`] writes packets with
//! correct framing; an [`RxTx`] composes both over one transport with
//! shared close semantics. Any malformed byte, transport failure or
//! handler error closes the transport and poisons the link until a new
//! transport is installed.
//!
//! The codec is single-threaded and cooperative: calls block on the
//! caller's thread, callbacks run synchronously in wire order, and there
//! is no internal locking. Higher-level session logic (keep-alive
//! timers, reconnects) belongs to the host; [`SessionState`] covers the
//! bookkeeping part of it.

mod error;
mod handler;
mod rx;
mod rxtx;
mod session;
mod transport;
mod tx;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{LinkError, Result};
pub use handler::{HandlerError, HandlerResult, NullHandler, PacketHandler};
pub use rx::{PayloadReader, Rx};
pub use rxtx::RxTx;
pub use session::{SessionState, SessionTracker};
pub use transport::Transport;
pub use tx::Tx;

// Re-export the codec types that appear in this crate's API.
pub use mqwire_core::packet::{
    ConnackVariables, ConnectVariables, PublishVariables, SubackVariables, SubscribeRequest,
    SubscribeVariables, UnsubscribeVariables, Will,
};
pub use mqwire_core::{
    AllocDecoder, ConnectReturnCode, Decoder, Header, PacketType, QoS, ScratchDecoder, SubackCode,
};
