//! mqwire-core - MQTT 3.1.1 wire types and packet codec.
//!
//! This crate provides the fundamental types for MQTT 3.1.1 packet
//! encoding and decoding: the fixed header, per-packet variable headers,
//! the remaining-length varint, and the pluggable decoder used to
//! materialize string fields. The transport-facing receive/transmit
//! handler lives in `mqwire-link`.

pub mod decoder;
pub mod error;
pub mod header;
pub mod packet;
pub mod varint;

pub use decoder::{AllocDecoder, Decoder, ScratchDecoder};
pub use error::{Error, ProtocolError, Result};
pub use header::{ConnectReturnCode, Header, PacketType, QoS, SubackCode};
pub use packet::*;
