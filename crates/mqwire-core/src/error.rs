//! Error types for the mqwire codec.

use std::io;

use thiserror::Error;

use crate::header::PacketType;

/// Main error type for mqwire-core.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// MQTT wire protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Invalid fixed header flags {flags:#06b} for {packet_type:?}")]
    InvalidHeaderFlags { packet_type: PacketType, flags: u8 },

    #[error("Invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("Remaining length mismatch: declared {declared}, consumed {consumed}")]
    RemainingLengthMismatch { declared: u32, consumed: u32 },

    #[error("Field of {needed} bytes runs past remaining packet length {available}")]
    LengthExceedsPacket { needed: usize, available: usize },

    #[error("Invalid QoS: {0}")]
    InvalidQos(u8),

    #[error("Invalid return code: {0:#04x}")]
    InvalidReturnCode(u8),

    #[error("Invalid connect flags: {0:#04x}")]
    InvalidConnectFlags(u8),

    #[error("Invalid connect acknowledge flags: {0:#04x}")]
    InvalidAckFlags(u8),

    #[error("Invalid protocol name")]
    InvalidProtocolName,

    #[error("Unsupported protocol level: {0}")]
    UnsupportedProtocolLevel(u8),

    #[error("Packet identifier must be non-zero")]
    ZeroPacketId,

    #[error("Invalid topic: {0}")]
    InvalidTopic(&'static str),

    #[error("Scratch buffer exceeded: field needs {needed} bytes, {available} available")]
    BufferExceeded { needed: usize, available: usize },

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
}

pub type Result<T> = std::result::Result<T, Error>;
