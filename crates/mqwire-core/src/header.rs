//! MQTT fixed header: packet type, flag nibble, and remaining length.

use std::fmt;
use std::io::Read;

use crate::error::{ProtocolError, Result};
use crate::varint;

/// MQTT Control Packet Types (4 bits, values 1-14).
///
/// Values 0 and 15 are reserved by MQTT 3.1.1 and rejected on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::Connack),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::Puback),
            5 => Ok(PacketType::Pubrec),
            6 => Ok(PacketType::Pubrel),
            7 => Ok(PacketType::Pubcomp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::Suback),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::Unsuback),
            12 => Ok(PacketType::Pingreq),
            13 => Ok(PacketType::Pingresp),
            14 => Ok(PacketType::Disconnect),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PacketType::Connect => "CONNECT",
            PacketType::Connack => "CONNACK",
            PacketType::Publish => "PUBLISH",
            PacketType::Puback => "PUBACK",
            PacketType::Pubrec => "PUBREC",
            PacketType::Pubrel => "PUBREL",
            PacketType::Pubcomp => "PUBCOMP",
            PacketType::Subscribe => "SUBSCRIBE",
            PacketType::Suback => "SUBACK",
            PacketType::Unsubscribe => "UNSUBSCRIBE",
            PacketType::Unsuback => "UNSUBACK",
            PacketType::Pingreq => "PINGREQ",
            PacketType::Pingresp => "PINGRESP",
            PacketType::Disconnect => "DISCONNECT",
        })
    }
}

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::InvalidQos(value)),
        }
    }
}

/// SUBACK return codes: a granted QoS, or 0x80 for a rejected subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubackCode {
    Granted(QoS),
    Failure,
}

impl SubackCode {
    pub fn as_byte(self) -> u8 {
        match self {
            SubackCode::Granted(qos) => qos as u8,
            SubackCode::Failure => 0x80,
        }
    }
}

impl TryFrom<u8> for SubackCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 | 1 | 2 => Ok(SubackCode::Granted(QoS::try_from(value)?)),
            0x80 => Ok(SubackCode::Failure),
            _ => Err(ProtocolError::InvalidReturnCode(value)),
        }
    }
}

/// CONNACK return codes.
///
/// A non-zero code describes why the server refused the connection, and
/// implements `std::error::Error` so it can be surfaced directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocol = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUserCredentials = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocol),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadUserCredentials),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            _ => Err(ProtocolError::InvalidReturnCode(value)),
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectReturnCode::Accepted => "connection accepted",
            ConnectReturnCode::UnacceptableProtocol => "unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "client identifier rejected",
            ConnectReturnCode::ServerUnavailable => "server unavailable",
            ConnectReturnCode::BadUserCredentials => "bad user name or password",
            ConnectReturnCode::NotAuthorized => "not authorized",
        })
    }
}

impl std::error::Error for ConnectReturnCode {}

/// Reserved flag nibble for PUBREL, SUBSCRIBE and UNSUBSCRIBE packets.
pub const FLAGS_PUBREL_SUB_UNSUB: u8 = 0b0010;

/// MQTT fixed header: 2-5 bytes on the wire.
///
/// The first byte packs the packet type into the high nibble and the
/// per-type flags into the low nibble; the remaining length follows as a
/// variable byte integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
}

impl Header {
    /// Build a validated header.
    ///
    /// Rejects flag nibbles that violate the per-type rules (PUBREL,
    /// SUBSCRIBE and UNSUBSCRIBE must carry `0b0010`; PUBLISH admits
    /// DUP/QoS/RETAIN with QoS below 3; everything else must be zero) and
    /// remaining lengths above [`varint::MAX_REMAINING_LENGTH`].
    pub fn new(
        packet_type: PacketType,
        flags: u8,
        remaining_length: u32,
    ) -> std::result::Result<Self, ProtocolError> {
        if remaining_length > varint::MAX_REMAINING_LENGTH {
            return Err(ProtocolError::InvalidRemainingLength);
        }
        let flags = flags & 0x0F;
        match packet_type {
            PacketType::Publish => {
                QoS::try_from((flags >> 1) & 0b11)?;
            }
            PacketType::Pubrel | PacketType::Subscribe | PacketType::Unsubscribe => {
                if flags != FLAGS_PUBREL_SUB_UNSUB {
                    return Err(ProtocolError::InvalidHeaderFlags { packet_type, flags });
                }
            }
            _ => {
                if flags != 0 {
                    return Err(ProtocolError::InvalidHeaderFlags { packet_type, flags });
                }
            }
        }
        Ok(Self {
            packet_type,
            flags,
            remaining_length,
        })
    }

    /// Build a PUBLISH header with flags `DUP<<3 | QoS<<1 | RETAIN`.
    pub fn publish(
        dup: bool,
        qos: QoS,
        retain: bool,
        remaining_length: u32,
    ) -> std::result::Result<Self, ProtocolError> {
        let flags = ((dup as u8) << 3) | ((qos as u8) << 1) | (retain as u8);
        Self::new(PacketType::Publish, flags, remaining_length)
    }

    /// DUP flag. Meaningful for PUBLISH only.
    pub fn dup(&self) -> bool {
        self.flags & 0b1000 != 0
    }

    /// RETAIN flag. Meaningful for PUBLISH only.
    pub fn retain(&self) -> bool {
        self.flags & 0b0001 != 0
    }

    /// QoS carried in the flag nibble. Meaningful for PUBLISH only;
    /// other packet types report `AtMostOnce`.
    pub fn qos(&self) -> QoS {
        QoS::try_from((self.flags >> 1) & 0b11).unwrap_or(QoS::AtMostOnce)
    }

    /// Whether this packet carries a packet identifier in its variable
    /// header: PUBLISH at QoS 1/2, the four QoS acknowledgements,
    /// SUBSCRIBE/SUBACK, UNSUBSCRIBE/UNSUBACK.
    pub fn has_packet_identifier(&self) -> bool {
        match self.packet_type {
            PacketType::Publish => self.qos() != QoS::AtMostOnce,
            PacketType::Puback
            | PacketType::Pubrec
            | PacketType::Pubrel
            | PacketType::Pubcomp
            | PacketType::Subscribe
            | PacketType::Suback
            | PacketType::Unsubscribe
            | PacketType::Unsuback => true,
            _ => false,
        }
    }

    /// Encoded size on the wire (2-5 bytes), or 0 if the remaining length
    /// cannot be encoded.
    pub fn size(&self) -> usize {
        if self.remaining_length > varint::MAX_REMAINING_LENGTH {
            return 0;
        }
        1 + varint::encoded_len(self.remaining_length)
    }

    /// Append the encoded header to `buf`. Returns the bytes written.
    pub fn encode(&self, buf: &mut Vec<u8>) -> std::result::Result<usize, ProtocolError> {
        if self.remaining_length > varint::MAX_REMAINING_LENGTH {
            return Err(ProtocolError::InvalidRemainingLength);
        }
        buf.push(((self.packet_type as u8) << 4) | (self.flags & 0x0F));
        let n = varint::encode(self.remaining_length, buf)?;
        Ok(1 + n)
    }

    /// Decode a header from a stream, validating as [`Header::new`] would.
    /// Returns the header and the bytes consumed.
    pub fn decode<R: Read>(r: &mut R) -> Result<(Self, usize)> {
        let mut first = [0u8; 1];
        r.read_exact(&mut first)?;
        let packet_type = PacketType::try_from(first[0] >> 4)?;
        let flags = first[0] & 0x0F;
        let (remaining_length, n) = varint::decode(r)?;
        let header = Header::new(packet_type, flags, remaining_length)?;
        Ok((header, 1 + n))
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(flags={:#06b}, remaining_length={})",
            self.packet_type, self.flags, self.remaining_length
        )
    }
}
