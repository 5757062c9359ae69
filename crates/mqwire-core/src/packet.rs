//! MQTT 3.1.1 variable headers: typed values, sizes, and codecs.
//!
//! Encoders append a complete packet (fixed header included) to a `Vec`.
//! Decoders consume exactly the remaining length declared by an already
//! decoded [`Header`], reading directly from the transport stream; string
//! and byte fields are materialized through a [`Decoder`].

use std::io::Read;

use bytes::Bytes;

use crate::decoder::Decoder;
use crate::error::{ProtocolError, Result};
use crate::header::{
    ConnectReturnCode, Header, PacketType, QoS, SubackCode, FLAGS_PUBREL_SUB_UNSUB,
};

/// Protocol name carried in every CONNECT variable header.
pub const PROTOCOL_NAME: &[u8] = b"MQTT";

/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// CONNECT variable header and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectVariables {
    pub protocol: Bytes,
    pub protocol_level: u8,
    pub clean_session: bool,
    /// Keep-alive interval in seconds (0 = disabled).
    pub keep_alive: u16,
    /// May be empty only when `clean_session` is set.
    pub client_id: Bytes,
    pub will: Option<Will>,
    pub username: Option<Bytes>,
    pub password: Option<Bytes>,
}

/// Will message configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: Bytes,
    pub message: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl ConnectVariables {
    /// CONNECT defaults for MQTT 3.1.1: protocol "MQTT", level 4, clean
    /// session, no keep-alive.
    pub fn new_v311(client_id: impl Into<Bytes>) -> Self {
        Self {
            protocol: Bytes::from_static(PROTOCOL_NAME),
            protocol_level: PROTOCOL_LEVEL,
            clean_session: true,
            keep_alive: 0,
            client_id: client_id.into(),
            will: None,
            username: None,
            password: None,
        }
    }

    /// Connect flag byte:
    /// `[username | password | will retain | will QoS (2) | will flag | clean session | reserved]`.
    pub fn flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04 | ((will.qos as u8) << 3);
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        flags
    }

    /// Byte count of the variable header plus payload.
    pub fn size(&self) -> usize {
        let mut n = 2 + self.protocol.len() + 1 + 1 + 2 + 2 + self.client_id.len();
        if let Some(will) = &self.will {
            n += 2 + will.topic.len() + 2 + will.message.len();
        }
        if let Some(username) = &self.username {
            n += 2 + username.len();
        }
        if let Some(password) = &self.password {
            n += 2 + password.len();
        }
        n
    }
}

/// CONNACK variable header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnackVariables {
    /// Bit 0 of the acknowledge flags byte; the other bits are reserved.
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl ConnackVariables {
    pub fn size(&self) -> usize {
        2
    }
}

/// PUBLISH variable header. DUP, QoS and RETAIN live in the fixed header;
/// the payload is everything after these fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishVariables {
    /// Non-empty, wildcard-free topic name.
    pub topic: Bytes,
    /// Meaningful (and non-zero) only at QoS 1/2; 0 otherwise.
    pub packet_id: u16,
}

impl PublishVariables {
    pub fn size(&self, qos: QoS) -> usize {
        2 + self.topic.len() + if qos == QoS::AtMostOnce { 0 } else { 2 }
    }
}

/// One SUBSCRIBE entry: topic filter plus requested QoS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub filter: Bytes,
    pub qos: QoS,
}

/// SUBSCRIBE variable header and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeVariables {
    /// Non-zero.
    pub packet_id: u16,
    /// At least one entry.
    pub filters: Vec<SubscribeRequest>,
}

impl SubscribeVariables {
    pub fn size(&self) -> usize {
        2 + self
            .filters
            .iter()
            .map(|req| 2 + req.filter.len() + 1)
            .sum::<usize>()
    }
}

/// UNSUBSCRIBE variable header and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeVariables {
    /// Non-zero.
    pub packet_id: u16,
    /// At least one entry.
    pub filters: Vec<Bytes>,
}

impl UnsubscribeVariables {
    pub fn size(&self) -> usize {
        2 + self.filters.iter().map(|f| 2 + f.len()).sum::<usize>()
    }
}

/// SUBACK variable header and payload: one return code per filter of the
/// SUBSCRIBE being acknowledged, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubackVariables {
    pub packet_id: u16,
    pub return_codes: Vec<SubackCode>,
}

impl SubackVariables {
    pub fn size(&self) -> usize {
        2 + self.return_codes.len()
    }
}

/// Streaming cursor over one packet body, bounded by the declared
/// remaining length. Any field that would run past the budget fails
/// before touching the transport, so a malformed length prefix can never
/// desynchronize the stream.
struct BodyReader<'a, R: Read> {
    r: &'a mut R,
    declared: u32,
    remaining: usize,
}

impl<'a, R: Read> BodyReader<'a, R> {
    fn new(r: &'a mut R, remaining_length: u32) -> Self {
        Self {
            r,
            declared: remaining_length,
            remaining: remaining_length as usize,
        }
    }

    fn remaining(&self) -> usize {
        self.remaining
    }

    fn claim(&mut self, n: usize) -> Result<()> {
        if n > self.remaining {
            return Err(ProtocolError::LengthExceedsPacket {
                needed: n,
                available: self.remaining,
            }
            .into());
        }
        self.remaining -= n;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.claim(1)?;
        let mut buf = [0u8; 1];
        self.r.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        self.claim(2)?;
        let mut buf = [0u8; 2];
        self.r.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_string<D: Decoder>(&mut self, dec: &mut D) -> Result<Bytes> {
        let len = self.read_u16()? as usize;
        self.claim(len)?;
        dec.decode_bytes(self.r, len)
    }

    /// Verify the body was consumed exactly.
    fn finish(self) -> Result<()> {
        if self.remaining != 0 {
            return Err(ProtocolError::RemainingLengthMismatch {
                declared: self.declared,
                consumed: self.declared - self.remaining as u32,
            }
            .into());
        }
        Ok(())
    }
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_string(buf: &mut Vec<u8>, s: &[u8]) -> std::result::Result<(), ProtocolError> {
    let len = u16::try_from(s.len()).map_err(|_| {
        ProtocolError::MalformedPacket(format!(
            "String field of {} bytes exceeds u16 length prefix",
            s.len()
        ))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s);
    Ok(())
}

fn validate_topic_name(topic: &[u8]) -> std::result::Result<(), ProtocolError> {
    if topic.is_empty() {
        return Err(ProtocolError::InvalidTopic("empty topic name"));
    }
    if topic.contains(&b'+') || topic.contains(&b'#') {
        return Err(ProtocolError::InvalidTopic("wildcard in topic name"));
    }
    Ok(())
}

// === Encoding ===

/// Encode a complete CONNECT packet. Returns the bytes written.
pub fn encode_connect(
    vars: &ConnectVariables,
    buf: &mut Vec<u8>,
) -> std::result::Result<usize, ProtocolError> {
    if vars.password.is_some() && vars.username.is_none() {
        return Err(ProtocolError::MalformedPacket(
            "Password flag must be 0 when username flag is 0".into(),
        ));
    }
    if vars.client_id.is_empty() && !vars.clean_session {
        return Err(ProtocolError::MalformedPacket(
            "Zero-length client ID requires clean session".into(),
        ));
    }

    let start = buf.len();
    let header = Header::new(PacketType::Connect, 0, vars.size() as u32)?;
    header.encode(buf)?;

    put_string(buf, &vars.protocol)?;
    buf.push(vars.protocol_level);
    buf.push(vars.flags());
    put_u16(buf, vars.keep_alive);

    // Payload, in order: client ID, will topic, will message, username,
    // password, each present iff its flag is set.
    put_string(buf, &vars.client_id)?;
    if let Some(will) = &vars.will {
        put_string(buf, &will.topic)?;
        put_string(buf, &will.message)?;
    }
    if let Some(username) = &vars.username {
        put_string(buf, username)?;
    }
    if let Some(password) = &vars.password {
        put_string(buf, password)?;
    }
    Ok(buf.len() - start)
}

/// Encode a complete CONNACK packet.
pub fn encode_connack(
    vars: ConnackVariables,
    buf: &mut Vec<u8>,
) -> std::result::Result<usize, ProtocolError> {
    let start = buf.len();
    let header = Header::new(PacketType::Connack, 0, vars.size() as u32)?;
    header.encode(buf)?;
    buf.push(vars.session_present as u8);
    buf.push(vars.return_code as u8);
    Ok(buf.len() - start)
}

/// Encode a complete PUBLISH packet under a caller-built header.
///
/// DUP, QoS and RETAIN are caller-controlled through the header, which
/// must declare a remaining length of exactly `vars.size(qos) +
/// payload.len()`. The packet identifier must be non-zero exactly when
/// QoS is 1 or 2.
pub fn encode_publish(
    header: Header,
    vars: &PublishVariables,
    payload: &[u8],
    buf: &mut Vec<u8>,
) -> std::result::Result<usize, ProtocolError> {
    if header.packet_type != PacketType::Publish {
        return Err(ProtocolError::MalformedPacket(format!(
            "Expected PUBLISH header, got {}",
            header.packet_type
        )));
    }
    let qos = header.qos();
    validate_topic_name(&vars.topic)?;
    if (qos != QoS::AtMostOnce) != (vars.packet_id != 0) {
        return Err(ProtocolError::ZeroPacketId);
    }
    let expected = vars.size(qos) + payload.len();
    if header.remaining_length as usize != expected {
        return Err(ProtocolError::RemainingLengthMismatch {
            declared: header.remaining_length,
            consumed: expected as u32,
        });
    }

    let start = buf.len();
    header.encode(buf)?;
    put_string(buf, &vars.topic)?;
    if qos != QoS::AtMostOnce {
        put_u16(buf, vars.packet_id);
    }
    buf.extend_from_slice(payload);
    Ok(buf.len() - start)
}

/// Encode a complete SUBSCRIBE packet.
pub fn encode_subscribe(
    vars: &SubscribeVariables,
    buf: &mut Vec<u8>,
) -> std::result::Result<usize, ProtocolError> {
    if vars.packet_id == 0 {
        return Err(ProtocolError::ZeroPacketId);
    }
    if vars.filters.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "SUBSCRIBE with no topic filters".into(),
        ));
    }

    let start = buf.len();
    let header = Header::new(
        PacketType::Subscribe,
        FLAGS_PUBREL_SUB_UNSUB,
        vars.size() as u32,
    )?;
    header.encode(buf)?;
    put_u16(buf, vars.packet_id);
    for req in &vars.filters {
        if req.filter.is_empty() {
            return Err(ProtocolError::InvalidTopic("empty topic filter"));
        }
        put_string(buf, &req.filter)?;
        buf.push(req.qos as u8);
    }
    Ok(buf.len() - start)
}

/// Encode a complete UNSUBSCRIBE packet.
pub fn encode_unsubscribe(
    vars: &UnsubscribeVariables,
    buf: &mut Vec<u8>,
) -> std::result::Result<usize, ProtocolError> {
    if vars.packet_id == 0 {
        return Err(ProtocolError::ZeroPacketId);
    }
    if vars.filters.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "UNSUBSCRIBE with no topic filters".into(),
        ));
    }

    let start = buf.len();
    let header = Header::new(
        PacketType::Unsubscribe,
        FLAGS_PUBREL_SUB_UNSUB,
        vars.size() as u32,
    )?;
    header.encode(buf)?;
    put_u16(buf, vars.packet_id);
    for filter in &vars.filters {
        if filter.is_empty() {
            return Err(ProtocolError::InvalidTopic("empty topic filter"));
        }
        put_string(buf, filter)?;
    }
    Ok(buf.len() - start)
}

/// Encode a complete SUBACK packet.
pub fn encode_suback(
    vars: &SubackVariables,
    buf: &mut Vec<u8>,
) -> std::result::Result<usize, ProtocolError> {
    if vars.return_codes.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "SUBACK with no return codes".into(),
        ));
    }

    let start = buf.len();
    let header = Header::new(PacketType::Suback, 0, vars.size() as u32)?;
    header.encode(buf)?;
    put_u16(buf, vars.packet_id);
    for code in &vars.return_codes {
        buf.push(code.as_byte());
    }
    Ok(buf.len() - start)
}

/// Encode a packet whose whole body is a packet identifier: PUBACK,
/// PUBREC, PUBREL, PUBCOMP or UNSUBACK.
pub fn encode_identified(
    packet_type: PacketType,
    packet_id: u16,
    buf: &mut Vec<u8>,
) -> std::result::Result<usize, ProtocolError> {
    let flags = match packet_type {
        PacketType::Pubrel => FLAGS_PUBREL_SUB_UNSUB,
        PacketType::Puback | PacketType::Pubrec | PacketType::Pubcomp | PacketType::Unsuback => 0,
        other => {
            return Err(ProtocolError::MalformedPacket(format!(
                "{} does not carry a bare packet identifier",
                other
            )))
        }
    };

    let start = buf.len();
    Header::new(packet_type, flags, 2)?.encode(buf)?;
    put_u16(buf, packet_id);
    Ok(buf.len() - start)
}

/// Encode a header-only packet: PINGREQ, PINGRESP or DISCONNECT.
pub fn encode_simple(
    packet_type: PacketType,
    buf: &mut Vec<u8>,
) -> std::result::Result<usize, ProtocolError> {
    match packet_type {
        PacketType::Pingreq | PacketType::Pingresp | PacketType::Disconnect => {}
        other => {
            return Err(ProtocolError::MalformedPacket(format!(
                "{} carries a variable header",
                other
            )))
        }
    }

    let start = buf.len();
    Header::new(packet_type, 0, 0)?.encode(buf)?;
    Ok(buf.len() - start)
}

// === Decoding ===

/// Decode CONNECT variables, consuming exactly `remaining_length` bytes.
pub fn decode_connect<R: Read, D: Decoder>(
    r: &mut R,
    remaining_length: u32,
    dec: &mut D,
) -> Result<ConnectVariables> {
    let mut body = BodyReader::new(r, remaining_length);

    let protocol = body.read_string(dec)?;
    if protocol != PROTOCOL_NAME {
        return Err(ProtocolError::InvalidProtocolName.into());
    }
    let protocol_level = body.read_u8()?;
    if protocol_level != PROTOCOL_LEVEL {
        return Err(ProtocolError::UnsupportedProtocolLevel(protocol_level).into());
    }

    let flags = body.read_u8()?;
    // Reserved bit must be 0.
    if flags & 0x01 != 0 {
        return Err(ProtocolError::InvalidConnectFlags(flags).into());
    }
    let clean_session = flags & 0x02 != 0;
    let will_flag = flags & 0x04 != 0;
    let will_qos = QoS::try_from((flags >> 3) & 0b11)?;
    let will_retain = flags & 0x20 != 0;
    let password_flag = flags & 0x40 != 0;
    let username_flag = flags & 0x80 != 0;

    // Will QoS and will retain must be 0 when the will flag is 0.
    if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
        return Err(ProtocolError::InvalidConnectFlags(flags).into());
    }
    if password_flag && !username_flag {
        return Err(ProtocolError::MalformedPacket(
            "Password flag must be 0 when username flag is 0".into(),
        )
        .into());
    }

    let keep_alive = body.read_u16()?;

    let client_id = body.read_string(dec)?;
    if client_id.is_empty() && !clean_session {
        return Err(ProtocolError::MalformedPacket(
            "Zero-length client ID requires clean session".into(),
        )
        .into());
    }

    let will = if will_flag {
        let topic = body.read_string(dec)?;
        let message = body.read_string(dec)?;
        Some(Will {
            topic,
            message,
            qos: will_qos,
            retain: will_retain,
        })
    } else {
        None
    };

    let username = if username_flag {
        Some(body.read_string(dec)?)
    } else {
        None
    };
    let password = if password_flag {
        Some(body.read_string(dec)?)
    } else {
        None
    };

    body.finish()?;
    Ok(ConnectVariables {
        protocol,
        protocol_level,
        clean_session,
        keep_alive,
        client_id,
        will,
        username,
        password,
    })
}

/// Decode CONNACK variables. The remaining length must be exactly 2.
pub fn decode_connack<R: Read>(r: &mut R, remaining_length: u32) -> Result<ConnackVariables> {
    let mut body = BodyReader::new(r, remaining_length);
    let ack_flags = body.read_u8()?;
    if ack_flags & !0x01 != 0 {
        return Err(ProtocolError::InvalidAckFlags(ack_flags).into());
    }
    let return_code = ConnectReturnCode::try_from(body.read_u8()?)?;
    body.finish()?;
    Ok(ConnackVariables {
        session_present: ack_flags & 0x01 != 0,
        return_code,
    })
}

/// Decode PUBLISH variables: topic name plus, at QoS 1/2, the packet
/// identifier. The payload is *not* consumed; the returned count is the
/// number of payload bytes left in the packet for the caller to read.
pub fn decode_publish<R: Read, D: Decoder>(
    r: &mut R,
    header: &Header,
    dec: &mut D,
) -> Result<(PublishVariables, usize)> {
    let qos = header.qos();
    let mut body = BodyReader::new(r, header.remaining_length);

    let topic = body.read_string(dec)?;
    validate_topic_name(&topic)?;

    let packet_id = if qos != QoS::AtMostOnce {
        let id = body.read_u16()?;
        if id == 0 {
            return Err(ProtocolError::ZeroPacketId.into());
        }
        id
    } else {
        0
    };

    let payload_len = body.remaining();
    Ok((PublishVariables { topic, packet_id }, payload_len))
}

/// Decode SUBSCRIBE variables, consuming exactly `remaining_length` bytes.
pub fn decode_subscribe<R: Read, D: Decoder>(
    r: &mut R,
    remaining_length: u32,
    dec: &mut D,
) -> Result<SubscribeVariables> {
    let mut body = BodyReader::new(r, remaining_length);
    let packet_id = body.read_u16()?;
    if packet_id == 0 {
        return Err(ProtocolError::ZeroPacketId.into());
    }

    let mut filters = Vec::new();
    while body.remaining() > 0 {
        let filter = body.read_string(dec)?;
        if filter.is_empty() {
            return Err(ProtocolError::InvalidTopic("empty topic filter").into());
        }
        let options = body.read_u8()?;
        // Only the two QoS bits may be set.
        if options & !0b11 != 0 {
            return Err(ProtocolError::MalformedPacket(format!(
                "Reserved bits set in subscription options: {:#04x}",
                options
            ))
            .into());
        }
        let qos = QoS::try_from(options)?;
        filters.push(SubscribeRequest { filter, qos });
    }

    if filters.is_empty() {
        return Err(ProtocolError::MalformedPacket("SUBSCRIBE with no topic filters".into()).into());
    }
    body.finish()?;
    Ok(SubscribeVariables { packet_id, filters })
}

/// Decode UNSUBSCRIBE variables, consuming exactly `remaining_length`
/// bytes.
pub fn decode_unsubscribe<R: Read, D: Decoder>(
    r: &mut R,
    remaining_length: u32,
    dec: &mut D,
) -> Result<UnsubscribeVariables> {
    let mut body = BodyReader::new(r, remaining_length);
    let packet_id = body.read_u16()?;
    if packet_id == 0 {
        return Err(ProtocolError::ZeroPacketId.into());
    }

    let mut filters = Vec::new();
    while body.remaining() > 0 {
        let filter = body.read_string(dec)?;
        if filter.is_empty() {
            return Err(ProtocolError::InvalidTopic("empty topic filter").into());
        }
        filters.push(filter);
    }

    if filters.is_empty() {
        return Err(
            ProtocolError::MalformedPacket("UNSUBSCRIBE with no topic filters".into()).into(),
        );
    }
    body.finish()?;
    Ok(UnsubscribeVariables { packet_id, filters })
}

/// Decode SUBACK variables, consuming exactly `remaining_length` bytes.
pub fn decode_suback<R: Read>(r: &mut R, remaining_length: u32) -> Result<SubackVariables> {
    let mut body = BodyReader::new(r, remaining_length);
    let packet_id = body.read_u16()?;

    let mut return_codes = Vec::new();
    while body.remaining() > 0 {
        return_codes.push(SubackCode::try_from(body.read_u8()?)?);
    }

    if return_codes.is_empty() {
        return Err(ProtocolError::MalformedPacket("SUBACK with no return codes".into()).into());
    }
    body.finish()?;
    Ok(SubackVariables {
        packet_id,
        return_codes,
    })
}

/// Decode a bare packet identifier body (PUBACK, PUBREC, PUBREL, PUBCOMP,
/// UNSUBACK). The remaining length must be exactly 2.
pub fn decode_packet_id<R: Read>(r: &mut R, remaining_length: u32) -> Result<u16> {
    let mut body = BodyReader::new(r, remaining_length);
    let packet_id = body.read_u16()?;
    body.finish()?;
    Ok(packet_id)
}
