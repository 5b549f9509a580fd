//! Wire framing: the 2-byte header (plus 4-byte total-length on `First`
//! frames) that every on-wire chunk of an Android Auto message is wrapped
//! in.

use nom::{
    error::context,
    number::streaming::{be_u16, be_u32, be_u8},
    sequence::tuple,
    IResult,
};

/// Bytes beyond which a message body must be split across multiple frames.
pub const MAX_FRAME_PAYLOAD: usize = 16384;

/// Position of a frame within a (possibly fragmented) message.
///
/// Encoded in the low two bits of the header's flag byte as an independent
/// 2-bit field, not as "First" vs "everything else": `First` sets bit 0
/// only, `Last` sets bit 1 only, `Bulk` (a complete message in one frame)
/// sets both, and `Middle` sets neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    First,
    Middle,
    Last,
    Bulk,
}

impl FrameType {
    const FIRST_BIT: u8 = 0x01;
    const LAST_BIT: u8 = 0x02;
    const MASK: u8 = Self::FIRST_BIT | Self::LAST_BIT;

    fn from_bits(bits: u8) -> Self {
        match bits & Self::MASK {
            0x00 => FrameType::Middle,
            0x01 => FrameType::First,
            0x02 => FrameType::Last,
            0x03 => FrameType::Bulk,
            _ => unreachable!("masked to two bits"),
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            FrameType::Middle => 0x00,
            FrameType::First => Self::FIRST_BIT,
            FrameType::Last => Self::LAST_BIT,
            FrameType::Bulk => Self::MASK,
        }
    }

    /// Whether this frame carries the 4-byte total-length field.
    pub fn carries_total_len(self) -> bool {
        matches!(self, FrameType::First)
    }

    /// Whether this frame alone completes a message (no reassembly needed).
    pub fn is_terminal(self) -> bool {
        matches!(self, FrameType::Last | FrameType::Bulk)
    }
}

/// Selects the framing flavor: `Specific` is used for channel 0 control
/// traffic, `Control` for every other channel (the wire's naming is a
/// historical artifact, not a literal description of payload contents).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Specific,
    Control,
}

impl MessageType {
    const BIT: u8 = 0x04;

    fn from_bits(bits: u8) -> Self {
        if bits & Self::BIT != 0 {
            MessageType::Control
        } else {
            MessageType::Specific
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            MessageType::Specific => 0x00,
            MessageType::Control => Self::BIT,
        }
    }

    /// The wire convention: channel 0 is `Specific`, every other channel is `Control`.
    pub fn for_channel(channel_id: u8) -> Self {
        if channel_id == 0 {
            MessageType::Specific
        } else {
            MessageType::Control
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionType {
    Plain,
    Encrypted,
}

impl EncryptionType {
    const BIT: u8 = 0x08;

    fn from_bits(bits: u8) -> Self {
        if bits & Self::BIT != 0 {
            EncryptionType::Encrypted
        } else {
            EncryptionType::Plain
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            EncryptionType::Plain => 0x00,
            EncryptionType::Encrypted => Self::BIT,
        }
    }
}

/// A parsed frame header, with the payload still living in the caller's
/// buffer (`payload_offset`/`payload_len` describe where to slice it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel_id: u8,
    pub frame_type: FrameType,
    pub message_type: MessageType,
    pub encryption: EncryptionType,
    pub payload_len: u16,
    /// Present only when `frame_type == First`.
    pub total_len: Option<u32>,
    /// Bytes consumed by the header itself (6 for `First`, 4 otherwise).
    pub header_len: usize,
}

/// Parse one frame header from the front of `input`.
///
/// Mirrors `nom`'s streaming convention: `Err(nom::Err::Incomplete(_))` means
/// "not enough bytes yet, call again once more arrive", matching the spec's
/// `NeedMore`. A malformed frame type bit pattern is unreachable since we
/// mask to exactly the bits that define it, so the only failure mode left is
/// genuine truncation.
pub fn parse_header(input: &[u8]) -> IResult<&[u8], FrameHeader> {
    let (rest, (channel_id, flags, payload_len)) = tuple((be_u8, be_u8, be_u16))(input)?;

    let frame_type = FrameType::from_bits(flags);
    let message_type = MessageType::from_bits(flags);
    let encryption = EncryptionType::from_bits(flags);

    if frame_type.carries_total_len() {
        let (rest, total_len) = context("first-frame total length", be_u32)(rest)?;
        Ok((
            rest,
            FrameHeader {
                channel_id,
                frame_type,
                message_type,
                encryption,
                payload_len,
                total_len: Some(total_len),
                header_len: 8,
            },
        ))
    } else {
        Ok((
            rest,
            FrameHeader {
                channel_id,
                frame_type,
                message_type,
                encryption,
                payload_len,
                total_len: None,
                header_len: 4,
            },
        ))
    }
}

/// Serialise a header for `channel_id`/`frame_type`/... followed by
/// `payload` into `out`, using `cookie-factory`'s combinator style (the
/// direct counterpart of `parse_header`'s `nom` combinators).
pub fn serialize_frame(
    channel_id: u8,
    frame_type: FrameType,
    message_type: MessageType,
    encryption: EncryptionType,
    total_len: Option<u32>,
    payload: &[u8],
    out: &mut Vec<u8>,
) {
    use cookie_factory::{
        bytes::{be_u16, be_u32, be_u8},
        sequence::tuple,
        SerializeFn,
    };
    use std::io::Write;

    let flags = frame_type.to_bits() | message_type.to_bits() | encryption.to_bits();
    let payload_len = payload.len() as u16;

    let header: Box<dyn SerializeFn<&mut Vec<u8>>> = if let Some(total) = total_len {
        Box::new(tuple((be_u8(channel_id), be_u8(flags), be_u16(payload_len), be_u32(total))))
    } else {
        Box::new(tuple((be_u8(channel_id), be_u8(flags), be_u16(payload_len))))
    };

    let mut writer = std::mem::take(out);
    writer = cookie_factory::gen(header, writer)
        .expect("writing to a Vec<u8> cannot fail")
        .0;
    writer
        .write_all(payload)
        .expect("writing to a Vec<u8> cannot fail");
    *out = writer;
}

/// Map a `nom` parse of a `u8` flags byte straight into its three decoded
/// facets, useful for tests that want to assert on the byte directly
/// without going through the full header parser.
pub fn decode_flags(flags: u8) -> (FrameType, MessageType, EncryptionType) {
    (
        FrameType::from_bits(flags),
        MessageType::from_bits(flags),
        EncryptionType::from_bits(flags),
    )
}

pub(crate) fn encode_flags(
    frame_type: FrameType,
    message_type: MessageType,
    encryption: EncryptionType,
) -> u8 {
    frame_type.to_bits() | message_type.to_bits() | encryption.to_bits()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn bulk_specific_plain_is_0x03() {
        let (ft, mt, enc) = decode_flags(0x03);
        assert_matches!(ft, FrameType::Bulk);
        assert_matches!(mt, MessageType::Specific);
        assert_matches!(enc, EncryptionType::Plain);
    }

    #[test]
    fn bulk_control_plain_is_0x07() {
        let (ft, mt, enc) = decode_flags(0x07);
        assert_matches!(ft, FrameType::Bulk);
        assert_matches!(mt, MessageType::Control);
        assert_matches!(enc, EncryptionType::Plain);
    }

    #[test]
    fn middle_carries_neither_fragmentation_bit() {
        let (ft, _, _) = decode_flags(0x04);
        assert_matches!(ft, FrameType::Middle);
    }

    #[test]
    fn first_and_last_are_distinct_single_bits() {
        assert_matches!(decode_flags(0x01).0, FrameType::First);
        assert_matches!(decode_flags(0x02).0, FrameType::Last);
    }

    #[test]
    fn parse_non_first_header() {
        let bytes = [0x03u8, 0x07, 0x00, 0x02, 0xAA, 0xBB];
        let (rest, header) = parse_header(&bytes).unwrap();
        assert_eq!(header.channel_id, 3);
        assert_matches!(header.frame_type, FrameType::Bulk);
        assert_matches!(header.message_type, MessageType::Control);
        assert_eq!(header.payload_len, 2);
        assert_eq!(header.total_len, None);
        assert_eq!(header.header_len, 4);
        assert_eq!(rest, &[0xAAu8, 0xBB]);
    }

    #[test]
    fn parse_first_header_carries_total_len() {
        let bytes = [0x01u8, 0x01, 0x40, 0x00, 0x00, 0x00, 0x4E, 0x22];
        let (rest, header) = parse_header(&bytes).unwrap();
        assert_matches!(header.frame_type, FrameType::First);
        assert_eq!(header.payload_len, 0x4000);
        assert_eq!(header.total_len, Some(0x4E22));
        assert_eq!(header.header_len, 8);
        assert!(rest.is_empty());
    }

    #[test]
    fn parse_needs_more_bytes() {
        let bytes = [0x00u8, 0x01];
        let res = parse_header(&bytes);
        assert!(res.is_err());
    }

    #[test]
    fn s1_plain_single_frame_header() {
        let mut out = Vec::new();
        let body = [0x00u8, 0x01, 0x00, 0x07];
        serialize_frame(
            0,
            FrameType::Bulk,
            MessageType::Specific,
            EncryptionType::Plain,
            None,
            &body,
            &mut out,
        );
        assert_eq!(out, vec![0x00, 0x03, 0x00, 0x04, 0x00, 0x01, 0x00, 0x07]);
    }

    #[test]
    fn s2_service_channel_framing_bit() {
        let mut out = Vec::new();
        serialize_frame(
            3,
            FrameType::Bulk,
            MessageType::Control,
            EncryptionType::Plain,
            None,
            &[0x00, 0x00],
            &mut out,
        );
        assert_eq!(out[0], 3);
        assert_eq!(out[1], 0x07);
    }

    #[test]
    fn round_trip_first_frame_with_total_len() {
        let mut out = Vec::new();
        let payload = vec![0xABu8; 100];
        serialize_frame(
            1,
            FrameType::First,
            MessageType::Control,
            EncryptionType::Encrypted,
            Some(20002),
            &payload,
            &mut out,
        );
        let (rest, header) = parse_header(&out).unwrap();
        assert_eq!(header.channel_id, 1);
        assert_matches!(header.frame_type, FrameType::First);
        assert_matches!(header.message_type, MessageType::Control);
        assert_matches!(header.encryption, EncryptionType::Encrypted);
        assert_eq!(header.payload_len, 100);
        assert_eq!(header.total_len, Some(20002));
        assert_eq!(rest, &payload[..]);
    }
}
