// Path: crates/types/src/wire.rs
//! Wire-format constants shared by the codec, the store, and the sync protocol.
//!
//! Centralizing these tags here (rather than in `verity-cube` or
//! `verity-networking`) ensures every crate that needs to reason about a
//! cube's kind or a message's class agrees on the exact same values, the way
//! `types::codec` used to be the single source of truth for the kernel's
//! binary layout.

use serde::{Deserialize, Serialize};

/// The three cube kinds the core distinguishes, selected by the combined
/// presence of `CUBE_KIND`, `PUBLIC_KEY`, and `SIGNATURE` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CubeKind {
    /// No `CUBE_KIND` field; identified by the content hash of its binary.
    Frozen,
    /// `CUBE_KIND = 0` + `PUBLIC_KEY` + `SIGNATURE`; identified by its public key.
    Muc,
    /// `CUBE_KIND = 1` + signature variant; identified by hash, expires by challenge level.
    Ipc,
}

impl CubeKind {
    /// Decodes a kind from the low two bits of a `CUBE_KIND` field's value byte.
    pub fn from_low_bits(bits: u8) -> Option<Self> {
        match bits & 0b11 {
            0 => Some(Self::Muc),
            1 => Some(Self::Ipc),
            _ => None,
        }
    }

    /// Encodes this kind into the low two bits of a `CUBE_KIND` field's value byte.
    pub fn to_low_bits(self) -> u8 {
        match self {
            Self::Frozen => 0,
            Self::Muc => 0,
            Self::Ipc => 1,
        }
    }

    /// Whether cubes of this kind carry `PUBLIC_KEY` and `SIGNATURE` fields.
    pub fn is_signed(self) -> bool {
        matches!(self, Self::Muc | Self::Ipc)
    }
}

/// The 6-bit TLV field type tags defined by the cube binary format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldTag {
    /// Proof-of-work nonce scratch space; variable length, minimum 4 bytes.
    PaddingNonce = 0,
    /// Opaque application payload bytes; variable length.
    Payload = 1,
    /// A single (relationship type, remote key) edge; implicit length 33.
    RelatesTo = 2,
    /// Reserved, not implemented. Decoding one is always an error.
    Reserved3 = 3,
    /// Reserved, not implemented. Decoding one is always an error.
    Reserved4 = 4,
    /// Reserved, not implemented. Decoding one is always an error.
    Reserved5 = 5,
    /// Fingerprint + Ed25519 signature; implicit length 72; must be the final field.
    Signature = 6,
    /// Cube kind selector; implicit length 0; must be the first field if present.
    CubeKind = 7,
    /// Ed25519 public key; implicit length 32; required whenever `Signature` is present.
    PublicKey = 8,
}

impl FieldTag {
    /// Decodes a 6-bit type tag into a known field type.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::PaddingNonce),
            1 => Some(Self::Payload),
            2 => Some(Self::RelatesTo),
            3 => Some(Self::Reserved3),
            4 => Some(Self::Reserved4),
            5 => Some(Self::Reserved5),
            6 => Some(Self::Signature),
            7 => Some(Self::CubeKind),
            8 => Some(Self::PublicKey),
            _ => None,
        }
    }

    /// The tag's implicit (table-defined) length, if it has one.
    ///
    /// Types with an implicit length use a one-byte header; types without
    /// (currently only `Payload` and `PaddingNonce`) use a two-byte header
    /// carrying an explicit 10-bit length.
    pub fn implicit_len(self) -> Option<usize> {
        match self {
            Self::PaddingNonce => None,
            Self::Payload => None,
            Self::RelatesTo => Some(33),
            Self::Reserved3 | Self::Reserved4 | Self::Reserved5 => None,
            Self::Signature => Some(72),
            Self::CubeKind => Some(0),
            Self::PublicKey => Some(32),
        }
    }

    /// The TLV header size in bytes for this tag: 1 if the length is
    /// implicit, 2 if it must be carried explicitly.
    pub fn header_len(self) -> usize {
        if self.implicit_len().is_some() {
            1
        } else {
            2
        }
    }
}

/// A relationship type as carried in a `RELATES_TO` field's type byte.
///
/// The core attaches no policy to these beyond storing forward and reverse
/// edges; `AnnotationEngine` interprets `ReplyTo` for displayability and
/// treats the rest as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum RelationshipType {
    /// The target cube continues a series started by the source.
    ContinuedIn = 0,
    /// The source cube mentions the target.
    Mention = 1,
    /// The source cube replies to the target; gates displayability.
    ReplyTo = 2,
    /// The source cube quotes the target.
    Quotation = 3,
    /// The source cube is owned by / belongs to the target (e.g. a MUC root).
    Owns = 4,
}

impl RelationshipType {
    /// Decodes a relationship type byte, if recognized.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::ContinuedIn),
            1 => Some(Self::Mention),
            2 => Some(Self::ReplyTo),
            3 => Some(Self::Quotation),
            4 => Some(Self::Owns),
            _ => None,
        }
    }

    /// Encodes this relationship type back into its wire byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Wire protocol version understood by this implementation.
pub const PROTOCOL_VERSION: u8 = 0;

/// The message class byte that follows the protocol version byte on every
/// framed sync message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageClass {
    /// 16-byte peer id; must be sent first and exactly once per connection.
    Hello = 0x00,
    /// Empty payload; requests a `HASH_RESPONSE`.
    HashRequest = 0x01,
    /// `u32` count then that many `(kind, challenge, date, key)` summaries.
    HashResponse = 0x02,
    /// `u32` count then that many 32-byte keys.
    CubeRequest = 0x03,
    /// `u32` count then that many 1024-byte cube bodies.
    CubeResponse = 0x04,
    /// Empty payload; requests a `NODE_RESPONSE`.
    NodeRequest = 0x06,
    /// `u32` count then that many length-prefixed ASCII addresses.
    NodeResponse = 0x07,
}

impl MessageClass {
    /// Decodes a message class byte, if recognized.
    ///
    /// Unknown classes are not an error at this layer: per the wire
    /// protocol's forward-compatibility policy, the caller logs and ignores
    /// them rather than closing the connection.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Hello),
            0x01 => Some(Self::HashRequest),
            0x02 => Some(Self::HashResponse),
            0x03 => Some(Self::CubeRequest),
            0x04 => Some(Self::CubeResponse),
            0x06 => Some(Self::NodeRequest),
            0x07 => Some(Self::NodeResponse),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_kind_low_bits_roundtrip() {
        assert_eq!(CubeKind::from_low_bits(0), Some(CubeKind::Muc));
        assert_eq!(CubeKind::from_low_bits(1), Some(CubeKind::Ipc));
        assert_eq!(CubeKind::Muc.to_low_bits(), 0);
        assert_eq!(CubeKind::Ipc.to_low_bits(), 1);
    }

    #[test]
    fn field_tag_header_len_matches_implicit_length() {
        assert_eq!(FieldTag::RelatesTo.header_len(), 1);
        assert_eq!(FieldTag::Signature.header_len(), 1);
        assert_eq!(FieldTag::CubeKind.header_len(), 1);
        assert_eq!(FieldTag::PublicKey.header_len(), 1);
        assert_eq!(FieldTag::Payload.header_len(), 2);
        assert_eq!(FieldTag::PaddingNonce.header_len(), 2);
    }

    #[test]
    fn message_class_unknown_byte_is_none() {
        assert!(MessageClass::from_byte(0x05).is_none());
        assert!(MessageClass::from_byte(0xFF).is_none());
    }
}
