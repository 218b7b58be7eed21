// Path: crates/cube/src/codec.rs
//! `CubeCodec`: the pure TLV grammar that fills bytes 6..1023 of a cube.
//!
//! Byte layout of a cube:
//! ```text
//! [0]      version (top 4 bits) | reserved (bottom 4 bits)
//! [1..6]   minting date, 5-byte big-endian unsigned seconds
//! [6..1024] a tight tiling of TLV fields, no gaps and no overlap
//! ```
//!
//! Each field starts with a 6-bit type tag held in the top 6 bits of its
//! first header byte. A handful of tags carry an *implicit* length (known
//! from the tag alone, header is 1 byte); everything else carries an
//! *explicit* 10-bit length split across the low 2 bits of that first byte
//! and all 8 bits of a second header byte (header is 2 bytes). The
//! `CUBE_KIND` tag is the one implicit-length field that repurposes its
//! header's otherwise-unused low 2 bits to carry the kind selector itself,
//! since it has no value bytes of its own.

use rand::RngCore;
use verity_types::error::CodecError;
use verity_types::wire::FieldTag;

/// Total size of an encoded cube, matching [`verity_types::CUBE_SIZE`].
pub const CUBE_SIZE: usize = verity_types::CUBE_SIZE;
/// Bytes consumed by the version byte and the 5-byte date field.
pub const HEADER_LEN: usize = 6;

/// Returns the on-wire header length (1 or 2 bytes) for a field tag.
///
/// Single source of truth for header sizing; both [`encode`] and [`decode`]
/// go through this rather than re-deriving it.
pub fn field_header_len(tag: FieldTag) -> usize {
    tag.header_len()
}

/// A single decoded or to-be-encoded TLV field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// Random filler plus the hashcash nonce; its first `nonce_bytes` bytes
    /// are mutated by the miner.
    PaddingNonce(Vec<u8>),
    /// Opaque application payload.
    Payload(Vec<u8>),
    /// A reference to another cube: 1-byte relationship type + 32-byte key.
    RelatesTo {
        /// Relationship type selector (see [`verity_types::wire::RelationshipType`]).
        rel_type: u8,
        /// The referenced cube's 32-byte key.
        remote_key: [u8; 32],
    },
    /// The cube kind selector, carried in the header's low 2 bits.
    CubeKind(u8),
    /// The signer's Ed25519 public key (MUC/IPC only).
    PublicKey([u8; 32]),
    /// An 8-byte key fingerprint followed by a 64-byte Ed25519 signature.
    Signature {
        /// First 8 bytes of `hash(public_key)`.
        fingerprint: [u8; 8],
        /// Raw 64-byte Ed25519 signature.
        signature: [u8; 64],
    },
}

impl Field {
    /// The wire tag for this field.
    pub fn tag(&self) -> FieldTag {
        match self {
            Field::PaddingNonce(_) => FieldTag::PaddingNonce,
            Field::Payload(_) => FieldTag::Payload,
            Field::RelatesTo { .. } => FieldTag::RelatesTo,
            Field::CubeKind(_) => FieldTag::CubeKind,
            Field::PublicKey(_) => FieldTag::PublicKey,
            Field::Signature { .. } => FieldTag::Signature,
        }
    }

    /// Length of the value portion (excludes the TLV header).
    pub fn value_len(&self) -> usize {
        match self {
            Field::PaddingNonce(b) => b.len(),
            Field::Payload(b) => b.len(),
            Field::RelatesTo { .. } => 33,
            Field::CubeKind(_) => 0,
            Field::PublicKey(_) => 32,
            Field::Signature { .. } => 72,
        }
    }

    /// Header's low 2 bits for fields that repurpose them (only `CubeKind`).
    fn header_low_bits(&self) -> u8 {
        match self {
            Field::CubeKind(bits) => bits & 0x3,
            _ => 0,
        }
    }

    /// Total bytes this field occupies on the wire, header included.
    pub fn encoded_len(&self) -> usize {
        field_header_len(self.tag()) + self.value_len()
    }

    fn write_value(&self, buf: &mut [u8]) -> Result<(), CodecError> {
        match self {
            Field::PaddingNonce(b) | Field::Payload(b) => {
                let dst = buf.get_mut(..b.len()).ok_or(CodecError::FieldSize)?;
                dst.copy_from_slice(b);
            }
            Field::RelatesTo {
                rel_type,
                remote_key,
            } => {
                let dst = buf.get_mut(..33).ok_or(CodecError::FieldSize)?;
                dst[0] = *rel_type;
                dst[1..33].copy_from_slice(remote_key);
            }
            Field::CubeKind(_) => {}
            Field::PublicKey(pk) => {
                let dst = buf.get_mut(..32).ok_or(CodecError::FieldSize)?;
                dst.copy_from_slice(pk);
            }
            Field::Signature {
                fingerprint,
                signature,
            } => {
                let dst = buf.get_mut(..72).ok_or(CodecError::FieldSize)?;
                dst[0..8].copy_from_slice(fingerprint);
                dst[8..72].copy_from_slice(signature);
            }
        }
        Ok(())
    }
}

/// Appends an auto-sized `PADDING_NONCE` field (and, when `reserve_signature`
/// is set, a zeroed placeholder `SIGNATURE` field after it) so that
/// `content_fields` tiles exactly to 1024 bytes.
///
/// The padding field's minimum size is its 2-byte header plus 4 bytes of
/// nonce scratch space. `content_fields` must not already contain a
/// `PaddingNonce` or `Signature` field.
pub fn with_auto_padding(
    mut content_fields: Vec<Field>,
    reserve_signature: bool,
) -> Result<Vec<Field>, CodecError> {
    let declared_len: usize = content_fields.iter().map(Field::encoded_len).sum();
    let sig_reserve_len = if reserve_signature {
        field_header_len(FieldTag::Signature) + 72
    } else {
        0
    };
    let used = HEADER_LEN + declared_len + sig_reserve_len;
    if used > CUBE_SIZE {
        return Err(CodecError::FieldSize);
    }
    let remaining = CUBE_SIZE - used;
    match remaining {
        0 => {}
        1 => return Err(CodecError::InsufficientPadding(1)),
        2..=5 => return Err(CodecError::FieldSize),
        _ => {
            let pad_value_len = remaining - field_header_len(FieldTag::PaddingNonce);
            let mut nonce = vec![0u8; pad_value_len];
            rand::rngs::OsRng.fill_bytes(&mut nonce);
            content_fields.push(Field::PaddingNonce(nonce));
        }
    }
    if reserve_signature {
        content_fields.push(Field::Signature {
            fingerprint: [0u8; 8],
            signature: [0u8; 64],
        });
    }
    Ok(content_fields)
}

/// A fully-encoded cube buffer, with the byte offset of each field's value
/// recorded so callers (the hashcash miner, the signer) can mutate specific
/// fields in place without re-decoding.
#[derive(Debug, Clone)]
pub struct EncodedCube {
    /// The full 1024-byte wire representation.
    pub bytes: [u8; CUBE_SIZE],
    /// `(tag, header_start_offset, value_start_offset)` for each field, in
    /// wire order.
    pub offsets: Vec<(FieldTag, usize, usize)>,
}

impl EncodedCube {
    /// Returns the value-start offset of the first field with the given tag.
    pub fn offset_of(&self, tag: FieldTag) -> Option<usize> {
        self.offsets
            .iter()
            .find(|(t, _, _)| *t == tag)
            .map(|(_, _, value_start)| *value_start)
    }
}

/// Serializes a version byte, a date, and an ordered field list into a
/// 1024-byte cube. `fields` must already include any padding/signature
/// placeholder — see [`with_auto_padding`].
pub fn encode(version: u8, date_secs: u64, fields: &[Field]) -> Result<EncodedCube, CodecError> {
    let mut buf = [0u8; CUBE_SIZE];
    buf[0] = (version & 0x0F) << 4;
    let date_bytes = date_secs.to_be_bytes();
    buf[1..6].copy_from_slice(
        date_bytes
            .get(3..8)
            .ok_or(CodecError::FieldSize)?,
    );

    let mut offset = HEADER_LEN;
    let mut offsets = Vec::with_capacity(fields.len());
    for field in fields {
        let tag = field.tag();
        let header_len = field_header_len(tag);
        let value_len = field.value_len();
        let total = header_len + value_len;
        if offset + total > CUBE_SIZE {
            return Err(CodecError::FieldOverrun {
                offset,
                len: value_len,
            });
        }
        match header_len {
            1 => {
                let slot = buf.get_mut(offset).ok_or(CodecError::FieldSize)?;
                *slot = ((tag as u8) << 2) | field.header_low_bits();
            }
            2 => {
                if value_len > 0x3FF {
                    return Err(CodecError::FieldSize);
                }
                let b0 = buf.get_mut(offset).ok_or(CodecError::FieldSize)?;
                *b0 = ((tag as u8) << 2) | (((value_len >> 8) as u8) & 0x3);
                let b1 = buf.get_mut(offset + 1).ok_or(CodecError::FieldSize)?;
                *b1 = (value_len & 0xFF) as u8;
            }
            _ => unreachable!("field_header_len only ever returns 1 or 2"),
        }
        let value_start = offset + header_len;
        let value_end = value_start + value_len;
        let dst = buf
            .get_mut(value_start..value_end)
            .ok_or(CodecError::FieldSize)?;
        field.write_value(dst)?;
        offsets.push((tag, offset, value_start));
        offset += total;
    }
    if offset != CUBE_SIZE {
        return Err(CodecError::IncompleteTiling {
            consumed: offset - HEADER_LEN,
            expected: CUBE_SIZE - HEADER_LEN,
        });
    }
    Ok(EncodedCube { bytes: buf, offsets })
}

/// A decoded cube: the header plus every field with its wire offsets.
#[derive(Debug, Clone)]
pub struct DecodedCube {
    /// Protocol version from the top 4 bits of byte 0.
    pub version: u8,
    /// Minting date in seconds since the epoch.
    pub date: u64,
    /// `(field, header_start_offset, value_start_offset)` in wire order.
    pub fields: Vec<(Field, usize, usize)>,
}

/// Parses a 1024-byte buffer into a header and an ordered, fully-tiled
/// field list. Performs no semantic validation (kind ordering, signature
/// placement, difficulty) — that is [`crate::cube::Cube::parse`]'s job.
pub fn decode(bytes: &[u8]) -> Result<DecodedCube, CodecError> {
    if bytes.len() != CUBE_SIZE {
        return Err(CodecError::BadLength(bytes.len()));
    }
    let b0 = *bytes.first().ok_or(CodecError::BadLength(bytes.len()))?;
    let version = b0 >> 4;
    let mut date_bytes = [0u8; 8];
    let date_src = bytes.get(1..6).ok_or(CodecError::BadLength(bytes.len()))?;
    date_bytes[3..8].copy_from_slice(date_src);
    let date = u64::from_be_bytes(date_bytes);

    let mut offset = HEADER_LEN;
    let mut fields = Vec::new();
    while offset < CUBE_SIZE {
        let header_byte = *bytes
            .get(offset)
            .ok_or(CodecError::FieldOverrun { offset, len: 0 })?;
        let tag_num = header_byte >> 2;
        let tag = FieldTag::from_tag(tag_num).ok_or(CodecError::UnknownFieldType(tag_num))?;
        if matches!(
            tag,
            FieldTag::Reserved3 | FieldTag::Reserved4 | FieldTag::Reserved5
        ) {
            return Err(CodecError::WrongFieldType(tag_num));
        }
        let (header_len, value_len) = match tag.implicit_len() {
            Some(len) => (1usize, len),
            None => {
                let b1 = *bytes
                    .get(offset + 1)
                    .ok_or(CodecError::FieldOverrun { offset, len: 0 })?;
                let len = (((header_byte & 0x3) as usize) << 8) | b1 as usize;
                (2usize, len)
            }
        };
        let value_start = offset + header_len;
        let value_end = value_start + value_len;
        if value_end > CUBE_SIZE {
            return Err(CodecError::FieldOverrun {
                offset,
                len: value_len,
            });
        }
        let value_bytes = bytes
            .get(value_start..value_end)
            .ok_or(CodecError::FieldOverrun {
                offset,
                len: value_len,
            })?;
        let field = match tag {
            FieldTag::PaddingNonce => Field::PaddingNonce(value_bytes.to_vec()),
            FieldTag::Payload => Field::Payload(value_bytes.to_vec()),
            FieldTag::RelatesTo => {
                if value_bytes.len() != 33 {
                    return Err(CodecError::FieldSize);
                }
                let rel_type = value_bytes[0];
                let mut remote_key = [0u8; 32];
                remote_key.copy_from_slice(&value_bytes[1..33]);
                Field::RelatesTo {
                    rel_type,
                    remote_key,
                }
            }
            FieldTag::CubeKind => Field::CubeKind(header_byte & 0x3),
            FieldTag::PublicKey => {
                if value_bytes.len() != 32 {
                    return Err(CodecError::FieldSize);
                }
                let mut pk = [0u8; 32];
                pk.copy_from_slice(value_bytes);
                Field::PublicKey(pk)
            }
            FieldTag::Signature => {
                if value_bytes.len() != 72 {
                    return Err(CodecError::FieldSize);
                }
                let mut fingerprint = [0u8; 8];
                fingerprint.copy_from_slice(&value_bytes[0..8]);
                let mut signature = [0u8; 64];
                signature.copy_from_slice(&value_bytes[8..72]);
                Field::Signature {
                    fingerprint,
                    signature,
                }
            }
            FieldTag::Reserved3 | FieldTag::Reserved4 | FieldTag::Reserved5 => {
                return Err(CodecError::WrongFieldType(tag_num))
            }
        };
        fields.push((field, offset, value_start));
        offset = value_end;
    }
    if offset != CUBE_SIZE {
        return Err(CodecError::IncompleteTiling {
            consumed: offset - HEADER_LEN,
            expected: CUBE_SIZE - HEADER_LEN,
        });
    }
    Ok(DecodedCube {
        version,
        date,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_field(n: usize) -> Field {
        Field::Payload(vec![0xAB; n])
    }

    #[test]
    fn roundtrip_unsigned_cube() {
        let content = vec![payload_field(100)];
        let fields = with_auto_padding(content, false).unwrap();
        let encoded = encode(0, 1_700_000_000, &fields).unwrap();
        let decoded = decode(&encoded.bytes).unwrap();
        assert_eq!(decoded.version, 0);
        assert_eq!(decoded.date, 1_700_000_000);
        // Payload + one auto-inserted padding field.
        assert_eq!(decoded.fields.len(), 2);
        let total: usize = decoded
            .fields
            .iter()
            .map(|(f, _, _)| f.encoded_len())
            .sum();
        assert_eq!(total, CUBE_SIZE - HEADER_LEN);
    }

    #[test]
    fn roundtrip_signed_cube_layout() {
        let content = vec![
            Field::CubeKind(1),
            Field::PublicKey([7u8; 32]),
            payload_field(50),
        ];
        let fields = with_auto_padding(content, true).unwrap();
        let encoded = encode(0, 42, &fields).unwrap();
        let decoded = decode(&encoded.bytes).unwrap();
        assert!(matches!(decoded.fields[0].0, Field::CubeKind(1)));
        assert!(matches!(decoded.fields.last().unwrap().0, Field::Signature { .. }));
    }

    #[test]
    fn insufficient_padding_single_byte_remaining() {
        // 1018 content bytes leaves exactly 0 remaining; craft 1017 to leave 1.
        let content = vec![payload_field(1017 - field_header_len(FieldTag::Payload))];
        let err = with_auto_padding(content, false).unwrap_err();
        assert!(matches!(err, CodecError::InsufficientPadding(1)));
    }

    #[test]
    fn field_size_when_minimum_padding_cannot_fit() {
        // Leaves 4 bytes remaining: too small for a 2-byte header + 4-byte nonce (needs >= 6).
        let content = vec![payload_field(1014 - field_header_len(FieldTag::Payload))];
        let err = with_auto_padding(content, false).unwrap_err();
        assert!(matches!(err, CodecError::FieldSize));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let buf = vec![0u8; 100];
        assert!(matches!(decode(&buf), Err(CodecError::BadLength(100))));
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let mut buf = [0u8; CUBE_SIZE];
        // Tag 9..=63 are unassigned; 9 with a 1-byte implicit header shape.
        buf[HEADER_LEN] = 9 << 2;
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, CodecError::UnknownFieldType(9)));
    }

    #[test]
    fn decode_rejects_reserved_tag() {
        let mut buf = [0u8; CUBE_SIZE];
        buf[HEADER_LEN] = (FieldTag::Reserved3 as u8) << 2;
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, CodecError::WrongFieldType(3)));
    }

    #[test]
    fn decode_rejects_field_overrun() {
        let mut buf = [0u8; CUBE_SIZE];
        // A PAYLOAD field (explicit length) claiming more bytes than remain.
        let last_offset = CUBE_SIZE - 1;
        buf[last_offset] = ((FieldTag::Payload as u8) << 2) | 0x3;
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, CodecError::FieldOverrun { .. }));
    }
}
