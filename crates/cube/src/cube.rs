// Path: crates/cube/src/cube.rs
//! `Cube`: the parsed, validated, in-memory view of a 1024-byte record, and
//! `CubeBuilder`, which constructs and freezes one.
//!
//! Freezing and parsing run the same integrity battery in the same order
//! (§3.1): difficulty first (cheapest check, rejects spam before touching
//! crypto), then signature (for signed kinds), then field-grammar
//! validation (kind-first, signature-last, public-key-present).

use verity_types::error::{CodecError, CubeError};
use verity_types::wire::{CubeKind, FieldTag};
use verity_types::CUBE_SIZE;

use crate::codec::{self, Field};
use crate::hashcash::{CancelToken, HashcashMiner, SigningTarget};

/// A fully validated, in-memory cube.
#[derive(Debug, Clone)]
pub struct Cube {
    /// The raw 1024-byte wire representation.
    pub binary: [u8; CUBE_SIZE],
    /// The cube's key: its public key for MUCs, `hash(binary)` otherwise.
    pub key: [u8; 32],
    /// Which of the three kinds this cube is.
    pub kind: CubeKind,
    /// `hash(binary)`, kept alongside `key` since MUCs need both.
    pub hash: [u8; 32],
    /// Minting date, seconds since the epoch.
    pub date: u64,
    /// Trailing zero bits of `hash`, i.e. the difficulty this cube actually cleared.
    pub challenge_level: u32,
}

impl Cube {
    /// Starts building a new cube.
    pub fn builder() -> CubeBuilder {
        CubeBuilder::default()
    }

    /// Parses and validates an inbound 1024-byte buffer against `difficulty`,
    /// running the full integrity battery: difficulty, then signature (for
    /// signed kinds), then field-grammar.
    pub fn parse(bytes: &[u8], difficulty: u32) -> Result<Cube, CubeError> {
        let decoded = codec::decode(bytes).map_err(CubeError::Codec)?;

        let hash = verity_crypto::hash(bytes);
        let challenge_level = verity_crypto::trailing_zero_bits(&hash);
        if challenge_level < difficulty {
            return Err(CubeError::InsufficientDifficulty {
                needed: difficulty,
                got: challenge_level,
            });
        }

        let mut kind = CubeKind::Frozen;
        let mut public_key: Option<[u8; 32]> = None;
        let mut signature: Option<([u8; 8], [u8; 64])> = None;
        let mut signature_position: Option<usize> = None;
        let field_count = decoded.fields.len();

        for (i, (field, _header_start, value_start)) in decoded.fields.iter().enumerate() {
            match field {
                Field::CubeKind(bits) => {
                    if i != 0 {
                        return Err(CubeError::Codec(CodecError::WrongFieldType(
                            FieldTag::CubeKind as u8,
                        )));
                    }
                    kind = CubeKind::from_low_bits(*bits)
                        .ok_or(CubeError::Codec(CodecError::WrongFieldType(*bits)))?;
                }
                Field::PublicKey(pk) => public_key = Some(*pk),
                Field::Signature {
                    fingerprint,
                    signature: sig,
                } => {
                    signature = Some((*fingerprint, *sig));
                    signature_position = Some(i);
                    if i != field_count - 1 {
                        return Err(CubeError::Codec(CodecError::WrongFieldType(
                            FieldTag::Signature as u8,
                        )));
                    }
                    let _ = value_start;
                }
                _ => {}
            }
        }

        let key = if kind.is_signed() {
            let pk = public_key.ok_or(CubeError::BadSignature)?;
            let (fingerprint, sig) = signature.ok_or(CubeError::BadSignature)?;
            if signature_position.is_none() {
                return Err(CubeError::BadSignature);
            }
            let expected_fingerprint = verity_crypto::fingerprint(&pk);
            if fingerprint != expected_fingerprint {
                return Err(CubeError::BadFingerprint);
            }
            // The signature covers everything up to and including the
            // fingerprint: the field tiling guarantees the signature's
            // value bytes (fingerprint + sig) are the final 72 bytes, so the
            // signed prefix is everything before the raw signature bytes.
            let signed_len = bytes.len() - 64;
            let signed_prefix = bytes
                .get(..signed_len)
                .ok_or(CubeError::Codec(CodecError::BadLength(bytes.len())))?;
            if !verity_crypto::verify(signed_prefix, &sig, &pk) {
                return Err(CubeError::BadSignature);
            }
            match kind {
                CubeKind::Muc => pk,
                _ => hash,
            }
        } else {
            hash
        };

        Ok(Cube {
            binary: {
                let mut b = [0u8; CUBE_SIZE];
                b.copy_from_slice(bytes);
                b
            },
            key,
            kind,
            hash,
            date: decoded.date,
            challenge_level,
        })
    }

    /// Extracts every `RELATES_TO` edge this cube declares, in wire order.
    pub fn relationships(&self) -> Result<Vec<(u8, [u8; 32])>, CodecError> {
        let decoded = codec::decode(&self.binary)?;
        Ok(decoded
            .fields
            .into_iter()
            .filter_map(|(field, _, _)| match field {
                Field::RelatesTo {
                    rel_type,
                    remote_key,
                } => Some((rel_type, remote_key)),
                _ => None,
            })
            .collect())
    }

    /// Extracts this cube's opaque payload bytes, if it carries one.
    pub fn payload(&self) -> Result<Option<Vec<u8>>, CodecError> {
        let decoded = codec::decode(&self.binary)?;
        Ok(decoded.fields.into_iter().find_map(|(field, _, _)| match field {
            Field::Payload(bytes) => Some(bytes),
            _ => None,
        }))
    }
}

/// Builds a cube's content fields, then freezes them into a fully mined and
/// (if applicable) signed [`Cube`].
#[derive(Default)]
pub struct CubeBuilder {
    content_fields: Vec<Field>,
    signer: Option<([u8; 32], [u8; 32], CubeKind)>,
    date: Option<u64>,
}

impl CubeBuilder {
    /// Sets the minting date; defaults to the current wall-clock time at freeze.
    pub fn with_date(mut self, date_secs: u64) -> Self {
        self.date = Some(date_secs);
        self
    }

    /// Appends an opaque payload field.
    pub fn payload(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.content_fields.push(Field::Payload(bytes.into()));
        self
    }

    /// Appends a `RELATES_TO` edge.
    pub fn relates_to(mut self, rel_type: u8, remote_key: [u8; 32]) -> Self {
        self.content_fields.push(Field::RelatesTo {
            rel_type,
            remote_key,
        });
        self
    }

    /// Marks this cube as a Mutable User Cube, keyed and signed by `public_key`/`secret_key`.
    pub fn muc(mut self, public_key: [u8; 32], secret_key: [u8; 32]) -> Self {
        self.signer = Some((public_key, secret_key, CubeKind::Muc));
        self
    }

    /// Marks this cube as an Interpolated Challenge cube, signed but keyed by content hash.
    pub fn ipc(mut self, public_key: [u8; 32], secret_key: [u8; 32]) -> Self {
        self.signer = Some((public_key, secret_key, CubeKind::Ipc));
        self
    }

    /// Lays out, mines, and (for signed kinds) signs the cube, producing its
    /// final frozen form.
    pub async fn freeze(
        self,
        miner: &HashcashMiner,
        cancel: &CancelToken,
    ) -> Result<Cube, CubeError> {
        let date = self.date.unwrap_or_else(now_secs);
        let reserve_signature = self.signer.is_some();

        let mut fields = Vec::new();
        if let Some((pk, _, kind)) = &self.signer {
            fields.push(Field::CubeKind(kind.to_low_bits()));
            fields.push(Field::PublicKey(*pk));
        }
        fields.extend(self.content_fields);

        let fields = codec::with_auto_padding(fields, reserve_signature).map_err(CubeError::Codec)?;

        let fingerprint = self.signer.map(|(pk, _, _)| verity_crypto::fingerprint(&pk));
        let fields: Vec<Field> = if let Some(fp) = fingerprint {
            fields
                .into_iter()
                .map(|f| match f {
                    Field::Signature { .. } => Field::Signature {
                        fingerprint: fp,
                        signature: [0u8; 64],
                    },
                    other => other,
                })
                .collect()
        } else {
            fields
        };

        let encoded = codec::encode(verity_types::wire::PROTOCOL_VERSION, date, &fields)
            .map_err(CubeError::Codec)?;

        let nonce_value_offset = encoded
            .offset_of(FieldTag::PaddingNonce)
            .ok_or(CubeError::Codec(CodecError::FieldSize))?;
        let signing = if let Some((_, sk, _)) = self.signer {
            let signature_value_offset = encoded
                .offset_of(FieldTag::Signature)
                .ok_or(CubeError::BadSignature)?;
            Some(SigningTarget {
                signature_value_offset,
                secret_key: sk,
            })
        } else {
            None
        };

        let mining_timer = verity_telemetry::time::Timer::new(|secs| {
            verity_telemetry::cube_metrics().observe_hashcash_duration(secs);
        });
        let result = miner
            .mine(encoded.bytes, nonce_value_offset, signing, cancel)
            .await
            .map_err(|e| CubeError::MiningFailed(e.to_string()))?;
        drop(mining_timer);

        let cube = Cube::parse(&result.buffer, 0)?;
        verity_telemetry::cube_metrics().inc_mined(match cube.kind {
            CubeKind::Frozen => "frozen",
            CubeKind::Muc => "muc",
            CubeKind::Ipc => "ipc",
        });
        Ok(cube)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_types::config::HashcashConfig;

    fn test_miner() -> HashcashMiner {
        HashcashMiner::new(&HashcashConfig {
            difficulty: 4,
            nonce_bytes: 4,
            worker_pool_enabled: false,
            yield_every: 1000,
        })
    }

    #[tokio::test]
    async fn freezes_and_parses_frozen_cube() {
        let miner = test_miner();
        let cancel = CancelToken::new();
        let cube = Cube::builder()
            .with_date(1_700_000_000)
            .payload(b"hello verity".to_vec())
            .freeze(&miner, &cancel)
            .await
            .unwrap();

        assert_eq!(cube.kind, CubeKind::Frozen);
        assert_eq!(cube.key, cube.hash);
        assert!(cube.challenge_level >= 4);

        let parsed = Cube::parse(&cube.binary, 4).unwrap();
        assert_eq!(parsed.key, cube.key);
        assert_eq!(parsed.payload().unwrap(), Some(b"hello verity".to_vec()));
    }

    #[tokio::test]
    async fn freezes_and_parses_muc() {
        let (pk, sk) = verity_crypto::generate_keypair();
        let miner = test_miner();
        let cancel = CancelToken::new();
        let cube = Cube::builder()
            .payload(b"profile update".to_vec())
            .muc(pk, sk)
            .freeze(&miner, &cancel)
            .await
            .unwrap();

        assert_eq!(cube.kind, CubeKind::Muc);
        assert_eq!(cube.key, pk);

        let parsed = Cube::parse(&cube.binary, 4).unwrap();
        assert_eq!(parsed.key, pk);
    }

    #[tokio::test]
    async fn freezes_and_parses_ipc() {
        let (pk, sk) = verity_crypto::generate_keypair();
        let miner = test_miner();
        let cancel = CancelToken::new();
        let cube = Cube::builder()
            .payload(b"ephemeral note".to_vec())
            .ipc(pk, sk)
            .freeze(&miner, &cancel)
            .await
            .unwrap();

        assert_eq!(cube.kind, CubeKind::Ipc);
        assert_eq!(cube.key, cube.hash);
        assert_ne!(cube.key, pk);
    }

    #[tokio::test]
    async fn parse_rejects_insufficient_difficulty() {
        let miner = test_miner();
        let cancel = CancelToken::new();
        let cube = Cube::builder()
            .payload(b"x".to_vec())
            .freeze(&miner, &cancel)
            .await
            .unwrap();

        let err = Cube::parse(&cube.binary, 200).unwrap_err();
        assert!(matches!(err, CubeError::InsufficientDifficulty { .. }));
    }

    #[tokio::test]
    async fn parse_rejects_tampered_payload() {
        let miner = test_miner();
        let cancel = CancelToken::new();
        let (pk, sk) = verity_crypto::generate_keypair();
        let cube = Cube::builder()
            .payload(b"original".to_vec())
            .muc(pk, sk)
            .freeze(&miner, &cancel)
            .await
            .unwrap();

        let mut tampered = cube.binary;
        // Flip a byte inside the payload field, well before the signature.
        tampered[10] ^= 0xFF;
        let err = Cube::parse(&tampered, 0).unwrap_err();
        assert!(matches!(
            err,
            CubeError::BadSignature | CubeError::BadFingerprint | CubeError::Codec(_)
        ));
    }

    #[tokio::test]
    async fn relationships_roundtrip() {
        let miner = test_miner();
        let cancel = CancelToken::new();
        let target = [9u8; 32];
        let cube = Cube::builder()
            .relates_to(2, target)
            .freeze(&miner, &cancel)
            .await
            .unwrap();
        let rels = cube.relationships().unwrap();
        assert_eq!(rels, vec![(2, target)]);
    }
}
