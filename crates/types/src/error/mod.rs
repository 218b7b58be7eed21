// Path: crates/types/src/error/mod.rs
//! Core error types for the Verity kernel.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
///
/// Used for metrics labeling (`ErrorMetricsSink::inc_error`) and for
/// surfacing consistent diagnostics across crate boundaries.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors arising while decoding or encoding a cube's binary layout.
///
/// These are local to the add-path: a codec error fails that one cube's
/// `add` and is never fatal to the process (spec §7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer was not exactly 1024 bytes.
    #[error("cube binary must be exactly 1024 bytes, got {0}")]
    BadLength(usize),
    /// A TLV tag did not match any known `FieldTag`.
    #[error("unknown field type tag {0}")]
    UnknownFieldType(u8),
    /// A field's declared length runs past the end of the buffer.
    #[error("field at offset {offset} declares length {len} which overruns the buffer")]
    FieldOverrun {
        /// Byte offset at which the field header began.
        offset: usize,
        /// The field's declared length.
        len: usize,
    },
    /// Parsed fields did not consume exactly bytes `6..1023`.
    #[error("fields do not exactly tile bytes 6..1023 (consumed {consumed}, expected {expected})")]
    IncompleteTiling {
        /// Number of bytes the parsed fields actually consumed.
        consumed: usize,
        /// Number of bytes that should have been consumed (1018).
        expected: usize,
    },
    /// A reserved field type (3, 4, or 5) was encountered.
    #[error("field type {0} is reserved and not implemented")]
    WrongFieldType(u8),
    /// The declared fields plus a minimum padding field cannot fit in 1024 bytes.
    #[error("fields plus minimum padding do not fit in {CUBE_SIZE} bytes", CUBE_SIZE = crate::CUBE_SIZE)]
    FieldSize,
    /// Remaining space after the declared fields is strictly between 0 and
    /// the minimum padding-field header size: too small to rescue with a
    /// minimum-size padding field, too large to leave untiled.
    #[error("{0} bytes of trailing space cannot be covered by a minimum-size padding field")]
    InsufficientPadding(usize),
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::BadLength(_) => "CODEC_BAD_LENGTH",
            Self::UnknownFieldType(_) => "CODEC_UNKNOWN_FIELD_TYPE",
            Self::FieldOverrun { .. } => "CODEC_FIELD_OVERRUN",
            Self::IncompleteTiling { .. } => "CODEC_INCOMPLETE_TILING",
            Self::WrongFieldType(_) => "CODEC_WRONG_FIELD_TYPE",
            Self::FieldSize => "CODEC_FIELD_SIZE",
            Self::InsufficientPadding(_) => "CODEC_INSUFFICIENT_PADDING",
        }
    }
}

/// Errors arising while validating a cube's integrity battery (difficulty,
/// signature, fingerprint) once its fields have already been parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CubeError {
    /// The codec rejected the binary before integrity checks ran.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// `trailing_zero_bits(hash(binary))` fell below the configured difficulty.
    #[error("proof-of-work difficulty not met: needed {needed}, got {got}")]
    InsufficientDifficulty {
        /// Minimum trailing zero bits required.
        needed: u32,
        /// Trailing zero bits actually present.
        got: u32,
    },
    /// Ed25519 verification of the signed prefix failed.
    #[error("signature verification failed")]
    BadSignature,
    /// The signature's embedded fingerprint did not match `hash(public_key)[0..8]`.
    #[error("fingerprint mismatch")]
    BadFingerprint,
    /// The hashcash search was cancelled or exhausted its nonce space before
    /// clearing the configured difficulty.
    #[error("mining did not complete: {0}")]
    MiningFailed(String),
}

impl ErrorCode for CubeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Codec(e) => e.code(),
            Self::InsufficientDifficulty { .. } => "CUBE_INSUFFICIENT_DIFFICULTY",
            Self::BadSignature => "CUBE_BAD_SIGNATURE",
            Self::BadFingerprint => "CUBE_BAD_FINGERPRINT",
            Self::MiningFailed(_) => "CUBE_MINING_FAILED",
        }
    }
}

/// Errors surfaced by cryptographic primitives (`verity-crypto`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The signature failed cryptographic verification.
    #[error("signature verification failed")]
    VerificationFailed,
    /// The provided key material is malformed for Ed25519.
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    /// The provided signature bytes are malformed for Ed25519.
    #[error("invalid signature material: {0}")]
    InvalidSignature(String),
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            Self::VerificationFailed => "CRYPTO_VERIFICATION_FAILED",
            Self::InvalidKey(_) => "CRYPTO_INVALID_KEY",
            Self::InvalidSignature(_) => "CRYPTO_INVALID_SIGNATURE",
        }
    }
}

/// Errors surfaced by `PersistenceAdapter`.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// An operation was attempted before `open()` completed.
    #[error("persistence backend is not ready")]
    NotReady,
    /// The on-disk schema version did not match what this binary expects.
    #[error("schema mismatch: on-disk version {on_disk}, expected {expected}")]
    SchemaMismatch {
        /// The version found on disk.
        on_disk: u32,
        /// The version this binary requires.
        expected: u32,
    },
    /// An underlying I/O or backend error occurred.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl ErrorCode for PersistenceError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotReady => "PERSISTENCE_NOT_READY",
            Self::SchemaMismatch { .. } => "PERSISTENCE_SCHEMA_MISMATCH",
            Self::Backend(_) => "PERSISTENCE_BACKEND_ERROR",
        }
    }
}

/// Errors surfaced while processing a wire-protocol message on a `SyncPeer`.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A message's declared class byte matched no known `MessageClass`.
    ///
    /// Per the forward-compatibility policy this is only logged and the
    /// message is dropped; it does not appear as a connection-closing error
    /// at this layer.
    #[error("unknown message class {0}")]
    UnknownMessageClass(u8),
    /// A message was truncated mid-frame.
    #[error("truncated message: expected at least {expected} bytes, got {got}")]
    TruncatedMessage {
        /// Minimum bytes the frame required.
        expected: usize,
        /// Bytes actually available.
        got: usize,
    },
    /// A peer's `HELLO` carried this node's own peer id.
    #[error("peer connected to itself")]
    SelfConnection,
    /// The peer's declared protocol version is not supported.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownMessageClass(_) => "PROTOCOL_UNKNOWN_MESSAGE_CLASS",
            Self::TruncatedMessage { .. } => "PROTOCOL_TRUNCATED_MESSAGE",
            Self::SelfConnection => "PROTOCOL_SELF_CONNECTION",
            Self::UnsupportedVersion(_) => "PROTOCOL_UNSUPPORTED_VERSION",
        }
    }
}

/// Errors surfaced by `CubeStore::add`.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The incoming binary failed the cube integrity battery.
    #[error("cube error: {0}")]
    Cube(#[from] CubeError),
    /// The persistence backend failed during hydration or an awaited write.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Cube(e) => e.code(),
            Self::Persistence(e) => e.code(),
        }
    }
}

