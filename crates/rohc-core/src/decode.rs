use core::fmt;

use crate::{
    CrcMismatchErr, InvalidFieldErr, NotEnoughBytesErr, OtherErr, ReadCursor, UnexpectedPacketTypeErr,
    UnsupportedValueErr,
};

/// A result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// An error type for decoding operations, wrapping a [`DecodeErrorKind`].
pub type DecodeError = rohc_error::Error<DecodeErrorKind>;

/// Enum representing different kinds of decode errors.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum DecodeErrorKind {
    /// Error when there are not enough bytes to decode.
    NotEnoughBytes {
        /// Number of bytes received.
        received: usize,
        /// Number of bytes expected.
        expected: usize,
    },
    /// Error when a field is invalid.
    InvalidField {
        /// Name of the invalid field.
        field: &'static str,
        /// Reason for invalidity.
        reason: &'static str,
    },
    /// Error when an unknown or unexpected packet-type discriminator is encountered.
    UnexpectedPacketType {
        /// The first octet carrying the discriminator.
        got: u8,
    },
    /// Error when an unsupported value is encountered.
    UnsupportedValue {
        /// Name of the unsupported value.
        name: &'static str,
        /// The unsupported value.
        value: String,
    },
    /// Error when a checksum over decoded data does not match the received one.
    ///
    /// Kept distinct from the other kinds: the decompressor reacts to CRC
    /// failures (repair, state downgrade, negative feedback) while malformed
    /// packets are simply dropped.
    CrcMismatch {
        /// The CRC carried by the packet.
        received: u8,
        /// The CRC computed over the decoded data.
        computed: u8,
    },
    /// Generic error for other cases.
    Other {
        /// Description of the error.
        description: &'static str,
    },
}

impl std::error::Error for DecodeErrorKind {}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEnoughBytes { received, expected } => write!(
                f,
                "not enough bytes provided to decode: received {received} bytes, expected {expected} bytes"
            ),
            Self::InvalidField { field, reason } => {
                write!(f, "invalid `{field}`: {reason}")
            }
            Self::UnexpectedPacketType { got } => {
                write!(f, "unexpected packet type (first octet 0x{got:02X})")
            }
            Self::UnsupportedValue { name, value } => {
                write!(f, "unsupported {name} ({value})")
            }
            Self::CrcMismatch { received, computed } => {
                write!(f, "CRC mismatch (received 0x{received:02X}, computed 0x{computed:02X})")
            }
            Self::Other { description } => {
                write!(f, "other ({description})")
            }
        }
    }
}

impl NotEnoughBytesErr for DecodeError {
    fn not_enough_bytes(context: &'static str, received: usize, expected: usize) -> Self {
        Self::new(context, DecodeErrorKind::NotEnoughBytes { received, expected })
    }
}

impl InvalidFieldErr for DecodeError {
    fn invalid_field(context: &'static str, field: &'static str, reason: &'static str) -> Self {
        Self::new(context, DecodeErrorKind::InvalidField { field, reason })
    }
}

impl UnexpectedPacketTypeErr for DecodeError {
    fn unexpected_packet_type(context: &'static str, got: u8) -> Self {
        Self::new(context, DecodeErrorKind::UnexpectedPacketType { got })
    }
}

impl UnsupportedValueErr for DecodeError {
    fn unsupported_value(context: &'static str, name: &'static str, value: String) -> Self {
        Self::new(context, DecodeErrorKind::UnsupportedValue { name, value })
    }
}

impl CrcMismatchErr for DecodeError {
    fn crc_mismatch(context: &'static str, received: u8, computed: u8) -> Self {
        Self::new(context, DecodeErrorKind::CrcMismatch { received, computed })
    }
}

impl OtherErr for DecodeError {
    fn other(context: &'static str, description: &'static str) -> Self {
        Self::new(context, DecodeErrorKind::Other { description })
    }
}

/// Extension trait providing [`DecodeError::is_crc_mismatch`]-like behavior.
///
/// Defined as a trait (rather than an inherent impl) because `DecodeError`
/// is a type alias for a foreign type, and Rust's orphan rules forbid
/// inherent `impl` blocks on foreign types.
pub trait DecodeErrorExt {
    /// Whether this error is a CRC mismatch (as opposed to a malformed packet).
    #[must_use]
    fn is_crc_mismatch(&self) -> bool;
}

impl DecodeErrorExt for DecodeError {
    fn is_crc_mismatch(&self) -> bool {
        matches!(self.kind(), DecodeErrorKind::CrcMismatch { .. })
    }
}

/// Trait for types that can be decoded from a byte stream.
pub trait Decode<'de>: Sized {
    /// Decodes an instance of `Self` from the given byte stream.
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self>;
}

/// Decodes a value of type `T` from a byte slice.
pub fn decode<'de, T>(src: &'de [u8]) -> DecodeResult<T>
where
    T: Decode<'de>,
{
    let mut cursor = ReadCursor::new(src);
    T::decode(&mut cursor)
}

/// Decodes a value of type `T` from a `ReadCursor`.
pub fn decode_cursor<'de, T>(src: &mut ReadCursor<'de>) -> DecodeResult<T>
where
    T: Decode<'de>,
{
    T::decode(src)
}
