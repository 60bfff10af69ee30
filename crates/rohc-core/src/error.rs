use rohc_error::{Error, Source};

/// Trait for adding a source to an error type.
pub trait WithSource {
    /// Adds a source to the error.
    #[must_use]
    fn with_source<E: Source>(self, source: E) -> Self;
}

impl<T> WithSource for Error<T> {
    fn with_source<E: Source>(self, source: E) -> Self {
        self.with_source(source)
    }
}

/// Trait for creating "not enough bytes" errors.
pub trait NotEnoughBytesErr {
    /// Creates a new "not enough bytes" error.
    fn not_enough_bytes(context: &'static str, received: usize, expected: usize) -> Self;
}

/// Helper function to create a "not enough bytes" error.
pub fn not_enough_bytes_err<T: NotEnoughBytesErr>(context: &'static str, received: usize, expected: usize) -> T {
    T::not_enough_bytes(context, received, expected)
}

/// Trait for creating "invalid field" errors.
pub trait InvalidFieldErr {
    /// Creates a new "invalid field" error.
    fn invalid_field(context: &'static str, field: &'static str, reason: &'static str) -> Self;
}

/// Helper function to create an "invalid field" error.
pub fn invalid_field_err<T: InvalidFieldErr>(context: &'static str, field: &'static str, reason: &'static str) -> T {
    T::invalid_field(context, field, reason)
}

/// Helper function to create an "invalid field" error with a source.
pub fn invalid_field_err_with_source<T: InvalidFieldErr + WithSource, E: Source>(
    context: &'static str,
    field: &'static str,
    reason: &'static str,
    source: E,
) -> T {
    T::invalid_field(context, field, reason).with_source(source)
}

/// Trait for creating "unexpected packet type" errors.
pub trait UnexpectedPacketTypeErr {
    /// Creates a new "unexpected packet type" error.
    fn unexpected_packet_type(context: &'static str, got: u8) -> Self;
}

/// Helper function to create an "unexpected packet type" error.
pub fn unexpected_packet_type_err<T: UnexpectedPacketTypeErr>(context: &'static str, got: u8) -> T {
    T::unexpected_packet_type(context, got)
}

/// Trait for creating "unsupported value" errors.
pub trait UnsupportedValueErr {
    /// Creates a new "unsupported value" error.
    fn unsupported_value(context: &'static str, name: &'static str, value: String) -> Self;
}

/// Helper function to create an "unsupported value" error.
pub fn unsupported_value_err<T: UnsupportedValueErr>(context: &'static str, name: &'static str, value: String) -> T {
    T::unsupported_value(context, name, value)
}

/// Trait for creating "CRC mismatch" errors.
pub trait CrcMismatchErr {
    /// Creates a new "CRC mismatch" error.
    fn crc_mismatch(context: &'static str, received: u8, computed: u8) -> Self;
}

/// Helper function to create a "CRC mismatch" error.
pub fn crc_mismatch_err<T: CrcMismatchErr>(context: &'static str, received: u8, computed: u8) -> T {
    T::crc_mismatch(context, received, computed)
}

/// Trait for creating generic "other" errors.
pub trait OtherErr {
    /// Creates a new generic "other" error.
    fn other(context: &'static str, description: &'static str) -> Self;
}

/// Helper function to create a generic "other" error.
pub fn other_err<T: OtherErr>(context: &'static str, description: &'static str) -> T {
    T::other(context, description)
}

/// Helper function to create a generic "other" error with a source.
pub fn other_err_with_source<T: OtherErr + WithSource, E: Source>(
    context: &'static str,
    description: &'static str,
    source: E,
) -> T {
    T::other(context, description).with_source(source)
}
