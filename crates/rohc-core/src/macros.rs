//! Helper macros for ROHC packet encoding and decoding
//!
//! Some are exported and available to external crates

/// Asserts that the traits support dynamic dispatch.
///
/// From <https://docs.rs/static_assertions/1.1.0/src/static_assertions/assert_obj_safe.rs.html#72-76>
#[macro_export]
macro_rules! assert_obj_safe {
    ($($xs:path),+ $(,)?) => {
        $(const _: Option<&dyn $xs> = None;)+
    };
}

/// Returns an error when the buffer (cursor) is too small for `size` bytes.
///
/// Works for both decoding and encoding functions thanks to type inference
/// on the extension traits.
#[macro_export]
macro_rules! ensure_size {
    (ctx: $ctx:expr, in: $buf:ident, size: $expected:expr) => {{
        let received = $buf.len();
        let expected = $expected;
        if !(received >= expected) {
            return Err($crate::not_enough_bytes_err($ctx, received, expected));
        }
    }};
    (in: $buf:ident, size: $expected:expr) => {{
        $crate::ensure_size!(ctx: Self::NAME, in: $buf, size: $expected)
    }};
}

/// Shorthand for [`ensure_size!`] with `Self::FIXED_PART_SIZE`.
#[macro_export]
macro_rules! ensure_fixed_part_size {
    (in: $buf:ident) => {{
        $crate::ensure_size!(ctx: Self::NAME, in: $buf, size: Self::FIXED_PART_SIZE)
    }};
}

/// Creates an "invalid field" error, defaulting the context to `Self::NAME`.
#[macro_export]
macro_rules! invalid_field_err {
    ( $context:expr, $field:expr, $reason:expr $(,)? ) => {{
        $crate::invalid_field_err($context, $field, $reason)
    }};
    ( $field:expr, $reason:expr $(,)? ) => {{
        $crate::invalid_field_err(Self::NAME, $field, $reason)
    }};
}

/// Creates an "unexpected packet type" error, defaulting the context to `Self::NAME`.
#[macro_export]
macro_rules! unexpected_packet_type_err {
    ( $context:expr, got: $got:expr $(,)? ) => {{
        $crate::unexpected_packet_type_err($context, $got)
    }};
    ( got: $got:expr $(,)? ) => {{
        $crate::unexpected_packet_type_err(Self::NAME, $got)
    }};
}

/// Creates an "unsupported value" error, defaulting the context to `Self::NAME`.
#[macro_export]
macro_rules! unsupported_value_err {
    ( $context:expr, $name:expr, $value:expr $(,)? ) => {{
        $crate::unsupported_value_err($context, $name, $value)
    }};
    ( $name:expr, $value:expr $(,)? ) => {{
        $crate::unsupported_value_err(Self::NAME, $name, $value)
    }};
}

/// Creates an "other" error, defaulting the context to `Self::NAME`.
#[macro_export]
macro_rules! other_err {
    ( $context:expr, $description:expr $(,)? ) => {{
        $crate::other_err($context, $description)
    }};
    ( $description:expr $(,)? ) => {{
        $crate::other_err(Self::NAME, $description)
    }};
}

/// Converts a length with `try_into`, reporting failure as an "invalid field" error.
#[macro_export]
macro_rules! cast_length {
    ($ctx:expr, $field:expr, $len:expr) => {{
        $len.try_into()
            .map_err(|_| $crate::invalid_field_err($ctx, $field, "too many elements"))
    }};
    ($field:expr, $len:expr) => {{
        $crate::cast_length!(Self::NAME, $field, $len)
    }};
}
