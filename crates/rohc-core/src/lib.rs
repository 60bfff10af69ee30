#![cfg_attr(doc, doc = include_str!("../README.md"))]
#![cfg_attr(doc, warn(missing_docs))]

#[macro_use]
mod macros;

mod bits;
mod cursor;
mod decode;
mod encode;
mod error;
mod write_buf;

// Flat API hierarchy of common traits and types

pub use self::bits::*;
pub use self::cursor::*;
pub use self::decode::*;
pub use self::encode::*;
pub use self::error::*;
pub use self::write_buf::*;
