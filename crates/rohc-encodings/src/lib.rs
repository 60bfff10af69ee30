#![cfg_attr(doc, doc = include_str!("../README.md"))]

mod ip_id;
mod ts_sc;
mod wlsb;

pub use self::ip_id::*;
pub use self::ts_sc::*;
pub use self::wlsb::*;
