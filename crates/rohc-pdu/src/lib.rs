#![cfg_attr(doc, doc = include_str!("../README.md"))]
#![allow(clippy::cast_possible_truncation)] // masked bit-field casts are pervasive in wire codecs
#![allow(clippy::cast_lossless)]

pub mod chains;
pub mod cid;
pub mod crc;
pub mod feedback;
pub mod headers;
pub mod ir;
pub mod packet;
pub mod profile;
pub mod sdvl;
pub mod uo;
pub mod v2;

pub use crate::cid::{Cid, CidType};
pub use crate::packet::{IpIdBehavior, LsbField, PacketType, ReorderRatio, RohcMode, RohcPacketKind};
pub use crate::profile::ProfileId;

/// ROHC padding octet (RFC 3095 §5.2).
pub const PADDING_OCTET: u8 = 0b1110_0000;

/// Upper bound on the number of IP headers a compressed flow may nest.
pub const MAX_IP_HEADERS: usize = 2;
