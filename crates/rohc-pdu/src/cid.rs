//! Context identifiers and their on-the-wire encodings (RFC 3095 §5.2.3).
//!
//! Small CIDs (0–15) ride in an optional add-CID octet placed *before* the
//! first packet octet; CID 0 is implicit. Large CIDs (0–16383) are
//! SDVL-encoded on 1–2 bytes *after* the first packet octet.

use core::fmt;

use rohc_core::{DecodeResult, EncodeResult, InvalidFieldErr as _, ReadCursor, WriteCursor};

use crate::sdvl;

/// Discriminator prefix of the add-CID octet: `1110 CCCC`.
const ADD_CID_PREFIX: u8 = 0b1110_0000;

/// A context identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(u16);

impl Cid {
    /// Highest CID expressible in the small-CID space.
    pub const MAX_SMALL: u16 = 15;
    /// Highest CID expressible in the large-CID space.
    pub const MAX_LARGE: u16 = 16383;

    #[must_use]
    pub const fn new(cid: u16) -> Self {
        Self(cid)
    }

    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl From<Cid> for u16 {
    fn from(value: Cid) -> Self {
        value.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The CID space negotiated for a channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum CidType {
    /// CIDs 0–15, add-CID octet.
    #[default]
    Small,
    /// CIDs 0–16383, embedded SDVL bytes.
    Large,
}

impl CidType {
    /// Highest CID this space can carry.
    #[must_use]
    pub const fn max_cid(self) -> u16 {
        match self {
            CidType::Small => Cid::MAX_SMALL,
            CidType::Large => Cid::MAX_LARGE,
        }
    }

    /// Number of bytes the CID encoding occupies for `cid`.
    #[must_use]
    pub fn cid_overhead(self, cid: Cid) -> usize {
        match self {
            CidType::Small => usize::from(cid.get() != 0),
            CidType::Large => {
                if cid.get() < (1 << 7) {
                    1
                } else {
                    2
                }
            }
        }
    }
}

const NAME: &str = "Cid";

/// Strips an add-CID octet, if present, from the head of a small-CID packet.
///
/// Returns the CID the packet addresses. Leading padding octets must have
/// been consumed already.
pub fn read_add_cid(src: &mut ReadCursor<'_>) -> Cid {
    if !src.is_empty() {
        let first = src.peek_u8();
        if first & 0xf0 == ADD_CID_PREFIX && first != ADD_CID_PREFIX {
            src.advance(1);
            return Cid::new(u16::from(first & 0x0f));
        }
    }
    Cid::new(0)
}

/// Writes the add-CID octet when `cid` is non-zero.
pub fn write_add_cid(dst: &mut WriteCursor<'_>, cid: Cid) -> EncodeResult<()> {
    if cid.get() != 0 {
        if cid.get() > u16::from(Cid::MAX_SMALL) {
            return Err(rohc_core::EncodeError::invalid_field(
                NAME,
                "cid",
                "does not fit in the small-CID space",
            ));
        }
        rohc_core::ensure_size!(ctx: NAME, in: dst, size: 1);
        dst.write_u8(ADD_CID_PREFIX | (cid.get() as u8));
    }
    Ok(())
}

/// Reads the embedded large-CID bytes that follow the first packet octet.
pub fn read_large_cid(src: &mut ReadCursor<'_>) -> DecodeResult<Cid> {
    let (value, _) = sdvl::read(src)
        .map_err(|_| rohc_core::DecodeError::invalid_field(NAME, "large CID", "truncated or malformed"))?;
    if value > u32::from(Cid::MAX_LARGE) {
        return Err(rohc_core::DecodeError::invalid_field(
            NAME,
            "large CID",
            "exceeds the 14-bit CID space",
        ));
    }
    Ok(Cid::new(value as u16))
}

/// Writes the embedded large-CID bytes that follow the first packet octet.
pub fn write_large_cid(dst: &mut WriteCursor<'_>, cid: Cid) -> EncodeResult<()> {
    rohc_core::ensure_size!(ctx: NAME, in: dst, size: CidType::Large.cid_overhead(cid));
    sdvl::write(dst, u32::from(cid.get()))
        .map_err(|_| rohc_core::EncodeError::invalid_field(NAME, "large CID", "exceeds the 14-bit CID space"))?;
    Ok(())
}
