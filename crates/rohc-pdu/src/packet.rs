//! Packet-type discriminators and the bit-field primitives shared by the
//! compressed packet codecs.

use core::fmt;

/// Up to 32 least-significant bits of a field, as carried on the wire.
///
/// A width of zero means the packet carries no bits for the field and the
/// decompressor must deduce or keep the reference value.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LsbField {
    pub bits: u32,
    pub width: u8,
}

impl LsbField {
    pub const EMPTY: Self = Self { bits: 0, width: 0 };

    #[must_use]
    pub const fn new(bits: u32, width: u8) -> Self {
        Self { bits, width }
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0
    }

    /// Appends `lsb` as additional least-significant bits (self keeps the
    /// more significant part).
    #[must_use]
    pub const fn append(self, lsb: Self) -> Self {
        Self {
            bits: (self.bits << lsb.width) | lsb.bits,
            width: self.width + lsb.width,
        }
    }

    /// Prepends `msb` as additional more-significant bits.
    #[must_use]
    pub const fn prepend(self, msb: Self) -> Self {
        msb.append(self)
    }
}

impl fmt::Display for LsbField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}/{}", self.bits, self.width)
    }
}

/// IP-ID behavior codes (RFC 5225 §6.3.3), also used by the unified
/// dynamic-chain format of this implementation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum IpIdBehavior {
    #[default]
    Sequential = 0,
    SequentialSwapped = 1,
    Random = 2,
    Zero = 3,
}

impl IpIdBehavior {
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => IpIdBehavior::Sequential,
            1 => IpIdBehavior::SequentialSwapped,
            2 => IpIdBehavior::Random,
            _ => IpIdBehavior::Zero,
        }
    }

    #[must_use]
    pub const fn to_bits(self) -> u8 {
        self as u8
    }

    /// Sequential behaviors have their IP-ID offset W-LSB encoded; the other
    /// two never contribute compressed IP-ID bits.
    #[must_use]
    pub const fn is_sequential(self) -> bool {
        matches!(self, IpIdBehavior::Sequential | IpIdBehavior::SequentialSwapped)
    }
}

/// ROHC operating modes (RFC 3095 §4.4). The wire encoding (feedback mode
/// field, extension 3 mode bits) reserves 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, PartialOrd, Ord)]
pub enum RohcMode {
    #[default]
    Unidirectional = 1,
    Optimistic = 2,
    Reliable = 3,
}

impl RohcMode {
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x3 {
            1 => Some(RohcMode::Unidirectional),
            2 => Some(RohcMode::Optimistic),
            3 => Some(RohcMode::Reliable),
            _ => None,
        }
    }

    #[must_use]
    pub const fn to_bits(self) -> u8 {
        self as u8
    }

    /// Whether the decompressor sends feedback in this mode.
    #[must_use]
    pub const fn is_bidirectional(self) -> bool {
        !matches!(self, RohcMode::Unidirectional)
    }
}

/// Channel reordering characterization (RFC 5225 §6.6.4), sizing the MSN
/// interpretation interval.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ReorderRatio {
    #[default]
    None = 0,
    Quarter = 1,
    Half = 2,
    ThreeQuarters = 3,
}

impl ReorderRatio {
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => ReorderRatio::None,
            1 => ReorderRatio::Quarter,
            2 => ReorderRatio::Half,
            _ => ReorderRatio::ThreeQuarters,
        }
    }

    #[must_use]
    pub const fn to_bits(self) -> u8 {
        self as u8
    }
}

/// The concrete kind of a ROHC packet, as reported back to callers after
/// compression or decompression.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RohcPacketKind {
    Ir,
    IrDyn,
    Uo0,
    Uo1,
    Uo1Rtp,
    Uo1Id,
    Uo1Ts,
    Uor2,
    Uor2Rtp,
    Uor2Id,
    Uor2Ts,
    Normal,
    CoRepair,
}

impl RohcPacketKind {
    /// Whether this is one of the compressed (UO) forms.
    #[must_use]
    pub const fn is_uo(self) -> bool {
        !matches!(
            self,
            RohcPacketKind::Ir | RohcPacketKind::IrDyn | RohcPacketKind::Normal | RohcPacketKind::CoRepair
        )
    }
}

impl From<crate::uo::UoPacketType> for RohcPacketKind {
    fn from(kind: crate::uo::UoPacketType) -> Self {
        use crate::uo::UoPacketType;
        match kind {
            UoPacketType::Uo0 => RohcPacketKind::Uo0,
            UoPacketType::Uo1 => RohcPacketKind::Uo1,
            UoPacketType::Uo1Rtp => RohcPacketKind::Uo1Rtp,
            UoPacketType::Uo1Id => RohcPacketKind::Uo1Id,
            UoPacketType::Uo1Ts => RohcPacketKind::Uo1Ts,
            UoPacketType::Uor2 => RohcPacketKind::Uor2,
            UoPacketType::Uor2Rtp => RohcPacketKind::Uor2Rtp,
            UoPacketType::Uor2Id => RohcPacketKind::Uor2Id,
            UoPacketType::Uor2Ts => RohcPacketKind::Uor2Ts,
        }
    }
}

/// Generic packet-type classification from the first octet following the
/// optional add-CID prefix.
///
/// The UO classes are refined per profile and context (e.g. a `Uo1` byte is
/// UO-1-ID or UO-1-TS depending on the T bit and on whether the context
/// holds a sequential IPv4 header); the Uncompressed and ROHCv2 IP profiles
/// treat the non-reserved classes as Normal packets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// `1111 110D`: IR, with or without a dynamic chain.
    Ir { dynamic: bool },
    /// `1111 1000`: IR-DYN.
    IrDyn,
    /// `1111 1011`: ROHCv2 co_repair.
    CoRepair,
    /// `1111 0CCC`: feedback element.
    Feedback { size_code: u8 },
    /// `1111 111x`: segment (recognized, not supported).
    Segment,
    /// `1110 0000`: padding octet.
    Padding,
    /// `0xxx xxxx`
    Uo0,
    /// `10xx xxxx`
    Uo1,
    /// `110x xxxx`
    Uor2,
    /// Anything else: only meaningful for profiles transporting packets
    /// verbatim (Uncompressed, ROHCv2 IP Normal form).
    Other,
}

impl PacketType {
    /// Classifies the discriminator octet.
    #[must_use]
    pub const fn detect(first: u8) -> Self {
        if first == crate::PADDING_OCTET {
            PacketType::Padding
        } else if first & 0xfe == 0xfc {
            PacketType::Ir {
                dynamic: first & 0x01 != 0,
            }
        } else if first == 0xf8 {
            PacketType::IrDyn
        } else if first == 0xfb {
            PacketType::CoRepair
        } else if first & 0xfe == 0xfe {
            PacketType::Segment
        } else if first & 0xf8 == 0xf0 {
            PacketType::Feedback {
                size_code: first & 0x07,
            }
        } else if first & 0x80 == 0 {
            PacketType::Uo0
        } else if first & 0xc0 == 0x80 {
            PacketType::Uo1
        } else if first & 0xe0 == 0xc0 {
            PacketType::Uor2
        } else {
            PacketType::Other
        }
    }

    /// Whether a Normal packet (first uncompressed byte in place of the
    /// discriminator) would collide with a reserved ROHC packet type.
    #[must_use]
    pub const fn collides_with_reserved(first: u8) -> bool {
        first & 0xf8 == 0xf8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminators() {
        assert_eq!(PacketType::detect(0xfd), PacketType::Ir { dynamic: true });
        assert_eq!(PacketType::detect(0xfc), PacketType::Ir { dynamic: false });
        assert_eq!(PacketType::detect(0xf8), PacketType::IrDyn);
        assert_eq!(PacketType::detect(0xfb), PacketType::CoRepair);
        assert_eq!(PacketType::detect(0xf2), PacketType::Feedback { size_code: 2 });
        assert_eq!(PacketType::detect(0xfe), PacketType::Segment);
        assert_eq!(PacketType::detect(0xe0), PacketType::Padding);
        assert_eq!(PacketType::detect(0x3a), PacketType::Uo0);
        assert_eq!(PacketType::detect(0x95), PacketType::Uo1);
        assert_eq!(PacketType::detect(0xdf), PacketType::Uor2);
        assert_eq!(PacketType::detect(0xe7), PacketType::Other);
    }

    #[test]
    fn normal_collision_window() {
        assert!(PacketType::collides_with_reserved(0xf8));
        assert!(PacketType::collides_with_reserved(0xff));
        assert!(!PacketType::collides_with_reserved(0xf7));
        assert!(!PacketType::collides_with_reserved(0x45));
        assert!(!PacketType::collides_with_reserved(0x60));
    }

    #[test]
    fn lsb_field_concatenation() {
        let base = LsbField::new(0b101, 3);
        let ext = LsbField::new(0b11, 2);
        let total = base.append(ext);
        assert_eq!(total.bits, 0b101_11);
        assert_eq!(total.width, 5);
        assert_eq!(ext.prepend(base), total);
    }
}
