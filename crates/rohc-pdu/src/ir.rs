//! IR and IR-DYN packets (RFC 3095 §5.7.7, RFC 5225 §6.2).
//!
//! Both carry the CID envelope, the abbreviated profile octet and a CRC-8
//! computed from the type octet through the end of the chains with the CRC
//! field zeroed (the add-CID octet is not covered).

use rohc_core::{CrcMismatchErr as _, DecodeResult, EncodeResult, ReadCursor, WriteCursor};

use crate::chains::{DynamicChain, StaticChain};
use crate::cid::{self, Cid, CidType};
use crate::crc;
use crate::profile::ProfileId;

pub const IR_TYPE_NO_DYN: u8 = 0xfc;
pub const IR_TYPE_WITH_DYN: u8 = 0xfd;
pub const IR_DYN_TYPE: u8 = 0xf8;

/// Resolves an abbreviated (low byte) profile identifier against the set of
/// profiles enabled on the channel.
pub trait ResolveProfile {
    fn resolve(&self, low_byte: u8) -> Option<ProfileId>;
}

impl<F> ResolveProfile for F
where
    F: Fn(u8) -> Option<ProfileId>,
{
    fn resolve(&self, low_byte: u8) -> Option<ProfileId> {
        self(low_byte)
    }
}

/// An IR packet: the context-establishing packet of every profile.
///
/// The Uncompressed profile carries no chains; the ROHCv1 profiles carry a
/// static chain and, when the D bit is set, a dynamic chain; the ROHCv2 IP
/// profile always carries both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrPacket {
    pub cid: Cid,
    pub profile: ProfileId,
    pub static_chain: Option<StaticChain>,
    pub dynamic_chain: Option<DynamicChain>,
}

impl IrPacket {
    const NAME: &'static str = "IR";

    #[must_use]
    pub fn type_octet(&self) -> u8 {
        if self.dynamic_chain.is_some() {
            IR_TYPE_WITH_DYN
        } else {
            IR_TYPE_NO_DYN
        }
    }

    /// Size of the whole packet, CID envelope included.
    #[must_use]
    pub fn size(&self, cid_type: CidType) -> usize {
        cid_type.cid_overhead(self.cid)
            + 1 // type octet
            + 1 // profile
            + 1 // CRC-8
            + self.static_chain.as_ref().map_or(0, StaticChain::size)
            + self.dynamic_chain.as_ref().map_or(0, DynamicChain::size)
    }

    pub fn encode(&self, dst: &mut WriteCursor<'_>, cid_type: CidType) -> EncodeResult<()> {
        rohc_core::ensure_size!(ctx: Self::NAME, in: dst, size: self.size(cid_type));

        if cid_type == CidType::Small {
            cid::write_add_cid(dst, self.cid)?;
        }

        let crc_start = dst.pos();
        dst.write_u8(self.type_octet());
        if cid_type == CidType::Large {
            cid::write_large_cid(dst, self.cid)?;
        }
        dst.write_u8(self.profile.low_byte());
        let crc_pos = dst.pos();
        dst.write_u8(0);

        if let Some(chain) = &self.static_chain {
            chain.encode(dst)?;
        }
        if let Some(chain) = &self.dynamic_chain {
            chain.encode(dst)?;
        }

        let crc = crc::crc8(&dst.inner()[crc_start..dst.pos()], crc::CRC8_INIT);
        dst.inner_mut()[crc_pos] = crc;

        Ok(())
    }

    /// Decodes an IR packet. `src` must be positioned on the type octet;
    /// `add_cid` is the CID recovered from the add-CID octet (small CIDs).
    pub fn decode<R: ResolveProfile>(
        src: &mut ReadCursor<'_>,
        cid_type: CidType,
        add_cid: Cid,
        resolver: &R,
    ) -> DecodeResult<Self> {
        rohc_core::ensure_size!(ctx: Self::NAME, in: src, size: 3);

        let crc_region = src.remaining();
        let base = src.pos();
        let type_octet = src.read_u8();
        debug_assert_eq!(type_octet & 0xfe, 0xfc);
        let with_dynamic = type_octet & 0x01 != 0;

        let cid = match cid_type {
            CidType::Small => add_cid,
            CidType::Large => cid::read_large_cid(src)?,
        };

        let profile_octet = src.read_u8();
        let profile = resolver
            .resolve(profile_octet)
            .ok_or_else(|| rohc_core::unsupported_value_err::<rohc_core::DecodeError>(
                Self::NAME,
                "profile",
                format!("0x{profile_octet:02X}"),
            ))?;

        rohc_core::ensure_size!(ctx: Self::NAME, in: src, size: 1);
        let crc_index = src.pos() - base;
        let received_crc = src.read_u8();

        let (static_chain, dynamic_chain) = if profile == ProfileId::UNCOMPRESSED {
            (None, None)
        } else {
            let static_chain = StaticChain::decode(src, profile)?;
            let dynamic_chain = if with_dynamic || profile.is_v2() {
                Some(DynamicChain::decode(src, profile, static_chain.ip.len())?)
            } else {
                None
            };
            (Some(static_chain), dynamic_chain)
        };

        // CRC-8 over type octet .. end of chains, CRC octet zeroed.
        let end = src.pos() - base;
        let mut computed = crc::crc8(&crc_region[..crc_index], crc::CRC8_INIT);
        computed = crc::crc8(&[0u8], computed);
        computed = crc::crc8(&crc_region[crc_index + 1..end], computed);

        if computed != received_crc {
            return Err(rohc_core::DecodeError::crc_mismatch(Self::NAME, received_crc, computed));
        }

        Ok(Self {
            cid,
            profile,
            static_chain,
            dynamic_chain,
        })
    }
}

/// An IR-DYN packet: refreshes the dynamic part of an existing context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrDynPacket {
    pub cid: Cid,
    pub profile: ProfileId,
    pub dynamic_chain: DynamicChain,
}

impl IrDynPacket {
    const NAME: &'static str = "IR-DYN";

    /// Size of the whole packet, CID envelope included.
    #[must_use]
    pub fn size(&self, cid_type: CidType) -> usize {
        cid_type.cid_overhead(self.cid) + 3 + self.dynamic_chain.size()
    }

    pub fn encode(&self, dst: &mut WriteCursor<'_>, cid_type: CidType) -> EncodeResult<()> {
        rohc_core::ensure_size!(ctx: Self::NAME, in: dst, size: self.size(cid_type));

        if cid_type == CidType::Small {
            cid::write_add_cid(dst, self.cid)?;
        }

        let crc_start = dst.pos();
        dst.write_u8(IR_DYN_TYPE);
        if cid_type == CidType::Large {
            cid::write_large_cid(dst, self.cid)?;
        }
        dst.write_u8(self.profile.low_byte());
        let crc_pos = dst.pos();
        dst.write_u8(0);

        self.dynamic_chain.encode(dst)?;

        let crc = crc::crc8(&dst.inner()[crc_start..dst.pos()], crc::CRC8_INIT);
        dst.inner_mut()[crc_pos] = crc;

        Ok(())
    }

    /// Decodes an IR-DYN packet; `src` must be positioned on the type octet.
    ///
    /// The number of IP headers in the flow comes from the established
    /// context (`ip_count`), since IR-DYN carries no static chain.
    pub fn decode<R: ResolveProfile>(
        src: &mut ReadCursor<'_>,
        cid_type: CidType,
        add_cid: Cid,
        ip_count: usize,
        resolver: &R,
    ) -> DecodeResult<Self> {
        rohc_core::ensure_size!(ctx: Self::NAME, in: src, size: 3);

        let crc_region = src.remaining();
        let base = src.pos();
        let type_octet = src.read_u8();
        debug_assert_eq!(type_octet, IR_DYN_TYPE);

        let cid = match cid_type {
            CidType::Small => add_cid,
            CidType::Large => cid::read_large_cid(src)?,
        };

        let profile_octet = src.read_u8();
        let profile = resolver
            .resolve(profile_octet)
            .ok_or_else(|| rohc_core::unsupported_value_err::<rohc_core::DecodeError>(
                Self::NAME,
                "profile",
                format!("0x{profile_octet:02X}"),
            ))?;

        rohc_core::ensure_size!(ctx: Self::NAME, in: src, size: 1);
        let crc_index = src.pos() - base;
        let received_crc = src.read_u8();

        let dynamic_chain = DynamicChain::decode(src, profile, ip_count)?;

        let end = src.pos() - base;
        let mut computed = crc::crc8(&crc_region[..crc_index], crc::CRC8_INIT);
        computed = crc::crc8(&[0u8], computed);
        computed = crc::crc8(&crc_region[crc_index + 1..end], computed);

        if computed != received_crc {
            return Err(rohc_core::DecodeError::crc_mismatch(Self::NAME, received_crc, computed));
        }

        Ok(Self {
            cid,
            profile,
            dynamic_chain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rohc_core::DecodeErrorExt as _;

    use crate::chains::{IpDynamic, IpStatic, Ipv4Static, UdpStatic};
    use crate::packet::IpIdBehavior;

    fn resolver(low: u8) -> Option<ProfileId> {
        match low {
            0x00 => Some(ProfileId::UNCOMPRESSED),
            0x01 => Some(ProfileId::RTP),
            0x02 => Some(ProfileId::UDP),
            0x04 => Some(ProfileId::IP_V2),
            _ => None,
        }
    }

    fn sample_ir() -> IrPacket {
        IrPacket {
            cid: Cid::new(3),
            profile: ProfileId::UDP,
            static_chain: Some(StaticChain {
                ip: vec![IpStatic::V4(Ipv4Static {
                    innermost: true,
                    protocol: 17,
                    src: 0x0a00_0001,
                    dst: 0x0a00_0002,
                })],
                udp: Some(UdpStatic {
                    src_port: 1234,
                    dst_port: 5678,
                }),
                rtp: None,
            }),
            dynamic_chain: Some(DynamicChain {
                ip: vec![IpDynamic {
                    behavior: IpIdBehavior::Sequential,
                    dont_fragment: false,
                    tos: 0,
                    ttl: 64,
                    ip_id: Some(42),
                }],
                v2: None,
                udp_checksum: Some(0x1111),
                udp_sn: Some(42),
                rtp: None,
            }),
        }
    }

    #[test]
    fn ir_round_trip_small_cid() {
        let ir = sample_ir();
        let mut buf = vec![0u8; ir.size(CidType::Small)];
        let mut cursor = WriteCursor::new(&mut buf);
        ir.encode(&mut cursor, CidType::Small).unwrap();
        assert_eq!(cursor.pos(), buf.len());

        let mut cursor = ReadCursor::new(&buf);
        let add_cid = cid::read_add_cid(&mut cursor);
        assert_eq!(add_cid, Cid::new(3));
        let decoded = IrPacket::decode(&mut cursor, CidType::Small, add_cid, &resolver).unwrap();
        assert_eq!(decoded, ir);
    }

    #[test]
    fn ir_round_trip_large_cid() {
        let mut ir = sample_ir();
        ir.cid = Cid::new(300);
        let mut buf = vec![0u8; ir.size(CidType::Large)];
        let mut cursor = WriteCursor::new(&mut buf);
        ir.encode(&mut cursor, CidType::Large).unwrap();

        let mut cursor = ReadCursor::new(&buf);
        let decoded = IrPacket::decode(&mut cursor, CidType::Large, Cid::new(0), &resolver).unwrap();
        assert_eq!(decoded, ir);
    }

    #[test]
    fn corrupted_ir_fails_crc() {
        let ir = sample_ir();
        let mut buf = vec![0u8; ir.size(CidType::Small)];
        let mut cursor = WriteCursor::new(&mut buf);
        ir.encode(&mut cursor, CidType::Small).unwrap();

        let last = buf.len() - 1;
        buf[last] ^= 0x01;

        let mut cursor = ReadCursor::new(&buf);
        let add_cid = cid::read_add_cid(&mut cursor);
        let err = IrPacket::decode(&mut cursor, CidType::Small, add_cid, &resolver).unwrap_err();
        assert!(err.is_crc_mismatch());
    }

    #[test]
    fn ir_dyn_round_trip() {
        let ir_dyn = IrDynPacket {
            cid: Cid::new(0),
            profile: ProfileId::UDP,
            dynamic_chain: sample_ir().dynamic_chain.unwrap(),
        };

        let mut buf = vec![0u8; ir_dyn.size(CidType::Small)];
        let mut cursor = WriteCursor::new(&mut buf);
        ir_dyn.encode(&mut cursor, CidType::Small).unwrap();

        let mut cursor = ReadCursor::new(&buf);
        let add_cid = cid::read_add_cid(&mut cursor);
        let decoded = IrDynPacket::decode(&mut cursor, CidType::Small, add_cid, 1, &resolver).unwrap();
        assert_eq!(decoded, ir_dyn);
    }
}
