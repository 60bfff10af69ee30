//! ROHCv2 packet forms (RFC 5225 §6) and the Normal passthrough form
//! shared with the Uncompressed profile (RFC 3095 §5.10.2).

use rohc_core::{DecodeResult, EncodeResult, ReadCursor, WriteCursor};

use crate::chains::DynamicChain;
use crate::cid::{self, Cid, CidType};
use crate::profile::ProfileId;

pub const CO_REPAIR_TYPE: u8 = 0xfb;

/// co_repair: re-synchronizes the dynamic part of a damaged context.
///
/// Carries a CRC-7 over the original uncompressed headers and a CRC-3 over
/// the control fields (reorder ratio, MSN, IPv4 IP-ID behaviors).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoRepairPacket {
    pub cid: Cid,
    pub header_crc: u8,
    pub control_crc: u8,
    pub dynamic_chain: DynamicChain,
}

impl CoRepairPacket {
    const NAME: &'static str = "co_repair";

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
        dst.write_u8(CO_REPAIR_TYPE);
        if cid_type == CidType::Large {
            cid::write_large_cid(dst, self.cid)?;
        }
        dst.write_u8(self.header_crc & 0x7f);
        dst.write_u8(self.control_crc & 0x07);
        self.dynamic_chain.encode(dst)?;

        Ok(())
    }

    /// Decodes a co_repair packet; `src` must be positioned on the type
    /// octet. The profile and IP header count come from the established
    /// context.
    pub fn decode(
        src: &mut ReadCursor<'_>,
        cid_type: CidType,
        add_cid: Cid,
        profile: ProfileId,
        ip_count: usize,
    ) -> DecodeResult<Self> {
        rohc_core::ensure_size!(ctx: Self::NAME, in: src, size: 3);

        let type_octet = src.read_u8();
        debug_assert_eq!(type_octet, CO_REPAIR_TYPE);

        let cid = match cid_type {
            CidType::Small => add_cid,
            CidType::Large => cid::read_large_cid(src)?,
        };

        rohc_core::ensure_size!(ctx: Self::NAME, in: src, size: 2);
        let crc_octet = src.read_u8();
        if crc_octet & 0x80 != 0 {
            return Err(rohc_core::invalid_field_err!("r1", "reserved bit must be zero"));
        }
        let ctrl_octet = src.read_u8();
        if ctrl_octet & 0xf8 != 0 {
            return Err(rohc_core::invalid_field_err!("r2", "reserved bits must be zero"));
        }

        let dynamic_chain = DynamicChain::decode(src, profile, ip_count)?;

        Ok(Self {
            cid,
            header_crc: crc_octet & 0x7f,
            control_crc: ctrl_octet & 0x07,
            dynamic_chain,
        })
    }
}

/// Encodes a Normal packet: the uncompressed packet with only the CID
/// envelope woven in (add-CID before the first octet, large CID after it).
pub fn encode_normal(dst: &mut WriteCursor<'_>, cid_type: CidType, cid: Cid, packet: &[u8]) -> EncodeResult<()> {
    const NAME: &str = "Normal";

    if packet.is_empty() {
        return Err(rohc_core::invalid_field_err(NAME, "packet", "empty packet"));
    }

    rohc_core::ensure_size!(ctx: NAME, in: dst, size: cid_type.cid_overhead(cid) + packet.len());

    match cid_type {
        CidType::Small => {
            cid::write_add_cid(dst, cid)?;
            dst.write_slice(packet);
        }
        CidType::Large => {
            dst.write_u8(packet[0]);
            cid::write_large_cid(dst, cid)?;
            dst.write_slice(&packet[1..]);
        }
    }

    Ok(())
}

/// Decoded Normal packet: the first uncompressed octet plus the rest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalPacket<'a> {
    pub cid: Cid,
    pub first_octet: u8,
    pub rest: &'a [u8],
}

impl<'a> NormalPacket<'a> {
    const NAME: &'static str = "Normal";

    /// Decodes a Normal packet; `src` must be positioned on the first
    /// uncompressed octet (after any add-CID).
    pub fn decode(src: &mut ReadCursor<'a>, cid_type: CidType, add_cid: Cid) -> DecodeResult<Self> {
        rohc_core::ensure_size!(ctx: Self::NAME, in: src, size: 1);

        let first_octet = src.read_u8();
        let cid = match cid_type {
            CidType::Small => add_cid,
            CidType::Large => cid::read_large_cid(src)?,
        };

        Ok(Self {
            cid,
            first_octet,
            rest: src.read_remaining(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{IpDynamic, V2Dynamic};
    use crate::packet::{IpIdBehavior, ReorderRatio};

    #[test]
    fn co_repair_round_trip() {
        let packet = CoRepairPacket {
            cid: Cid::new(5),
            header_crc: 0x4a,
            control_crc: 0x3,
            dynamic_chain: DynamicChain {
                ip: vec![IpDynamic {
                    behavior: IpIdBehavior::Random,
                    dont_fragment: false,
                    tos: 0,
                    ttl: 64,
                    ip_id: Some(0x7777),
                }],
                v2: Some(V2Dynamic {
                    reorder_ratio: ReorderRatio::None,
                    msn: 1234,
                }),
                udp_checksum: None,
                udp_sn: None,
                rtp: None,
            },
        };

        let mut buf = vec![0u8; packet.size(CidType::Small)];
        let mut cursor = WriteCursor::new(&mut buf);
        packet.encode(&mut cursor, CidType::Small).unwrap();

        let mut cursor = ReadCursor::new(&buf);
        let add_cid = cid::read_add_cid(&mut cursor);
        let decoded = CoRepairPacket::decode(&mut cursor, CidType::Small, add_cid, ProfileId::IP_V2, 1).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn normal_round_trip_large_cid() {
        let packet = [0x45, 0x00, 0x00, 0x14, 0xaa, 0xbb];
        let mut buf = vec![0u8; 2 + packet.len()];
        let mut cursor = WriteCursor::new(&mut buf);
        encode_normal(&mut cursor, CidType::Large, Cid::new(200), &packet).unwrap();
        let written = cursor.pos();

        let mut cursor = ReadCursor::new(&buf[..written]);
        let decoded = NormalPacket::decode(&mut cursor, CidType::Large, Cid::new(0)).unwrap();
        assert_eq!(decoded.cid, Cid::new(200));
        assert_eq!(decoded.first_octet, 0x45);
        assert_eq!(decoded.rest, &packet[1..]);
    }
}
