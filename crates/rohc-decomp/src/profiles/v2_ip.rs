//! Decompression side of the ROHCv2 IP-only profile: IR establishes the
//! chains, Normal packets pass through, co_repair re-synchronizes the
//! dynamic part under a CRC-7 + control CRC-3 gate. ROHCv2 performs no
//! repair attempts.

use rohc_core::{Encode as _, ReadCursor, WriteCursor};
use rohc_pdu::chains::{IpStatic, StaticChain};
use rohc_pdu::crc::{control_crc3, headers_crc, CrcType};
use rohc_pdu::headers::{IpHeader, IpHeaders, Ipv4Header, Ipv6Header, UncompressedHeaders};
use rohc_pdu::ir::IrPacket;
use rohc_pdu::v2::{CoRepairPacket, NormalPacket};
use rohc_pdu::{Cid, CidType, PacketType, ProfileId, RohcPacketKind};

use crate::profiles::DecompState;
use crate::{malformed, output_too_small, DecompressError, DecompressErrorKind, DecompressResult};

pub(crate) struct V2IpDecompContext {
    state: DecompState,
    static_chain: Option<StaticChain>,
    dynamics: Vec<rohc_pdu::chains::IpDynamic>,
    msn: u16,
}

impl V2IpDecompContext {
    const NAME: &'static str = "V2IpDecompContext";

    pub(crate) fn new() -> Self {
        Self {
            state: DecompState::StaticContext,
            static_chain: None,
            dynamics: Vec::new(),
            msn: 0,
        }
    }

    pub(crate) fn has_full_context(&self) -> bool {
        self.state == DecompState::FullContext
    }

    pub(crate) fn last_msn(&self) -> Option<u16> {
        self.has_full_context().then_some(self.msn)
    }

    /// Rebuilds the uncompressed IP headers from the stored static chain
    /// and the given dynamic parts.
    fn rebuild_headers(
        static_chain: &StaticChain,
        dynamics: &[rohc_pdu::chains::IpDynamic],
    ) -> DecompressResult<UncompressedHeaders> {
        if static_chain.ip.len() != dynamics.len() || static_chain.ip.is_empty() {
            return Err(DecompressError::new(Self::NAME, DecompressErrorKind::Malformed));
        }

        let mut headers: Vec<IpHeader> = Vec::with_capacity(static_chain.ip.len());
        for (st, dy) in static_chain.ip.iter().zip(dynamics.iter()) {
            let header = match st {
                IpStatic::V4(v4) => IpHeader::V4(Ipv4Header {
                    tos: dy.tos,
                    total_len: 0, // recomputed per packet
                    id: dy.ip_id.unwrap_or(0),
                    dont_fragment: dy.dont_fragment,
                    ttl: dy.ttl,
                    protocol: v4.protocol,
                    checksum: 0,
                    src: v4.src,
                    dst: v4.dst,
                }),
                IpStatic::V6(v6) => IpHeader::V6(Ipv6Header {
                    traffic_class: dy.tos,
                    flow_label: v6.flow_label.unwrap_or(0),
                    payload_len: 0,
                    next_header: v6.next_header,
                    hop_limit: dy.ttl,
                    src: v6.src,
                    dst: v6.dst,
                }),
            };
            headers.push(header);
        }

        let mut iter = headers.into_iter();
        let first = iter.next().expect("checked non-empty");
        Ok(UncompressedHeaders {
            ip: IpHeaders {
                first,
                second: iter.next(),
            },
            udp: None,
            rtp: None,
        })
    }

    fn write_packet(headers: &mut UncompressedHeaders, payload: &[u8], dst: &mut [u8]) -> DecompressResult<usize> {
        headers.set_payload_len(payload.len());
        let len = headers.header_len() + payload.len();
        if dst.len() < len {
            return Err(output_too_small(Self::NAME, len, dst.len()));
        }

        let mut cursor = WriteCursor::new(dst);
        headers
            .encode(&mut cursor)
            .map_err(|_| DecompressError::new(Self::NAME, DecompressErrorKind::OutputTooSmall {
                required: len,
                available: 0,
            }))?;
        cursor.write_slice(payload);
        Ok(cursor.pos())
    }

    pub(crate) fn apply_ir(&mut self, ir: &IrPacket, payload: &[u8], dst: &mut [u8]) -> DecompressResult<(usize, Option<u16>)> {
        let static_chain = ir
            .static_chain
            .as_ref()
            .ok_or_else(|| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?;
        let dynamic_chain = ir
            .dynamic_chain
            .as_ref()
            .ok_or_else(|| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?;

        let mut headers = Self::rebuild_headers(static_chain, &dynamic_chain.ip)?;
        let len = Self::write_packet(&mut headers, payload, dst)?;

        // Commit only after the packet was fully rebuilt.
        self.static_chain = Some(static_chain.clone());
        self.dynamics = dynamic_chain.ip.clone();
        if let Some(v2) = &dynamic_chain.v2 {
            self.msn = v2.msn;
        }
        self.state = DecompState::FullContext;
        trace!(msn = self.msn, "v2 IR committed");

        Ok((len, Some(self.msn)))
    }

    pub(crate) fn decompress(
        &mut self,
        cursor: &mut ReadCursor<'_>,
        cid_type: CidType,
        cid: Cid,
        first: u8,
        dst: &mut [u8],
    ) -> DecompressResult<(usize, RohcPacketKind, Option<u16>, bool)> {
        match PacketType::detect(first) {
            PacketType::CoRepair => self.apply_co_repair(cursor, cid_type, cid, dst),
            PacketType::IrDyn => Err(DecompressError::new(
                Self::NAME,
                DecompressErrorKind::UnsupportedPacket {
                    reason: "IR-DYN is not used by the ROHCv2 IP profile",
                },
            )),
            _ => {
                // Normal packet: the uncompressed packet with the CID woven in.
                let normal = NormalPacket::decode(cursor, cid_type, cid).map_err(|e| malformed(Self::NAME, e))?;
                let len = 1 + normal.rest.len();
                if dst.len() < len {
                    return Err(output_too_small(Self::NAME, len, dst.len()));
                }
                dst[0] = normal.first_octet;
                dst[1..len].copy_from_slice(normal.rest);
                Ok((len, RohcPacketKind::Normal, None, false))
            }
        }
    }

    fn apply_co_repair(
        &mut self,
        cursor: &mut ReadCursor<'_>,
        cid_type: CidType,
        cid: Cid,
        dst: &mut [u8],
    ) -> DecompressResult<(usize, RohcPacketKind, Option<u16>, bool)> {
        let ip_count = self.dynamics.len();
        let repair = CoRepairPacket::decode(cursor, cid_type, cid, ProfileId::IP_V2, ip_count)
            .map_err(|e| malformed(Self::NAME, e))?;

        let static_chain = self
            .static_chain
            .as_ref()
            .ok_or_else(|| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?;

        let v2 = repair
            .dynamic_chain
            .v2
            .ok_or_else(|| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?;

        // Control CRC-3 over the control fields; IPv6 headers contribute no
        // IP-ID behavior (RFC 5225 erratum 2703).
        let behaviors: Vec<u8> = static_chain
            .ip
            .iter()
            .zip(repair.dynamic_chain.ip.iter())
            .filter(|(st, _)| st.is_v4())
            .map(|(_, dy)| dy.behavior.to_bits())
            .collect();
        let ctrl = control_crc3(v2.reorder_ratio.to_bits(), v2.msn, &behaviors);
        if ctrl != repair.control_crc {
            debug!(computed = ctrl, received = repair.control_crc, "co_repair control CRC failure");
            return Err(DecompressError::new(Self::NAME, DecompressErrorKind::BadCrc));
        }

        let mut headers = Self::rebuild_headers(static_chain, &repair.dynamic_chain.ip)?;
        let computed = headers_crc(CrcType::Crc7, &headers);
        if computed != repair.header_crc {
            debug!(computed, received = repair.header_crc, "co_repair header CRC failure");
            return Err(DecompressError::new(Self::NAME, DecompressErrorKind::BadCrc));
        }

        let payload = cursor.read_remaining();
        let len = Self::write_packet(&mut headers, payload, dst)?;

        self.dynamics = repair.dynamic_chain.ip.clone();
        self.msn = v2.msn;
        self.state = DecompState::FullContext;
        debug!(msn = self.msn, "co_repair committed");

        Ok((len, RohcPacketKind::CoRepair, Some(self.msn), true))
    }
}
