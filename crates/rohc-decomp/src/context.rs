use std::time::Instant;

use rohc_core::ReadCursor;
use rohc_pdu::ir::{IrPacket, ResolveProfile};
use rohc_pdu::{Cid, CidType, ProfileId, RohcMode, RohcPacketKind};

use crate::profiles::uncompressed::UncompressedDecompContext;
use crate::profiles::v1::V1DecompContext;
use crate::profiles::v2_ip::V2IpDecompContext;
use crate::{DecompressError, DecompressErrorKind, DecompressResult};

/// Per-profile decompression context.
pub(crate) enum DecompContext {
    Uncompressed(UncompressedDecompContext),
    V1(Box<V1DecompContext>),
    V2Ip(Box<V2IpDecompContext>),
}

impl DecompContext {
    pub(crate) fn create(profile: ProfileId, mode: RohcMode) -> DecompressResult<Self> {
        match profile {
            ProfileId::UNCOMPRESSED => Ok(DecompContext::Uncompressed(UncompressedDecompContext::new())),
            ProfileId::RTP | ProfileId::UDP => Ok(DecompContext::V1(Box::new(V1DecompContext::new(profile, mode)))),
            ProfileId::IP_V2 => Ok(DecompContext::V2Ip(Box::new(V2IpDecompContext::new()))),
            _ => Err(DecompressError::new(
                "DecompContext::create",
                DecompressErrorKind::UnsupportedProfile {
                    profile_octet: profile.low_byte(),
                },
            )),
        }
    }

    pub(crate) fn profile(&self) -> ProfileId {
        match self {
            DecompContext::Uncompressed(_) => ProfileId::UNCOMPRESSED,
            DecompContext::V1(context) => context.profile(),
            DecompContext::V2Ip(_) => ProfileId::IP_V2,
        }
    }

    /// Whether the dynamic part of the context is established (FC state).
    pub(crate) fn has_full_context(&self) -> bool {
        match self {
            DecompContext::Uncompressed(_) => true,
            DecompContext::V1(context) => context.has_full_context(),
            DecompContext::V2Ip(context) => context.has_full_context(),
        }
    }

    pub(crate) fn repair_count(&self) -> u64 {
        match self {
            DecompContext::V1(context) => context.repair_count(),
            _ => 0,
        }
    }

    pub(crate) fn last_sn(&self) -> Option<u16> {
        match self {
            DecompContext::Uncompressed(_) => None,
            DecompContext::V1(context) => context.last_sn(),
            DecompContext::V2Ip(context) => context.last_msn(),
        }
    }

    /// Applies a validated IR packet; returns the bytes written and the SN
    /// the context now references.
    pub(crate) fn apply_ir(&mut self, ir: &IrPacket, payload: &[u8], dst: &mut [u8]) -> DecompressResult<(usize, Option<u16>)> {
        match self {
            DecompContext::Uncompressed(context) => context.apply_ir(payload, dst),
            DecompContext::V1(context) => context.apply_ir(ir, payload, dst),
            DecompContext::V2Ip(context) => context.apply_ir(ir, payload, dst),
        }
    }

    /// Handles every non-IR packet form. Returns the bytes written, the
    /// concrete packet kind, the decoded SN (when the profile has one) and
    /// whether the packet warrants a positive acknowledgment.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn decompress<R: ResolveProfile>(
        &mut self,
        cursor: &mut ReadCursor<'_>,
        cid_type: CidType,
        cid: Cid,
        first: u8,
        arrival: Option<Instant>,
        resolver: &R,
        dst: &mut [u8],
    ) -> DecompressResult<(usize, RohcPacketKind, Option<u16>, bool)> {
        match self {
            DecompContext::Uncompressed(context) => context.decompress(cursor, cid_type, cid, dst),
            DecompContext::V1(context) => context.decompress(cursor, cid_type, cid, first, arrival, resolver, dst),
            DecompContext::V2Ip(context) => context.decompress(cursor, cid_type, cid, first, dst),
        }
    }
}
