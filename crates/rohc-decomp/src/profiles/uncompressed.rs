//! Decompression side of the Uncompressed profile: IR and Normal packets
//! both carry the packet verbatim.

use rohc_core::ReadCursor;
use rohc_pdu::v2::NormalPacket;
use rohc_pdu::{Cid, CidType, RohcPacketKind};

use crate::{malformed, output_too_small, DecompressResult};

pub(crate) struct UncompressedDecompContext;

impl UncompressedDecompContext {
    const NAME: &'static str = "UncompressedDecompContext";

    pub(crate) fn new() -> Self {
        Self
    }

    pub(crate) fn apply_ir(&mut self, payload: &[u8], dst: &mut [u8]) -> DecompressResult<(usize, Option<u16>)> {
        if dst.len() < payload.len() {
            return Err(output_too_small(Self::NAME, payload.len(), dst.len()));
        }
        dst[..payload.len()].copy_from_slice(payload);
        Ok((payload.len(), None))
    }

    pub(crate) fn decompress(
        &mut self,
        cursor: &mut ReadCursor<'_>,
        cid_type: CidType,
        cid: Cid,
        dst: &mut [u8],
    ) -> DecompressResult<(usize, RohcPacketKind, Option<u16>, bool)> {
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
