//! The Uncompressed profile (RFC 3095 §5.10): IR to establish the context,
//! then Normal packets carrying the payload verbatim.

use rohc_core::WriteCursor;
use rohc_pdu::feedback::{AckType, Feedback};
use rohc_pdu::ir::IrPacket;
use rohc_pdu::{v2, PacketType, ProfileId, RohcPacketKind};

use crate::profiles::{CompressEnv, MAX_IR_COUNT};
use crate::{encode_error, output_too_small, CompressResult};

/// Context of the Uncompressed profile: nothing to remember but the
/// confidence counter.
pub(crate) struct UncompressedContext {
    ir_count: usize,
}

impl UncompressedContext {
    const NAME: &'static str = "UncompressedContext";

    pub(crate) fn new() -> Self {
        Self { ir_count: 0 }
    }

    pub(crate) fn compress(
        &mut self,
        env: &CompressEnv,
        uncomp: &[u8],
        dst: &mut WriteCursor<'_>,
    ) -> CompressResult<RohcPacketKind> {
        // A Normal packet is impossible while its first byte would parse as
        // a reserved ROHC type; non-IP payloads are kept in IR for the same
        // reason (RFC 3095 §5.10.2 note).
        let version = uncomp[0] >> 4;
        let must_ir = PacketType::collides_with_reserved(uncomp[0]) || (version != 4 && version != 6);

        if must_ir || self.ir_count < MAX_IR_COUNT {
            let ir = IrPacket {
                cid: env.cid,
                profile: ProfileId::UNCOMPRESSED,
                static_chain: None,
                dynamic_chain: None,
            };

            let required = ir.size(env.cid_type) + uncomp.len();
            if dst.len() < required {
                return Err(output_too_small(Self::NAME, required, dst.len()));
            }

            ir.encode(dst, env.cid_type).map_err(|e| encode_error(Self::NAME, e))?;
            dst.write_slice(uncomp);

            if !must_ir {
                self.ir_count += 1;
            }
            trace!(cid = %env.cid, "uncompressed IR");
            Ok(RohcPacketKind::Ir)
        } else {
            let required = env.cid_type.cid_overhead(env.cid) + uncomp.len();
            if dst.len() < required {
                return Err(output_too_small(Self::NAME, required, dst.len()));
            }

            v2::encode_normal(dst, env.cid_type, env.cid, uncomp).map_err(|e| encode_error(Self::NAME, e))?;
            Ok(RohcPacketKind::Normal)
        }
    }

    pub(crate) fn handle_feedback(&mut self, feedback: &Feedback) {
        match feedback {
            Feedback::One { .. } => {
                // Positive ACK: context established at the peer.
                self.ir_count = MAX_IR_COUNT;
            }
            Feedback::Two { ack_type, .. } => match ack_type {
                AckType::Ack => self.ir_count = MAX_IR_COUNT,
                AckType::Nack | AckType::StaticNack => self.ir_count = 0,
            },
        }
    }
}
