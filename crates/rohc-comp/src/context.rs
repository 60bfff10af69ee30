use rohc_pdu::feedback::Feedback;
use rohc_pdu::headers::UncompressedHeaders;
use rohc_pdu::{Cid, ProfileId};

use crate::profiles::uncompressed::UncompressedContext;
use crate::profiles::v1::V1Context;
use crate::profiles::v2_ip::V2IpContext;
use crate::{CompressError, CompressErrorKind, CompressResult};

/// Caller-supplied RTP flow predicate: receives the parsed IP/UDP headers
/// and the UDP payload.
pub type RtpDetector = Box<dyn Fn(&UncompressedHeaders, &[u8]) -> bool + Send>;

/// One entry of the context table.
pub(crate) struct Context {
    pub(crate) cid: Cid,
    pub(crate) last_used: u64,
    pub(crate) kind: ContextKind,
}

/// Per-profile context state.
pub(crate) enum ContextKind {
    Uncompressed(UncompressedContext),
    V1(Box<V1Context>),
    V2Ip(Box<V2IpContext>),
}

impl ContextKind {
    pub(crate) fn create(
        profile: ProfileId,
        headers: &Option<UncompressedHeaders>,
        _uncomp: &[u8],
        wlsb_width: usize,
    ) -> CompressResult<Self> {
        match profile {
            ProfileId::UNCOMPRESSED => Ok(ContextKind::Uncompressed(UncompressedContext::new())),
            ProfileId::RTP | ProfileId::UDP => {
                let headers = headers.as_ref().expect("v1 profiles always parse headers");
                Ok(ContextKind::V1(Box::new(V1Context::new(profile, headers, wlsb_width))))
            }
            ProfileId::IP_V2 => {
                let headers = headers.as_ref().expect("the v2 IP profile always parses headers");
                Ok(ContextKind::V2Ip(Box::new(V2IpContext::new(headers))))
            }
            _ => Err(CompressError::new(
                "ContextKind::create",
                CompressErrorKind::UnsupportedProfile { profile },
            )),
        }
    }

    pub(crate) fn profile(&self) -> ProfileId {
        match self {
            ContextKind::Uncompressed(_) => ProfileId::UNCOMPRESSED,
            ContextKind::V1(context) => context.profile(),
            ContextKind::V2Ip(_) => ProfileId::IP_V2,
        }
    }

    /// Whether the packet belongs to this context's flow.
    pub(crate) fn matches(&self, headers: &Option<UncompressedHeaders>) -> bool {
        match (self, headers) {
            // The Uncompressed profile shares one context for everything.
            (ContextKind::Uncompressed(_), _) => true,
            (ContextKind::V1(context), Some(headers)) => context.matches(headers),
            (ContextKind::V2Ip(context), Some(headers)) => context.matches(headers),
            _ => false,
        }
    }

    pub(crate) fn compress(
        &mut self,
        env: &crate::profiles::CompressEnv,
        headers: &Option<UncompressedHeaders>,
        uncomp: &[u8],
        dst: &mut rohc_core::WriteCursor<'_>,
        jitter: &mut rand::rngs::StdRng,
    ) -> CompressResult<rohc_pdu::RohcPacketKind> {
        match self {
            ContextKind::Uncompressed(context) => context.compress(env, uncomp, dst),
            ContextKind::V1(context) => {
                let headers = headers.as_ref().expect("v1 profiles always parse headers");
                context.compress(env, headers, uncomp, dst, jitter)
            }
            ContextKind::V2Ip(context) => {
                let headers = headers.as_ref().expect("the v2 IP profile always parses headers");
                context.compress(env, headers, uncomp, dst, jitter)
            }
        }
    }

    pub(crate) fn handle_feedback(&mut self, feedback: &Feedback) {
        match self {
            ContextKind::Uncompressed(context) => context.handle_feedback(feedback),
            ContextKind::V1(context) => context.handle_feedback(feedback),
            ContextKind::V2Ip(context) => context.handle_feedback(feedback),
        }
    }
}
