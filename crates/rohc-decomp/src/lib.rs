#![cfg_attr(doc, doc = include_str!("../README.md"))]

#[macro_use]
extern crate tracing;

mod context;
mod profiles;

use core::fmt;
use std::collections::HashMap;
use std::time::Instant;

use rohc_core::{DecodeErrorExt as _, ReadCursor};
use rohc_pdu::feedback::Feedback;
use rohc_pdu::ir::IrPacket;
use rohc_pdu::{cid, Cid, CidType, PacketType, ProfileId, RohcMode, RohcPacketKind, PADDING_OCTET};

use std::time::Duration;

use crate::context::DecompContext;

/// A result type for decompression operations.
pub type DecompressResult<T> = Result<T, DecompressError>;

/// An error type for decompression operations.
pub type DecompressError = rohc_error::Error<DecompressErrorKind>;

#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum DecompressErrorKind {
    /// A compressed packet referenced a CID with no established context.
    NoContext { cid: u16 },
    /// The header CRC did not match after decoding (repair attempts
    /// included).
    BadCrc,
    /// The packet could not be parsed.
    Malformed,
    /// The abbreviated profile identifier does not match any enabled
    /// profile.
    UnsupportedProfile { profile_octet: u8 },
    /// A recognized but unsupported packet type (segments).
    UnsupportedPacket { reason: &'static str },
    /// The caller-supplied output buffer cannot hold the uncompressed
    /// packet.
    OutputTooSmall { required: usize, available: usize },
}

impl std::error::Error for DecompressErrorKind {}

impl fmt::Display for DecompressErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoContext { cid } => write!(f, "no context for CID {cid}"),
            Self::BadCrc => write!(f, "header CRC mismatch"),
            Self::Malformed => write!(f, "malformed ROHC packet"),
            Self::UnsupportedProfile { profile_octet } => {
                write!(f, "no enabled profile with identifier 0x{profile_octet:02X}")
            }
            Self::UnsupportedPacket { reason } => write!(f, "unsupported packet: {reason}"),
            Self::OutputTooSmall { required, available } => write!(
                f,
                "output buffer too small: {required} bytes required, {available} available"
            ),
        }
    }
}

pub(crate) fn malformed(context: &'static str, source: rohc_core::DecodeError) -> DecompressError {
    DecompressError::new(context, DecompressErrorKind::Malformed).with_source(source)
}

pub(crate) fn output_too_small(context: &'static str, required: usize, available: usize) -> DecompressError {
    DecompressError::new(context, DecompressErrorKind::OutputTooSmall { required, available })
}

/// Identity of a successfully decompressed packet.
#[derive(Clone, Copy, Debug)]
pub struct PacketMeta {
    pub cid: Cid,
    pub profile: ProfileId,
    pub kind: RohcPacketKind,
}

/// What `decompress` produced.
#[derive(Debug, Default)]
pub struct Decompressed {
    /// Bytes written to the output buffer.
    pub len: usize,
    /// `None` when the input carried only feedback and/or padding.
    pub packet: Option<PacketMeta>,
    /// Feedback generated for the remote compressor (O/R modes); ship it on
    /// the reverse channel.
    pub feedback_to_send: Option<Vec<u8>>,
    /// Piggybacked feedback elements found in front of the packet; hand
    /// them to the local compressor.
    pub feedback_received: Vec<Vec<u8>>,
}

/// A ROHC decompressor instance: one channel, one context table.
pub struct Decompressor {
    cid_type: CidType,
    max_contexts: usize,
    mode: RohcMode,
    enabled: Vec<ProfileId>,
    contexts: HashMap<u16, DecompContext>,
    last_use: HashMap<u16, Instant>,
    pending_feedback: Option<Vec<u8>>,
}

impl fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decompressor")
            .field("cid_type", &self.cid_type)
            .field("mode", &self.mode)
            .field("enabled", &self.enabled)
            .field("contexts", &self.contexts.len())
            .finish_non_exhaustive()
    }
}

const SUPPORTED_PROFILES: &[ProfileId] = &[
    ProfileId::UNCOMPRESSED,
    ProfileId::RTP,
    ProfileId::UDP,
    ProfileId::IP_V2,
];

impl Decompressor {
    const NAME: &'static str = "Decompressor";

    #[must_use]
    pub fn new(cid_type: CidType, max_contexts: usize, mode: RohcMode) -> Self {
        Self {
            cid_type,
            max_contexts: max_contexts.clamp(1, usize::from(cid_type.max_cid()) + 1),
            mode,
            enabled: Vec::new(),
            contexts: HashMap::new(),
            last_use: HashMap::new(),
            pending_feedback: None,
        }
    }

    /// Enables a profile; profiles sharing an abbreviated identifier are
    /// mutually exclusive (RFC 5225 §5.1).
    pub fn enable_profile(&mut self, profile: ProfileId) -> DecompressResult<()> {
        if !SUPPORTED_PROFILES.contains(&profile) {
            return Err(DecompressError::new(
                Self::NAME,
                DecompressErrorKind::UnsupportedProfile {
                    profile_octet: profile.low_byte(),
                },
            ));
        }
        if self
            .enabled
            .iter()
            .any(|enabled| *enabled != profile && enabled.low_byte() == profile.low_byte())
        {
            return Err(DecompressError::new(
                Self::NAME,
                DecompressErrorKind::UnsupportedProfile {
                    profile_octet: profile.low_byte(),
                },
            ));
        }
        if !self.enabled.contains(&profile) {
            self.enabled.push(profile);
        }
        Ok(())
    }

    pub fn enable_profiles(&mut self, profiles: &[ProfileId]) -> DecompressResult<()> {
        for profile in profiles {
            self.enable_profile(*profile)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Total number of successful CRC repairs across all contexts.
    #[must_use]
    pub fn repair_count(&self) -> u64 {
        self.contexts.values().map(DecompContext::repair_count).sum()
    }

    /// Destroys the context for `cid`; a later IR recreates it.
    pub fn free_context(&mut self, cid: Cid) -> bool {
        self.last_use.remove(&cid.get());
        self.contexts.remove(&cid.get()).is_some()
    }

    /// Destroys every context that has not decompressed a packet for
    /// `max_idle`, measured against `now`.
    pub fn free_stale_contexts(&mut self, max_idle: Duration, now: Instant) -> usize {
        let stale: Vec<u16> = self
            .last_use
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) > max_idle)
            .map(|(cid, _)| *cid)
            .collect();
        for cid in &stale {
            debug!(cid, "freeing stale decompression context");
            self.contexts.remove(cid);
            self.last_use.remove(cid);
        }
        stale.len()
    }

    /// Feedback generated while handling a packet that ultimately failed;
    /// it should still be shipped on the reverse channel.
    pub fn take_feedback_to_send(&mut self) -> Option<Vec<u8>> {
        self.pending_feedback.take()
    }

    fn resolve_profile(&self, low_byte: u8) -> Option<ProfileId> {
        self.enabled.iter().copied().find(|profile| profile.low_byte() == low_byte)
    }

    fn make_feedback(&self, feedback: &Feedback) -> Option<Vec<u8>> {
        if !self.mode.is_bidirectional() {
            return None;
        }
        let mut buf = vec![0u8; feedback.size(self.cid_type)];
        let mut cursor = rohc_core::WriteCursor::new(&mut buf);
        match feedback.encode(&mut cursor, self.cid_type) {
            Ok(()) => Some(buf),
            Err(e) => {
                warn!(error = %e, "failed to encode feedback");
                None
            }
        }
    }

    /// Decompresses one ROHC packet into `dst`. `arrival` feeds the
    /// clock-based repair heuristic; pass `None` when no arrival timestamp
    /// is available.
    pub fn decompress(
        &mut self,
        rohc: &[u8],
        arrival: Option<Instant>,
        dst: &mut [u8],
    ) -> DecompressResult<Decompressed> {
        let mut cursor = ReadCursor::new(rohc);
        let mut result = Decompressed::default();

        // Leading padding octets.
        while !cursor.is_empty() && cursor.peek_u8() == PADDING_OCTET {
            cursor.advance(1);
        }

        // Piggybacked feedback elements ride in front of the packet; they
        // are destined for the local compressor.
        while !cursor.is_empty() {
            if let PacketType::Feedback { .. } = PacketType::detect(cursor.peek_u8()) {
                let start = cursor.pos();
                let mut probe = cursor.clone();
                Feedback::decode(&mut probe, self.cid_type).map_err(|e| malformed(Self::NAME, e))?;
                let len = probe.pos() - start;
                result.feedback_received.push(cursor.read_slice(len).to_vec());
            } else {
                break;
            }
        }

        if cursor.is_empty() {
            trace!("feedback-only ROHC packet");
            return Ok(result);
        }

        let add_cid = match self.cid_type {
            CidType::Small => cid::read_add_cid(&mut cursor),
            CidType::Large => Cid::new(0),
        };

        let first = cursor.try_peek_u8().map_err(|_| {
            DecompressError::new(Self::NAME, DecompressErrorKind::Malformed)
        })?;

        let outcome = match PacketType::detect(first) {
            PacketType::Segment => Err(DecompressError::new(
                Self::NAME,
                DecompressErrorKind::UnsupportedPacket {
                    reason: "segmented packets are not supported",
                },
            )),
            PacketType::Ir { .. } => self.handle_ir(&mut cursor, add_cid, dst),
            _ => self.handle_non_ir(&mut cursor, add_cid, first, arrival, dst),
        };

        match outcome {
            Ok((len, meta)) => {
                self.last_use
                    .insert(meta.cid.get(), arrival.unwrap_or_else(Instant::now));
                result.len = len;
                result.packet = Some(meta);
                result.feedback_to_send = self.pending_feedback.take();
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }

    fn handle_ir(
        &mut self,
        cursor: &mut ReadCursor<'_>,
        add_cid: Cid,
        dst: &mut [u8],
    ) -> DecompressResult<(usize, PacketMeta)> {
        let resolver = |low: u8| self.resolve_profile(low);
        let ir = IrPacket::decode(cursor, self.cid_type, add_cid, &resolver).map_err(|e| {
            if e.is_crc_mismatch() {
                DecompressError::new(Self::NAME, DecompressErrorKind::BadCrc).with_source(e)
            } else {
                malformed(Self::NAME, e)
            }
        })?;

        let cid = ir.cid;
        if usize::from(cid.get()) >= self.max_contexts {
            return Err(DecompressError::new(
                Self::NAME,
                DecompressErrorKind::NoContext { cid: cid.get() },
            ));
        }

        // An IR (re)creates the context outright; a CID reassigned to a
        // different profile is destroyed and recreated.
        let recreate = match self.contexts.get(&cid.get()) {
            Some(context) => context.profile() != ir.profile,
            None => true,
        };
        if recreate {
            debug!(%cid, profile = %ir.profile, "creating decompression context");
            self.contexts
                .insert(cid.get(), DecompContext::create(ir.profile, self.mode)?);
        }

        let payload = cursor.remaining();
        let context = self.contexts.get_mut(&cid.get()).expect("context just ensured");
        let (len, sn) = context.apply_ir(&ir, payload, dst)?;

        // Context-establishing packets are acknowledged in O/R modes.
        let ack = Feedback::ack(cid, self.mode.to_bits(), sn.map_or(0, u32::from));
        self.pending_feedback = self.make_feedback(&ack);

        Ok((
            len,
            PacketMeta {
                cid,
                profile: ir.profile,
                kind: RohcPacketKind::Ir,
            },
        ))
    }

    fn handle_non_ir(
        &mut self,
        cursor: &mut ReadCursor<'_>,
        add_cid: Cid,
        first: u8,
        arrival: Option<Instant>,
        dst: &mut [u8],
    ) -> DecompressResult<(usize, PacketMeta)> {
        // For every non-IR form the CID of large-CID channels rides after
        // the first octet; the profile context decides how to parse the
        // rest, so resolve the context first.
        let cid = match self.cid_type {
            CidType::Small => add_cid,
            CidType::Large => {
                let mut probe = cursor.clone();
                probe.advance(1);
                cid::read_large_cid(&mut probe).map_err(|e| malformed(Self::NAME, e))?
            }
        };

        let Some(context) = self.contexts.get_mut(&cid.get()) else {
            debug!(%cid, "compressed packet for unknown context");
            let nack = Feedback::static_nack(cid, self.mode.to_bits());
            self.pending_feedback = self.make_feedback(&nack);
            return Err(DecompressError::new(
                Self::NAME,
                DecompressErrorKind::NoContext { cid: cid.get() },
            ));
        };

        let profile = context.profile();
        let resolver = |low: u8| {
            [ProfileId::UNCOMPRESSED, ProfileId::RTP, ProfileId::UDP, ProfileId::IP_V2]
                .into_iter()
                .find(|p| p.low_byte() == low)
        };

        let outcome = context.decompress(cursor, self.cid_type, cid, first, arrival, &resolver, dst);
        let has_full_context = context.has_full_context();
        let last_sn = context.last_sn();

        match outcome {
            Ok((len, kind, sn, wants_ack)) => {
                if wants_ack {
                    let ack = Feedback::ack(cid, self.mode.to_bits(), sn.map_or(0, u32::from));
                    self.pending_feedback = self.make_feedback(&ack);
                }
                Ok((len, PacketMeta { cid, profile, kind }))
            }
            Err(e) => {
                if matches!(e.kind(), DecompressErrorKind::BadCrc) {
                    let feedback = if has_full_context {
                        Feedback::nack(cid, self.mode.to_bits(), last_sn.map_or(0, u32::from))
                    } else {
                        Feedback::static_nack(cid, self.mode.to_bits())
                    };
                    self.pending_feedback = self.make_feedback(&feedback);
                }
                Err(e)
            }
        }
    }
}
