#![cfg_attr(doc, doc = include_str!("../README.md"))]

#[macro_use]
extern crate tracing;

mod context;
mod profiles;

use core::fmt;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use rand::rngs::StdRng;
use rand::SeedableRng as _;
use rohc_core::{ReadCursor, WriteCursor};
use rohc_pdu::feedback::Feedback;
use rohc_pdu::headers::UncompressedHeaders;
use rohc_pdu::{Cid, CidType, ProfileId, RohcPacketKind};

use crate::context::{Context, ContextKind};

pub use crate::context::RtpDetector;

/// A result type for compression operations.
pub type CompressResult<T> = Result<T, CompressError>;

/// An error type for compression operations.
pub type CompressError = rohc_error::Error<CompressErrorKind>;

#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum CompressErrorKind {
    /// No enabled profile accepts the packet.
    NoMatchingProfile,
    /// The profile is not implemented by this compressor.
    UnsupportedProfile { profile: ProfileId },
    /// Two profiles sharing the abbreviated (low byte) identifier cannot be
    /// enabled on the same channel.
    ProfileConflict { first: ProfileId, second: ProfileId },
    /// The caller-supplied output buffer cannot hold the ROHC packet.
    OutputTooSmall { required: usize, available: usize },
    /// The configuration value is not acceptable.
    InvalidConfiguration { field: &'static str, reason: &'static str },
    /// The packet to compress is malformed.
    MalformedPacket { reason: &'static str },
    /// Internal encoding failure (a bug if it ever surfaces).
    Encode,
}

impl std::error::Error for CompressErrorKind {}

impl fmt::Display for CompressErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatchingProfile => write!(f, "no enabled profile matches the packet"),
            Self::UnsupportedProfile { profile } => write!(f, "profile {profile} is not supported"),
            Self::ProfileConflict { first, second } => write!(
                f,
                "profiles {first} and {second} share the same abbreviated identifier"
            ),
            Self::OutputTooSmall { required, available } => write!(
                f,
                "output buffer too small: {required} bytes required, {available} available"
            ),
            Self::InvalidConfiguration { field, reason } => write!(f, "invalid `{field}`: {reason}"),
            Self::MalformedPacket { reason } => write!(f, "malformed packet: {reason}"),
            Self::Encode => write!(f, "packet encoding failed"),
        }
    }
}

pub(crate) fn output_too_small(context: &'static str, required: usize, available: usize) -> CompressError {
    CompressError::new(context, CompressErrorKind::OutputTooSmall { required, available })
}

pub(crate) fn encode_error(context: &'static str, source: rohc_core::EncodeError) -> CompressError {
    CompressError::new(context, CompressErrorKind::Encode).with_source(source)
}

bitflags! {
    /// Optional compressor behaviors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompressorFeatures: u32 {
        /// Periodic context refreshes also fire on wall-clock deadlines
        /// (jittered), not only on packet counts.
        const TIME_BASED_REFRESHES = 0x01;
        /// Restrict the packet menu to the 1.6.x-era types (no UO-1
        /// family), for interoperability with old decompressors.
        const COMPAT_1_6_X = 0x02;
        /// Do not verify IPv4 header checksums during flow classification.
        const NO_IP_CHECKSUMS = 0x04;
        /// Trace a hex dump of every emitted packet.
        const DUMP_PACKETS = 0x08;
    }
}

/// Periodic-refresh policy (U-mode confidence maintenance).
#[derive(Clone, Copy, Debug)]
pub struct RefreshPolicy {
    /// Packets between downgrades to IR.
    pub ir_packet_interval: u64,
    /// Packets between downgrades to FO.
    pub fo_packet_interval: u64,
    /// Wall-clock period for IR refreshes (with `TIME_BASED_REFRESHES`).
    pub ir_time_interval: Duration,
    /// Wall-clock period for FO refreshes (with `TIME_BASED_REFRESHES`).
    pub fo_time_interval: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            ir_packet_interval: 1700,
            fo_packet_interval: 700,
            ir_time_interval: Duration::from_millis(1000),
            fo_time_interval: Duration::from_millis(500),
        }
    }
}

/// What `compress` produced.
#[derive(Clone, Copy, Debug)]
pub struct CompressedPacket {
    /// Bytes written to the output buffer (piggybacked feedback included).
    pub len: usize,
    pub cid: Cid,
    pub profile: ProfileId,
    pub kind: RohcPacketKind,
}

/// Builder for [`Compressor`].
pub struct CompressorBuilder {
    cid_type: CidType,
    max_contexts: usize,
    wlsb_width: usize,
    features: CompressorFeatures,
    refresh: RefreshPolicy,
    rtp_detector: Option<RtpDetector>,
    refresh_seed: Option<u64>,
}

impl Default for CompressorBuilder {
    fn default() -> Self {
        Self {
            cid_type: CidType::Small,
            max_contexts: 16,
            wlsb_width: rohc_encodings::DEFAULT_WINDOW_WIDTH,
            features: CompressorFeatures::empty(),
            refresh: RefreshPolicy::default(),
            rtp_detector: None,
            refresh_seed: None,
        }
    }
}

impl CompressorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn cid_type(mut self, cid_type: CidType) -> Self {
        self.cid_type = cid_type;
        self
    }

    /// Bounds the context table; the highest CID handed out is
    /// `max_contexts - 1`.
    #[must_use]
    pub fn max_contexts(mut self, max_contexts: usize) -> Self {
        self.max_contexts = max_contexts;
        self
    }

    /// W-LSB window width; must be a power of two in `1..=64`.
    #[must_use]
    pub fn wlsb_window_width(mut self, width: usize) -> Self {
        self.wlsb_width = width;
        self
    }

    #[must_use]
    pub fn features(mut self, features: CompressorFeatures) -> Self {
        self.features = features;
        self
    }

    #[must_use]
    pub fn refresh_policy(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Caller-supplied predicate deciding whether a UDP flow carries RTP.
    /// The default accepts even destination ports ≥ 1024 with a payload
    /// large enough for an RTP header.
    #[must_use]
    pub fn rtp_detection<F>(mut self, detector: F) -> Self
    where
        F: Fn(&UncompressedHeaders, &[u8]) -> bool + Send + 'static,
    {
        self.rtp_detector = Some(Box::new(detector));
        self
    }

    /// Seeds the refresh-jitter generator (deterministic tests).
    #[must_use]
    pub fn refresh_seed(mut self, seed: u64) -> Self {
        self.refresh_seed = Some(seed);
        self
    }

    pub fn build(self) -> CompressResult<Compressor> {
        const CTX: &str = "CompressorBuilder::build";

        if !self.wlsb_width.is_power_of_two() || self.wlsb_width > 64 {
            return Err(CompressError::new(
                CTX,
                CompressErrorKind::InvalidConfiguration {
                    field: "wlsb_window_width",
                    reason: "must be a power of two in 1..=64",
                },
            ));
        }

        let max_cid_space = usize::from(self.cid_type.max_cid()) + 1;
        if self.max_contexts == 0 || self.max_contexts > max_cid_space {
            return Err(CompressError::new(
                CTX,
                CompressErrorKind::InvalidConfiguration {
                    field: "max_contexts",
                    reason: "must fit the negotiated CID space",
                },
            ));
        }

        let jitter = match self.refresh_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Compressor {
            cid_type: self.cid_type,
            max_contexts: self.max_contexts,
            wlsb_width: self.wlsb_width,
            features: self.features,
            refresh: self.refresh,
            enabled: Vec::new(),
            contexts: HashMap::new(),
            access_clock: 0,
            rtp_detector: self.rtp_detector,
            piggyback: Vec::new(),
            jitter,
        })
    }
}

/// A ROHC compressor instance: one channel, one context table.
pub struct Compressor {
    cid_type: CidType,
    max_contexts: usize,
    wlsb_width: usize,
    features: CompressorFeatures,
    refresh: RefreshPolicy,
    enabled: Vec<ProfileId>,
    contexts: HashMap<u16, Context>,
    access_clock: u64,
    rtp_detector: Option<RtpDetector>,
    piggyback: Vec<Vec<u8>>,
    jitter: StdRng,
}

impl fmt::Debug for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compressor")
            .field("cid_type", &self.cid_type)
            .field("max_contexts", &self.max_contexts)
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

impl Compressor {
    const NAME: &'static str = "Compressor";

    #[must_use]
    pub fn builder() -> CompressorBuilder {
        CompressorBuilder::new()
    }

    /// Enables a profile. Profiles sharing an abbreviated identifier are
    /// mutually exclusive (RFC 5225 §5.1).
    pub fn enable_profile(&mut self, profile: ProfileId) -> CompressResult<()> {
        if !SUPPORTED_PROFILES.contains(&profile) {
            return Err(CompressError::new(
                Self::NAME,
                CompressErrorKind::UnsupportedProfile { profile },
            ));
        }
        if let Some(conflict) = self
            .enabled
            .iter()
            .find(|enabled| **enabled != profile && enabled.low_byte() == profile.low_byte())
        {
            return Err(CompressError::new(
                Self::NAME,
                CompressErrorKind::ProfileConflict {
                    first: *conflict,
                    second: profile,
                },
            ));
        }
        if !self.enabled.contains(&profile) {
            self.enabled.push(profile);
        }
        Ok(())
    }

    /// Enables several profiles at once.
    pub fn enable_profiles(&mut self, profiles: &[ProfileId]) -> CompressResult<()> {
        for profile in profiles {
            self.enable_profile(*profile)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_profile_enabled(&self, profile: ProfileId) -> bool {
        self.enabled.contains(&profile)
    }

    #[must_use]
    pub const fn cid_type(&self) -> CidType {
        self.cid_type
    }

    /// Number of live contexts.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Queues a raw feedback element for piggybacking in front of the next
    /// compressed packet.
    pub fn queue_feedback_for_peer(&mut self, element: Vec<u8>) {
        self.piggyback.push(element);
    }

    /// Delivers feedback received from the remote decompressor (extracted
    /// from the reverse channel by the local decompressor).
    pub fn consume_feedback(&mut self, data: &[u8]) {
        let mut cursor = ReadCursor::new(data);
        while !cursor.is_empty() {
            match Feedback::decode(&mut cursor, self.cid_type) {
                Ok(feedback) => {
                    let cid = feedback.cid();
                    match self.contexts.get_mut(&cid.get()) {
                        Some(context) => context.kind.handle_feedback(&feedback),
                        None => warn!(%cid, "feedback for unknown context"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "malformed feedback element, dropping the rest");
                    break;
                }
            }
        }
    }

    /// Compresses one uncompressed packet into `dst`, stamping it with the
    /// current time (relevant with time-based refreshes).
    pub fn compress(&mut self, uncomp: &[u8], dst: &mut [u8]) -> CompressResult<CompressedPacket> {
        self.compress_at(Instant::now(), uncomp, dst)
    }

    /// Compresses one uncompressed packet into `dst`.
    pub fn compress_at(&mut self, now: Instant, uncomp: &[u8], dst: &mut [u8]) -> CompressResult<CompressedPacket> {
        if uncomp.is_empty() {
            return Err(CompressError::new(
                Self::NAME,
                CompressErrorKind::MalformedPacket { reason: "empty packet" },
            ));
        }

        let (profile, headers) = self.classify(uncomp)?;
        let cid = self.find_or_create_context(profile, &headers, uncomp)?;

        self.access_clock += 1;
        let access_clock = self.access_clock;

        let mut cursor = WriteCursor::new(dst);

        // Piggybacked feedback rides in front of the packet.
        let piggyback_len: usize = self.piggyback.iter().map(Vec::len).sum();
        if cursor.len() < piggyback_len {
            return Err(output_too_small(Self::NAME, piggyback_len, cursor.len()));
        }
        for element in self.piggyback.drain(..) {
            cursor.write_slice(&element);
        }

        let env = profiles::CompressEnv {
            cid,
            cid_type: self.cid_type,
            features: self.features,
            refresh: self.refresh,
            now,
        };

        let context = self.contexts.get_mut(&cid.get()).expect("context just resolved");
        context.last_used = access_clock;
        let kind = context.kind.compress(&env, &headers, uncomp, &mut cursor, &mut self.jitter)?;

        if self.features.contains(CompressorFeatures::DUMP_PACKETS) {
            trace!(cid = %cid, ?kind, packet = ?&cursor.inner()[..cursor.pos()], "compressed packet");
        }

        Ok(CompressedPacket {
            len: cursor.pos(),
            cid,
            profile,
            kind,
        })
    }

    /// Flow classification: pick the best enabled profile for the packet.
    fn classify(&self, uncomp: &[u8]) -> CompressResult<(ProfileId, Option<UncompressedHeaders>)> {
        let mut cursor = ReadCursor::new(uncomp);
        let parsed = UncompressedHeaders::parse(&mut cursor).ok().and_then(|headers| {
            self.validate_lengths(&headers, uncomp).then_some((headers, cursor))
        });

        if let Some((mut headers, cursor)) = parsed {
            if headers.udp.is_some() {
                if self.is_profile_enabled(ProfileId::RTP) && self.looks_like_rtp(&headers, cursor.remaining()) {
                    let mut rtp_headers = headers;
                    let mut rtp_cursor = cursor.clone();
                    if rtp_headers.attach_rtp(&mut rtp_cursor).is_ok() {
                        let rtp = rtp_headers.rtp.expect("just attached");
                        if rtp.version == 2 && rtp.cc == 0 && !rtp.extension {
                            return Ok((ProfileId::RTP, Some(rtp_headers)));
                        }
                    }
                }
                if self.is_profile_enabled(ProfileId::UDP) {
                    return Ok((ProfileId::UDP, Some(headers)));
                }
            }

            if self.is_profile_enabled(ProfileId::IP_V2) {
                // The IP-only profile ignores the transport layer.
                headers.udp = None;
                headers.rtp = None;
                return Ok((ProfileId::IP_V2, Some(headers)));
            }
        }

        if self.is_profile_enabled(ProfileId::UNCOMPRESSED) {
            return Ok((ProfileId::UNCOMPRESSED, None));
        }

        Err(CompressError::new(Self::NAME, CompressErrorKind::NoMatchingProfile))
    }

    fn validate_lengths(&self, headers: &UncompressedHeaders, uncomp: &[u8]) -> bool {
        use rohc_pdu::headers::{ipv4_checksum, IpHeader, Ipv4Header};

        let mut offset = 0usize;
        for ip in headers.ip.iter() {
            match ip {
                IpHeader::V4(v4) => {
                    if usize::from(v4.total_len) != uncomp.len() - offset {
                        return false;
                    }
                    if !self.features.contains(CompressorFeatures::NO_IP_CHECKSUMS)
                        && ipv4_checksum(&uncomp[offset..offset + Ipv4Header::FIXED_PART_SIZE]) != 0
                    {
                        return false;
                    }
                }
                IpHeader::V6(v6) => {
                    if usize::from(v6.payload_len) != uncomp.len() - offset - ip.header_len() {
                        return false;
                    }
                }
            }
            offset += ip.header_len();
        }
        true
    }

    fn looks_like_rtp(&self, headers: &UncompressedHeaders, udp_payload: &[u8]) -> bool {
        match &self.rtp_detector {
            Some(detector) => detector(headers, udp_payload),
            None => {
                let udp = headers.udp.expect("classification checked UDP presence");
                udp.dst_port >= 1024 && udp.dst_port % 2 == 0 && udp_payload.len() >= 12
            }
        }
    }

    fn find_or_create_context(
        &mut self,
        profile: ProfileId,
        headers: &Option<UncompressedHeaders>,
        uncomp: &[u8],
    ) -> CompressResult<Cid> {
        if let Some(context) = self
            .contexts
            .values()
            .find(|context| context.kind.profile() == profile && context.kind.matches(headers))
        {
            return Ok(context.cid);
        }

        // First free CID, else evict the least recently used context.
        let cid = (0..self.max_contexts as u16)
            .find(|cid| !self.contexts.contains_key(cid))
            .unwrap_or_else(|| {
                let victim = self
                    .contexts
                    .values()
                    .min_by_key(|context| context.last_used)
                    .map(|context| context.cid.get())
                    .expect("table is full, thus non-empty");
                debug!(cid = victim, "evicting least recently used context");
                self.contexts.remove(&victim);
                victim
            });

        let kind = ContextKind::create(profile, headers, uncomp, self.wlsb_width)?;
        debug!(cid, %profile, "created compression context");
        self.contexts.insert(
            cid,
            Context {
                cid: Cid::new(cid),
                last_used: self.access_clock,
                kind,
            },
        );
        Ok(Cid::new(cid))
    }
}
