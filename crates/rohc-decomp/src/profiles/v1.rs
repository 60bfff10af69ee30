//! Decompression side of the ROHCv1 IP/UDP/RTP and IP/UDP profiles:
//! parse → W-LSB decode → rebuild → CRC gate → commit, with the SN
//! wraparound and clock-based repairs of RFC 3095 §5.3.2.2.3.

use std::time::{Duration, Instant};

use rohc_core::{DecodeErrorExt as _, Encode as _, ReadCursor, WriteCursor};
use rohc_encodings::{ip_id_from_offset, normalize_ip_id, LsbDecoder, LsbPolicy, TsScaledDecomp};
use rohc_pdu::chains::{DynamicChain, IpStatic, StaticChain};
use rohc_pdu::crc::{headers_crc, CrcType};
use rohc_pdu::headers::{IpHeader, IpHeaders, Ipv4Header, Ipv6Header, RtpHeader, UdpHeader, UncompressedHeaders};
use rohc_pdu::ir::{IrDynPacket, IrPacket, ResolveProfile};
use rohc_pdu::uo::{UoFields, UoPacket, UoPacketType};
use rohc_pdu::{Cid, CidType, IpIdBehavior, PacketType, ProfileId, RohcMode, RohcPacketKind};

use crate::profiles::{CrcFailureWindow, DecompState};
use crate::{malformed, output_too_small, DecompressError, DecompressErrorKind, DecompressResult};

/// Largest compressed header this engine handles (base + extension).
const MAX_UO_HEADER: usize = 64;

struct DecompIpTrack {
    is_v4: bool,
    behavior: IpIdBehavior,
    tos: u8,
    ttl: u8,
    dont_fragment: bool,
    offset_decoder: LsbDecoder,
}

impl DecompIpTrack {
    fn new(is_v4: bool) -> Self {
        Self {
            is_v4,
            behavior: IpIdBehavior::Zero,
            tos: 0,
            ttl: 0,
            dont_fragment: false,
            offset_decoder: LsbDecoder::new(16, LsbPolicy::IpIdOffset),
        }
    }

    fn is_v4_non_random(&self) -> bool {
        self.is_v4 && self.behavior != IpIdBehavior::Random
    }
}

/// One candidate header reconstruction, kept apart from the context until
/// the CRC validates it.
struct Candidate {
    headers: UncompressedHeaders,
    sn: u16,
    ts: u32,
    offsets: [Option<u16>; 2],
    behaviors: [IpIdBehavior; 2],
}

pub(crate) struct V1DecompContext {
    profile: ProfileId,
    state: DecompState,
    #[allow(dead_code)]
    mode: RohcMode,
    static_chain: Option<StaticChain>,
    tracks: Vec<DecompIpTrack>,
    sn_decoder: LsbDecoder,
    ts_sc: TsScaledDecomp,
    rtp_version: u8,
    rtp_padding: bool,
    rtp_extension: bool,
    rtp_pt: u8,
    udp_checksum_used: bool,
    crc_failures: CrcFailureWindow,
    last_arrival: Option<Instant>,
    /// Estimated inter-arrival time per SN step, for clock-based repair.
    inter_arrival: Option<Duration>,
    repairs: u64,
}

impl V1DecompContext {
    const NAME: &'static str = "V1DecompContext";

    pub(crate) fn new(profile: ProfileId, mode: RohcMode) -> Self {
        let sn_policy = if profile == ProfileId::RTP {
            LsbPolicy::RtpSn
        } else {
            LsbPolicy::Fixed(-1)
        };
        Self {
            profile,
            state: DecompState::StaticContext,
            mode,
            static_chain: None,
            tracks: Vec::new(),
            sn_decoder: LsbDecoder::new(16, sn_policy),
            ts_sc: TsScaledDecomp::new(),
            rtp_version: 2,
            rtp_padding: false,
            rtp_extension: false,
            rtp_pt: 0,
            udp_checksum_used: false,
            crc_failures: CrcFailureWindow::new(),
            last_arrival: None,
            inter_arrival: None,
            repairs: 0,
        }
    }

    pub(crate) fn profile(&self) -> ProfileId {
        self.profile
    }

    pub(crate) fn has_full_context(&self) -> bool {
        self.state == DecompState::FullContext
    }

    pub(crate) fn last_sn(&self) -> Option<u16> {
        self.sn_decoder.reference().map(|sn| sn as u16)
    }

    pub(crate) fn repair_count(&self) -> u64 {
        self.repairs
    }

    pub(crate) fn apply_ir(&mut self, ir: &IrPacket, payload: &[u8], dst: &mut [u8]) -> DecompressResult<(usize, Option<u16>)> {
        let static_chain = ir
            .static_chain
            .as_ref()
            .ok_or_else(|| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?;

        self.static_chain = Some(static_chain.clone());
        self.tracks = static_chain.ip.iter().map(|ip| DecompIpTrack::new(ip.is_v4())).collect();

        let Some(dynamic_chain) = ir.dynamic_chain.as_ref() else {
            // Static part only: the context exists but cannot decompress
            // anything yet.
            self.state = DecompState::StaticContext;
            return Ok((0, None));
        };

        let len = self.apply_dynamic_chain(dynamic_chain, payload, dst)?;
        Ok((len, self.last_sn()))
    }

    fn apply_ir_dyn(
        &mut self,
        cursor: &mut ReadCursor<'_>,
        cid_type: CidType,
        add_cid: Cid,
        resolver: &impl ResolveProfile,
        dst: &mut [u8],
    ) -> DecompressResult<(usize, RohcPacketKind, Option<u16>, bool)> {
        if self.static_chain.is_none() {
            return Err(DecompressError::new(
                Self::NAME,
                DecompressErrorKind::NoContext { cid: add_cid.get() },
            ));
        }

        let ir_dyn = IrDynPacket::decode(cursor, cid_type, add_cid, self.tracks.len(), resolver).map_err(|e| {
            if e.is_crc_mismatch() {
                DecompressError::new(Self::NAME, DecompressErrorKind::BadCrc).with_source(e)
            } else {
                malformed(Self::NAME, e)
            }
        })?;

        let payload = cursor.read_remaining();
        let len = self.apply_dynamic_chain(&ir_dyn.dynamic_chain, payload, dst)?;
        Ok((len, RohcPacketKind::IrDyn, self.last_sn(), true))
    }

    /// Installs a full dynamic chain (IR or IR-DYN) and emits the rebuilt
    /// packet.
    fn apply_dynamic_chain(&mut self, chain: &DynamicChain, payload: &[u8], dst: &mut [u8]) -> DecompressResult<usize> {
        if chain.ip.len() != self.tracks.len() {
            return Err(DecompressError::new(Self::NAME, DecompressErrorKind::Malformed));
        }

        let sn = match (&chain.rtp, chain.udp_sn) {
            (Some(rtp), _) => rtp.sn,
            (None, Some(sn)) => sn,
            (None, None) => return Err(DecompressError::new(Self::NAME, DecompressErrorKind::Malformed)),
        };

        // Rebuild and write out before committing anything.
        let mut headers = self.rebuild_from_chain(chain)?;
        headers.set_payload_len(payload.len());
        let len = headers.header_len() + payload.len();
        if dst.len() < len {
            return Err(output_too_small(Self::NAME, len, dst.len()));
        }
        let mut out = WriteCursor::new(dst);
        headers
            .encode(&mut out)
            .map_err(|_| output_too_small(Self::NAME, len, 0))?;
        out.write_slice(payload);

        // Commit.
        for (track, dy) in self.tracks.iter_mut().zip(chain.ip.iter()) {
            track.behavior = if track.is_v4 { dy.behavior } else { IpIdBehavior::Zero };
            track.tos = dy.tos;
            track.ttl = dy.ttl;
            track.dont_fragment = dy.dont_fragment;
            if track.behavior.is_sequential() {
                let id = normalize_ip_id(track.behavior, dy.ip_id.unwrap_or(0));
                track.offset_decoder.set_reference(u32::from(id.wrapping_sub(sn)));
            }
        }

        self.sn_decoder.set_reference(u32::from(sn));

        if let Some(rtp) = &chain.rtp {
            self.rtp_version = rtp.version;
            self.rtp_padding = rtp.padding;
            self.rtp_pt = rtp.payload_type;
            if let Some(rx) = &rtp.rx {
                self.rtp_extension = rx.extension;
                if let Some(stride) = rx.ts_stride {
                    debug!(stride, "TS stride advertised");
                    self.ts_sc.set_stride(stride);
                }
            }
            self.ts_sc.commit(rtp.ts);
        }

        if let Some(checksum) = chain.udp_checksum {
            self.udp_checksum_used = checksum != 0;
        }

        self.state = DecompState::FullContext;
        self.crc_failures.reset();
        trace!(sn, "dynamic chain committed");

        Ok(out.pos())
    }

    fn rebuild_from_chain(&self, chain: &DynamicChain) -> DecompressResult<UncompressedHeaders> {
        let static_chain = self
            .static_chain
            .as_ref()
            .ok_or_else(|| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?;

        let mut headers: Vec<IpHeader> = Vec::with_capacity(static_chain.ip.len());
        for (st, dy) in static_chain.ip.iter().zip(chain.ip.iter()) {
            headers.push(match st {
                IpStatic::V4(v4) => IpHeader::V4(Ipv4Header {
                    tos: dy.tos,
                    total_len: 0,
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
            });
        }

        let mut iter = headers.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?;
        let ip = IpHeaders {
            first,
            second: iter.next(),
        };

        let udp = static_chain.udp.map(|st| UdpHeader {
            src_port: st.src_port,
            dst_port: st.dst_port,
            length: 0,
            checksum: chain.udp_checksum.unwrap_or(0),
        });

        let rtp = match (&static_chain.rtp, &chain.rtp) {
            (Some(st), Some(dy)) => Some(RtpHeader {
                version: dy.version,
                padding: dy.padding,
                extension: dy.rx.as_ref().is_some_and(|rx| rx.extension),
                cc: 0,
                marker: dy.marker,
                payload_type: dy.payload_type,
                sn: dy.sn,
                ts: dy.ts,
                ssrc: st.ssrc,
            }),
            _ => None,
        };

        Ok(UncompressedHeaders { ip, udp, rtp })
    }

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
        match PacketType::detect(first) {
            PacketType::IrDyn => self.apply_ir_dyn(cursor, cid_type, cid, resolver, dst),
            PacketType::Uo0 | PacketType::Uo1 | PacketType::Uor2 => {
                self.decompress_uo(cursor, cid_type, cid, arrival, dst)
            }
            _ => Err(DecompressError::new(Self::NAME, DecompressErrorKind::Malformed)),
        }
    }

    fn decompress_uo(
        &mut self,
        cursor: &mut ReadCursor<'_>,
        cid_type: CidType,
        cid: Cid,
        arrival: Option<Instant>,
        dst: &mut [u8],
    ) -> DecompressResult<(usize, RohcPacketKind, Option<u16>, bool)> {
        // De-interleave the large CID: the compressed base header is
        // contiguous only on small-CID channels.
        let mut scratch = [0u8; MAX_UO_HEADER];
        let (packet, header_consumed) = {
            let data = cursor.remaining();
            let (buf, cid_len) = match cid_type {
                CidType::Small => (data, 0),
                CidType::Large => {
                    let mut probe = ReadCursor::new(&data[1..]);
                    rohc_pdu::cid::read_large_cid(&mut probe).map_err(|e| malformed(Self::NAME, e))?;
                    let cid_len = probe.pos();
                    let copy = core::cmp::min(data.len() - cid_len, MAX_UO_HEADER);
                    scratch[0] = data[0];
                    scratch[1..copy].copy_from_slice(&data[1 + cid_len..cid_len + copy]);
                    (&scratch[..copy], cid_len)
                }
            };

            let mut parse = ReadCursor::new(buf);
            let kind = self.resolve_uo_kind(&mut parse)?;

            if self.state == DecompState::StaticContext && kind.crc_width() == 3 {
                return Err(DecompressError::new(
                    Self::NAME,
                    DecompressErrorKind::UnsupportedPacket {
                        reason: "3-bit-CRC packet in static-context state",
                    },
                ));
            }

            let packet = UoPacket::decode(&mut parse, kind).map_err(|e| malformed(Self::NAME, e))?;
            (packet, parse.pos() + cid_len)
        };
        cursor.advance(header_consumed);

        let fields = packet.fields();

        // Trailing uncovered values: random IP-IDs (outer first), then the
        // UDP checksum. An extension 3 may switch a behavior in this very
        // packet, so the trailer layout follows the signaled behaviors.
        let inner = self.tracks.len().saturating_sub(1);
        let mut random_ids = [None::<u16>; 2];
        for (i, track) in self.tracks.iter().enumerate() {
            let update = if i == inner {
                fields.inner_ip_update.as_ref()
            } else {
                fields.outer_ip_update.as_ref()
            };
            let behavior = update.map_or(track.behavior, |u| u.id_behavior);
            if track.is_v4 && behavior == IpIdBehavior::Random {
                let id = cursor
                    .try_read_u16()
                    .map_err(|_| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?;
                random_ids[i] = Some(id);
            }
        }
        let udp_checksum = if self.udp_checksum_used && self.static_chain.as_ref().is_some_and(|c| c.udp.is_some()) {
            Some(
                cursor
                    .try_read_u16()
                    .map_err(|_| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?,
            )
        } else {
            None
        };

        let payload = cursor.read_remaining();

        // First candidate: straight decode against the references.
        let sn_ref = self
            .sn_decoder
            .reference()
            .ok_or_else(|| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?;
        let sn = self
            .sn_decoder
            .decode(fields.sn.bits, fields.sn.width)
            .map_err(|_| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))? as u16;

        let crc_type = if fields.crc_width == 3 { CrcType::Crc3 } else { CrcType::Crc7 };
        let mut accepted = None;

        match self.build_candidate(sn, &fields, &random_ids, udp_checksum) {
            Ok(candidate) if headers_crc(crc_type, &candidate.headers) == fields.crc => {
                accepted = Some(candidate);
            }
            _ => {
                // Repair 1: assume the SN reference is one LSB window stale
                // (wraparound missed during a loss burst).
                let k = fields.sn.width;
                if k < 16 {
                    let stale_ref = sn_ref.wrapping_add(1 << k) & 0xffff;
                    if let Ok(sn2) = self.sn_decoder.decode_from(Some(stale_ref), fields.sn.bits, k) {
                        if sn2 as u16 != sn {
                            if let Ok(candidate) = self.build_candidate(sn2 as u16, &fields, &random_ids, udp_checksum)
                            {
                                if headers_crc(crc_type, &candidate.headers) == fields.crc {
                                    debug!(sn = sn2, "SN wraparound repair succeeded");
                                    self.repairs += 1;
                                    accepted = Some(candidate);
                                }
                            }
                        }
                    }
                }

                // Repair 2: derive the SN jump from the packet inter-arrival
                // gap (needs arrival timestamps).
                if accepted.is_none() {
                    if let (Some(arrival), Some(last), Some(step)) = (arrival, self.last_arrival, self.inter_arrival) {
                        let gap = arrival.saturating_duration_since(last);
                        if !step.is_zero() {
                            let jump = (gap.as_secs_f64() / step.as_secs_f64()).round();
                            if jump.is_finite() && jump >= 1.0 && jump < f64::from(u16::MAX) {
                                let base = sn_ref.wrapping_add(jump as u32) & 0xffff;
                                if let Ok(sn3) =
                                    self.sn_decoder.decode_from(Some(base), fields.sn.bits, fields.sn.width)
                                {
                                    if sn3 as u16 != sn {
                                        if let Ok(candidate) =
                                            self.build_candidate(sn3 as u16, &fields, &random_ids, udp_checksum)
                                        {
                                            if headers_crc(crc_type, &candidate.headers) == fields.crc {
                                                debug!(sn = sn3, "clock-based repair succeeded");
                                                self.repairs += 1;
                                                accepted = Some(candidate);
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let Some(mut candidate) = accepted else {
            warn!(cid = %cid, "header CRC failure, packet dropped");
            if self.crc_failures.record(false) {
                debug!("too many CRC failures, downgrading context");
                self.state = DecompState::StaticContext;
            }
            return Err(DecompressError::new(Self::NAME, DecompressErrorKind::BadCrc));
        };

        // Emit, then commit.
        candidate.headers.set_payload_len(payload.len());
        let len = candidate.headers.header_len() + payload.len();
        if dst.len() < len {
            return Err(output_too_small(Self::NAME, len, dst.len()));
        }
        let mut out = WriteCursor::new(dst);
        candidate
            .headers
            .encode(&mut out)
            .map_err(|_| output_too_small(Self::NAME, len, 0))?;
        out.write_slice(payload);

        self.commit(&candidate, &fields, arrival);
        self.crc_failures.record(true);

        Ok((out.pos(), RohcPacketKind::from(packet.kind), Some(candidate.sn), false))
    }

    fn resolve_uo_kind(&self, parse: &mut ReadCursor<'_>) -> DecompressResult<UoPacketType> {
        let data = parse.remaining();
        if data.is_empty() {
            return Err(DecompressError::new(Self::NAME, DecompressErrorKind::Malformed));
        }
        let rtp = self.profile == ProfileId::RTP;
        let non_random_v4 = self.tracks.iter().any(DecompIpTrack::is_v4_non_random);

        Ok(match PacketType::detect(data[0]) {
            PacketType::Uo0 => UoPacketType::Uo0,
            PacketType::Uo1 => UoPacketType::resolve_uo1(data[0], rtp, non_random_v4),
            PacketType::Uor2 => {
                if data.len() < 2 {
                    return Err(DecompressError::new(Self::NAME, DecompressErrorKind::Malformed));
                }
                UoPacketType::resolve_uor2(data[1], rtp, non_random_v4)
            }
            _ => return Err(DecompressError::new(Self::NAME, DecompressErrorKind::Malformed)),
        })
    }

    /// Builds the uncompressed headers for a candidate SN without touching
    /// the context.
    fn build_candidate(
        &self,
        sn: u16,
        fields: &UoFields,
        random_ids: &[Option<u16>; 2],
        udp_checksum: Option<u16>,
    ) -> DecompressResult<Candidate> {
        let static_chain = self
            .static_chain
            .as_ref()
            .ok_or_else(|| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?;

        let count = self.tracks.len();
        let inner = count - 1;
        let base = (0..count).rev().find(|&i| self.tracks[i].is_v4_non_random());

        let mut offsets = [None::<u16>; 2];
        let mut behaviors = [IpIdBehavior::Zero; 2];
        let mut ids = [0u16; 2];

        for i in 0..count {
            let track = &self.tracks[i];
            let update = if i == inner {
                fields.inner_ip_update.as_ref()
            } else {
                fields.outer_ip_update.as_ref()
            };
            let behavior = update.map_or(track.behavior, |u| {
                if track.is_v4 { u.id_behavior } else { IpIdBehavior::Zero }
            });
            behaviors[i] = behavior;

            if !track.is_v4 {
                continue;
            }

            let full_id = if i == inner { fields.ip_id_full } else { fields.outer_ip_id_full };
            let lsb_bits = if Some(i) == base {
                fields.ip_id
            } else if i == 0 {
                fields.outer_ip_id
            } else {
                rohc_pdu::LsbField::EMPTY
            };

            ids[i] = match behavior {
                IpIdBehavior::Zero => 0,
                IpIdBehavior::Random => random_ids[i].unwrap_or(0),
                _ => {
                    let offset = if let Some(full) = full_id {
                        u32::from(normalize_ip_id(behavior, full).wrapping_sub(sn))
                    } else if lsb_bits.width > 0 {
                        self.tracks[i]
                            .offset_decoder
                            .decode(lsb_bits.bits, lsb_bits.width)
                            .map_err(|_| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?
                    } else {
                        self.tracks[i]
                            .offset_decoder
                            .reference()
                            .ok_or_else(|| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?
                    };
                    offsets[i] = Some(offset as u16);
                    if let Some(full) = full_id {
                        full
                    } else {
                        ip_id_from_offset(behavior, offset as u16, sn)
                    }
                }
            };
        }

        // Timestamp.
        let sn_ref = self.sn_decoder.reference().unwrap_or(u32::from(sn)) as u16;
        let sn_delta = sn.wrapping_sub(sn_ref);
        let ts = if self.profile == ProfileId::RTP {
            if fields.ts.width > 0 {
                if fields.ts_scaled {
                    self.ts_sc
                        .decode_scaled(fields.ts.bits, fields.ts.width)
                        .map_err(|_| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?
                } else {
                    self.ts_sc
                        .decode_unscaled(fields.ts.bits, fields.ts.width)
                        .map_err(|_| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?
                }
            } else {
                self.ts_sc
                    .deduce(sn_delta)
                    .map_err(|_| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?
            }
        } else {
            0
        };

        // Assemble the headers.
        let mut ip_headers: Vec<IpHeader> = Vec::with_capacity(count);
        for (i, st) in static_chain.ip.iter().enumerate() {
            let track = &self.tracks[i];
            let update = if i == inner {
                fields.inner_ip_update.as_ref()
            } else {
                fields.outer_ip_update.as_ref()
            };
            let tos = update.and_then(|u| u.tos).unwrap_or(track.tos);
            let ttl = update.and_then(|u| u.ttl).unwrap_or(track.ttl);
            let df = update.map_or(track.dont_fragment, |u| u.dont_fragment);

            ip_headers.push(match st {
                IpStatic::V4(v4) => IpHeader::V4(Ipv4Header {
                    tos,
                    total_len: 0,
                    id: ids[i],
                    dont_fragment: df,
                    ttl,
                    protocol: v4.protocol,
                    checksum: 0,
                    src: v4.src,
                    dst: v4.dst,
                }),
                IpStatic::V6(v6) => IpHeader::V6(Ipv6Header {
                    traffic_class: tos,
                    flow_label: v6.flow_label.unwrap_or(0),
                    payload_len: 0,
                    next_header: v6.next_header,
                    hop_limit: ttl,
                    src: v6.src,
                    dst: v6.dst,
                }),
            });
        }

        let mut iter = ip_headers.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| DecompressError::new(Self::NAME, DecompressErrorKind::Malformed))?;
        let ip = IpHeaders {
            first,
            second: iter.next(),
        };

        let udp = static_chain.udp.map(|st| UdpHeader {
            src_port: st.src_port,
            dst_port: st.dst_port,
            length: 0,
            checksum: udp_checksum.unwrap_or(0),
        });

        let rtp = static_chain.rtp.map(|st| RtpHeader {
            version: self.rtp_version,
            padding: self.rtp_padding,
            extension: fields
                .rtp_update
                .as_ref()
                .map_or(self.rtp_extension, |update| update.extension),
            cc: 0,
            marker: fields.marker,
            payload_type: fields
                .rtp_update
                .as_ref()
                .and_then(|update| update.pt)
                .unwrap_or(self.rtp_pt),
            sn,
            ts,
            ssrc: st.ssrc,
        });

        Ok(Candidate {
            headers: UncompressedHeaders { ip, udp, rtp },
            sn,
            ts,
            offsets,
            behaviors,
        })
    }

    /// Commits a CRC-validated candidate into the context references.
    fn commit(&mut self, candidate: &Candidate, fields: &UoFields, arrival: Option<Instant>) {
        let sn_ref = self.sn_decoder.reference().unwrap_or(u32::from(candidate.sn)) as u16;
        let sn_delta = candidate.sn.wrapping_sub(sn_ref);

        self.sn_decoder.set_reference(u32::from(candidate.sn));

        let inner = self.tracks.len().saturating_sub(1);
        for (i, track) in self.tracks.iter_mut().enumerate() {
            track.behavior = candidate.behaviors[i];
            if let Some(offset) = candidate.offsets[i] {
                track.offset_decoder.set_reference(u32::from(offset));
            }
            let update = if i == inner {
                fields.inner_ip_update.as_ref()
            } else {
                fields.outer_ip_update.as_ref()
            };
            if let Some(update) = update {
                if let Some(tos) = update.tos {
                    track.tos = tos;
                }
                if let Some(ttl) = update.ttl {
                    track.ttl = ttl;
                }
                track.dont_fragment = update.dont_fragment;
            }
        }

        if self.profile == ProfileId::RTP {
            if let Some(update) = &fields.rtp_update {
                if let Some(pt) = update.pt {
                    self.rtp_pt = pt;
                }
                self.rtp_extension = update.extension;
                if let Some(stride) = update.ts_stride {
                    debug!(stride, "TS stride advertised");
                    self.ts_sc.set_stride(stride);
                }
            }
            self.ts_sc.commit(candidate.ts);
        }

        // Inter-arrival estimate for clock-based repair.
        if let Some(arrival) = arrival {
            if let Some(last) = self.last_arrival {
                if sn_delta > 0 {
                    let step = arrival.saturating_duration_since(last) / u32::from(sn_delta);
                    self.inter_arrival = Some(match self.inter_arrival {
                        // Exponential smoothing, weight 1/4 on the newest.
                        Some(est) => (est * 3 + step) / 4,
                        None => step,
                    });
                }
            }
            self.last_arrival = Some(arrival);
        }
    }
}
