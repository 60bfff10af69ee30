//! The ROHCv1 IP/UDP/RTP (0x0001) and IP/UDP (0x0002) compression engines.
//!
//! Both profiles share one engine: the UDP profile is the RTP machinery
//! with a compressor-generated sequence number and without the timestamp
//! and marker plumbing. The decision logic follows RFC 3095 §5.3 with the
//! optimistic approach of the unidirectional mode.

use rohc_core::WriteCursor;
use rohc_encodings::{
    classify_ip_id, ip_id_offset, normalize_ip_id, LsbPolicy, TsScState, TsScaledComp, WlsbEncoder,
};
use rohc_pdu::chains::{
    DynamicChain, IpDynamic, IpStatic, Ipv4Static, Ipv6Static, RtpDynamic, RtpDynamicRx, RtpStatic, StaticChain,
    UdpStatic,
};
use rohc_pdu::crc::{headers_crc, CrcType};
use rohc_pdu::feedback::{AckType, Feedback};
use rohc_pdu::headers::{IpHeader, UncompressedHeaders};
use rohc_pdu::ir::{IrDynPacket, IrPacket};
use rohc_pdu::uo::{Ext3, Ext3IpFields, Ext3Rtp, Ext3Ts, Extension, UoPacket, UoPacketType};
use rohc_pdu::{sdvl, IpIdBehavior, LsbField, ProfileId, RohcMode, RohcPacketKind};

use crate::profiles::{CompState, CompressEnv, RefreshClock, MAX_FO_COUNT, MAX_IR_COUNT};
use crate::{encode_error, output_too_small, CompressResult, CompressorFeatures};

/// Per-IP-header tracking.
struct IpTrack {
    is_v4: bool,
    behavior: IpIdBehavior,
    last_id: u16,
    offset_window: WlsbEncoder,
}

impl IpTrack {
    fn new(header: &IpHeader, wlsb_width: usize) -> Self {
        let (is_v4, behavior, last_id) = match header {
            IpHeader::V4(v4) => (
                true,
                if v4.id == 0 {
                    IpIdBehavior::Zero
                } else {
                    IpIdBehavior::Sequential
                },
                v4.id,
            ),
            IpHeader::V6(_) => (false, IpIdBehavior::Zero, 0),
        };
        Self {
            is_v4,
            behavior,
            last_id,
            offset_window: WlsbEncoder::new(wlsb_width, 16, LsbPolicy::IpIdOffset),
        }
    }

    /// IPv4 with a non-random (sequential or zero) identifier: the headers
    /// whose IP-ID the compressed formats can carry.
    fn is_v4_non_random(&self) -> bool {
        self.is_v4 && self.behavior != IpIdBehavior::Random
    }
}

/// Scratch results of the per-packet analysis.
struct Analysis {
    sn: u16,
    ts: u32,
    marker: bool,
    nr_sn: u8,
    /// TS bits to transmit (scaled or absolute per `ts_scaled`).
    nr_ts: u8,
    ts_scaled: bool,
    /// Offset bits per IP header (zero for non-sequential behaviors).
    nr_id: [u8; 2],
    offsets: [u16; 2],
    /// Index of the header owning the base IP-ID field.
    base_track: Option<usize>,
    /// A non-base header needs IP-ID bits (extension 3 territory).
    other_track_needs_bits: bool,
    /// Changed IP dynamic fields (ToS, TTL, DF, IP-ID behavior).
    ip_dyn_changed: usize,
    /// Changed RTP dynamic fields (PT, X, P).
    rtp_dyn_changed: usize,
    pt_changed: bool,
    x_changed: bool,
}

/// Shared ROHCv1 compression context.
pub(crate) struct V1Context {
    profile: ProfileId,
    state: CompState,
    mode: RohcMode,
    flow: UncompressedHeaders,
    tracks: Vec<IpTrack>,
    sn_window: WlsbEncoder,
    /// Compressor-generated SN (UDP profile).
    generated_sn: u16,
    ts_sc: TsScaledComp,
    udp_checksum_used: bool,
    udp_checksum_change_count: usize,
    rtp_pt_change_count: usize,
    ir_count: usize,
    fo_count: usize,
    ir_dyn_count: usize,
    refresh: RefreshClock,
    fresh: bool,
}

impl V1Context {
    const NAME: &'static str = "V1Context";

    pub(crate) fn new(profile: ProfileId, headers: &UncompressedHeaders, wlsb_width: usize) -> Self {
        debug_assert!(matches!(profile, ProfileId::RTP | ProfileId::UDP));

        let sn_policy = if profile == ProfileId::RTP {
            LsbPolicy::RtpSn
        } else {
            // Non-RTP SN only ever increases (RFC 3095 §4.5.2).
            LsbPolicy::Fixed(-1)
        };

        Self {
            profile,
            state: CompState::Ir,
            mode: RohcMode::Unidirectional,
            flow: *headers,
            tracks: headers.ip.iter().map(|ip| IpTrack::new(ip, wlsb_width)).collect(),
            sn_window: WlsbEncoder::new(wlsb_width, 16, sn_policy),
            generated_sn: 0,
            ts_sc: TsScaledComp::new(wlsb_width),
            udp_checksum_used: headers.udp.is_some_and(|udp| udp.checksum != 0),
            udp_checksum_change_count: 0,
            rtp_pt_change_count: 0,
            ir_count: 0,
            fo_count: 0,
            ir_dyn_count: 0,
            refresh: RefreshClock::new(),
            fresh: true,
        }
    }

    pub(crate) fn profile(&self) -> ProfileId {
        self.profile
    }

    pub(crate) fn matches(&self, headers: &UncompressedHeaders) -> bool {
        if headers.ip.count() != self.flow.ip.count() {
            return false;
        }
        let ips_match = self.flow.ip.iter().zip(headers.ip.iter()).all(|(a, b)| match (a, b) {
            (IpHeader::V4(a), IpHeader::V4(b)) => a.src == b.src && a.dst == b.dst && a.protocol == b.protocol,
            (IpHeader::V6(a), IpHeader::V6(b)) => {
                a.src == b.src && a.dst == b.dst && a.next_header == b.next_header && a.flow_label == b.flow_label
            }
            _ => false,
        });
        if !ips_match {
            return false;
        }

        let udp_matches = match (self.flow.udp, headers.udp) {
            (Some(a), Some(b)) => a.src_port == b.src_port && a.dst_port == b.dst_port,
            _ => false,
        };
        if !udp_matches {
            return false;
        }

        if self.profile == ProfileId::RTP {
            match (self.flow.rtp, headers.rtp) {
                (Some(a), Some(b)) => a.ssrc == b.ssrc,
                _ => false,
            }
        } else {
            headers.rtp.is_none()
        }
    }

    /// The header whose IP-ID offset bits ride in the base header fields:
    /// the innermost IPv4 with non-random behavior, else the outer one.
    fn base_track(&self) -> Option<usize> {
        (0..self.tracks.len()).rev().find(|&i| self.tracks[i].is_v4_non_random())
    }

    fn analyze(&mut self, headers: &UncompressedHeaders) -> Analysis {
        // SN: the RTP sequence number, or a generated one for IP/UDP.
        let (sn, ts, marker) = match headers.rtp {
            Some(rtp) => (rtp.sn, rtp.ts, rtp.marker),
            None => {
                self.generated_sn = self.generated_sn.wrapping_add(1);
                (self.generated_sn, 0, false)
            }
        };

        // IP-ID behaviors and change detection.
        let mut ip_dyn_changed = 0;
        let mut nr_id = [0u8; 2];
        let mut offsets = [0u16; 2];
        let fresh = core::mem::take(&mut self.fresh);
        for (i, (track, ip)) in self.tracks.iter_mut().zip(headers.ip.iter()).enumerate() {
            if let IpHeader::V4(v4) = ip {
                if !fresh {
                    let behavior = classify_ip_id(track.last_id, v4.id);
                    if behavior != track.behavior {
                        trace!(header = i, from = ?track.behavior, to = ?behavior, "IP-ID behavior changed");
                        track.behavior = behavior;
                        track.offset_window.clear();
                        ip_dyn_changed += 1;
                    }
                }
                track.last_id = v4.id;

                if track.behavior.is_sequential() {
                    let offset = ip_id_offset(normalize_ip_id(track.behavior, v4.id), sn);
                    offsets[i] = offset;
                    nr_id[i] = track.offset_window.k_for(u32::from(offset));
                }
            }
        }

        for (i, (old, new)) in self.flow.ip.iter().zip(headers.ip.iter()).enumerate() {
            let changed = match (old, new) {
                (IpHeader::V4(old), IpHeader::V4(new)) => {
                    old.tos != new.tos || old.ttl != new.ttl || old.dont_fragment != new.dont_fragment
                }
                (IpHeader::V6(old), IpHeader::V6(new)) => {
                    old.traffic_class != new.traffic_class || old.hop_limit != new.hop_limit
                }
                _ => false,
            };
            if changed {
                trace!(header = i, "IP dynamic fields changed");
                ip_dyn_changed += 1;
            }
        }

        // UDP checksum behavior.
        let checksum_used = headers.udp.is_some_and(|udp| udp.checksum != 0);
        if checksum_used != self.udp_checksum_used {
            debug!("UDP checksum behavior changed");
            self.udp_checksum_used = checksum_used;
            self.udp_checksum_change_count = 0;
        }

        // RTP dynamic fields.
        let mut rtp_dyn_changed = 0;
        let mut pt_changed = false;
        let mut x_changed = false;
        if let (Some(old), Some(new)) = (self.flow.rtp, headers.rtp) {
            if old.payload_type != new.payload_type {
                debug!(from = old.payload_type, to = new.payload_type, "RTP payload type changed");
                self.rtp_pt_change_count = 0;
            }
            if old.payload_type != new.payload_type || self.rtp_pt_change_count < MAX_IR_COUNT {
                pt_changed = true;
                rtp_dyn_changed += 1;
            }
            if old.extension != new.extension {
                x_changed = true;
                rtp_dyn_changed += 1;
            }
            if old.padding != new.padding {
                rtp_dyn_changed += 1;
            }
        }

        // Timestamp stride machine.
        let (nr_ts, ts_scaled) = if self.profile == ProfileId::RTP {
            self.ts_sc.update(ts);
            let scaled = self.ts_sc.state() == TsScState::SendScaled;
            (self.ts_sc.nr_bits(ts, sn), scaled)
        } else {
            (0, true)
        };

        let base_track = self.base_track();
        let other_track_needs_bits = (0..self.tracks.len())
            .any(|i| Some(i) != base_track && self.tracks[i].behavior.is_sequential() && nr_id[i] > 0);

        Analysis {
            sn,
            ts,
            marker,
            nr_sn: self.sn_window.k_for(u32::from(sn)),
            nr_ts,
            ts_scaled,
            nr_id,
            offsets,
            base_track,
            other_track_needs_bits,
            ip_dyn_changed,
            rtp_dyn_changed,
            pt_changed,
            x_changed,
        }
    }

    fn set_state(&mut self, next: CompState) {
        if next != self.state {
            trace!(from = ?self.state, to = ?next, "compressor state change");
            if next == CompState::Fo {
                // A fresh FO episode starts with IR-DYN warm-up.
                self.ir_dyn_count = 0;
                self.fo_count = 0;
            }
            self.state = next;
        }
    }

    fn decide_state(&mut self, env: &CompressEnv, a: &Analysis) {
        let send_dynamic = a.ip_dyn_changed + a.rtp_dyn_changed;

        if self.profile == ProfileId::RTP {
            if self.ts_sc.state() == TsScState::InitTs {
                // No stride yet (or constant TS from the start): stay in IR
                // until the timestamp behavior clarifies.
                self.set_state(CompState::Ir);
                return;
            }
            if self.state == CompState::Ir && self.ts_sc.is_constant() {
                return;
            }
        }

        if self.udp_checksum_change_count < MAX_IR_COUNT && self.flow.udp.is_some() {
            self.set_state(CompState::Ir);
            return;
        }

        if self.profile == ProfileId::RTP {
            if self.ts_sc.is_constant() && self.state != CompState::Ir {
                self.set_state(CompState::Fo);
                return;
            }
            if a.rtp_dyn_changed > 0 && self.state != CompState::Ir {
                self.set_state(CompState::Fo);
                return;
            }
        }

        // Generic promotion (RFC 3095 §5.3.2 optimistic approach).
        match self.state {
            CompState::Ir => {
                if self.ir_count >= MAX_IR_COUNT {
                    self.set_state(CompState::Fo);
                }
            }
            CompState::Fo => {
                if self.fo_count >= MAX_FO_COUNT && send_dynamic == 0 {
                    self.set_state(CompState::So);
                }
            }
            CompState::So => {
                if send_dynamic > 0 {
                    self.set_state(CompState::Fo);
                }
            }
        }

        // Periodic downgrades, U-mode only.
        if self.mode == RohcMode::Unidirectional {
            if self.refresh.ir_due(env) {
                debug!("periodic refresh to IR");
                self.set_state(CompState::Ir);
                self.ir_count = 0;
            } else if self.state == CompState::So && self.refresh.fo_due(env) {
                debug!("periodic refresh to FO");
                self.set_state(CompState::Fo);
            }
        }
    }

    /// FO-state packet choice (`c_rtp_decide_FO_packet` shape); `None`
    /// falls back to IR-DYN.
    fn decide_fo_packet(&mut self, a: &Analysis) -> Option<UoPacketType> {
        let send_dynamic = a.ip_dyn_changed + a.rtp_dyn_changed;
        let threshold = if self.tracks.len() == 1 { 2 } else { 4 };

        if self.ir_dyn_count < MAX_FO_COUNT {
            return None;
        }
        if send_dynamic > threshold {
            return None;
        }

        let max_sn = if self.profile == ProfileId::RTP { 14 } else { 13 };
        if usize::from(a.nr_sn) > max_sn {
            return None;
        }

        if self.profile != ProfileId::RTP {
            return Some(UoPacketType::Uor2);
        }

        Some(match a.base_track {
            None => UoPacketType::Uor2Rtp,
            Some(base) => {
                if a.nr_id[base] > 0 && !a.other_track_needs_bits && sdvl::can_encode_bits(usize::from(a.nr_ts)) {
                    UoPacketType::Uor2Id
                } else {
                    UoPacketType::Uor2Ts
                }
            }
        })
    }

    /// SO-state packet choice (`c_rtp_decide_SO_packet` shape); `None`
    /// falls back to IR-DYN.
    fn decide_so_packet(&self, env: &CompressEnv, a: &Analysis) -> Option<UoPacketType> {
        let uo1_allowed = !env.features.contains(CompressorFeatures::COMPAT_1_6_X);
        let nr_sn = usize::from(a.nr_sn);
        let nr_ts = usize::from(a.nr_ts);
        // Base-header TS bits are only meaningful once both sides scale.
        let ts_in_base_ok = a.ts_scaled;

        if self.profile != ProfileId::RTP {
            let base_bits = a.base_track.map_or(0, |i| usize::from(a.nr_id[i]));
            if nr_sn <= 4 && base_bits == 0 && !a.other_track_needs_bits {
                return Some(UoPacketType::Uo0);
            }
            if uo1_allowed && a.base_track.is_some() && nr_sn <= 5 && base_bits <= 6 && !a.other_track_needs_bits {
                return Some(UoPacketType::Uo1);
            }
            if nr_sn <= 13 {
                return Some(UoPacketType::Uor2);
            }
            return None;
        }

        if usize::from(a.nr_sn) > 14 {
            return None;
        }

        let deducible_ts = nr_ts == 0;
        let non_random_count = self.tracks.iter().filter(|track| track.is_v4_non_random()).count();
        let with_bits = (0..self.tracks.len())
            .filter(|&i| self.tracks[i].is_v4_non_random() && a.nr_id[i] > 0)
            .count();
        let base_bits = a.base_track.map_or(0, |i| usize::from(a.nr_id[i]));

        if a.other_track_needs_bits {
            // Double-header guard: the base-header forms budget IP-ID bits
            // for exactly one header, so they require at most one IPv4
            // header with non-random IP-ID bits to transmit, and that one
            // must be the base. A non-base header owning bits fails the
            // "at most one, and it is the base" test outright; its full
            // IP-ID rides in extension 3 under a UOR-2 shape instead.
            return Some(if non_random_count == 0 {
                UoPacketType::Uor2Rtp
            } else {
                UoPacketType::Uor2Ts
            });
        }

        if non_random_count == 0 {
            if nr_sn <= 4 && deducible_ts && !a.marker {
                Some(UoPacketType::Uo0)
            } else if uo1_allowed && nr_sn <= 4 && nr_ts <= 6 && ts_in_base_ok {
                Some(UoPacketType::Uo1Rtp)
            } else {
                Some(UoPacketType::Uor2Rtp)
            }
        } else if nr_sn <= 4 && with_bits == 0 && deducible_ts && !a.marker {
            Some(UoPacketType::Uo0)
        } else if uo1_allowed && nr_sn <= 4 && with_bits == 0 && nr_ts > 0 && nr_ts <= 5 && ts_in_base_ok {
            Some(UoPacketType::Uo1Ts)
        } else if uo1_allowed && nr_sn <= 4 && base_bits <= 5 && deducible_ts && !a.marker {
            Some(UoPacketType::Uo1Id)
        } else if base_bits > 0 && sdvl::can_encode_bits(nr_ts) {
            Some(UoPacketType::Uor2Id)
        } else {
            Some(UoPacketType::Uor2Ts)
        }
    }

    /// Smallest extension whose bit budget fits; RTP dynamic changes,
    /// absolute timestamps and outer IP-ID bits force extension 3.
    fn decide_extension(&self, a: &Analysis, kind: UoPacketType, headers: &UncompressedHeaders) -> Option<Extension> {
        let sn_w = usize::from(kind.base_sn_width());
        let ts_w = usize::from(kind.base_ts_width());
        let id_w = usize::from(kind.base_ip_id_width());

        let nr_sn = usize::from(a.nr_sn);
        let nr_ts = usize::from(a.nr_ts);
        let base_id_bits = a.base_track.map_or(0, |i| usize::from(a.nr_id[i]));

        let force3 = a.rtp_dyn_changed > 0
            || a.ip_dyn_changed > 0
            || a.other_track_needs_bits
            || (self.profile == ProfileId::RTP && !a.ts_scaled);

        if !force3 && nr_sn <= sn_w && nr_ts <= ts_w && base_id_bits <= id_w {
            return None;
        }

        debug_assert!(kind.has_ext_bit(), "extension required by a type without an X bit");

        let base = a.base_track.unwrap_or(0);
        let sn_bits = |extra: usize| ((u32::from(a.sn) >> sn_w) & ((1 << extra) - 1)) as u8;
        let id_lsb = |extra: usize| (u32::from(a.offsets[base]) >> id_w) & ((1 << extra) - 1);
        let ts_value = if a.ts_scaled { self.ts_sc.scaled() } else { a.ts };
        let ts_lsb = |extra: usize| (ts_value >> ts_w) & ((1 << extra) - 1);

        if !force3 {
            let sn_fits = nr_sn <= sn_w + 3;
            match kind {
                UoPacketType::Uor2 => {
                    if sn_fits {
                        if base_id_bits <= id_w + 3 {
                            return Some(Extension::Ext0 {
                                sn: sn_bits(3),
                                field: id_lsb(3) as u8,
                            });
                        }
                        if base_id_bits <= id_w + 11 {
                            let bits = id_lsb(11);
                            return Some(Extension::Ext1 {
                                sn: sn_bits(3),
                                field: (bits >> 8) as u8,
                                field2: (bits & 0xff) as u8,
                            });
                        }
                    }
                }
                UoPacketType::Uor2Rtp => {
                    if sn_fits && base_id_bits == 0 {
                        if nr_ts <= ts_w + 3 {
                            return Some(Extension::Ext0 {
                                sn: sn_bits(3),
                                field: ts_lsb(3) as u8,
                            });
                        }
                        if nr_ts <= ts_w + 11 {
                            let bits = ts_lsb(11);
                            return Some(Extension::Ext1 {
                                sn: sn_bits(3),
                                field: (bits >> 8) as u8,
                                field2: (bits & 0xff) as u8,
                            });
                        }
                    }
                }
                UoPacketType::Uor2Id => {
                    if sn_fits && nr_ts <= 8 {
                        if base_id_bits <= id_w + 3 && nr_ts == 0 {
                            return Some(Extension::Ext0 {
                                sn: sn_bits(3),
                                field: id_lsb(3) as u8,
                            });
                        }
                        if base_id_bits <= id_w + 3 {
                            return Some(Extension::Ext1 {
                                sn: sn_bits(3),
                                field: id_lsb(3) as u8,
                                field2: (ts_value & 0xff) as u8,
                            });
                        }
                        if base_id_bits <= id_w + 11 {
                            let bits = id_lsb(11);
                            return Some(Extension::Ext2 {
                                sn: sn_bits(3),
                                field: bits as u16,
                                field2: (ts_value & 0xff) as u8,
                            });
                        }
                    }
                }
                UoPacketType::Uor2Ts => {
                    if sn_fits && nr_ts <= ts_w + 3 && base_id_bits <= 8 {
                        if base_id_bits == 0 {
                            return Some(Extension::Ext0 {
                                sn: sn_bits(3),
                                field: ts_lsb(3) as u8,
                            });
                        }
                        return Some(Extension::Ext1 {
                            sn: sn_bits(3),
                            field: ts_lsb(3) as u8,
                            field2: (a.offsets[base] & 0xff) as u8,
                        });
                    }
                }
                _ => {}
            }
        }

        Some(Extension::Ext3(self.build_ext3(a, kind, headers)))
    }

    fn build_ext3(&self, a: &Analysis, kind: UoPacketType, headers: &UncompressedHeaders) -> Ext3 {
        let sn_w = usize::from(kind.base_sn_width());
        let ts_w = usize::from(kind.base_ts_width());

        let mut ext3 = Ext3 {
            ts_scaled: a.ts_scaled,
            mode: self.mode.to_bits(),
            ..Ext3::default()
        };

        if usize::from(a.nr_sn) > sn_w {
            ext3.sn = Some((a.sn & 0xff) as u8);
        }

        if self.profile == ProfileId::RTP && usize::from(a.nr_ts) > ts_w {
            let extra = usize::from(a.nr_ts) - ts_w;
            let width = sdvl::bits_for_len(sdvl::len_for_bits(extra));
            let ts_value = if a.ts_scaled { self.ts_sc.scaled() } else { a.ts };
            let mask = if width >= 32 { u32::MAX } else { (1 << width) - 1 };
            ext3.ts = Some(Ext3Ts {
                bits: (ts_value >> ts_w) & mask,
                width: width as u8,
            });
        }

        // IP header updates: current values, transmitted when something
        // about the header changed.
        let count = self.tracks.len();
        let inner = count - 1;
        if a.ip_dyn_changed > 0 {
            ext3.inner_ip = Some(self.ext3_ip_fields(inner, headers));
            if count > 1 {
                ext3.outer_ip = Some(self.ext3_ip_fields(0, headers));
            }
        }

        // Full IP-IDs when the offset bits outgrow every compressed form.
        if let Some(base) = a.base_track {
            if usize::from(a.nr_id[base]) > usize::from(kind.base_ip_id_width()) {
                ext3.ip_id = Some(self.tracks[base].last_id);
            }
        }
        if a.other_track_needs_bits && count > 1 && a.base_track == Some(inner) {
            ext3.outer_ip_id = Some(self.tracks[0].last_id);
            if ext3.outer_ip.is_none() {
                ext3.outer_ip = Some(self.ext3_ip_fields(0, headers));
            }
            // The outer block implies the inner flags octet on the wire;
            // fill it with the current values so nothing gets clobbered.
            if ext3.inner_ip.is_none() {
                ext3.inner_ip = Some(self.ext3_ip_fields(inner, headers));
            }
        }

        if kind.is_rtp() {
            let advertise_stride = self.ts_sc.state() == TsScState::InitStride && !self.ts_sc.is_constant();
            if a.rtp_dyn_changed > 0 || advertise_stride || !a.ts_scaled {
                let rtp = headers.rtp.expect("RTP profile always carries an RTP header");
                ext3.rtp = Some(Ext3Rtp {
                    mode: self.mode.to_bits(),
                    marker: a.marker,
                    extension: rtp.extension,
                    pt: a.pt_changed.then_some(rtp.payload_type),
                    ts_stride: advertise_stride.then(|| self.ts_sc.stride()),
                });
            }
        }

        ext3
    }

    fn ext3_ip_fields(&self, index: usize, headers: &UncompressedHeaders) -> Ext3IpFields {
        let (old, new) = match index {
            0 => (&self.flow.ip.first, &headers.ip.first),
            _ => (
                self.flow.ip.second.as_ref().expect("double-IP context"),
                headers.ip.second.as_ref().expect("double-IP packet"),
            ),
        };
        let (tos, ttl, df) = match new {
            IpHeader::V4(v4) => (v4.tos, v4.ttl, v4.dont_fragment),
            IpHeader::V6(v6) => (v6.traffic_class, v6.hop_limit, false),
        };
        let (old_tos, old_ttl) = match old {
            IpHeader::V4(v4) => (v4.tos, v4.ttl),
            IpHeader::V6(v6) => (v6.traffic_class, v6.hop_limit),
        };
        Ext3IpFields {
            tos: (old_tos != tos).then_some(tos),
            ttl: (old_ttl != ttl).then_some(ttl),
            dont_fragment: df,
            protocol: None,
            id_behavior: self.tracks[index].behavior,
        }
    }

    fn static_chain(&self, headers: &UncompressedHeaders) -> StaticChain {
        let count = headers.ip.count();
        let ip = headers
            .ip
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let innermost = i + 1 == count;
                match header {
                    IpHeader::V4(v4) => IpStatic::V4(Ipv4Static {
                        innermost,
                        protocol: v4.protocol,
                        src: v4.src,
                        dst: v4.dst,
                    }),
                    IpHeader::V6(v6) => IpStatic::V6(Ipv6Static {
                        innermost,
                        flow_label: (v6.flow_label != 0).then_some(v6.flow_label),
                        next_header: v6.next_header,
                        src: v6.src,
                        dst: v6.dst,
                    }),
                }
            })
            .collect();

        let udp = headers.udp.map(|udp| UdpStatic {
            src_port: udp.src_port,
            dst_port: udp.dst_port,
        });
        let rtp = headers.rtp.map(|rtp| RtpStatic { ssrc: rtp.ssrc });

        StaticChain { ip, udp, rtp }
    }

    fn dynamic_chain(&mut self, a: &Analysis, headers: &UncompressedHeaders, in_ir: bool) -> DynamicChain {
        let ip = headers
            .ip
            .iter()
            .zip(self.tracks.iter())
            .map(|(header, track)| match header {
                IpHeader::V4(v4) => IpDynamic {
                    behavior: track.behavior,
                    dont_fragment: v4.dont_fragment,
                    tos: v4.tos,
                    ttl: v4.ttl,
                    ip_id: (track.behavior != IpIdBehavior::Zero).then_some(v4.id),
                },
                IpHeader::V6(v6) => IpDynamic {
                    behavior: IpIdBehavior::Zero,
                    dont_fragment: false,
                    tos: v6.traffic_class,
                    ttl: v6.hop_limit,
                    ip_id: None,
                },
            })
            .collect();

        let udp_checksum = headers.udp.map(|udp| udp.checksum);
        self.udp_checksum_change_count = self.udp_checksum_change_count.saturating_add(1);

        let rtp = headers.rtp.map(|rtp| {
            self.rtp_pt_change_count = self.rtp_pt_change_count.saturating_add(1);

            // The RX block rides along while the stride is being advertised,
            // on IR refreshes in the scaled phase, and whenever the RTP
            // extension bit changed.
            let state = self.ts_sc.state();
            let rx_needed = (!self.ts_sc.is_constant()
                && (state == TsScState::InitStride || (in_ir && state == TsScState::SendScaled)))
                || a.x_changed
                || rtp.extension;
            let rx = rx_needed.then(|| RtpDynamicRx {
                extension: rtp.extension,
                mode: self.mode.to_bits(),
                ts_stride: (state != TsScState::InitTs && !self.ts_sc.is_constant()).then(|| self.ts_sc.stride()),
            });

            RtpDynamic {
                version: rtp.version,
                padding: rtp.padding,
                cc: 0,
                marker: rtp.marker,
                payload_type: rtp.payload_type,
                sn: rtp.sn,
                ts: rtp.ts,
                rx,
            }
        });

        DynamicChain {
            ip,
            v2: None,
            udp_checksum,
            udp_sn: (self.profile == ProfileId::UDP).then_some(a.sn),
            rtp,
        }
    }

    pub(crate) fn compress(
        &mut self,
        env: &CompressEnv,
        headers: &UncompressedHeaders,
        uncomp: &[u8],
        dst: &mut WriteCursor<'_>,
        jitter: &mut rand::rngs::StdRng,
    ) -> CompressResult<RohcPacketKind> {
        let a = self.analyze(headers);
        self.decide_state(env, &a);

        let payload = &uncomp[headers.header_len()..];

        let uo_kind = match self.state {
            CompState::Ir => None,
            CompState::Fo => self.decide_fo_packet(&a),
            CompState::So => self.decide_so_packet(env, &a),
        };

        let kind = match (self.state, uo_kind) {
            (CompState::Ir, _) => {
                let ir = IrPacket {
                    cid: env.cid,
                    profile: self.profile,
                    static_chain: Some(self.static_chain(headers)),
                    dynamic_chain: Some(self.dynamic_chain(&a, headers, true)),
                };

                let required = ir.size(env.cid_type) + payload.len();
                if dst.len() < required {
                    return Err(output_too_small(Self::NAME, required, dst.len()));
                }

                ir.encode(dst, env.cid_type).map_err(|e| encode_error(Self::NAME, e))?;
                dst.write_slice(payload);
                self.ir_count += 1;
                self.after_dynamic_sent();
                trace!(cid = %env.cid, sn = a.sn, "IR");
                RohcPacketKind::Ir
            }
            (_, None) => {
                let ir_dyn = IrDynPacket {
                    cid: env.cid,
                    profile: self.profile,
                    dynamic_chain: self.dynamic_chain(&a, headers, false),
                };

                let required = ir_dyn.size(env.cid_type) + payload.len();
                if dst.len() < required {
                    return Err(output_too_small(Self::NAME, required, dst.len()));
                }

                ir_dyn
                    .encode(dst, env.cid_type)
                    .map_err(|e| encode_error(Self::NAME, e))?;
                dst.write_slice(payload);
                self.ir_dyn_count += 1;
                self.fo_count += 1;
                self.after_dynamic_sent();
                trace!(cid = %env.cid, sn = a.sn, "IR-DYN");
                RohcPacketKind::IrDyn
            }
            (state, Some(kind)) => {
                let packet = self.build_uo_packet(&a, kind, headers)?;

                let trailer_len = self.uo_trailer_len(headers);
                let required = env.cid_type.cid_overhead(env.cid) + packet.size() + trailer_len + payload.len();
                if dst.len() < required {
                    return Err(output_too_small(Self::NAME, required, dst.len()));
                }

                if env.cid_type == rohc_pdu::CidType::Small {
                    rohc_pdu::cid::write_add_cid(dst, env.cid).map_err(|e| encode_error(Self::NAME, e))?;
                    packet.encode(dst).map_err(|e| encode_error(Self::NAME, e))?;
                } else {
                    // Large CIDs ride between the first and second octet.
                    let mut scratch = [0u8; 64];
                    let mut scratch_cursor = WriteCursor::new(&mut scratch);
                    packet.encode(&mut scratch_cursor).map_err(|e| encode_error(Self::NAME, e))?;
                    let len = scratch_cursor.pos();
                    dst.write_u8(scratch[0]);
                    rohc_pdu::cid::write_large_cid(dst, env.cid).map_err(|e| encode_error(Self::NAME, e))?;
                    dst.write_slice(&scratch[1..len]);
                }

                self.write_uo_trailer(headers, dst);
                dst.write_slice(payload);

                if matches!(packet.ext, Some(Extension::Ext3(ref ext3)) if ext3.rtp.as_ref().is_some_and(|rtp| rtp.ts_stride.is_some()))
                {
                    self.ts_sc.stride_transmitted();
                }
                if state == CompState::Fo {
                    self.fo_count += 1;
                }
                trace!(cid = %env.cid, sn = a.sn, ?kind, "UO packet");
                RohcPacketKind::from(kind)
            }
        };

        // Commit the transmitted values as references.
        self.sn_window.add(u32::from(a.sn), u32::from(a.sn));
        for (i, track) in self.tracks.iter_mut().enumerate() {
            if track.behavior.is_sequential() {
                track.offset_window.add(u32::from(a.sn), u32::from(a.offsets[i]));
            }
        }
        if self.profile == ProfileId::RTP {
            self.ts_sc.commit(a.sn, a.ts);
        }
        self.flow = *headers;

        let level = match kind {
            RohcPacketKind::Ir => CompState::Ir,
            RohcPacketKind::IrDyn => CompState::Fo,
            _ => self.state,
        };
        self.refresh.packet_sent(level, env, jitter);

        Ok(kind)
    }

    /// The stride counts as advertised each time a dynamic chain went out;
    /// three advertisements switch the machine to scaled timestamps.
    fn after_dynamic_sent(&mut self) {
        if self.profile == ProfileId::RTP
            && self.ts_sc.state() == TsScState::InitStride
            && !self.ts_sc.is_constant()
        {
            self.ts_sc.stride_transmitted();
        }
    }

    fn build_uo_packet(
        &self,
        a: &Analysis,
        kind: UoPacketType,
        headers: &UncompressedHeaders,
    ) -> CompressResult<UoPacket> {
        let ext = if kind.has_ext_bit() {
            self.decide_extension(a, kind, headers)
        } else {
            None
        };

        let sn_w = kind.base_sn_width();
        let ts_w = kind.base_ts_width();
        let id_w = kind.base_ip_id_width();

        let sn_field = LsbField::new(u32::from(a.sn) & ((1 << sn_w) - 1), sn_w);

        let ts_field = if ts_w > 0 {
            let ts_value = if a.ts_scaled { self.ts_sc.scaled() } else { a.ts };
            LsbField::new(ts_value & ((1 << ts_w) - 1), ts_w)
        } else {
            LsbField::EMPTY
        };

        let id_field = if id_w > 0 {
            let offset = a.base_track.map_or(0, |i| a.offsets[i]);
            LsbField::new(u32::from(offset) & ((1 << id_w) - 1), id_w)
        } else {
            LsbField::EMPTY
        };

        let crc_type = if kind.crc_width() == 3 { CrcType::Crc3 } else { CrcType::Crc7 };
        let crc = headers_crc(crc_type, headers);

        Ok(UoPacket {
            kind,
            sn: sn_field,
            ts: ts_field,
            ip_id: id_field,
            marker: a.marker,
            crc,
            ext,
        })
    }

    fn uo_trailer_len(&self, headers: &UncompressedHeaders) -> usize {
        let random_ids = self
            .tracks
            .iter()
            .filter(|track| track.is_v4 && track.behavior == IpIdBehavior::Random)
            .count();
        random_ids * 2 + usize::from(self.udp_checksum_used && headers.udp.is_some()) * 2
    }

    /// Values the compressed format does not cover ride verbatim after the
    /// base header and extension: random IP-IDs (outer first), then the UDP
    /// checksum.
    fn write_uo_trailer(&self, headers: &UncompressedHeaders, dst: &mut WriteCursor<'_>) {
        for (track, header) in self.tracks.iter().zip(headers.ip.iter()) {
            if track.is_v4 && track.behavior == IpIdBehavior::Random {
                if let IpHeader::V4(v4) = header {
                    dst.write_u16(v4.id);
                }
            }
        }
        if self.udp_checksum_used {
            if let Some(udp) = headers.udp {
                dst.write_u16(udp.checksum);
            }
        }
    }

    pub(crate) fn handle_feedback(&mut self, feedback: &Feedback) {
        match feedback {
            Feedback::One { sn_bits, .. } => {
                self.positive_ack(u32::from(*sn_bits), 8);
            }
            Feedback::Two {
                ack_type,
                mode,
                sn,
                sn_width,
                sn_valid,
                ..
            } => {
                if let Some(mode) = RohcMode::from_bits(*mode) {
                    if mode > self.mode {
                        debug!(?mode, "mode transition requested by feedback");
                        self.mode = mode;
                    }
                }
                match ack_type {
                    AckType::Ack => {
                        if *sn_valid {
                            self.positive_ack(*sn, *sn_width);
                        }
                    }
                    AckType::Nack => {
                        debug!("NACK received, dropping back to FO");
                        self.set_state(CompState::Fo);
                    }
                    AckType::StaticNack => {
                        debug!("STATIC-NACK received, dropping back to IR");
                        self.set_state(CompState::Ir);
                        self.ir_count = 0;
                    }
                }
            }
        }
    }

    /// A positive ACK confirms every reference up to the acknowledged SN
    /// and short-circuits the IR confidence counter.
    fn positive_ack(&mut self, sn_lsbs: u32, width: u8) {
        let mask = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
        // The feedback carries SN LSBs; resolve them against the newest
        // matching window reference.
        let acked = self
            .sn_window
            .refs()
            .filter(|(sn_ref, _)| sn_ref & mask == sn_lsbs & mask)
            .map(|(sn_ref, _)| sn_ref)
            .last();
        if let Some(full_sn) = acked {
            self.sn_window.ack(full_sn);
            for track in &mut self.tracks {
                track.offset_window.ack(full_sn);
            }
            if self.profile == ProfileId::RTP {
                self.ts_sc.ack(full_sn as u16);
            }
        }

        if self.state == CompState::Ir {
            self.ir_count = self.ir_count.max(MAX_IR_COUNT);
            self.set_state(CompState::Fo);
        }
    }
}
