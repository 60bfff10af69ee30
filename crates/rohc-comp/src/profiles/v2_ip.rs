//! The ROHCv2 IP-only compression profile (RFC 5225, profile 0x0104).
//!
//! Two states: IR establishes the static and dynamic chains, Normal
//! carries packets verbatim once the context is trusted. A NACK from the
//! peer triggers a co_repair re-synchronizing the dynamic part.

use rohc_core::WriteCursor;
use rohc_encodings::classify_ip_id;
use rohc_pdu::chains::{DynamicChain, IpDynamic, IpStatic, Ipv4Static, Ipv6Static, StaticChain, V2Dynamic};
use rohc_pdu::crc::{control_crc3, headers_crc, CrcType};
use rohc_pdu::feedback::{AckType, Feedback};
use rohc_pdu::headers::{IpHeader, UncompressedHeaders};
use rohc_pdu::ir::IrPacket;
use rohc_pdu::v2::{self, CoRepairPacket};
use rohc_pdu::{IpIdBehavior, PacketType, ProfileId, ReorderRatio, RohcPacketKind};

use crate::profiles::{CompState, CompressEnv, RefreshClock, MAX_IR_COUNT};
use crate::{encode_error, output_too_small, CompressResult};

struct IpTrack {
    behavior: IpIdBehavior,
    last_id: u16,
}

/// ROHCv2 IP-only context.
pub(crate) struct V2IpContext {
    state: CompState,
    ir_count: usize,
    msn: u16,
    reorder_ratio: ReorderRatio,
    flow: UncompressedHeaders,
    tracks: Vec<IpTrack>,
    refresh: RefreshClock,
    repair_needed: bool,
    /// Set until the first packet is compressed; IP-ID classification needs
    /// two distinct observations.
    fresh: bool,
}

impl V2IpContext {
    const NAME: &'static str = "V2IpContext";

    pub(crate) fn new(headers: &UncompressedHeaders) -> Self {
        let tracks = headers
            .ip
            .iter()
            .map(|ip| match ip {
                IpHeader::V4(v4) => IpTrack {
                    behavior: if v4.id == 0 {
                        IpIdBehavior::Zero
                    } else {
                        IpIdBehavior::Sequential
                    },
                    last_id: v4.id,
                },
                IpHeader::V6(_) => IpTrack {
                    behavior: IpIdBehavior::Zero,
                    last_id: 0,
                },
            })
            .collect();

        Self {
            state: CompState::Ir,
            ir_count: 0,
            msn: 0,
            reorder_ratio: ReorderRatio::None,
            flow: *headers,
            tracks,
            refresh: RefreshClock::new(),
            repair_needed: false,
            fresh: true,
        }
    }

    pub(crate) fn matches(&self, headers: &UncompressedHeaders) -> bool {
        if headers.ip.count() != self.flow.ip.count() {
            return false;
        }
        self.flow.ip.iter().zip(headers.ip.iter()).all(|(a, b)| match (a, b) {
            (IpHeader::V4(a), IpHeader::V4(b)) => a.src == b.src && a.dst == b.dst && a.protocol == b.protocol,
            (IpHeader::V6(a), IpHeader::V6(b)) => {
                a.src == b.src && a.dst == b.dst && a.next_header == b.next_header && a.flow_label == b.flow_label
            }
            _ => false,
        })
    }

    fn update_tracks(&mut self, headers: &UncompressedHeaders) {
        if self.fresh {
            self.fresh = false;
            return;
        }
        for (track, ip) in self.tracks.iter_mut().zip(headers.ip.iter()) {
            if let IpHeader::V4(v4) = ip {
                track.behavior = classify_ip_id(track.last_id, v4.id);
                track.last_id = v4.id;
            }
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

        StaticChain {
            ip,
            udp: None,
            rtp: None,
        }
    }

    fn dynamic_chain(&self, headers: &UncompressedHeaders) -> DynamicChain {
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

        DynamicChain {
            ip,
            v2: Some(V2Dynamic {
                reorder_ratio: self.reorder_ratio,
                msn: self.msn,
            }),
            udp_checksum: None,
            udp_sn: None,
            rtp: None,
        }
    }

    fn ipv4_behaviors(&self, headers: &UncompressedHeaders) -> Vec<u8> {
        headers
            .ip
            .iter()
            .zip(self.tracks.iter())
            .filter(|(header, _)| header.is_v4())
            .map(|(_, track)| track.behavior.to_bits())
            .collect()
    }

    pub(crate) fn compress(
        &mut self,
        env: &CompressEnv,
        headers: &UncompressedHeaders,
        uncomp: &[u8],
        dst: &mut WriteCursor<'_>,
        jitter: &mut rand::rngs::StdRng,
    ) -> CompressResult<RohcPacketKind> {
        self.update_tracks(headers);
        self.msn = self.msn.wrapping_add(1);

        // Normal packets are forbidden while the first octet would parse as
        // a reserved ROHC type (never the case for real IP packets).
        let must_ir = PacketType::collides_with_reserved(uncomp[0]);

        if self.state == CompState::Ir && self.ir_count >= MAX_IR_COUNT {
            self.state = CompState::Fo;
        }
        if self.refresh.ir_due(env) {
            debug!(cid = %env.cid, "periodic downgrade to IR");
            self.state = CompState::Ir;
            self.ir_count = 0;
        }

        let payload = &uncomp[headers.header_len()..];

        let kind = if must_ir || self.state == CompState::Ir {
            let ir = IrPacket {
                cid: env.cid,
                profile: ProfileId::IP_V2,
                static_chain: Some(self.static_chain(headers)),
                dynamic_chain: Some(self.dynamic_chain(headers)),
            };

            let required = ir.size(env.cid_type) + payload.len();
            if dst.len() < required {
                return Err(output_too_small(Self::NAME, required, dst.len()));
            }

            ir.encode(dst, env.cid_type).map_err(|e| encode_error(Self::NAME, e))?;
            dst.write_slice(payload);
            self.ir_count += 1;
            self.repair_needed = false;
            trace!(cid = %env.cid, msn = self.msn, "v2 IR");
            RohcPacketKind::Ir
        } else if self.repair_needed {
            let repair = CoRepairPacket {
                cid: env.cid,
                header_crc: headers_crc(CrcType::Crc7, headers),
                control_crc: control_crc3(self.reorder_ratio.to_bits(), self.msn, &self.ipv4_behaviors(headers)),
                dynamic_chain: self.dynamic_chain(headers),
            };

            let required = repair.size(env.cid_type) + payload.len();
            if dst.len() < required {
                return Err(output_too_small(Self::NAME, required, dst.len()));
            }

            repair
                .encode(dst, env.cid_type)
                .map_err(|e| encode_error(Self::NAME, e))?;
            dst.write_slice(payload);
            self.repair_needed = false;
            debug!(cid = %env.cid, msn = self.msn, "v2 co_repair");
            RohcPacketKind::CoRepair
        } else {
            let required = env.cid_type.cid_overhead(env.cid) + uncomp.len();
            if dst.len() < required {
                return Err(output_too_small(Self::NAME, required, dst.len()));
            }

            v2::encode_normal(dst, env.cid_type, env.cid, uncomp).map_err(|e| encode_error(Self::NAME, e))?;
            RohcPacketKind::Normal
        };

        self.flow = *headers;
        let level = if kind == RohcPacketKind::Ir {
            CompState::Ir
        } else {
            CompState::Fo
        };
        self.refresh.packet_sent(level, env, jitter);

        Ok(kind)
    }

    pub(crate) fn handle_feedback(&mut self, feedback: &Feedback) {
        match feedback {
            Feedback::One { .. } => {
                if self.state == CompState::Ir {
                    self.state = CompState::Fo;
                }
            }
            Feedback::Two { ack_type, .. } => match ack_type {
                AckType::Ack => {
                    if self.state == CompState::Ir {
                        self.state = CompState::Fo;
                    }
                }
                AckType::Nack => {
                    debug!("NACK received, scheduling co_repair");
                    self.repair_needed = true;
                }
                AckType::StaticNack => {
                    debug!("STATIC-NACK received, going back to IR");
                    self.state = CompState::Ir;
                    self.ir_count = 0;
                }
            },
        }
    }
}
