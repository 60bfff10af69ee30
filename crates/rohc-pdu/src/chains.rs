//! Static and dynamic chains carried by IR, IR-DYN and co_repair packets.
//!
//! The chain contents are dictated by the profile: the IP parts always
//! lead (outer before inner, the innermost flagged), followed by the UDP
//! and RTP parts when the profile compresses them. The ROHCv2 IP profile
//! appends its reorder ratio and MSN to the innermost IP dynamic part.

use rohc_core::{DecodeResult, EncodeResult, ReadCursor, WriteCursor};

use crate::packet::{IpIdBehavior, ReorderRatio};
use crate::profile::ProfileId;
use crate::sdvl;

/// Static part of one IPv4 header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Static {
    pub innermost: bool,
    pub protocol: u8,
    pub src: u32,
    pub dst: u32,
}

/// Static part of one IPv6 header. A `flow_label` of `None` selects the
/// compact no-flow-label form.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ipv6Static {
    pub innermost: bool,
    pub flow_label: Option<u32>,
    pub next_header: u8,
    pub src: u128,
    pub dst: u128,
}

/// Static part of one IP header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IpStatic {
    V4(Ipv4Static),
    V6(Ipv6Static),
}

impl IpStatic {
    const NAME: &'static str = "IpStatic";

    #[must_use]
    pub const fn innermost(&self) -> bool {
        match self {
            IpStatic::V4(v4) => v4.innermost,
            IpStatic::V6(v6) => v6.innermost,
        }
    }

    #[must_use]
    pub const fn is_v4(&self) -> bool {
        matches!(self, IpStatic::V4(_))
    }

    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            IpStatic::V4(_) => 10,
            IpStatic::V6(v6) => 2 + if v6.flow_label.is_some() { 3 } else { 0 } + 32,
        }
    }

    fn decode(src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        rohc_core::ensure_size!(in: src, size: 2);

        let first = src.read_u8();
        let innermost = first & 0x08 != 0;

        match first >> 4 {
            4 => {
                rohc_core::ensure_size!(in: src, size: 9);
                Ok(IpStatic::V4(Ipv4Static {
                    innermost,
                    protocol: src.read_u8(),
                    src: src.read_u32(),
                    dst: src.read_u32(),
                }))
            }
            6 => {
                let fl_present = first & 0x04 != 0;
                rohc_core::ensure_size!(in: src, size: 1 + if fl_present { 3 } else { 0 } + 32);
                let next_header = src.read_u8();
                let flow_label = if fl_present {
                    let high = u32::from(src.read_u8() & 0x0f);
                    Some((high << 16) | u32::from(src.read_u16()))
                } else {
                    None
                };
                Ok(IpStatic::V6(Ipv6Static {
                    innermost,
                    flow_label,
                    next_header,
                    src: src.read_u128(),
                    dst: src.read_u128(),
                }))
            }
            _ => Err(rohc_core::invalid_field_err!("version", "neither IPv4 nor IPv6")),
        }
    }

    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        rohc_core::ensure_size!(in: dst, size: self.size());

        match self {
            IpStatic::V4(v4) => {
                dst.write_u8(0x40 | (u8::from(v4.innermost) << 3));
                dst.write_u8(v4.protocol);
                dst.write_u32(v4.src);
                dst.write_u32(v4.dst);
            }
            IpStatic::V6(v6) => {
                dst.write_u8(0x60 | (u8::from(v6.innermost) << 3) | (u8::from(v6.flow_label.is_some()) << 2));
                dst.write_u8(v6.next_header);
                if let Some(flow) = v6.flow_label {
                    dst.write_u8(((flow >> 16) & 0x0f) as u8);
                    dst.write_u16((flow & 0xffff) as u16);
                }
                dst.write_u128(v6.src);
                dst.write_u128(v6.dst);
            }
        }

        Ok(())
    }
}

/// Static part of the UDP header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UdpStatic {
    pub src_port: u16,
    pub dst_port: u16,
}

/// Static part of the RTP header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RtpStatic {
    pub ssrc: u32,
}

/// The whole static chain of a context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticChain {
    pub ip: Vec<IpStatic>,
    pub udp: Option<UdpStatic>,
    pub rtp: Option<RtpStatic>,
}

impl StaticChain {
    const NAME: &'static str = "StaticChain";

    /// Which transport parts a profile carries in its chains.
    fn parts(profile: ProfileId) -> (bool, bool) {
        match profile {
            ProfileId::RTP => (true, true),
            ProfileId::UDP => (true, false),
            _ => (false, false),
        }
    }

    pub fn decode(src: &mut ReadCursor<'_>, profile: ProfileId) -> DecodeResult<Self> {
        let mut ip = Vec::with_capacity(crate::MAX_IP_HEADERS);
        loop {
            let part = IpStatic::decode(src)?;
            let innermost = part.innermost();
            ip.push(part);
            if innermost {
                break;
            }
            if ip.len() == crate::MAX_IP_HEADERS {
                return Err(rohc_core::invalid_field_err!(
                    "ip chain",
                    "innermost flag missing within the supported nest depth"
                ));
            }
        }

        let (want_udp, want_rtp) = Self::parts(profile);

        let udp = if want_udp {
            rohc_core::ensure_size!(in: src, size: 4);
            Some(UdpStatic {
                src_port: src.read_u16(),
                dst_port: src.read_u16(),
            })
        } else {
            None
        };

        let rtp = if want_rtp {
            rohc_core::ensure_size!(in: src, size: 4);
            Some(RtpStatic { ssrc: src.read_u32() })
        } else {
            None
        };

        Ok(Self { ip, udp, rtp })
    }

    pub fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        rohc_core::ensure_size!(in: dst, size: self.size());

        for part in &self.ip {
            part.encode(dst)?;
        }
        if let Some(udp) = &self.udp {
            dst.write_u16(udp.src_port);
            dst.write_u16(udp.dst_port);
        }
        if let Some(rtp) = &self.rtp {
            dst.write_u32(rtp.ssrc);
        }

        Ok(())
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.ip.iter().map(IpStatic::size).sum::<usize>()
            + self.udp.map_or(0, |_| 4)
            + self.rtp.map_or(0, |_| 4)
    }
}

/// Dynamic part of one IP header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IpDynamic {
    pub behavior: IpIdBehavior,
    pub dont_fragment: bool,
    pub tos: u8,
    pub ttl: u8,
    /// Present unless the behavior is zero.
    pub ip_id: Option<u16>,
}

impl IpDynamic {
    const NAME: &'static str = "IpDynamic";

    #[must_use]
    pub fn size(&self) -> usize {
        3 + self.ip_id.map_or(0, |_| 2)
    }

    fn decode(src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        rohc_core::ensure_size!(in: src, size: 3);

        let first = src.read_u8();
        let behavior = IpIdBehavior::from_bits(first & 0x3);
        let dont_fragment = first & 0x04 != 0;
        let tos = src.read_u8();
        let ttl = src.read_u8();

        let ip_id = if behavior == IpIdBehavior::Zero {
            None
        } else {
            rohc_core::ensure_size!(in: src, size: 2);
            Some(src.read_u16())
        };

        Ok(Self {
            behavior,
            dont_fragment,
            tos,
            ttl,
            ip_id,
        })
    }

    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        rohc_core::ensure_size!(in: dst, size: self.size());

        dst.write_u8((u8::from(self.dont_fragment) << 2) | self.behavior.to_bits());
        dst.write_u8(self.tos);
        dst.write_u8(self.ttl);
        match (self.behavior, self.ip_id) {
            (IpIdBehavior::Zero, _) => {}
            (_, Some(id)) => dst.write_u16(id),
            (_, None) => {
                return Err(rohc_core::invalid_field_err!(
                    "ip_id",
                    "required for non-zero IP-ID behaviors"
                ));
            }
        }

        Ok(())
    }
}

/// The `RX` block of the RTP dynamic part.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RtpDynamicRx {
    pub extension: bool,
    pub mode: u8,
    /// SDVL-encoded TS stride, when advertised.
    pub ts_stride: Option<u32>,
}

/// Dynamic part of the UDP + RTP headers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RtpDynamic {
    pub version: u8,
    pub padding: bool,
    pub cc: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sn: u16,
    pub ts: u32,
    pub rx: Option<RtpDynamicRx>,
}

impl RtpDynamic {
    const NAME: &'static str = "RtpDynamic";

    #[must_use]
    pub fn size(&self) -> usize {
        // V|P|RX|CC, M|PT, SN, TS, CSRC terminator
        let mut size = 1 + 1 + 2 + 4 + 1;
        if let Some(rx) = &self.rx {
            size += 1;
            if let Some(stride) = rx.ts_stride {
                size += sdvl::size_of(stride).unwrap_or(4);
            }
        }
        size
    }

    fn decode(src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        rohc_core::ensure_size!(in: src, size: 9);

        let first = src.read_u8();
        let version = first >> 6;
        let padding = first & 0x20 != 0;
        let rx_present = first & 0x10 != 0;
        let cc = first & 0x0f;

        let second = src.read_u8();
        let marker = second & 0x80 != 0;
        let payload_type = second & 0x7f;

        let sn = src.read_u16();
        let ts = src.read_u32();

        let csrc_terminator = src.read_u8();
        if csrc_terminator != 0 {
            return Err(rohc_core::invalid_field_err!(
                "csrc list",
                "generic CSRC lists are not supported"
            ));
        }

        let rx = if rx_present {
            rohc_core::ensure_size!(in: src, size: 1);
            let flags = src.read_u8();
            let extension = flags & 0x10 != 0;
            let mode = (flags >> 2) & 0x3;
            let tis = flags & 0x02 != 0;
            let tss = flags & 0x01 != 0;
            if tis {
                return Err(rohc_core::invalid_field_err!(
                    "tis",
                    "time stride is not supported"
                ));
            }
            let ts_stride = if tss {
                let (stride, _) = sdvl::read(src)
                    .map_err(|_| rohc_core::invalid_field_err("RtpDynamic", "ts_stride", "malformed SDVL"))?;
                Some(stride)
            } else {
                None
            };
            Some(RtpDynamicRx {
                extension,
                mode,
                ts_stride,
            })
        } else {
            None
        };

        Ok(Self {
            version,
            padding,
            cc,
            marker,
            payload_type,
            sn,
            ts,
            rx,
        })
    }

    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        rohc_core::ensure_size!(in: dst, size: self.size());

        dst.write_u8(
            (self.version << 6) | (u8::from(self.padding) << 5) | (u8::from(self.rx.is_some()) << 4) | (self.cc & 0x0f),
        );
        dst.write_u8((u8::from(self.marker) << 7) | (self.payload_type & 0x7f));
        dst.write_u16(self.sn);
        dst.write_u32(self.ts);
        dst.write_u8(0x00); // CSRC list terminator

        if let Some(rx) = &self.rx {
            dst.write_u8((u8::from(rx.extension) << 4) | ((rx.mode & 0x3) << 2) | u8::from(rx.ts_stride.is_some()));
            if let Some(stride) = rx.ts_stride {
                sdvl::write(dst, stride)
                    .map_err(|_| rohc_core::invalid_field_err("RtpDynamic", "ts_stride", "exceeds 29 bits"))?;
            }
        }

        Ok(())
    }
}

/// ROHCv2 trailer of the innermost IP dynamic part.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct V2Dynamic {
    pub reorder_ratio: ReorderRatio,
    pub msn: u16,
}

/// The whole dynamic chain of a context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicChain {
    pub ip: Vec<IpDynamic>,
    pub v2: Option<V2Dynamic>,
    pub udp_checksum: Option<u16>,
    /// Compressor-generated SN (IP/UDP profile only; the RTP profile's SN
    /// lives in the RTP part).
    pub udp_sn: Option<u16>,
    pub rtp: Option<RtpDynamic>,
}

impl DynamicChain {
    const NAME: &'static str = "DynamicChain";

    pub fn decode(src: &mut ReadCursor<'_>, profile: ProfileId, ip_count: usize) -> DecodeResult<Self> {
        let mut ip = Vec::with_capacity(ip_count);
        for _ in 0..ip_count {
            ip.push(IpDynamic::decode(src)?);
        }

        let v2 = if profile.is_v2() {
            rohc_core::ensure_size!(in: src, size: 3);
            let flags = src.read_u8();
            Some(V2Dynamic {
                reorder_ratio: ReorderRatio::from_bits(flags & 0x3),
                msn: src.read_u16(),
            })
        } else {
            None
        };

        let udp_checksum = if matches!(profile, ProfileId::UDP | ProfileId::RTP) {
            rohc_core::ensure_size!(in: src, size: 2);
            Some(src.read_u16())
        } else {
            None
        };

        let udp_sn = if profile == ProfileId::UDP {
            rohc_core::ensure_size!(in: src, size: 2);
            Some(src.read_u16())
        } else {
            None
        };

        let rtp = if profile == ProfileId::RTP {
            Some(RtpDynamic::decode(src)?)
        } else {
            None
        };

        Ok(Self {
            ip,
            v2,
            udp_checksum,
            udp_sn,
            rtp,
        })
    }

    pub fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        rohc_core::ensure_size!(in: dst, size: self.size());

        for part in &self.ip {
            part.encode(dst)?;
        }
        if let Some(v2) = &self.v2 {
            dst.write_u8(v2.reorder_ratio.to_bits());
            dst.write_u16(v2.msn);
        }
        if let Some(checksum) = self.udp_checksum {
            dst.write_u16(checksum);
        }
        if let Some(sn) = self.udp_sn {
            dst.write_u16(sn);
        }
        if let Some(rtp) = &self.rtp {
            rtp.encode(dst)?;
        }

        Ok(())
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.ip.iter().map(IpDynamic::size).sum::<usize>()
            + self.v2.map_or(0, |_| 3)
            + self.udp_checksum.map_or(0, |_| 2)
            + self.udp_sn.map_or(0, |_| 2)
            + self.rtp.as_ref().map_or(0, RtpDynamic::size)
    }
}
