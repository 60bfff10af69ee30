//! Codecs for the uncompressed IPv4/IPv6/UDP/RTP headers.
//!
//! The compressor parses these from the packets it is handed; the
//! decompressor rebuilds them from context state and writes them back out.
//! IPv4 checksums and length fields are recomputed on output.

use rohc_core::{Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor};
use tap::prelude::*;

pub const IPPROTO_IPIP: u8 = 4;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_IPV6: u8 = 41;

/// An IPv4 header without options. Fragments are not compressible and are
/// rejected at parse time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    pub dont_fragment: bool,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: u32,
    pub dst: u32,
}

impl Ipv4Header {
    const NAME: &'static str = "Ipv4Header";
    pub const FIXED_PART_SIZE: usize = 20;
}

impl<'de> Decode<'de> for Ipv4Header {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        rohc_core::ensure_fixed_part_size!(in: src);

        let ver_ihl = src.read_u8();
        if ver_ihl >> 4 != 4 {
            return Err(rohc_core::invalid_field_err!("version", "not IPv4"));
        }
        if ver_ihl & 0x0f != 5 {
            return Err(rohc_core::invalid_field_err!("ihl", "IPv4 options are not supported"));
        }

        let tos = src.read_u8();
        let total_len = src.read_u16();
        let id = src.read_u16();
        let flags_frag = src.read_u16();
        if flags_frag & 0x3fff != 0 {
            return Err(rohc_core::invalid_field_err!(
                "fragment",
                "IP fragments are not compressible"
            ));
        }
        let ttl = src.read_u8();
        let protocol = src.read_u8();
        let checksum = src.read_u16();
        let src_addr = src.read_u32();
        let dst_addr = src.read_u32();

        Ok(Self {
            tos,
            total_len,
            id,
            dont_fragment: flags_frag & 0x4000 != 0,
            ttl,
            protocol,
            checksum,
            src: src_addr,
            dst: dst_addr,
        })
    }
}

impl Encode for Ipv4Header {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        rohc_core::ensure_fixed_part_size!(in: dst);

        let start = dst.pos();
        dst.write_u8(0x45);
        dst.write_u8(self.tos);
        dst.write_u16(self.total_len);
        dst.write_u16(self.id);
        dst.write_u16(if self.dont_fragment { 0x4000 } else { 0 });
        dst.write_u8(self.ttl);
        dst.write_u8(self.protocol);
        dst.write_u16(0); // checksum patched below
        dst.write_u32(self.src);
        dst.write_u32(self.dst);

        let checksum = ipv4_checksum(&dst.inner()[start..start + Self::FIXED_PART_SIZE]);
        dst.inner_mut()[start + 10..start + 12].copy_from_slice(&checksum.to_be_bytes());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

/// An IPv6 header. Extension headers are not supported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv6Header {
    pub traffic_class: u8,
    pub flow_label: u32,
    pub payload_len: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: u128,
    pub dst: u128,
}

impl Ipv6Header {
    const NAME: &'static str = "Ipv6Header";
    pub const FIXED_PART_SIZE: usize = 40;
}

impl<'de> Decode<'de> for Ipv6Header {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        rohc_core::ensure_fixed_part_size!(in: src);

        let first_word = src.read_u32();
        if first_word >> 28 != 6 {
            return Err(rohc_core::invalid_field_err!("version", "not IPv6"));
        }

        let traffic_class = ((first_word >> 20) & 0xff) as u8;
        let flow_label = first_word & 0x000f_ffff;
        let payload_len = src.read_u16();
        let next_header = src.read_u8();
        let hop_limit = src.read_u8();
        let src_addr = src.read_u128();
        let dst_addr = src.read_u128();

        Ok(Self {
            traffic_class,
            flow_label,
            payload_len,
            next_header,
            hop_limit,
            src: src_addr,
            dst: dst_addr,
        })
    }
}

impl Encode for Ipv6Header {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        rohc_core::ensure_fixed_part_size!(in: dst);

        let first_word = (6u32 << 28) | (u32::from(self.traffic_class) << 20) | (self.flow_label & 0x000f_ffff);
        dst.write_u32(first_word);
        dst.write_u16(self.payload_len);
        dst.write_u8(self.next_header);
        dst.write_u8(self.hop_limit);
        dst.write_u128(self.src);
        dst.write_u128(self.dst);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

/// Either flavor of IP header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpHeader {
    V4(Ipv4Header),
    V6(Ipv6Header),
}

impl IpHeader {
    const NAME: &'static str = "IpHeader";

    #[must_use]
    pub const fn is_v4(&self) -> bool {
        matches!(self, IpHeader::V4(_))
    }

    /// Transport (or tunnel) protocol carried by this header.
    #[must_use]
    pub const fn protocol(&self) -> u8 {
        match self {
            IpHeader::V4(v4) => v4.protocol,
            IpHeader::V6(v6) => v6.next_header,
        }
    }

    #[must_use]
    pub const fn header_len(&self) -> usize {
        match self {
            IpHeader::V4(_) => Ipv4Header::FIXED_PART_SIZE,
            IpHeader::V6(_) => Ipv6Header::FIXED_PART_SIZE,
        }
    }
}

impl<'de> Decode<'de> for IpHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        rohc_core::ensure_size!(in: src, size: 1);

        match src.peek_u8() >> 4 {
            4 => Ipv4Header::decode(src)?.pipe(IpHeader::V4).pipe(Ok),
            6 => Ipv6Header::decode(src)?.pipe(IpHeader::V6).pipe(Ok),
            _ => Err(rohc_core::invalid_field_err!("version", "neither IPv4 nor IPv6")),
        }
    }
}

impl Encode for IpHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        match self {
            IpHeader::V4(v4) => v4.encode(dst),
            IpHeader::V6(v6) => v6.encode(dst),
        }
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.header_len()
    }
}

/// A UDP header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    const NAME: &'static str = "UdpHeader";
    pub const FIXED_PART_SIZE: usize = 8;
}

impl<'de> Decode<'de> for UdpHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        rohc_core::ensure_fixed_part_size!(in: src);

        Ok(Self {
            src_port: src.read_u16(),
            dst_port: src.read_u16(),
            length: src.read_u16(),
            checksum: src.read_u16(),
        })
    }
}

impl Encode for UdpHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        rohc_core::ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.src_port);
        dst.write_u16(self.dst_port);
        dst.write_u16(self.length);
        dst.write_u16(self.checksum);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

/// An RTP header without CSRC entries (flows with a CSRC list do not match
/// the RTP profile).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub cc: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sn: u16,
    pub ts: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    const NAME: &'static str = "RtpHeader";
    pub const FIXED_PART_SIZE: usize = 12;

    /// `V|P|X|CC` octet.
    #[must_use]
    pub fn first_octet(&self) -> u8 {
        (self.version << 6) | (u8::from(self.padding) << 5) | (u8::from(self.extension) << 4) | (self.cc & 0x0f)
    }

    /// `M|PT` octet.
    #[must_use]
    pub fn second_octet(&self) -> u8 {
        (u8::from(self.marker) << 7) | (self.payload_type & 0x7f)
    }
}

impl<'de> Decode<'de> for RtpHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        rohc_core::ensure_fixed_part_size!(in: src);

        let first = src.read_u8();
        let second = src.read_u8();
        let sn = src.read_u16();
        let ts = src.read_u32();
        let ssrc = src.read_u32();

        Ok(Self {
            version: first >> 6,
            padding: first & 0x20 != 0,
            extension: first & 0x10 != 0,
            cc: first & 0x0f,
            marker: second & 0x80 != 0,
            payload_type: second & 0x7f,
            sn,
            ts,
            ssrc,
        })
    }
}

impl Encode for RtpHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        rohc_core::ensure_fixed_part_size!(in: dst);

        dst.write_u8(self.first_octet());
        dst.write_u8(self.second_octet());
        dst.write_u16(self.sn);
        dst.write_u32(self.ts);
        dst.write_u32(self.ssrc);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

/// The nest of IP headers of a flow: one or two, innermost last.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpHeaders {
    pub first: IpHeader,
    pub second: Option<IpHeader>,
}

impl IpHeaders {
    #[must_use]
    pub const fn count(&self) -> usize {
        if self.second.is_some() {
            2
        } else {
            1
        }
    }

    #[must_use]
    pub const fn innermost(&self) -> &IpHeader {
        match &self.second {
            Some(inner) => inner,
            None => &self.first,
        }
    }

    /// The outer header, when two headers are nested.
    #[must_use]
    pub const fn outer(&self) -> Option<&IpHeader> {
        if self.second.is_some() {
            Some(&self.first)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpHeader> {
        core::iter::once(&self.first).chain(self.second.as_ref())
    }

    #[must_use]
    pub fn header_len(&self) -> usize {
        self.iter().map(IpHeader::header_len).sum()
    }
}

/// Everything a profile compresses: the header nest plus the transport part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UncompressedHeaders {
    pub ip: IpHeaders,
    pub udp: Option<UdpHeader>,
    pub rtp: Option<RtpHeader>,
}

impl UncompressedHeaders {
    const NAME: &'static str = "UncompressedHeaders";

    /// Parses the IP header nest and, when the innermost protocol is UDP and
    /// enough bytes remain, the UDP header. RTP is attached separately once
    /// flow classification decided the stream is RTP.
    pub fn parse(src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        let first = IpHeader::decode(src)?;

        let second = match first.protocol() {
            IPPROTO_IPIP | IPPROTO_IPV6 => {
                let inner = IpHeader::decode(src)?;
                match inner.protocol() {
                    IPPROTO_IPIP | IPPROTO_IPV6 => {
                        return Err(rohc_core::invalid_field_err!(
                            "ip headers",
                            "more than two nested IP headers"
                        ));
                    }
                    _ => Some(inner),
                }
            }
            _ => None,
        };

        let ip = IpHeaders { first, second };

        let udp = if ip.innermost().protocol() == IPPROTO_UDP && src.len() >= UdpHeader::FIXED_PART_SIZE {
            Some(UdpHeader::decode(src)?)
        } else {
            None
        };

        Ok(Self { ip, udp, rtp: None })
    }

    /// Parses the RTP header following the UDP header and attaches it.
    pub fn attach_rtp(&mut self, src: &mut ReadCursor<'_>) -> DecodeResult<()> {
        debug_assert!(self.udp.is_some());
        self.rtp = Some(RtpHeader::decode(src)?);
        Ok(())
    }

    /// Total length of the headers this bundle describes.
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.ip.header_len()
            + self.udp.map_or(0, |_| UdpHeader::FIXED_PART_SIZE)
            + self.rtp.map_or(0, |_| RtpHeader::FIXED_PART_SIZE)
    }

    /// Recomputes every length field for a payload of `payload_len` bytes
    /// (the payload is whatever follows the headers of this bundle).
    pub fn set_payload_len(&mut self, payload_len: usize) {
        let udp_len = self.udp.map_or(0, |_| UdpHeader::FIXED_PART_SIZE)
            + self.rtp.map_or(0, |_| RtpHeader::FIXED_PART_SIZE)
            + payload_len;

        if let Some(udp) = &mut self.udp {
            udp.length = udp_len as u16;
        }

        // Walk outermost to innermost, each layer covering what is below it.
        let mut below = self.ip.second.map_or(0, |h| h.header_len())
            + self.udp.map_or(0, |_| UdpHeader::FIXED_PART_SIZE)
            + self.rtp.map_or(0, |_| RtpHeader::FIXED_PART_SIZE)
            + payload_len;
        match &mut self.ip.first {
            IpHeader::V4(v4) => v4.total_len = (below + Ipv4Header::FIXED_PART_SIZE) as u16,
            IpHeader::V6(v6) => v6.payload_len = below as u16,
        }
        if let Some(inner) = &mut self.ip.second {
            below -= inner.header_len();
            match inner {
                IpHeader::V4(v4) => v4.total_len = (below + Ipv4Header::FIXED_PART_SIZE) as u16,
                IpHeader::V6(v6) => v6.payload_len = below as u16,
            }
        }
    }
}

impl Encode for UncompressedHeaders {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        rohc_core::ensure_size!(in: dst, size: self.header_len());

        for ip in self.ip.iter() {
            ip.encode(dst)?;
        }
        if let Some(udp) = &self.udp {
            udp.encode(dst)?;
        }
        if let Some(rtp) = &self.rtp {
            rtp.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.header_len()
    }
}

/// Standard ones-complement IPv4 header checksum.
#[must_use]
pub fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in header.chunks(2) {
        let word = if chunk.len() == 2 {
            u32::from(u16::from_be_bytes([chunk[0], chunk[1]]))
        } else {
            u32::from(chunk[0]) << 8
        };
        sum += word;
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ipv4() -> Ipv4Header {
        Ipv4Header {
            tos: 0,
            total_len: 40,
            id: 0x1234,
            dont_fragment: true,
            ttl: 64,
            protocol: IPPROTO_UDP,
            checksum: 0,
            src: 0xc0a8_0001,
            dst: 0xc0a8_0002,
        }
    }

    #[test]
    fn ipv4_round_trip_and_checksum() {
        let header = sample_ipv4();
        let bytes = rohc_core::encode_vec(&header).unwrap();
        assert_eq!(ipv4_checksum(&bytes), 0);

        let decoded: Ipv4Header = rohc_core::decode(&bytes).unwrap();
        assert_eq!(decoded.id, header.id);
        assert_eq!(decoded.src, header.src);
        assert!(decoded.dont_fragment);
    }

    #[test]
    fn fragments_are_rejected() {
        let header = sample_ipv4();
        let mut bytes = rohc_core::encode_vec(&header).unwrap();
        bytes[6] = 0x20; // more-fragments flag
        assert!(rohc_core::decode::<Ipv4Header>(&bytes).is_err());
    }

    #[test]
    fn parse_udp_flow() {
        let mut packet = Vec::new();
        let mut ip = sample_ipv4();
        ip.total_len = 20 + 8 + 4;
        packet.extend_from_slice(&rohc_core::encode_vec(&ip).unwrap());
        let udp = UdpHeader {
            src_port: 5004,
            dst_port: 5004,
            length: 12,
            checksum: 0xbeef,
        };
        packet.extend_from_slice(&rohc_core::encode_vec(&udp).unwrap());
        packet.extend_from_slice(&[1, 2, 3, 4]);

        let mut cursor = ReadCursor::new(&packet);
        let headers = UncompressedHeaders::parse(&mut cursor).unwrap();
        assert_eq!(headers.ip.count(), 1);
        assert_eq!(headers.udp.unwrap().dst_port, 5004);
        assert_eq!(headers.header_len(), 28);
        assert_eq!(cursor.remaining(), &[1, 2, 3, 4]);
    }

    #[test]
    fn payload_len_recomputation() {
        let mut packet = Vec::new();
        packet.extend_from_slice(&rohc_core::encode_vec(&sample_ipv4()).unwrap());
        let udp = UdpHeader {
            src_port: 1,
            dst_port: 2,
            length: 0,
            checksum: 0,
        };
        packet.extend_from_slice(&rohc_core::encode_vec(&udp).unwrap());

        let mut cursor = ReadCursor::new(&packet);
        let mut headers = UncompressedHeaders::parse(&mut cursor).unwrap();
        headers.set_payload_len(100);

        assert_eq!(headers.udp.unwrap().length, 108);
        match headers.ip.first {
            IpHeader::V4(v4) => assert_eq!(v4.total_len, 128),
            IpHeader::V6(_) => unreachable!(),
        }
    }
}
