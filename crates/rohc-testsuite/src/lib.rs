//! Packet builders shared by the ROHC integration tests.

use rohc_core::{encode_vec, Encode};
use rohc_pdu::headers::{Ipv4Header, Ipv6Header, RtpHeader, UdpHeader, IPPROTO_IPIP, IPPROTO_UDP};

/// Parameters of a synthetic RTP flow.
#[derive(Clone, Copy, Debug)]
pub struct RtpFlow {
    pub src_addr: u32,
    pub dst_addr: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub ssrc: u32,
    pub base_sn: u16,
    pub base_ts: u32,
    pub ts_stride: u32,
    pub base_ip_id: u16,
    pub payload_type: u8,
}

impl Default for RtpFlow {
    fn default() -> Self {
        Self {
            src_addr: 0xc0a8_0114,
            dst_addr: 0xc0a8_01fe,
            src_port: 5002,
            dst_port: 5004,
            ssrc: 0x1234_5678,
            base_sn: 100,
            base_ts: 16_000,
            ts_stride: 160,
            base_ip_id: 0x2000,
            payload_type: 8, // PCMA
        }
    }
}

impl RtpFlow {
    /// Builds the `index`-th packet of the flow: SN and IP-ID advance by
    /// one, TS by the stride.
    #[must_use]
    pub fn packet(&self, index: u16, marker: bool, payload: &[u8]) -> Vec<u8> {
        let rtp = RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            cc: 0,
            marker,
            payload_type: self.payload_type,
            sn: self.base_sn.wrapping_add(index),
            ts: self.base_ts.wrapping_add(u32::from(index) * self.ts_stride),
            ssrc: self.ssrc,
        };
        self.packet_with_rtp(index, rtp, payload)
    }

    /// Same, with full control over the RTP header.
    #[must_use]
    pub fn packet_with_rtp(&self, index: u16, rtp: RtpHeader, payload: &[u8]) -> Vec<u8> {
        let udp_len = UdpHeader::FIXED_PART_SIZE + RtpHeader::FIXED_PART_SIZE + payload.len();
        let udp = UdpHeader {
            src_port: self.src_port,
            dst_port: self.dst_port,
            length: udp_len as u16,
            checksum: 0,
        };
        let ip = Ipv4Header {
            tos: 0,
            total_len: (Ipv4Header::FIXED_PART_SIZE + udp_len) as u16,
            id: self.base_ip_id.wrapping_add(index),
            dont_fragment: false,
            ttl: 64,
            protocol: IPPROTO_UDP,
            checksum: 0,
            src: self.src_addr,
            dst: self.dst_addr,
        };

        assemble(&[&ip, &udp, &rtp], payload)
    }
}

/// An IPv4-in-IPv4 tunneled RTP flow (double IP header).
#[derive(Clone, Copy, Debug)]
pub struct TunneledRtpFlow {
    pub flow: RtpFlow,
    pub outer_src: u32,
    pub outer_dst: u32,
    pub outer_base_id: u16,
    /// Outer IP-ID advance per packet: 1 keeps the offset from the SN
    /// constant, anything larger makes the outer header own W-LSB bits on
    /// every packet.
    pub outer_id_step: u16,
}

impl Default for TunneledRtpFlow {
    fn default() -> Self {
        Self {
            flow: RtpFlow::default(),
            outer_src: 0x0a01_0001,
            outer_dst: 0x0a01_0002,
            outer_base_id: 0x4000,
            outer_id_step: 1,
        }
    }
}

impl TunneledRtpFlow {
    #[must_use]
    pub fn packet(&self, index: u16, marker: bool, payload: &[u8]) -> Vec<u8> {
        let inner = self.flow.packet(index, marker, payload);
        let outer = Ipv4Header {
            tos: 0,
            total_len: (Ipv4Header::FIXED_PART_SIZE + inner.len()) as u16,
            id: self.outer_base_id.wrapping_add(index.wrapping_mul(self.outer_id_step)),
            dont_fragment: false,
            ttl: 64,
            protocol: IPPROTO_IPIP,
            checksum: 0,
            src: self.outer_src,
            dst: self.outer_dst,
        };
        assemble(&[&outer], &inner)
    }
}

/// Parameters of a synthetic IPv6/UDP flow (no RTP).
#[derive(Clone, Copy, Debug)]
pub struct UdpV6Flow {
    pub src_addr: u128,
    pub dst_addr: u128,
    pub flow_label: u32,
    pub src_port: u16,
    pub dst_port: u16,
}

impl Default for UdpV6Flow {
    fn default() -> Self {
        Self {
            src_addr: 0x2001_0db8_0000_0000_0000_0000_0000_0001,
            dst_addr: 0x2001_0db8_0000_0000_0000_0000_0000_0002,
            flow_label: 0x12345,
            // Odd destination port: the default RTP detector must not fire.
            src_port: 9000,
            dst_port: 9001,
        }
    }
}

impl UdpV6Flow {
    #[must_use]
    pub fn packet(&self, payload: &[u8]) -> Vec<u8> {
        let udp_len = UdpHeader::FIXED_PART_SIZE + payload.len();
        let udp = UdpHeader {
            src_port: self.src_port,
            dst_port: self.dst_port,
            length: udp_len as u16,
            checksum: 0xbee1,
        };
        let ip = Ipv6Header {
            traffic_class: 0,
            flow_label: self.flow_label,
            payload_len: udp_len as u16,
            next_header: IPPROTO_UDP,
            hop_limit: 64,
            src: self.src_addr,
            dst: self.dst_addr,
        };

        assemble(&[&ip, &udp], payload)
    }
}

/// A bare IPv4 packet carrying an opaque payload (IP-only and Uncompressed
/// profile tests).
#[must_use]
pub fn ipv4_packet(id: u16, protocol: u8, payload: &[u8]) -> Vec<u8> {
    let ip = Ipv4Header {
        tos: 0,
        total_len: (Ipv4Header::FIXED_PART_SIZE + payload.len()) as u16,
        id,
        dont_fragment: true,
        ttl: 57,
        protocol,
        checksum: 0,
        src: 0x0a00_0001,
        dst: 0x0a00_0002,
    };

    assemble(&[&ip], payload)
}

fn assemble(headers: &[&dyn Encode], payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::new();
    for header in headers {
        packet.extend_from_slice(&encode_vec(*header).expect("header encoding"));
    }
    packet.extend_from_slice(payload);
    packet
}
