//! IPv6/UDP flow (no RTP): the flow label travels once in the static
//! chain, steady state carries only SN bits.

use rohc_pdu::{ProfileId, RohcMode, RohcPacketKind};
use rohc_testsuite::UdpV6Flow;

use crate::Channel;

#[test]
fn ipv6_udp_flow_reaches_uo0() {
    let mut channel = Channel::new(&[ProfileId::RTP, ProfileId::UDP], RohcMode::Unidirectional);
    let flow = UdpV6Flow::default();

    let mut kinds = Vec::new();
    for i in 0..60u16 {
        let payload = [i as u8; 24];
        let (meta, _) = channel.round_trip(&flow.packet(&payload));
        assert_eq!(meta.profile, ProfileId::UDP, "odd port must not classify as RTP");
        kinds.push(meta.kind);
    }

    assert_eq!(kinds[0], RohcPacketKind::Ir);
    let first_uo0 = kinds
        .iter()
        .position(|kind| *kind == RohcPacketKind::Uo0)
        .expect("IPv6 flow reaches UO-0");
    assert!(first_uo0 <= 8);
    assert!(kinds[first_uo0..].iter().all(|kind| *kind == RohcPacketKind::Uo0));
}

#[test]
fn ipv6_uo0_carries_only_sn_and_checksum() {
    let mut channel = Channel::new(&[ProfileId::UDP], RohcMode::Unidirectional);
    let flow = UdpV6Flow::default();

    let mut steady_len = None;
    for _ in 0..10 {
        let packet = flow.packet(b"abcdefgh");
        let (rohc, meta) = channel.compress(&packet);
        let mut out = vec![0u8; 256];
        let res = channel.decomp.decompress(&rohc, None, &mut out).expect("decompress");
        assert_eq!(&out[..res.len], &packet[..]);
        if meta.kind == RohcPacketKind::Uo0 {
            steady_len = Some(rohc.len());
        }
    }

    // One UO-0 octet, two octets of mandatory UDP checksum, payload.
    assert_eq!(steady_len, Some(1 + 2 + 8));
}

#[test]
fn varying_traffic_class_still_round_trips() {
    let mut channel = Channel::new(&[ProfileId::UDP], RohcMode::Unidirectional);
    let flow = UdpV6Flow::default();

    for i in 0..30u16 {
        let mut packet = flow.packet(b"payload.");
        if i >= 15 {
            // Flip the traffic class (bits 4..12 of the first word).
            packet[0] = 0x60 | 0x0a >> 4;
            packet[1] = (0x0a << 4) | ((flow.flow_label >> 16) as u8 & 0x0f);
        }
        let (rohc, _) = channel.compress(&packet);
        let mut out = vec![0u8; 256];
        let res = channel.decomp.decompress(&rohc, None, &mut out).expect("decompress");
        assert_eq!(&out[..res.len], &packet[..]);
    }
}
