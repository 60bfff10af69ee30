//! ROHCv2 IP-only profile (0x0104) and the Uncompressed profile, which
//! share the Normal passthrough form.

use rohc_core::WriteCursor;
use rohc_pdu::feedback::Feedback;
use rohc_pdu::{Cid, CidType, ProfileId, RohcMode, RohcPacketKind};
use rohc_testsuite::ipv4_packet;

use crate::Channel;

#[test]
fn v2_ip_flow_with_random_ip_id() {
    let mut channel = Channel::new(&[ProfileId::IP_V2], RohcMode::Unidirectional);

    // Pseudo-random identifiers, fixed seed.
    let mut id = 0x7b1du16;
    let mut next_id = move || {
        id = id.wrapping_mul(25173).wrapping_add(13849);
        id
    };

    let mut kinds = Vec::new();
    for i in 0..20u16 {
        let packet = ipv4_packet(next_id(), 47, &[i as u8; 16]);
        let (meta, _) = channel.round_trip(&packet);
        assert_eq!(meta.profile, ProfileId::IP_V2);
        kinds.push(meta.kind);
    }

    assert_eq!(kinds[0], RohcPacketKind::Ir);
    assert_eq!(kinds[1], RohcPacketKind::Ir);
    // Normal packets once the context is trusted: the first uncompressed
    // byte (0x45) never collides with a reserved type.
    assert!(kinds[2..].iter().all(|kind| *kind == RohcPacketKind::Normal));
}

#[test]
fn v2_nack_triggers_co_repair() {
    let mut channel = Channel::new(&[ProfileId::IP_V2], RohcMode::Optimistic);

    for i in 0..5u16 {
        channel.round_trip(&ipv4_packet(0x1000 + i, 47, b"data"));
    }

    // Peer reports dynamic-context damage.
    let nack = Feedback::nack(Cid::new(0), RohcMode::Optimistic.to_bits(), 0);
    let mut buf = vec![0u8; nack.size(CidType::Small)];
    let mut cursor = WriteCursor::new(&mut buf);
    nack.encode(&mut cursor, CidType::Small).unwrap();
    channel.comp.consume_feedback(&buf);

    let (meta, _) = channel.round_trip(&ipv4_packet(0x1005, 47, b"data"));
    assert_eq!(meta.kind, RohcPacketKind::CoRepair);

    // Back to Normal afterwards.
    let (meta, _) = channel.round_trip(&ipv4_packet(0x1006, 47, b"data"));
    assert_eq!(meta.kind, RohcPacketKind::Normal);
}

#[test]
fn v2_decompressor_reaches_full_context_after_ir() {
    let mut channel = Channel::new(&[ProfileId::IP_V2], RohcMode::Unidirectional);

    let packet = ipv4_packet(0x4242, 47, b"payload");
    let (rohc, meta) = channel.compress(&packet);
    assert_eq!(meta.kind, RohcPacketKind::Ir);

    let mut out = vec![0u8; 256];
    let res = channel.decomp.decompress(&rohc, None, &mut out).expect("decompress IR");
    assert_eq!(&out[..res.len], &packet[..]);
    assert_eq!(res.packet.unwrap().kind, RohcPacketKind::Ir);
}

#[test]
fn uncompressed_profile_passthrough() {
    let mut channel = Channel::new(&[ProfileId::UNCOMPRESSED], RohcMode::Unidirectional);

    // Not even an IP packet: the Uncompressed profile takes anything.
    let blob = b"\x42 arbitrary link payload \x00\x01\x02";
    let mut kinds = Vec::new();
    for _ in 0..6 {
        let (meta, _) = channel.round_trip(&blob[..]);
        assert_eq!(meta.profile, ProfileId::UNCOMPRESSED);
        kinds.push(meta.kind);
    }

    // IR until trusted, then Normal (first byte 0x42 is unreserved).
    assert_eq!(kinds[0], RohcPacketKind::Ir);
    assert!(kinds.contains(&RohcPacketKind::Normal));
}

#[test]
fn uncompressed_profile_keeps_reserved_first_bytes_in_ir() {
    let mut channel = Channel::new(&[ProfileId::UNCOMPRESSED], RohcMode::Unidirectional);

    // 0xF9 matches 1111 1xxx: a Normal packet would be mis-detected.
    let blob = [0xf9u8, 1, 2, 3, 4];
    for _ in 0..6 {
        let (meta, _) = channel.round_trip(&blob[..]);
        assert_eq!(meta.kind, RohcPacketKind::Ir);
    }
}

#[test]
fn v2_control_crc_rejects_corrupted_co_repair() {
    let mut channel = Channel::new(&[ProfileId::IP_V2], RohcMode::Optimistic);

    for i in 0..5u16 {
        channel.round_trip(&ipv4_packet(0x2000 + i, 47, b"data"));
    }

    let nack = Feedback::nack(Cid::new(0), RohcMode::Optimistic.to_bits(), 0);
    let mut buf = vec![0u8; nack.size(CidType::Small)];
    let mut cursor = WriteCursor::new(&mut buf);
    nack.encode(&mut cursor, CidType::Small).unwrap();
    channel.comp.consume_feedback(&buf);

    let (mut rohc, meta) = channel.compress(&ipv4_packet(0x2005, 47, b"data"));
    assert_eq!(meta.kind, RohcPacketKind::CoRepair);

    // Flip MSN bits in the dynamic chain: the control CRC-3 must catch it.
    let last = rohc.len() - 1;
    rohc[last - 4] ^= 0xff;
    let mut out = vec![0u8; 256];
    let err = channel.decomp.decompress(&rohc, None, &mut out).unwrap_err();
    assert!(matches!(
        err.kind(),
        rohc_decomp::DecompressErrorKind::BadCrc | rohc_decomp::DecompressErrorKind::Malformed
    ));
}
