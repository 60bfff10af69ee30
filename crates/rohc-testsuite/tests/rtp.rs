//! RTP profile scenarios: the VoIP steady state, static-field changes and
//! dynamic-field upheavals.

use pretty_assertions::assert_eq;
use rohc_pdu::{ProfileId, RohcMode, RohcPacketKind};
use rohc_testsuite::RtpFlow;

use crate::Channel;

#[test]
fn voip_steady_state_compresses_to_uo0() {
    let mut channel = Channel::new(&[ProfileId::RTP, ProfileId::UDP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    let mut kinds = Vec::new();
    for i in 0..2000u16 {
        let packet = flow.packet(i, false, b"voice-frame-0000");
        let (meta, _) = channel.round_trip(&packet);
        assert_eq!(meta.profile, ProfileId::RTP);
        kinds.push(meta.kind);
    }

    // Warm-up: at most two IRs, then FO for a few packets.
    let ir_warmup = kinds.iter().take_while(|kind| **kind == RohcPacketKind::Ir).count();
    assert!(ir_warmup >= 1 && ir_warmup <= 2, "IR warm-up was {ir_warmup} packets");

    let first_uo0 = kinds
        .iter()
        .position(|kind| *kind == RohcPacketKind::Uo0)
        .expect("steady state reached");
    assert!(first_uo0 <= 8, "steady state only after {first_uo0} packets");

    // Steady state: one-byte UO-0 for the overwhelming majority (periodic
    // U-mode refreshes account for the rest).
    let uo0_count = kinds[first_uo0..]
        .iter()
        .filter(|kind| **kind == RohcPacketKind::Uo0)
        .count();
    let steady = kinds.len() - first_uo0;
    assert!(
        uo0_count * 100 >= steady * 95,
        "only {uo0_count}/{steady} steady-state packets were UO-0"
    );
}

#[test]
fn uo0_is_one_byte_on_the_wire() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    let mut last_len = usize::MAX;
    for i in 0..10u16 {
        let packet = flow.packet(i, false, b"x");
        let (rohc, meta) = channel.compress(&packet);
        let mut out = vec![0u8; 256];
        let res = channel.decomp.decompress(&rohc, None, &mut out).expect("decompress");
        assert_eq!(&out[..res.len], &packet[..]);
        if meta.kind == RohcPacketKind::Uo0 {
            last_len = rohc.len();
        }
    }

    // UO-0 on CID 0 with elided UDP checksum: one octet plus the payload.
    assert_eq!(last_len, 1 + 1);
}

#[test]
fn ssrc_change_forces_a_new_context_and_ir() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let mut flow = RtpFlow::default();

    for i in 0..50u16 {
        channel.round_trip(&flow.packet(i, false, b"payload"));
    }
    assert_eq!(channel.comp.context_count(), 1);

    // The SSRC is part of the flow key: a new stream begins.
    flow.ssrc = 0x9999_0001;
    let (meta, _) = channel.round_trip(&flow.packet(0, false, b"payload"));
    assert_eq!(meta.kind, RohcPacketKind::Ir);
    assert_eq!(channel.comp.context_count(), 2);
    assert_ne!(meta.cid.get(), 0);

    // Both flows keep round-tripping on their own contexts.
    for i in 1..20u16 {
        channel.round_trip(&flow.packet(i, false, b"payload"));
    }
}

#[test]
fn udp_checksum_behavior_change_goes_back_to_ir() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    let mut kinds = Vec::new();
    for i in 0..40u16 {
        let mut packet = flow.packet(i, false, b"payload");
        if i >= 20 {
            // Enable the UDP checksum mid-flow (bytes 26/27 of the IPv4+UDP
            // stack); the compressor must re-establish the behavior.
            packet[26] = 0xab;
            packet[27] = 0xcd;
        }
        let (meta, _) = channel.round_trip(&packet);
        kinds.push(meta.kind);
    }

    assert_eq!(kinds[20], RohcPacketKind::Ir, "checksum change must force IR");
    assert_eq!(kinds[21], RohcPacketKind::Ir);
    // Confidence rebuilt: compressed packets resume.
    assert!(kinds[25..].iter().any(|kind| kind.is_uo()));
    // And the checksum now rides with every compressed packet (still
    // reconstructed bit-exactly, which round_trip already asserted).
}

#[test]
fn marker_bit_is_transported() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    for i in 0..30u16 {
        // A talk-spurt start every tenth packet.
        let marker = i % 10 == 0;
        channel.round_trip(&flow.packet(i, marker, b"payload"));
    }
}

#[test]
fn payload_type_change_is_resignaled() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    for i in 0..30u16 {
        channel.round_trip(&flow.packet(i, false, b"payload"));
    }

    // Codec switch: PT changes, SSRC and ports stay.
    let mut flow2 = flow;
    flow2.payload_type = 96;
    let mut kinds = Vec::new();
    for i in 30..60u16 {
        let (meta, _) = channel.round_trip(&flow2.packet(i, false, b"payload"));
        kinds.push(meta.kind);
    }
    // Same context, dynamic-level recovery only.
    assert_eq!(channel.comp.context_count(), 1);
    assert!(kinds.iter().any(|kind| kind.is_uo()));
}

#[test]
fn optimistic_mode_feedback_loop() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Optimistic);
    let flow = RtpFlow::default();

    let mut acked = false;
    for i in 0..20u16 {
        let packet = flow.packet(i, false, b"payload");
        let (rohc, _) = channel.compress(&packet);
        let mut out = vec![0u8; 256];
        let res = channel.decomp.decompress(&rohc, None, &mut out).expect("decompress");
        assert_eq!(&out[..res.len], &packet[..]);

        if let Some(feedback) = res.feedback_to_send {
            // Reverse channel: hand the ACK to the compressor.
            channel.comp.consume_feedback(&feedback);
            acked = true;
        }
    }
    assert!(acked, "the decompressor never acknowledged the context");
}

#[test]
fn feedback_piggybacking_reaches_the_peer() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    // Warm up the forward direction.
    for i in 0..5u16 {
        channel.round_trip(&flow.packet(i, false, b"payload"));
    }

    // Queue a feedback element as if generated by a local decompressor;
    // it must ride in front of the next packet and pop out at the peer.
    let element = {
        use rohc_core::WriteCursor;
        use rohc_pdu::feedback::Feedback;
        let fb = Feedback::ack(rohc_pdu::Cid::new(0), RohcMode::Optimistic.to_bits(), 42);
        let mut buf = vec![0u8; fb.size(rohc_pdu::CidType::Small)];
        let mut cursor = WriteCursor::new(&mut buf);
        fb.encode(&mut cursor, rohc_pdu::CidType::Small).unwrap();
        buf
    };
    channel.comp.queue_feedback_for_peer(element.clone());

    let packet = flow.packet(5, false, b"payload");
    let (rohc, _) = channel.compress(&packet);
    let mut out = vec![0u8; 256];
    let res = channel.decomp.decompress(&rohc, None, &mut out).expect("decompress");
    assert_eq!(&out[..res.len], &packet[..]);
    assert_eq!(res.feedback_received, vec![element]);
}
