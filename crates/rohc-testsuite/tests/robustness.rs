//! Corruption and resource-exhaustion behavior: CRCs must catch bit
//! errors, malformed packets must not disturb context state, and a small
//! output buffer must fail cleanly.

use rohc_decomp::DecompressErrorKind;
use rohc_pdu::{ProfileId, RohcMode, RohcPacketKind};
use rohc_testsuite::RtpFlow;

use crate::Channel;

#[test]
fn single_bit_errors_in_compressed_packets_are_rejected() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    // Establish the steady state.
    let mut steady = None;
    for i in 0..10u16 {
        let packet = flow.packet(i, false, b"payload");
        let (rohc, meta) = channel.compress(&packet);
        if meta.kind == RohcPacketKind::Uo0 {
            steady = Some((rohc.clone(), packet.clone()));
        }
        let mut out = vec![0u8; 256];
        channel.decomp.decompress(&rohc, None, &mut out).expect("decompress");
    }
    let (rohc, original) = steady.expect("steady state reached");

    // Flip each bit of the compressed header octet in turn; every corrupted
    // variant must either fail the CRC or decode to something that is not
    // silently presented as the original packet.
    let mut accepted_wrong = 0;
    for bit in 0..8 {
        let mut corrupted = rohc.clone();
        corrupted[0] ^= 1 << bit;
        let mut out = vec![0u8; 256];
        match channel.decomp.decompress(&corrupted, None, &mut out) {
            Err(_) => {}
            Ok(res) => {
                // A 3-bit CRC lets some corruption through; it must at
                // least not reproduce the original bytes.
                if &out[..res.len] == &original[..] {
                    accepted_wrong += 1;
                }
            }
        }
    }
    assert_eq!(accepted_wrong, 0);
}

#[test]
fn corrupted_ir_never_creates_a_context() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    let (rohc, meta) = channel.compress(&flow.packet(0, false, b"payload"));
    assert_eq!(meta.kind, RohcPacketKind::Ir);

    for position in 0..rohc.len().min(24) {
        let mut corrupted = rohc.clone();
        corrupted[position] ^= 0x10;
        let mut out = vec![0u8; 256];
        let _ = channel.decomp.decompress(&corrupted, None, &mut out);
    }

    // None of the corrupted IRs passed CRC-8 into a live context able to
    // decompress the follow-up packet.
    let (rohc, _) = channel.compress(&flow.packet(1, false, b"payload"));
    let mut out = vec![0u8; 256];
    match channel.decomp.decompress(&rohc, None, &mut out) {
        // Either nothing was established (UO/IR-DYN without context) or a
        // pristine IR re-established it; both are sound.
        Ok(res) => assert_eq!(&out[..res.len], &flow.packet(1, false, b"payload")[..]),
        Err(e) => assert!(matches!(
            e.kind(),
            DecompressErrorKind::NoContext { .. } | DecompressErrorKind::BadCrc | DecompressErrorKind::Malformed
        )),
    }
}

#[test]
fn truncated_packets_are_malformed() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    let (rohc, _) = channel.compress(&flow.packet(0, false, b"payload"));
    for len in 1..rohc.len().min(8) {
        let mut out = vec![0u8; 256];
        assert!(channel.decomp.decompress(&rohc[..len], None, &mut out).is_err());
    }
}

#[test]
fn output_buffer_too_small_is_reported_and_harmless() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    let packet = flow.packet(0, false, b"payload");
    let mut tiny = [0u8; 4];
    let err = channel.comp.compress(&packet, &mut tiny).unwrap_err();
    assert!(matches!(
        err.kind(),
        rohc_comp::CompressErrorKind::OutputTooSmall { .. }
    ));

    // The same packet still compresses fine afterwards.
    channel.round_trip(&packet);
}

#[test]
fn leading_padding_is_skipped() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    let packet = flow.packet(0, false, b"payload");
    let (rohc, _) = channel.compress(&packet);

    let mut padded = vec![0xe0, 0xe0, 0xe0];
    padded.extend_from_slice(&rohc);
    let mut out = vec![0u8; 256];
    let res = channel.decomp.decompress(&padded, None, &mut out).expect("decompress");
    assert_eq!(&out[..res.len], &packet[..]);
}

#[test]
fn feedback_only_input_yields_no_packet() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);

    use rohc_core::WriteCursor;
    use rohc_pdu::feedback::Feedback;
    let fb = Feedback::ack(rohc_pdu::Cid::new(0), RohcMode::Optimistic.to_bits(), 7);
    let mut element = vec![0u8; fb.size(rohc_pdu::CidType::Small)];
    let mut cursor = WriteCursor::new(&mut element);
    fb.encode(&mut cursor, rohc_pdu::CidType::Small).unwrap();

    let mut out = vec![0u8; 64];
    let res = channel.decomp.decompress(&element, None, &mut out).expect("feedback only");
    assert!(res.packet.is_none());
    assert_eq!(res.len, 0);
    assert_eq!(res.feedback_received.len(), 1);
}

#[test]
fn segments_are_rejected_as_unsupported() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let mut out = vec![0u8; 64];
    let err = channel.decomp.decompress(&[0xfe, 0x01, 0x02], None, &mut out).unwrap_err();
    assert!(matches!(err.kind(), DecompressErrorKind::UnsupportedPacket { .. }));
}
