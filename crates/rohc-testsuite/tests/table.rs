//! Context table behavior: CID assignment, LRU eviction, profile
//! enablement rules.

use rohc_comp::Compressor;
use rohc_decomp::Decompressor;
use rohc_pdu::{CidType, ProfileId, RohcMode, RohcPacketKind};
use rohc_testsuite::{RtpFlow, TunneledRtpFlow};
use rstest::rstest;

use crate::Channel;

#[test]
fn each_flow_gets_its_own_cid() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);

    for flow_nr in 0..4u32 {
        let flow = RtpFlow {
            ssrc: 0x1000_0000 + flow_nr,
            dst_port: 5004 + (flow_nr as u16) * 2,
            ..RtpFlow::default()
        };
        let (meta, _) = channel.round_trip(&flow.packet(0, false, b"payload"));
        assert_eq!(u32::from(meta.cid.get()), flow_nr);
    }
    assert_eq!(channel.comp.context_count(), 4);
}

#[test]
fn table_overflow_evicts_the_least_recently_used_flow() {
    let builder = Compressor::builder().max_contexts(2);
    let mut channel = Channel::with_builder(builder, &[ProfileId::RTP], RohcMode::Unidirectional);

    let flow_a = RtpFlow {
        ssrc: 0xaaaa_0001,
        ..RtpFlow::default()
    };
    let flow_b = RtpFlow {
        ssrc: 0xbbbb_0002,
        ..RtpFlow::default()
    };
    let flow_c = RtpFlow {
        ssrc: 0xcccc_0003,
        ..RtpFlow::default()
    };

    channel.round_trip(&flow_a.packet(0, false, b"a"));
    channel.round_trip(&flow_b.packet(0, false, b"b"));
    // Touch A so B becomes the eviction victim.
    channel.round_trip(&flow_a.packet(1, false, b"a"));
    assert_eq!(channel.comp.context_count(), 2);

    let (meta, _) = channel.round_trip(&flow_c.packet(0, false, b"c"));
    assert_eq!(meta.cid.get(), 1, "flow C must reuse flow B's CID");
    assert_eq!(channel.comp.context_count(), 2);

    // Flow A is still live on CID 0; flow B went through IR again when it
    // returned.
    let (meta, _) = channel.round_trip(&flow_a.packet(2, false, b"a"));
    assert_eq!(meta.cid.get(), 0);
    let (meta, _) = channel.round_trip(&flow_b.packet(1, false, b"b"));
    assert_eq!(meta.kind, RohcPacketKind::Ir);
}

#[test]
fn conflicting_profile_low_bytes_are_rejected() {
    let mut comp = Compressor::builder().build().unwrap();
    comp.enable_profile(ProfileId::IP_V2).unwrap();
    // 0x0004 and 0x0104 share the abbreviated identifier 0x04.
    let err = comp.enable_profile(ProfileId::IP).unwrap_err();
    assert!(matches!(
        err.kind(),
        rohc_comp::CompressErrorKind::UnsupportedProfile { .. } | rohc_comp::CompressErrorKind::ProfileConflict { .. }
    ));
}

#[test]
fn compression_without_a_matching_profile_fails() {
    let mut comp = Compressor::builder().build().unwrap();
    comp.enable_profile(ProfileId::RTP).unwrap();

    // Not parseable as IP at all, and Uncompressed is not enabled.
    let mut out = vec![0u8; 128];
    let err = comp.compress(b"\x01\x02\x03\x04", &mut out).unwrap_err();
    assert!(matches!(err.kind(), rohc_comp::CompressErrorKind::NoMatchingProfile));
}

#[test]
fn decompressor_rejects_unknown_cid_with_static_nack() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Optimistic);
    let flow = RtpFlow::default();

    // Establish CID 0, then replay a compressed packet re-addressed to an
    // unknown CID.
    let mut last_uo = None;
    for i in 0..10u16 {
        let (rohc, meta) = channel.compress(&flow.packet(i, false, b"payload"));
        if meta.kind.is_uo() {
            last_uo = Some(rohc.clone());
        }
        let mut out = vec![0u8; 256];
        channel.decomp.decompress(&rohc, None, &mut out).expect("decompress");
    }

    let mut rogue = vec![0xe0 | 0x05]; // add-CID 5
    rogue.extend_from_slice(&last_uo.expect("steady state reached"));
    let mut out = vec![0u8; 256];
    let err = channel.decomp.decompress(&rogue, None, &mut out).unwrap_err();
    assert!(matches!(
        err.kind(),
        rohc_decomp::DecompressErrorKind::NoContext { cid: 5 }
    ));
    // The STATIC-NACK is still available for the reverse channel.
    assert!(channel.decomp.take_feedback_to_send().is_some());
}

/// Double IP headers: the inner header owns the base IP-ID field. When
/// only the outer identifier drifts (inner needs zero bits), more than one
/// header would otherwise claim bits, which disqualifies every base-header
/// form; the flow must settle on UOR-2-TS with the outer IP-ID in
/// extension 3 instead of a one-byte type.
#[rstest]
#[case::outer_id_tracks_sn(1, RohcPacketKind::Uo0)]
#[case::outer_id_drifts(2, RohcPacketKind::Uor2Ts)]
fn double_ip_outer_ip_id_decides_the_packet_shape(#[case] outer_id_step: u16, #[case] steady: RohcPacketKind) {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = TunneledRtpFlow {
        outer_id_step,
        ..TunneledRtpFlow::default()
    };

    let mut kinds = Vec::new();
    for i in 0..30u16 {
        let (meta, _) = channel.round_trip(&flow.packet(i, false, b"payload"));
        kinds.push(meta.kind);
    }

    assert!(
        kinds[8..].iter().all(|kind| *kind == steady),
        "expected steady {steady:?}, kinds: {kinds:?}"
    );
}

#[test]
fn freed_decompressor_contexts_are_rebuilt_by_ir() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    for i in 0..10u16 {
        channel.round_trip(&flow.packet(i, false, b"payload"));
    }
    assert_eq!(channel.decomp.context_count(), 1);

    assert!(channel.decomp.free_context(rohc_pdu::Cid::new(0)));
    assert_eq!(channel.decomp.context_count(), 0);

    // The next compressed packet finds no context; the flow recovers once
    // the compressor's periodic refresh re-sends an IR.
    let (rohc, _) = channel.compress(&flow.packet(10, false, b"payload"));
    let mut out = vec![0u8; 256];
    let err = channel.decomp.decompress(&rohc, None, &mut out).unwrap_err();
    assert!(matches!(err.kind(), rohc_decomp::DecompressErrorKind::NoContext { .. }));
}

#[test]
fn wlsb_width_must_be_a_power_of_two() {
    assert!(Compressor::builder().wlsb_window_width(3).build().is_err());
    assert!(Compressor::builder().wlsb_window_width(16).build().is_ok());
}

#[test]
fn max_contexts_is_bounded_by_the_cid_space() {
    assert!(Compressor::builder()
        .cid_type(CidType::Small)
        .max_contexts(17)
        .build()
        .is_err());
    assert!(Compressor::builder()
        .cid_type(CidType::Large)
        .max_contexts(17)
        .build()
        .is_ok());
}

#[test]
fn large_cid_flows_round_trip() {
    let builder = Compressor::builder().cid_type(CidType::Large).max_contexts(300);
    let mut comp = builder.refresh_seed(1).build().unwrap();
    comp.enable_profile(ProfileId::RTP).unwrap();
    let mut decomp = Decompressor::new(CidType::Large, 300, RohcMode::Unidirectional);
    decomp.enable_profile(ProfileId::RTP).unwrap();

    let flow = RtpFlow::default();
    let mut rohc = vec![0u8; 2048];
    let mut out = vec![0u8; 2048];
    for i in 0..20u16 {
        let packet = flow.packet(i, false, b"payload");
        let meta = comp.compress(&packet, &mut rohc).expect("compress");
        let res = decomp.decompress(&rohc[..meta.len], None, &mut out).expect("decompress");
        assert_eq!(&out[..res.len], &packet[..], "packet {i} ({:?})", meta.kind);
    }
}
