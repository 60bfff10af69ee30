//! Loss and repair: U-mode bursts larger than the W-LSB interpretation
//! interval are caught by the CRC and recovered by the SN repairs.

use std::time::{Duration, Instant};

use rohc_pdu::{ProfileId, RohcMode, RohcPacketKind};
use rohc_testsuite::RtpFlow;

use crate::Channel;

#[test]
fn small_loss_burst_is_absorbed_by_the_interpretation_interval() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    for i in 0..100u16 {
        let packet = flow.packet(i, false, b"payload");
        let (rohc, _) = channel.compress(&packet);
        // Drop packets 50..=55 on the channel: a 6-packet burst stays
        // within the 4-bit SN interval of UO-0.
        if (50..=55).contains(&i) {
            continue;
        }
        let mut out = vec![0u8; 256];
        let res = channel.decomp.decompress(&rohc, None, &mut out).expect("decompress");
        assert_eq!(&out[..res.len], &packet[..]);
    }

    assert_eq!(channel.decomp.repair_count(), 0);
}

#[test]
fn large_loss_burst_triggers_sn_wraparound_repair() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    let mut delivered = 0usize;
    for i in 0..560u16 {
        let packet = flow.packet(i, false, b"payload");
        let (rohc, meta) = channel.compress(&packet);
        // Drop packets 500..=519: a 20-packet burst overflows the 4-bit
        // UO-0 interval, the straight decode lands one window short.
        if (500..=519).contains(&i) {
            continue;
        }
        let mut out = vec![0u8; 256];
        let res = channel
            .decomp
            .decompress(&rohc, None, &mut out)
            .unwrap_or_else(|e| panic!("packet {i} ({:?}) failed: {e}", meta.kind));
        assert_eq!(&out[..res.len], &packet[..], "packet {i}");
        delivered += 1;
    }

    assert_eq!(delivered, 560 - 20);
    assert!(channel.decomp.repair_count() >= 1, "the burst must exercise repair");
}

#[test]
fn clock_based_repair_uses_arrival_timestamps() {
    let mut channel = Channel::new(&[ProfileId::RTP], RohcMode::Unidirectional);
    let flow = RtpFlow::default();

    let t0 = Instant::now();
    let tick = Duration::from_millis(20);

    let mut repaired = false;
    for i in 0..600u16 {
        let packet = flow.packet(i, false, b"payload");
        let (rohc, _) = channel.compress(&packet);
        // A 40-packet burst: beyond even the one-window-stale assumption,
        // only the inter-arrival gap points at the right SN jump.
        if (500..=539).contains(&i) {
            continue;
        }
        let arrival = Some(t0 + tick * u32::from(i));
        let mut out = vec![0u8; 256];
        match channel.decomp.decompress(&rohc, arrival, &mut out) {
            Ok(res) => {
                assert_eq!(&out[..res.len], &packet[..], "packet {i}");
            }
            Err(e) => panic!("packet {i} failed: {e}"),
        }
        if channel.decomp.repair_count() > 0 {
            repaired = true;
        }
    }
    assert!(repaired);
}

#[test]
fn erratic_timestamps_stay_out_of_the_scaled_state() {
    use rohc_comp::RefreshPolicy;

    let builder = rohc_comp::Compressor::builder().refresh_policy(RefreshPolicy {
        ir_packet_interval: 120,
        fo_packet_interval: 40,
        ..RefreshPolicy::default()
    });
    let mut channel = Channel::with_builder(builder, &[ProfileId::RTP], RohcMode::Unidirectional);

    // Timestamps jump erratically: no stride can be established, but the
    // flow still round-trips through the lower-confidence packet types.
    let mut ts = 77u32;
    let mut kinds = Vec::new();
    for i in 0..200u16 {
        ts = ts.wrapping_add(u32::from(i % 7) * 13 + 1);
        let rtp = rohc_pdu::headers::RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            cc: 0,
            marker: false,
            payload_type: RtpFlow::default().payload_type,
            sn: 100u16.wrapping_add(i),
            ts,
            ssrc: 0x1234_5678,
        };
        let packet = RtpFlow::default().packet_with_rtp(i, rtp, b"payload");
        let (meta, _) = channel.round_trip(&packet);
        kinds.push(meta.kind);
    }

    // Erratic timestamps keep the context out of the one-byte steady state
    // but never break losslessness (round_trip asserted every packet).
    assert!(!kinds.contains(&RohcPacketKind::Uo0));
    assert!(kinds.iter().any(|kind| *kind == RohcPacketKind::Ir));
}
