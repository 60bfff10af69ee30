use proptest::prelude::*;
use rohc_encodings::{LsbDecoder, LsbPolicy, WlsbEncoder};
use rstest::rstest;

fn round_trips(policy: LsbPolicy, width: u8, refs: &[u32], value: u32) -> bool {
    let mut encoder = WlsbEncoder::new(8, width, policy);
    for (i, reference) in refs.iter().enumerate() {
        encoder.add(i as u32, *reference);
    }
    let k = encoder.k_for(value);

    // Any reference still in the window must let the receiver reconstruct
    // the value from k bits.
    refs.iter().all(|reference| {
        let mut decoder = LsbDecoder::new(width, policy);
        decoder.set_reference(*reference);
        let bits = if k >= width {
            value
        } else {
            value & ((1u32 << k) - 1)
        };
        decoder.decode(bits, k) == Ok(value & mask(width))
    })
}

fn mask(width: u8) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

#[rstest]
#[case::rtp_sn(LsbPolicy::RtpSn, 16)]
#[case::non_rtp_sn(LsbPolicy::Fixed(-1), 16)]
#[case::ip_id(LsbPolicy::IpIdOffset, 16)]
fn sixteen_bit_policies(#[case] policy: LsbPolicy, #[case] width: u8) {
    // Monotonic advance, small jumps, wraparound.
    assert!(round_trips(policy, width, &[100, 101, 102, 103], 104));
    assert!(round_trips(policy, width, &[100, 101, 102, 103], 120));
    assert!(round_trips(policy, width, &[0xfffd, 0xfffe, 0xffff], 2));
    assert!(round_trips(policy, width, &[500], 520));
}

proptest! {
    #[test]
    fn minimum_k_decodes_against_every_reference(
        start in 0u32..=0xffff,
        advances in proptest::collection::vec(0u32..5, 1..8),
        jump in 0u32..2000,
    ) {
        let mut refs = Vec::new();
        let mut sn = start;
        for advance in &advances {
            sn = (sn + advance) & 0xffff;
            refs.push(sn);
        }
        let value = (sn + jump) & 0xffff;
        prop_assert!(round_trips(LsbPolicy::RtpSn, 16, &refs, value));
    }

    #[test]
    fn timestamps_at_32_bits(reference in any::<u32>(), delta in 0u32..1_000_000) {
        let value = reference.wrapping_add(delta);
        prop_assert!(round_trips(LsbPolicy::Ts, 32, &[reference], value));
    }
}

#[test]
fn window_is_bounded() {
    let mut encoder = WlsbEncoder::new(4, 16, LsbPolicy::RtpSn);
    for sn in 0..100u32 {
        encoder.add(sn, sn);
    }
    // Only the four newest references constrain k.
    assert!(encoder.k_for(100) <= 4);
}
