use expect_test::expect;
use proptest::prelude::*;
use rohc_core::{ReadCursor, WriteCursor};
use rohc_pdu::headers::UncompressedHeaders;
use rohc_pdu::{crc, sdvl};
use rohc_testsuite::RtpFlow;

#[test]
fn sdvl_forms_are_self_describing() {
    let cases: &[(u32, &str)] = &[
        (0, "00"),
        (127, "7f"),
        (128, "8080"),
        (4242, "9092"),
        (16383, "bfff"),
        (16384, "c04000"),
        ((1 << 21) - 1, "dfffff"),
        (1 << 21, "e0200000"),
        (sdvl::MAX_VALUE, "ffffffff"),
    ];

    for (value, hex_form) in cases {
        let mut buf = [0u8; 4];
        let mut cursor = WriteCursor::new(&mut buf);
        let written = sdvl::write(&mut cursor, *value).expect("encodable");
        assert_eq!(hex::encode(&buf[..written]), *hex_form, "value {value}");
    }
}

proptest! {
    #[test]
    fn sdvl_round_trip(value in 0u32..=sdvl::MAX_VALUE) {
        let mut buf = [0u8; 4];
        let mut cursor = WriteCursor::new(&mut buf);
        let written = sdvl::write(&mut cursor, value).unwrap();
        prop_assert_eq!(written, sdvl::size_of(value).unwrap());

        let mut cursor = ReadCursor::new(&buf[..written]);
        let (decoded, bits) = sdvl::read(&mut cursor).unwrap();
        prop_assert_eq!(decoded, value);
        prop_assert_eq!(bits, sdvl::bits_for_len(written));
    }

    #[test]
    fn sdvl_uses_the_minimum_length(value in 0u32..=sdvl::MAX_VALUE) {
        let len = sdvl::size_of(value).unwrap();
        if len > 1 {
            // One form shorter must not fit the value.
            prop_assert!(32 - value.leading_zeros() as usize > sdvl::bits_for_len(len - 1));
        }
    }

    #[test]
    fn crc_widths(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        prop_assert!(crc::crc3(&data, crc::CRC3_INIT) < 8);
        prop_assert!(crc::crc7(&data, crc::CRC7_INIT) < 128);
    }
}

#[test]
fn reference_rtp_packet_bytes() {
    // Pin the test-flow generator itself so scenario expectations stay
    // meaningful.
    let packet = RtpFlow::default().packet(0, false, &[0xde, 0xad, 0xbe, 0xef]);
    expect![[
        "4500002c200000004011d65ec0a80114c0a801fe138a138c001800008008006400003e8012345678deadbeef"
    ]]
    .assert_eq(&hex::encode(&packet));
}

#[test]
fn parse_reference_rtp_packet() {
    let packet = RtpFlow::default().packet(3, true, b"xx");
    let mut cursor = ReadCursor::new(&packet);
    let mut headers = UncompressedHeaders::parse(&mut cursor).expect("parse");
    headers.attach_rtp(&mut cursor).expect("rtp");

    let rtp = headers.rtp.unwrap();
    assert_eq!(rtp.sn, 103);
    assert_eq!(rtp.ts, 16_000 + 3 * 160);
    assert!(rtp.marker);
    assert_eq!(headers.header_len(), 40);
    assert_eq!(cursor.remaining(), b"xx");
}
