//! Feedback elements (RFC 3095 §5.2.2, §5.7.6).
//!
//! Feedback rides in front of ROHC packets (piggybacked) or alone on the
//! feedback channel. The envelope is `1111 0|code`, with an explicit size
//! octet when `code = 0`; the feedback data starts with the CID of the
//! context being acknowledged.

use rohc_core::{DecodeResult, EncodeResult, ReadCursor, WriteCursor};

use crate::cid::{self, Cid, CidType};

const FEEDBACK_DISCRIMINATOR: u8 = 0xf0;

/// FEEDBACK-2 acknowledgment types.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AckType {
    Ack = 0,
    Nack = 1,
    StaticNack = 2,
}

impl AckType {
    fn from_bits(bits: u8) -> DecodeResult<Self> {
        match bits & 0x3 {
            0 => Ok(AckType::Ack),
            1 => Ok(AckType::Nack),
            2 => Ok(AckType::StaticNack),
            _ => Err(rohc_core::invalid_field_err("Feedback", "acktype", "reserved value 3")),
        }
    }
}

/// FEEDBACK-2 option types this implementation understands; others are
/// skipped on parse.
const OPT_SN_NOT_VALID: u8 = 3;
const OPT_SN: u8 = 4;

/// A parsed feedback element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Feedback {
    /// FEEDBACK-1: one octet of SN LSBs, an implicit ACK.
    One { cid: Cid, sn_bits: u8 },
    /// FEEDBACK-2: typed acknowledgment with mode and a 12-bit (optionally
    /// extended to 20-bit) SN.
    Two {
        cid: Cid,
        ack_type: AckType,
        mode: u8,
        sn: u32,
        sn_width: u8,
        sn_valid: bool,
    },
}

impl Feedback {
    const NAME: &'static str = "Feedback";

    /// An ACK carrying the 12-bit SN LSBs.
    #[must_use]
    pub fn ack(cid: Cid, mode: u8, sn: u32) -> Self {
        Feedback::Two {
            cid,
            ack_type: AckType::Ack,
            mode,
            sn: sn & 0xfff,
            sn_width: 12,
            sn_valid: true,
        }
    }

    #[must_use]
    pub fn nack(cid: Cid, mode: u8, sn: u32) -> Self {
        Feedback::Two {
            cid,
            ack_type: AckType::Nack,
            mode,
            sn: sn & 0xfff,
            sn_width: 12,
            sn_valid: true,
        }
    }

    /// A STATIC-NACK whose SN reference is unknown (no context).
    #[must_use]
    pub fn static_nack(cid: Cid, mode: u8) -> Self {
        Feedback::Two {
            cid,
            ack_type: AckType::StaticNack,
            mode,
            sn: 0,
            sn_width: 12,
            sn_valid: false,
        }
    }

    #[must_use]
    pub const fn cid(&self) -> Cid {
        match self {
            Feedback::One { cid, .. } | Feedback::Two { cid, .. } => *cid,
        }
    }

    fn data_size(&self, cid_type: CidType) -> usize {
        let cid_overhead = match cid_type {
            CidType::Small => usize::from(self.cid().get() != 0),
            CidType::Large => CidType::Large.cid_overhead(self.cid()),
        };
        let body = match self {
            Feedback::One { .. } => 1,
            Feedback::Two { sn_width, sn_valid, .. } => {
                // SN option is 2 octets (type/len + value), SN-NOT-VALID is 1.
                2 + usize::from(*sn_width > 12) * 2 + usize::from(!sn_valid)
            }
        };
        cid_overhead + body
    }

    /// Size of the element including the envelope octet(s).
    #[must_use]
    pub fn size(&self, cid_type: CidType) -> usize {
        let data = self.data_size(cid_type);
        1 + usize::from(data > 7) + data
    }

    /// Encodes the element with its envelope.
    pub fn encode(&self, dst: &mut WriteCursor<'_>, cid_type: CidType) -> EncodeResult<()> {
        rohc_core::ensure_size!(ctx: Self::NAME, in: dst, size: self.size(cid_type));

        let data_size = self.data_size(cid_type);
        if data_size <= 7 {
            dst.write_u8(FEEDBACK_DISCRIMINATOR | (data_size as u8));
        } else {
            dst.write_u8(FEEDBACK_DISCRIMINATOR);
            dst.write_u8(data_size as u8);
        }

        match cid_type {
            CidType::Small => cid::write_add_cid(dst, self.cid())?,
            CidType::Large => cid::write_large_cid(dst, self.cid())?,
        }

        match self {
            Feedback::One { sn_bits, .. } => dst.write_u8(*sn_bits),
            Feedback::Two {
                ack_type,
                mode,
                sn,
                sn_width,
                sn_valid,
                ..
            } => {
                let sn = if *sn_width > 12 { sn >> 8 } else { *sn };
                dst.write_u8(((*ack_type as u8) << 6) | ((mode & 0x3) << 4) | (((sn >> 8) & 0x0f) as u8));
                dst.write_u8((sn & 0xff) as u8);
                if *sn_width > 12 {
                    dst.write_u8((OPT_SN << 4) | 1);
                    dst.write_u8((sn & 0xff) as u8);
                }
                if !sn_valid {
                    dst.write_u8(OPT_SN_NOT_VALID << 4);
                }
            }
        }

        Ok(())
    }

    /// Decodes one feedback element; `src` must be positioned on the
    /// `1111 0ccc` envelope octet.
    pub fn decode(src: &mut ReadCursor<'_>, cid_type: CidType) -> DecodeResult<Self> {
        rohc_core::ensure_size!(ctx: Self::NAME, in: src, size: 1);

        let envelope = src.read_u8();
        debug_assert_eq!(envelope & 0xf8, FEEDBACK_DISCRIMINATOR);

        let data_size = match envelope & 0x07 {
            0 => {
                rohc_core::ensure_size!(ctx: Self::NAME, in: src, size: 1);
                usize::from(src.read_u8())
            }
            code => usize::from(code),
        };
        rohc_core::ensure_size!(ctx: Self::NAME, in: src, size: data_size);

        let mut data = ReadCursor::new(src.read_slice(data_size));

        let cid = match cid_type {
            CidType::Small => cid::read_add_cid(&mut data),
            CidType::Large => cid::read_large_cid(&mut data)?,
        };

        match data.len() {
            0 => Err(rohc_core::invalid_field_err!("feedback data", "empty")),
            1 => Ok(Feedback::One {
                cid,
                sn_bits: data.read_u8(),
            }),
            _ => {
                let first = data.read_u8();
                let ack_type = AckType::from_bits(first >> 6)?;
                let mode = (first >> 4) & 0x3;
                let mut sn = (u32::from(first & 0x0f) << 8) | u32::from(data.read_u8());
                let mut sn_width = 12u8;
                let mut sn_valid = true;

                while !data.is_empty() {
                    let opt = data.read_u8();
                    let opt_type = opt >> 4;
                    let opt_len = usize::from(opt & 0x0f);
                    rohc_core::ensure_size!(ctx: Self::NAME, in: data, size: opt_len);
                    match opt_type {
                        OPT_SN if opt_len == 1 => {
                            sn = (sn << 8) | u32::from(data.read_u8());
                            sn_width += 8;
                        }
                        OPT_SN_NOT_VALID => {
                            sn_valid = false;
                            data.advance(opt_len);
                        }
                        _ => {
                            // Unknown options are skipped, per the option TLV format.
                            data.advance(opt_len);
                        }
                    }
                }

                Ok(Feedback::Two {
                    cid,
                    ack_type,
                    mode,
                    sn,
                    sn_width,
                    sn_valid,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback1_round_trip() {
        let fb = Feedback::One {
            cid: Cid::new(3),
            sn_bits: 0x42,
        };
        let mut buf = vec![0u8; fb.size(CidType::Small)];
        let mut cursor = WriteCursor::new(&mut buf);
        fb.encode(&mut cursor, CidType::Small).unwrap();

        let mut cursor = ReadCursor::new(&buf);
        assert_eq!(Feedback::decode(&mut cursor, CidType::Small).unwrap(), fb);
    }

    #[test]
    fn feedback2_ack_round_trip() {
        let fb = Feedback::ack(Cid::new(0), 1, 0x9ab);
        let mut buf = vec![0u8; fb.size(CidType::Small)];
        let mut cursor = WriteCursor::new(&mut buf);
        fb.encode(&mut cursor, CidType::Small).unwrap();

        let mut cursor = ReadCursor::new(&buf);
        let decoded = Feedback::decode(&mut cursor, CidType::Small).unwrap();
        match decoded {
            Feedback::Two {
                ack_type, sn, sn_valid, ..
            } => {
                assert_eq!(ack_type, AckType::Ack);
                assert_eq!(sn, 0x9ab);
                assert!(sn_valid);
            }
            Feedback::One { .. } => unreachable!(),
        }
    }

    #[test]
    fn static_nack_carries_sn_not_valid() {
        let fb = Feedback::static_nack(Cid::new(7), 0);
        let mut buf = vec![0u8; fb.size(CidType::Small)];
        let mut cursor = WriteCursor::new(&mut buf);
        fb.encode(&mut cursor, CidType::Small).unwrap();

        let mut cursor = ReadCursor::new(&buf);
        let decoded = Feedback::decode(&mut cursor, CidType::Small).unwrap();
        match decoded {
            Feedback::Two {
                cid,
                ack_type,
                sn_valid,
                ..
            } => {
                assert_eq!(cid, Cid::new(7));
                assert_eq!(ack_type, AckType::StaticNack);
                assert!(!sn_valid);
            }
            Feedback::One { .. } => unreachable!(),
        }
    }

    #[test]
    fn large_cid_feedback() {
        let fb = Feedback::ack(Cid::new(300), 2, 55);
        let mut buf = vec![0u8; fb.size(CidType::Large)];
        let mut cursor = WriteCursor::new(&mut buf);
        fb.encode(&mut cursor, CidType::Large).unwrap();

        let mut cursor = ReadCursor::new(&buf);
        let decoded = Feedback::decode(&mut cursor, CidType::Large).unwrap();
        assert_eq!(decoded.cid(), Cid::new(300));
    }
}
