//! Window-based Least Significant Bits encoding (RFC 3095 §4.5.1–§4.5.2).
//!
//! The sender transmits only the low `k` bits of a value; the receiver
//! reconstructs it as the unique value matching those bits inside the
//! interpretation interval `[ref − p, ref + 2^k − 1 − p]` (modular at the
//! field width). The sender keeps a window of references that are still
//! plausibly the receiver's, and picks the smallest `k` valid against all
//! of them.

use std::collections::VecDeque;

use thiserror::Error;

/// Default window capacity.
pub const DEFAULT_WINDOW_WIDTH: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LsbError {
    #[error("no reference value established for LSB decoding")]
    NoReference,
}

/// The interpretation-interval offset `p`, prescribed per field by the
/// standards. Several policies make `p` a function of `k`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LsbPolicy {
    /// RTP SN (RFC 3095 §4.5.1): `p = 1` while `k ≤ 4`, else `2^(k−5) − 1`.
    RtpSn,
    /// RTP TS (RFC 3095 §4.5.4): `p = 1` while `k ≤ 2`, else `2^(k−2) − 1`.
    Ts,
    /// IP-ID offset (RFC 3095 §4.5.5): `p = 0`.
    IpIdOffset,
    /// A constant offset.
    Fixed(i64),
}

impl LsbPolicy {
    /// The offset for `k` transmitted bits.
    #[must_use]
    pub fn p(self, k: u8) -> i64 {
        match self {
            LsbPolicy::RtpSn => {
                if k <= 4 {
                    1
                } else {
                    (1 << (k - 5)) - 1
                }
            }
            LsbPolicy::Ts => {
                if k <= 2 {
                    1
                } else {
                    (1 << (k - 2)) - 1
                }
            }
            LsbPolicy::IpIdOffset => 0,
            LsbPolicy::Fixed(p) => p,
        }
    }
}

fn mask(width: u8) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Whether `value` lies in the interpretation interval anchored at
/// `reference` for `k` bits and offset `p`, at `width`-bit modular
/// arithmetic.
#[must_use]
pub fn in_interval(reference: u32, k: u8, p: i64, value: u32, width: u8) -> bool {
    if k >= width {
        return true;
    }
    if k == 0 {
        // Zero bits transmitted: the decoder keeps its reference.
        return value == reference;
    }
    let modulus = mask(width).wrapping_add(1);
    let lower = (i64::from(reference) - p).rem_euclid(modulus as i64) as u64;
    let offset = (u64::from(value).wrapping_sub(lower)) & mask(width);
    offset < (1u64 << k)
}

/// The encoder half: a bounded window of still-live references.
#[derive(Clone, Debug)]
pub struct WlsbEncoder {
    capacity: usize,
    field_width: u8,
    policy: LsbPolicy,
    window: VecDeque<(u32, u32)>,
}

impl WlsbEncoder {
    /// `capacity` is the window width (a positive power of two);
    /// `field_width` the wrap-around width of the encoded field (16 for
    /// SN/IP-ID, 32 for TS).
    #[must_use]
    pub fn new(capacity: usize, field_width: u8, policy: LsbPolicy) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            capacity,
            field_width,
            policy,
            window: VecDeque::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    #[must_use]
    pub const fn field_width(&self) -> u8 {
        self.field_width
    }

    /// Records `value`, transmitted with sequence number `sn`, as a new
    /// reference; the oldest reference falls out when the window is full.
    pub fn add(&mut self, sn: u32, value: u32) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back((sn, value));
    }

    /// Drops every reference older than the acknowledged sequence number,
    /// shrinking future `k` values (O-mode/R-mode feedback).
    pub fn ack(&mut self, acked_sn: u32) {
        while let Some((sn, _)) = self.window.front() {
            if *sn < acked_sn && self.window.len() > 1 {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// The live references, oldest first, as `(sn, value)` pairs.
    pub fn refs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.window.iter().copied()
    }

    /// The minimum `k` such that every reference in the window decodes
    /// `value` correctly. Returns the full field width when no reference
    /// has been established.
    #[must_use]
    pub fn k_for(&self, value: u32) -> u8 {
        if self.window.is_empty() {
            return self.field_width;
        }

        for k in 0..self.field_width {
            let p = self.policy.p(k);
            if self
                .window
                .iter()
                .all(|&(_, reference)| in_interval(reference, k, p, value, self.field_width))
            {
                return k;
            }
        }
        self.field_width
    }
}

/// The decoder half: a single reference (the last value committed after a
/// successful CRC check).
#[derive(Clone, Debug)]
pub struct LsbDecoder {
    field_width: u8,
    policy: LsbPolicy,
    reference: Option<u32>,
}

impl LsbDecoder {
    #[must_use]
    pub fn new(field_width: u8, policy: LsbPolicy) -> Self {
        Self {
            field_width,
            policy,
            reference: None,
        }
    }

    #[must_use]
    pub const fn reference(&self) -> Option<u32> {
        self.reference
    }

    pub fn set_policy(&mut self, policy: LsbPolicy) {
        self.policy = policy;
    }

    /// Commits a successfully validated value as the new reference.
    pub fn set_reference(&mut self, value: u32) {
        self.reference = Some(value & (mask(self.field_width) as u32));
    }

    pub fn clear(&mut self) {
        self.reference = None;
    }

    /// Reconstructs the value whose low `k` bits are `bits`.
    pub fn decode(&self, bits: u32, k: u8) -> Result<u32, LsbError> {
        self.decode_from(self.reference, bits, k)
    }

    /// Same, against an explicit reference (repair attempts).
    ///
    /// `k` may exceed the field width (a base header plus a full-size
    /// extension field): the bits then simply are the value.
    pub fn decode_from(&self, reference: Option<u32>, bits: u32, k: u8) -> Result<u32, LsbError> {
        if k >= self.field_width {
            return Ok(bits & (mask(self.field_width) as u32));
        }

        let reference = reference.ok_or(LsbError::NoReference)?;
        if k == 0 {
            return Ok(reference);
        }

        let modulus = mask(self.field_width).wrapping_add(1);
        let p = self.policy.p(k);
        let lower = (i64::from(reference) - p).rem_euclid(modulus as i64) as u64;
        let value = (lower + ((u64::from(bits).wrapping_sub(lower)) & ((1u64 << k) - 1))) & mask(self.field_width);
        Ok(value as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(policy: LsbPolicy, width: u8, reference: u32, value: u32) {
        let mut encoder = WlsbEncoder::new(4, width, policy);
        encoder.add(0, reference);
        let k = encoder.k_for(value);

        let mut decoder = LsbDecoder::new(width, policy);
        decoder.set_reference(reference);
        let bits = value & (((1u64 << k) - 1) as u32);
        let bits = if k == width { value } else { bits };
        assert_eq!(decoder.decode(bits, k).unwrap(), value, "policy {policy:?} v={value}");
    }

    #[test]
    fn sn_increments_need_few_bits() {
        let mut encoder = WlsbEncoder::new(4, 16, LsbPolicy::RtpSn);
        for sn in 100..104 {
            encoder.add(sn, sn);
        }
        assert!(encoder.k_for(104) <= 4);
    }

    #[test]
    fn encoder_chooses_decodable_k() {
        for (reference, value) in [(0u32, 1u32), (65535, 0), (1000, 1016), (5, 3), (0x7fff, 0x8001)] {
            round_trip(LsbPolicy::RtpSn, 16, reference, value);
            round_trip(LsbPolicy::IpIdOffset, 16, reference, value);
            round_trip(LsbPolicy::Fixed(-1), 16, reference, value);
        }
        round_trip(LsbPolicy::Ts, 32, 160_000, 160_160);
        round_trip(LsbPolicy::Ts, 32, u32::MAX - 100, 60);
    }

    #[test]
    fn wraparound_interval() {
        // reference near the top of the field, value wrapped past zero
        assert!(in_interval(0xfffe, 4, 1, 0x0003, 16));
        assert!(!in_interval(0xfffe, 4, 1, 0x0100, 16));
    }

    #[test]
    fn empty_window_forces_full_width() {
        let encoder = WlsbEncoder::new(4, 16, LsbPolicy::RtpSn);
        assert_eq!(encoder.k_for(42), 16);
    }

    #[test]
    fn ack_shrinks_window() {
        let mut encoder = WlsbEncoder::new(4, 16, LsbPolicy::RtpSn);
        encoder.add(1, 1);
        encoder.add(2, 2);
        encoder.add(3, 40);
        // 40 in the window forces a wide k for 41
        let wide = encoder.k_for(41);
        encoder.ack(3);
        let narrow = encoder.k_for(41);
        assert!(narrow <= wide);
        assert!(narrow <= 4);
    }

    #[test]
    fn decode_without_reference_fails() {
        let decoder = LsbDecoder::new(16, LsbPolicy::RtpSn);
        assert_eq!(decoder.decode(3, 4), Err(LsbError::NoReference));
        // full-width bits never need a reference
        assert_eq!(decoder.decode(0x1234, 16).unwrap(), 0x1234);
    }
}
