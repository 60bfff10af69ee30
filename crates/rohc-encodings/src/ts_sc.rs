//! Scaled RTP timestamp encoding (RFC 3095 §4.5.3–§4.5.4).
//!
//! When the timestamp advances by a fixed stride per packet, the sender
//! advertises `ts_stride` a few times, then transmits only W-LSB bits of
//! `TS_SCALED = (TS − ts_offset) / ts_stride`, or zero bits when the scaled
//! value tracks the sequence number.

use crate::wlsb::{LsbDecoder, LsbError, LsbPolicy, WlsbEncoder};

/// Number of times `ts_stride` is transmitted before switching to scaled
/// timestamps.
pub const TS_STRIDE_INIT_MIN: usize = 3;

/// Compressor-side scaled-TS state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TsScState {
    /// No stride observed yet: timestamps go out absolute.
    InitTs,
    /// Stride candidate chosen, being advertised.
    InitStride,
    /// Stride established: scaled bits only.
    SendScaled,
}

/// Compressor half of the scaled-TS machine.
#[derive(Clone, Debug)]
pub struct TsScaledComp {
    state: TsScState,
    stride: u32,
    offset: u32,
    scaled: u32,
    old_ts: Option<u32>,
    constant: bool,
    stride_transmissions: usize,
    scaled_window: WlsbEncoder,
    unscaled_window: WlsbEncoder,
}

impl TsScaledComp {
    #[must_use]
    pub fn new(window_width: usize) -> Self {
        Self {
            state: TsScState::InitTs,
            stride: 0,
            offset: 0,
            scaled: 0,
            old_ts: None,
            constant: false,
            stride_transmissions: 0,
            scaled_window: WlsbEncoder::new(window_width, 32, LsbPolicy::Ts),
            unscaled_window: WlsbEncoder::new(window_width, 32, LsbPolicy::Ts),
        }
    }

    #[must_use]
    pub const fn state(&self) -> TsScState {
        self.state
    }

    #[must_use]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    #[must_use]
    pub const fn scaled(&self) -> u32 {
        self.scaled
    }

    /// Whether the last two timestamps were equal (keeps the context in the
    /// low-confidence states, the stride being unknowable).
    #[must_use]
    pub const fn is_constant(&self) -> bool {
        self.constant
    }

    fn rescale(&mut self, ts: u32) {
        self.offset = if self.stride == 0 { ts } else { ts % self.stride };
        self.scaled = if self.stride == 0 {
            0
        } else {
            ts.wrapping_sub(self.offset) / self.stride
        };
    }

    /// Feeds the timestamp of the packet being compressed.
    pub fn update(&mut self, ts: u32) {
        let Some(old_ts) = self.old_ts else {
            self.old_ts = Some(ts);
            return;
        };

        let delta = ts.wrapping_sub(old_ts);
        self.old_ts = Some(ts);

        if delta == 0 {
            self.constant = true;
            return;
        }
        self.constant = false;

        match self.state {
            TsScState::InitTs => {
                self.stride = delta;
                self.rescale(ts);
                self.state = TsScState::InitStride;
                self.stride_transmissions = 0;
            }
            TsScState::InitStride | TsScState::SendScaled => {
                if self.stride == 0 || delta % self.stride != 0 {
                    // Stride violated: re-advertise the new one.
                    self.stride = delta;
                    self.rescale(ts);
                    self.state = TsScState::InitStride;
                    self.stride_transmissions = 0;
                    self.scaled_window.clear();
                } else {
                    self.scaled = ts.wrapping_sub(self.offset) / self.stride;
                }
            }
        }
    }

    /// Records one transmission of `ts_stride`; after [`TS_STRIDE_INIT_MIN`]
    /// the machine switches to scaled timestamps.
    pub fn stride_transmitted(&mut self) {
        if self.state == TsScState::InitStride {
            self.stride_transmissions += 1;
            if self.stride_transmissions >= TS_STRIDE_INIT_MIN {
                self.state = TsScState::SendScaled;
            }
        }
    }

    /// Whether the receiver can deduce the timestamp from the sequence
    /// number alone: the scaled value must track the SN delta against every
    /// window reference.
    #[must_use]
    pub fn is_deducible(&self, sn: u16) -> bool {
        if self.state != TsScState::SendScaled || self.scaled_window.is_empty() {
            return false;
        }
        self.scaled_window.refs().all(|(sn_ref, scaled_ref)| {
            let sn_delta = u32::from(sn.wrapping_sub(sn_ref as u16));
            self.scaled.wrapping_sub(scaled_ref) == sn_delta
        })
    }

    /// Minimum number of TS bits for the current packet: scaled bits in
    /// SEND_SCALED, absolute bits otherwise. Zero only when the receiver
    /// can deduce the timestamp from the SN delta; any other packet carries
    /// at least one bit so the receiver never misapplies the deduction.
    #[must_use]
    pub fn nr_bits(&self, ts: u32, sn: u16) -> u8 {
        match self.state {
            TsScState::SendScaled => {
                if self.is_deducible(sn) {
                    0
                } else {
                    self.scaled_window.k_for(self.scaled).max(1)
                }
            }
            _ => self.unscaled_window.k_for(ts).max(1),
        }
    }

    /// Commits the packet after it was emitted: the transmitted values
    /// become window references.
    pub fn commit(&mut self, sn: u16, ts: u32) {
        self.unscaled_window.add(u32::from(sn), ts);
        if self.stride != 0 {
            self.scaled_window.add(u32::from(sn), self.scaled);
        }
    }

    /// Positive feedback: references up to `sn` are confirmed.
    pub fn ack(&mut self, sn: u16) {
        self.unscaled_window.ack(u32::from(sn));
        self.scaled_window.ack(u32::from(sn));
    }
}

/// Decompressor half of the scaled-TS machine.
#[derive(Clone, Debug)]
pub struct TsScaledDecomp {
    stride: u32,
    offset: u32,
    scaled_decoder: LsbDecoder,
    unscaled_decoder: LsbDecoder,
}

impl TsScaledDecomp {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stride: 0,
            offset: 0,
            scaled_decoder: LsbDecoder::new(32, LsbPolicy::Ts),
            unscaled_decoder: LsbDecoder::new(32, LsbPolicy::Ts),
        }
    }

    #[must_use]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    #[must_use]
    pub const fn has_stride(&self) -> bool {
        self.stride != 0
    }

    /// Adopts an advertised stride.
    pub fn set_stride(&mut self, stride: u32) {
        self.stride = stride;
    }

    /// Commits a validated timestamp as the new reference.
    pub fn commit(&mut self, ts: u32) {
        self.unscaled_decoder.set_reference(ts);
        if self.stride != 0 {
            self.offset = ts % self.stride;
            self.scaled_decoder.set_reference(ts / self.stride);
        }
    }

    /// Reconstructs the timestamp from scaled LSB bits.
    pub fn decode_scaled(&self, bits: u32, k: u8) -> Result<u32, LsbError> {
        let scaled = self.scaled_decoder.decode(bits, k)?;
        Ok(scaled.wrapping_mul(self.stride).wrapping_add(self.offset))
    }

    /// Reconstructs the timestamp from absolute LSB bits.
    pub fn decode_unscaled(&self, bits: u32, k: u8) -> Result<u32, LsbError> {
        self.unscaled_decoder.decode(bits, k)
    }

    /// Deduces the timestamp from the sequence-number delta (zero TS bits).
    pub fn deduce(&self, sn_delta: u16) -> Result<u32, LsbError> {
        if self.stride == 0 {
            // Constant-TS flow: keep the reference.
            return self.unscaled_decoder.decode(0, 0);
        }
        let scaled_ref = self.scaled_decoder.reference().ok_or(LsbError::NoReference)?;
        let scaled = scaled_ref.wrapping_add(u32::from(sn_delta));
        Ok(scaled.wrapping_mul(self.stride).wrapping_add(self.offset))
    }
}

impl Default for TsScaledDecomp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_detection_and_promotion() {
        let mut comp = TsScaledComp::new(4);
        comp.update(160);
        assert_eq!(comp.state(), TsScState::InitTs);

        comp.update(320);
        assert_eq!(comp.state(), TsScState::InitStride);
        assert_eq!(comp.stride(), 160);

        for _ in 0..TS_STRIDE_INIT_MIN {
            comp.stride_transmitted();
        }
        assert_eq!(comp.state(), TsScState::SendScaled);
    }

    #[test]
    fn scaled_tracks_sn_becomes_deducible() {
        let mut comp = TsScaledComp::new(4);
        let mut sn = 100u16;
        for i in 1..=6u32 {
            comp.update(i * 160);
            comp.stride_transmitted();
            comp.commit(sn, i * 160);
            sn = sn.wrapping_add(1);
        }
        assert_eq!(comp.state(), TsScState::SendScaled);

        comp.update(7 * 160);
        assert!(comp.is_deducible(sn));
        assert_eq!(comp.nr_bits(7 * 160, sn), 0);
    }

    #[test]
    fn stride_violation_restarts_advertisement() {
        let mut comp = TsScaledComp::new(4);
        comp.update(160);
        comp.update(320);
        for _ in 0..TS_STRIDE_INIT_MIN {
            comp.stride_transmitted();
        }
        assert_eq!(comp.state(), TsScState::SendScaled);

        comp.update(320 + 90); // not a multiple of 160
        assert_eq!(comp.state(), TsScState::InitStride);
        assert_eq!(comp.stride(), 90);
    }

    #[test]
    fn constant_ts_is_flagged() {
        let mut comp = TsScaledComp::new(4);
        comp.update(500);
        comp.update(500);
        assert!(comp.is_constant());
        comp.update(660);
        assert!(!comp.is_constant());
    }

    #[test]
    fn decomp_scaled_round_trip() {
        let mut decomp = TsScaledDecomp::new();
        decomp.set_stride(160);
        decomp.commit(1600);

        // scaled ref = 10; receiving 4 bits of scaled value 11
        let ts = decomp.decode_scaled(11 & 0xf, 4).unwrap();
        assert_eq!(ts, 11 * 160);

        // zero bits: deduced from the SN delta
        let ts = decomp.deduce(2).unwrap();
        assert_eq!(ts, 12 * 160);
    }

    #[test]
    fn comp_and_decomp_agree_on_offset() {
        let mut comp = TsScaledComp::new(4);
        let base = 163; // offset 3 with stride 160... offset = 163 % 160
        comp.update(base);
        comp.update(base + 160);
        assert_eq!(comp.stride(), 160);
        assert_eq!(comp.scaled(), (base + 160 - (base % 160)) / 160);

        let mut decomp = TsScaledDecomp::new();
        decomp.set_stride(160);
        decomp.commit(base + 160);
        let ts = decomp.deduce(1).unwrap();
        assert_eq!(ts, base + 320);
    }
}
