//! Per-profile compression engines.

pub(crate) mod uncompressed;
pub(crate) mod v1;
pub(crate) mod v2_ip;

use std::time::Instant;

use rohc_pdu::{Cid, CidType};

use crate::{CompressorFeatures, RefreshPolicy};

/// Number of IR transmissions before the compressor trusts the
/// decompressor to hold the static context (RFC 3095 §5.3.1 optimistic
/// approach).
pub(crate) const MAX_IR_COUNT: usize = 2;

/// Number of FO-level transmissions (IR-DYN included) before promoting to
/// SO.
pub(crate) const MAX_FO_COUNT: usize = 2;

/// Everything a profile engine needs besides its own context.
pub(crate) struct CompressEnv {
    pub(crate) cid: Cid,
    pub(crate) cid_type: CidType,
    pub(crate) features: CompressorFeatures,
    pub(crate) refresh: RefreshPolicy,
    pub(crate) now: Instant,
}

/// Compressor confidence states (RFC 3095 §4.3.1).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum CompState {
    Ir,
    Fo,
    So,
}

/// Packet-count and wall-clock bookkeeping for U-mode periodic refreshes.
#[derive(Clone, Debug)]
pub(crate) struct RefreshClock {
    packets_since_ir: u64,
    packets_since_fo: u64,
    last_ir: Option<Instant>,
    last_fo: Option<Instant>,
}

impl RefreshClock {
    pub(crate) fn new() -> Self {
        Self {
            packets_since_ir: 0,
            packets_since_fo: 0,
            last_ir: None,
            last_fo: None,
        }
    }

    /// Whether a downgrade to IR is due.
    pub(crate) fn ir_due(&self, env: &CompressEnv) -> bool {
        if self.packets_since_ir >= env.refresh.ir_packet_interval {
            return true;
        }
        if env.features.contains(CompressorFeatures::TIME_BASED_REFRESHES) {
            if let Some(last) = self.last_ir {
                return env.now.duration_since(last) >= env.refresh.ir_time_interval;
            }
        }
        false
    }

    /// Whether a downgrade to FO is due.
    pub(crate) fn fo_due(&self, env: &CompressEnv) -> bool {
        if self.packets_since_fo >= env.refresh.fo_packet_interval {
            return true;
        }
        if env.features.contains(CompressorFeatures::TIME_BASED_REFRESHES) {
            if let Some(last) = self.last_fo {
                return env.now.duration_since(last) >= env.refresh.fo_time_interval;
            }
        }
        false
    }

    /// Records the state level of the packet just sent; the timers restart
    /// with a little jitter so the contexts of a channel do not refresh in
    /// lockstep.
    pub(crate) fn packet_sent(&mut self, state: CompState, env: &CompressEnv, jitter: &mut rand::rngs::StdRng) {
        use rand::Rng as _;

        self.packets_since_ir += 1;
        self.packets_since_fo += 1;

        match state {
            CompState::Ir => {
                self.packets_since_ir = 0;
                self.packets_since_fo = 0;
                let skew = env.refresh.ir_time_interval / 8;
                self.last_ir = Some(env.now + skew.mul_f64(jitter.random_range(0.0..1.0)));
                self.last_fo = Some(env.now);
            }
            CompState::Fo => {
                self.packets_since_fo = 0;
                let skew = env.refresh.fo_time_interval / 8;
                self.last_fo = Some(env.now + skew.mul_f64(jitter.random_range(0.0..1.0)));
            }
            CompState::So => {}
        }

        if self.last_ir.is_none() {
            self.last_ir = Some(env.now);
        }
        if self.last_fo.is_none() {
            self.last_fo = Some(env.now);
        }
    }
}
