//! Per-profile decompression engines.

pub(crate) mod uncompressed;
pub(crate) mod v1;
pub(crate) mod v2_ip;

use std::collections::VecDeque;

/// Decompressor confidence states (RFC 3095 §4.3.2). "No context" is the
/// absence of a context table entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum DecompState {
    /// Static part only: compressed packets with a 3-bit CRC are not
    /// trusted.
    StaticContext,
    /// Full context.
    FullContext,
}

/// `k`-out-of-`n` CRC failure tracking: too many failures in the sliding
/// window downgrade the context by one level.
#[derive(Clone, Debug)]
pub(crate) struct CrcFailureWindow {
    outcomes: VecDeque<bool>,
}

impl CrcFailureWindow {
    const WINDOW: usize = 10;
    const THRESHOLD: usize = 3;

    pub(crate) fn new() -> Self {
        Self {
            outcomes: VecDeque::with_capacity(Self::WINDOW),
        }
    }

    /// Records an outcome; returns `true` when a downgrade is warranted.
    pub(crate) fn record(&mut self, ok: bool) -> bool {
        if self.outcomes.len() == Self::WINDOW {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(ok);

        let failures = self.outcomes.iter().filter(|ok| !**ok).count();
        if failures >= Self::THRESHOLD {
            self.outcomes.clear();
            true
        } else {
            false
        }
    }

    pub(crate) fn reset(&mut self) {
        self.outcomes.clear();
    }
}
