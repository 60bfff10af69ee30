#![allow(unused_crate_dependencies)] // false positives because there is both a library and a binary

//! Integration Tests (IT)
//!
//! Integration tests are all contained in this single crate, and organized in modules.
//! This is to prevent `rustc` to re-link the library crates with each of the integration
//! tests (one for each *.rs file / test crate under the `tests/` folder).
//! Performance implication: https://github.com/rust-lang/cargo/pull/5022#issuecomment-364691154
//!
//! This is also good for execution performance.
//! Cargo will run all tests from a single binary in parallel, but
//! binaries themselves are run sequentially.

mod codecs;
mod ipv6;
mod repair;
mod robustness;
mod rtp;
mod table;
mod v2;
mod wlsb;

use rohc_comp::{Compressor, CompressorBuilder};
use rohc_decomp::Decompressor;
use rohc_pdu::{CidType, ProfileId, RohcMode};

/// A compressor/decompressor pair wired back-to-back.
pub(crate) struct Channel {
    pub(crate) comp: Compressor,
    pub(crate) decomp: Decompressor,
    comp_buf: Vec<u8>,
    decomp_buf: Vec<u8>,
}

impl Channel {
    pub(crate) fn new(profiles: &[ProfileId], mode: RohcMode) -> Self {
        Self::with_builder(Compressor::builder(), profiles, mode)
    }

    pub(crate) fn with_builder(builder: CompressorBuilder, profiles: &[ProfileId], mode: RohcMode) -> Self {
        let mut comp = builder.refresh_seed(7).build().expect("compressor config");
        comp.enable_profiles(profiles).expect("enable profiles");
        let mut decomp = Decompressor::new(CidType::Small, 16, mode);
        decomp.enable_profiles(profiles).expect("enable profiles");
        Self {
            comp,
            decomp,
            comp_buf: vec![0u8; 4096],
            decomp_buf: vec![0u8; 4096],
        }
    }

    /// Compresses `packet` and returns the ROHC bytes plus metadata.
    pub(crate) fn compress(&mut self, packet: &[u8]) -> (Vec<u8>, rohc_comp::CompressedPacket) {
        let meta = self.comp.compress(packet, &mut self.comp_buf).expect("compress");
        (self.comp_buf[..meta.len].to_vec(), meta)
    }

    /// Full round trip; asserts the decompressed packet is bit-identical.
    pub(crate) fn round_trip(&mut self, packet: &[u8]) -> (rohc_comp::CompressedPacket, rohc_decomp::Decompressed) {
        let (rohc, meta) = self.compress(packet);
        let out = self
            .decomp
            .decompress(&rohc, None, &mut self.decomp_buf)
            .expect("decompress");
        assert_eq!(
            &self.decomp_buf[..out.len],
            packet,
            "round trip mismatch for {:?}",
            meta.kind
        );
        (meta, out)
    }
}
