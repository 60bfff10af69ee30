#![cfg_attr(doc, doc = include_str!("../README.md"))]
#![cfg_attr(rustfmt, rustfmt_skip)]

#[cfg(feature = "comp")]
#[doc(inline)]
pub use rohc_comp as comp;

#[cfg(feature = "core")]
#[doc(inline)]
pub use rohc_core as core;

#[cfg(feature = "decomp")]
#[doc(inline)]
pub use rohc_decomp as decomp;

#[cfg(feature = "encodings")]
#[doc(inline)]
pub use rohc_encodings as encodings;

#[cfg(feature = "pdu")]
#[doc(inline)]
pub use rohc_pdu as pdu;
