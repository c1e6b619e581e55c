//! Translation layer implementations.
//!
//! ### Intel x86
//! - [`INTEL`] - 32-bit x86 paging (2-level, 4GB address space)
//! - [`INTEL_PAE`] - PAE paging (3-level, 64GB physical)
//! - [`INTEL_32E`] - x86-64 paging (4-level, 256TB virtual)
//!
//! All three are walked by [`IntelLayer`]. Windows flavours use
//! [`PageValidity::Windows`] and may resolve swapped pages through
//! pagefile layers.

pub mod intel;
pub mod windows;

pub use intel::{IntelLayer, PageValidity, PagingStructure, INTEL, INTEL_32E, INTEL_PAE};
pub use windows::SwapEntry;
