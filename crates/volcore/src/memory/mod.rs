//! Layered address spaces.
//!
//! [`traits`] defines the layer protocol, [`collection`] the named set of
//! layers a context owns, and the submodules the concrete layers, paged
//! translators and scanners.

pub mod collection;
pub mod layers;
pub mod scanners;
pub mod traits;
pub mod translators;

pub use collection::LayerCollection;
pub use traits::{address_mask_for, Layer, MappedRange, TranslationLayer};
