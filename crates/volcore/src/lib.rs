//! volcore: layered address translation and a symbolic object model for
//! memory images.
//!
//! A [`Context`](context::Context) owns a stack of named layers (raw files,
//! sparse remappers, page-table translators, registry hives), the symbol
//! tables that describe the data in them, and the configuration they were
//! built from. Objects are typed views onto a layer offset, built from
//! templates the symbol space resolves.

pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod objects;
pub mod registry;
pub mod symbols;

#[cfg(test)]
mod test_support;

pub use context::{Context, LayerClass, Module};
pub use error::{CoreError, CoreResult};
