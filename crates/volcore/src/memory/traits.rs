//! Core traits for abstracting memory access.
//!
//! A [`Layer`] is a named, addressable byte space. Layers that remap their
//! addresses onto other layers also implement [`TranslationLayer`], whose
//! [`mapping`](TranslationLayer::mapping) is the single source of truth for
//! both reads and writes: [`read_mapped`] and [`write_mapped`] drive the
//! underlying layers from the mapping pieces.

use crate::error::{CoreError, CoreResult};
use std::any::Any;
use std::sync::Arc;

/// One translated piece of a request: `length` bytes at logical `offset`
/// live at `mapped_offset` in layer `layer_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRange {
    pub offset: u64,
    pub mapped_offset: u64,
    pub length: u64,
    pub layer_name: String,
}

impl MappedRange {
    pub fn new(offset: u64, mapped_offset: u64, length: u64, layer_name: impl Into<String>) -> Self {
        MappedRange {
            offset,
            mapped_offset,
            length,
            layer_name: layer_name.into(),
        }
    }
}

/// Default address mask: every bit needed to express `maximum_address`.
pub fn address_mask_for(maximum_address: u64) -> u64 {
    if maximum_address <= 1 {
        return maximum_address;
    }
    let bits = 64 - (maximum_address - 1).leading_zeros();
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// An addressable byte space.
pub trait Layer: Send + Sync {
    /// The name of this layer, unique within its collection.
    fn name(&self) -> &str;

    /// Lowest valid address.
    fn minimum_address(&self) -> u64 {
        0
    }

    /// Highest address of the layer.
    fn maximum_address(&self) -> u64;

    /// Mask applied to object offsets constructed on this layer.
    fn address_mask(&self) -> u64 {
        address_mask_for(self.maximum_address())
    }

    /// Check if the address range `[offset, offset+length)` is valid.
    fn is_valid(&self, offset: u64, length: u64) -> bool;

    /// Read `length` bytes starting at `offset`, zero-filling what cannot be
    /// read when `pad` is set.
    fn read(&self, offset: u64, length: usize, pad: bool) -> CoreResult<Vec<u8>>;

    /// Write `data` at `offset`.
    fn write(&self, _offset: u64, _data: &[u8]) -> CoreResult<()> {
        Err(CoreError::NotWritable(self.name().to_owned()))
    }

    /// Names of the layers this layer reads from.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Release any backing resources. Further reads fail.
    fn destroy(&self) {}

    /// The translation view of this layer, if it remaps addresses.
    fn as_translation(&self) -> Option<&dyn TranslationLayer> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// A layer whose addresses are remapped onto other layers.
pub trait TranslationLayer: Layer {
    /// Translate `[offset, offset+length)` into mapped pieces, in increasing
    /// logical order. With `ignore_errors`, unmappable regions are skipped
    /// rather than reported.
    fn mapping(&self, offset: u64, length: u64, ignore_errors: bool) -> CoreResult<Vec<MappedRange>>;

    /// Resolve a layer named in a mapping piece.
    fn dependency(&self, name: &str) -> CoreResult<Arc<dyn Layer>>;
}

/// Read through a translation layer by concatenating its mapping pieces.
pub fn read_mapped<L: TranslationLayer + ?Sized>(
    layer: &L,
    offset: u64,
    length: usize,
    pad: bool,
) -> CoreResult<Vec<u8>> {
    let mut output = Vec::with_capacity(length);
    let mut current_offset = offset;

    for piece in layer.mapping(offset, length as u64, pad)? {
        if piece.offset > current_offset {
            if !pad {
                return Err(CoreError::invalid_address(
                    layer.name(),
                    current_offset,
                    format!("Layer {} cannot map offset: {:#x}", layer.name(), current_offset),
                ));
            }
            let gap = (piece.offset - current_offset) as usize;
            output.resize(output.len() + gap, 0);
            current_offset = piece.offset;
        } else if piece.offset < current_offset {
            return Err(CoreError::layer(
                layer.name(),
                format!("Mapping returned an overlapping element at {:#x}", piece.offset),
            ));
        }

        let target = layer.dependency(&piece.layer_name)?;
        let chunk = target.read(piece.mapped_offset, piece.length as usize, pad)?;
        output.extend_from_slice(&chunk);
        current_offset += piece.length;
    }

    if output.len() < length {
        if !pad {
            return Err(CoreError::invalid_address(
                layer.name(),
                current_offset,
                format!("Layer {} cannot map offset: {:#x}", layer.name(), current_offset),
            ));
        }
        output.resize(length, 0);
    }
    output.truncate(length);
    Ok(output)
}

/// Write through a translation layer, splitting `data` across its mapping pieces.
pub fn write_mapped<L: TranslationLayer + ?Sized>(layer: &L, offset: u64, data: &[u8]) -> CoreResult<()> {
    let mut current_offset = offset;
    for piece in layer.mapping(offset, data.len() as u64, false)? {
        if piece.offset != current_offset {
            return Err(CoreError::invalid_address(
                layer.name(),
                current_offset,
                format!("Layer {} cannot map offset: {:#x}", layer.name(), current_offset),
            ));
        }
        let start = (piece.offset - offset) as usize;
        let end = start + piece.length as usize;
        let target = layer.dependency(&piece.layer_name)?;
        target.write(piece.mapped_offset, &data[start..end])?;
        current_offset += piece.length;
    }
    if current_offset - offset != data.len() as u64 {
        return Err(CoreError::invalid_address(
            layer.name(),
            current_offset,
            format!("Layer {} cannot map offset: {:#x}", layer.name(), current_offset),
        ));
    }
    Ok(())
}

/// Validity through a translation layer: every byte must map to a valid target.
pub fn is_valid_mapped<L: TranslationLayer + ?Sized>(layer: &L, offset: u64, length: u64) -> bool {
    let pieces = match layer.mapping(offset, length, false) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let mut covered = 0u64;
    for piece in &pieces {
        let valid = layer
            .dependency(&piece.layer_name)
            .map(|target| target.is_valid(piece.mapped_offset, piece.length.max(1)))
            .unwrap_or(false);
        if !valid {
            return false;
        }
        covered += piece.length;
    }
    covered == length
}
