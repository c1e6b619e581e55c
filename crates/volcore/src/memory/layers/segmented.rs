//! Generic offset-remapping layer.
//!
//! A [`SegmentedLayer`] maps sparse logical ranges onto a base layer through
//! a sorted list of `(offset, mapped_offset, length)` segments. Format
//! loaders such as the VMware parser populate the segments and then wrap
//! this layer.

use crate::error::{CoreError, CoreResult};
use crate::memory::traits::{is_valid_mapped, read_mapped, write_mapped, Layer, MappedRange, TranslationLayer};
use std::any::Any;
use std::sync::Arc;

/// One contiguous remapped range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Segment {
    pub offset: u64,
    pub mapped_offset: u64,
    pub length: u64,
}

impl Segment {
    pub fn new(offset: u64, mapped_offset: u64, length: u64) -> Self {
        Segment {
            offset,
            mapped_offset,
            length,
        }
    }

    fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }
}

pub struct SegmentedLayer {
    name: String,
    base: Arc<dyn Layer>,
    segments: Vec<Segment>,
}

impl SegmentedLayer {
    /// Build a layer over `base`; the segments are sorted by logical offset.
    pub fn new(name: impl Into<String>, base: Arc<dyn Layer>, mut segments: Vec<Segment>) -> CoreResult<Self> {
        let name = name.into();
        if segments.is_empty() {
            return Err(CoreError::layer(&name, "Segmented layer requires at least one segment"));
        }
        segments.sort();
        Ok(SegmentedLayer { name, base, segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn base_layer(&self) -> &Arc<dyn Layer> {
        &self.base
    }

    /// The segment covering `offset`, or with `next` the first segment after it.
    pub fn find_segment(&self, offset: u64, next: bool) -> CoreResult<Segment> {
        // index of the first segment starting beyond offset
        let i = self.segments.partition_point(|s| s.offset <= offset);
        if i > 0 {
            let candidate = self.segments[i - 1];
            if offset < candidate.end() {
                return Ok(candidate);
            }
        }
        if next {
            if let Some(following) = self.segments.get(i) {
                return Ok(*following);
            }
        }
        Err(CoreError::invalid_address(
            &self.name,
            offset,
            format!("Invalid address at {:#x}", offset),
        ))
    }
}

impl Layer for SegmentedLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn minimum_address(&self) -> u64 {
        self.segments.first().map(|s| s.offset).unwrap_or(0)
    }

    fn maximum_address(&self) -> u64 {
        self.segments.last().map(|s| s.end()).unwrap_or(0)
    }

    fn is_valid(&self, offset: u64, length: u64) -> bool {
        is_valid_mapped(self, offset, length)
    }

    fn read(&self, offset: u64, length: usize, pad: bool) -> CoreResult<Vec<u8>> {
        read_mapped(self, offset, length, pad)
    }

    fn write(&self, offset: u64, data: &[u8]) -> CoreResult<()> {
        write_mapped(self, offset, data)
    }

    fn dependencies(&self) -> Vec<String> {
        vec![self.base.name().to_owned()]
    }

    fn as_translation(&self) -> Option<&dyn TranslationLayer> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TranslationLayer for SegmentedLayer {
    fn mapping(&self, offset: u64, length: u64, ignore_errors: bool) -> CoreResult<Vec<MappedRange>> {
        let end = offset.saturating_add(length);
        let mut current = offset;
        let mut pieces = Vec::new();

        loop {
            let segment = match self.find_segment(current, ignore_errors) {
                Ok(s) => s,
                Err(_) if ignore_errors => break,
                Err(e) => return Err(e),
            };
            if segment.offset > current {
                // skipped a gap; stop once the next segment lies past the request
                if segment.offset >= end {
                    break;
                }
                current = segment.offset;
            }
            let piece_len = (segment.end() - current).min(end - current);
            pieces.push(MappedRange::new(
                current,
                segment.mapped_offset + (current - segment.offset),
                piece_len,
                self.base.name(),
            ));
            current += piece_len;
            if current >= end {
                break;
            }
        }
        Ok(pieces)
    }

    fn dependency(&self, name: &str) -> CoreResult<Arc<dyn Layer>> {
        if name == self.base.name() {
            Ok(self.base.clone())
        } else {
            Err(CoreError::LayerNotFound(name.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::layers::BufferLayer;

    fn layer() -> SegmentedLayer {
        let data: Vec<u8> = (0..0x100).map(|i| i as u8).collect();
        let base: Arc<dyn Layer> = Arc::new(BufferLayer::new("base", data));
        SegmentedLayer::new(
            "seg",
            base,
            vec![Segment::new(0x1000, 0x80, 0x10), Segment::new(0, 0x10, 0x20)],
        )
        .unwrap()
    }

    #[test]
    fn test_bounds_and_sorting() {
        let layer = layer();
        assert_eq!(layer.segments()[0].offset, 0);
        assert_eq!(layer.minimum_address(), 0);
        assert_eq!(layer.maximum_address(), 0x1010);
        assert_eq!(layer.dependencies(), vec!["base".to_string()]);
    }

    #[test]
    fn test_mapping_within_segment() {
        let layer = layer();
        let pieces = layer.mapping(0x4, 0x8, false).unwrap();
        assert_eq!(pieces, vec![MappedRange::new(0x4, 0x14, 0x8, "base")]);
        assert_eq!(layer.read(0x4, 4, false).unwrap(), vec![0x14, 0x15, 0x16, 0x17]);
    }

    #[test]
    fn test_read_equals_concatenation_of_pieces() {
        let layer = layer();
        let pieces = layer.mapping(0x1000, 0x10, false).unwrap();
        let total: u64 = pieces.iter().map(|p| p.length).sum();
        assert_eq!(total, 0x10);
        let mut expected = Vec::new();
        for p in &pieces {
            expected.extend(layer.base_layer().read(p.mapped_offset, p.length as usize, false).unwrap());
        }
        assert_eq!(layer.read(0x1000, 0x10, false).unwrap(), expected);
    }

    #[test]
    fn test_gap_errors_unless_ignored() {
        let layer = layer();
        assert!(matches!(layer.mapping(0x18, 0x10, false), Err(CoreError::InvalidAddress { .. })));
        assert!(layer.read(0x18, 0x10, false).is_err());

        let pieces = layer.mapping(0x18, 0x1000, true).unwrap();
        assert_eq!(
            pieces,
            vec![
                MappedRange::new(0x18, 0x28, 0x8, "base"),
                MappedRange::new(0x1000, 0x80, 0x10, "base"),
            ]
        );
        let padded = layer.read(0x18, 0x10, true).unwrap();
        assert_eq!(&padded[..8], &[0x28, 0x29, 0x2a, 0x2b, 0x2c, 0x2d, 0x2e, 0x2f]);
        assert!(padded[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_ignore_errors_stops_before_distant_segment() {
        let layer = layer();
        assert!(layer.mapping(0x40, 0x10, true).unwrap().is_empty());
    }

    #[test]
    fn test_is_valid_and_write() {
        let layer = layer();
        assert!(layer.is_valid(0, 0x20));
        assert!(!layer.is_valid(0x10, 0x20));
        layer.write(0x1002, b"\xff\xfe").unwrap();
        assert_eq!(layer.read(0x1002, 2, false).unwrap(), b"\xff\xfe");
        assert_eq!(layer.base_layer().read(0x82, 2, false).unwrap(), b"\xff\xfe");
    }

    #[test]
    fn test_empty_segments_rejected() {
        let base: Arc<dyn Layer> = Arc::new(BufferLayer::new("base", vec![0; 4]));
        assert!(SegmentedLayer::new("seg", base, Vec::new()).is_err());
    }
}
