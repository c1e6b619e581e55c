//! Chunked, overlap-aware layer scanning.
//!
//! A [`Scanner`] looks at one buffer at a time. [`ScanIterator`] feeds it a
//! layer in chunks of `chunk_size` bytes, each extended by `overlap` bytes so
//! that a signature straddling a chunk boundary is still seen. A hit is only
//! reported by the chunk that owns its start offset, so overlaps never
//! produce duplicates.
//!
//! ## Scanner Types
//!
//! - `BytesScanner` - Single-pattern SIMD search (memchr)
//! - `MultiStringScanner` - O(n) multi-pattern search (aho-corasick)
//! - `RegexScanner` - Byte regular expressions

pub mod simd_scanner;

pub use simd_scanner::{BytesScanner, MultiStringScanner, PatternMatch, RegexMatch, RegexScanner};

use crate::memory::traits::Layer;
use std::collections::VecDeque;
use tracing::debug;

/// Default chunk size (16MB).
pub const DEFAULT_CHUNK_SIZE: u64 = 0x1000000;
/// Default overlap between chunks (4KB).
pub const DEFAULT_OVERLAP: u64 = 0x1000;

/// A result produced by a scanner, positioned at a layer offset.
pub trait ScanHit {
    fn offset(&self) -> u64;
}

impl ScanHit for u64 {
    fn offset(&self) -> u64 {
        *self
    }
}

/// Finds matches in a buffer of layer data.
pub trait Scanner {
    type Match: ScanHit;

    fn chunk_size(&self) -> u64 {
        DEFAULT_CHUNK_SIZE
    }

    fn overlap(&self) -> u64 {
        DEFAULT_OVERLAP
    }

    /// Name used in progress descriptions.
    fn name(&self) -> &str;

    /// Scan `data`, which starts at layer offset `data_offset`.
    fn scan_chunk(&mut self, data: &[u8], data_offset: u64) -> Vec<Self::Match>;
}

/// Progress callback: `(percentage, description)`.
pub type ProgressCallback<'a> = Box<dyn FnMut(f64, &str) + 'a>;

/// Lazy scan over a layer. Dropping the iterator stops the scan.
pub struct ScanIterator<'a, S: Scanner> {
    layer: &'a dyn Layer,
    scanner: S,
    sections: VecDeque<(u64, u64)>,
    /// `(next chunk start, section end)` of the section in progress.
    cursor: Option<(u64, u64)>,
    pending: VecDeque<S::Match>,
    progress: Option<ProgressCallback<'a>>,
    total: u64,
    scanned: u64,
}

impl<'a, S: Scanner> ScanIterator<'a, S> {
    /// Scan `sections` of `(start, length)`, clamped to the layer bounds.
    /// Without sections the whole layer is scanned.
    pub fn new(layer: &'a dyn Layer, scanner: S, sections: Option<Vec<(u64, u64)>>) -> Self {
        let minimum = layer.minimum_address();
        let maximum = layer.maximum_address();
        let requested = sections.unwrap_or_else(|| vec![(minimum, maximum.saturating_sub(minimum))]);

        let mut clamped: Vec<(u64, u64)> = requested
            .into_iter()
            .filter_map(|(start, length)| {
                let begin = start.max(minimum);
                let end = start.saturating_add(length).min(maximum);
                (end > begin).then_some((begin, end))
            })
            .collect();
        clamped.sort();

        let total = clamped.iter().map(|(begin, end)| end - begin).sum();
        ScanIterator {
            layer,
            scanner,
            sections: clamped.into(),
            cursor: None,
            pending: VecDeque::new(),
            progress: None,
            total,
            scanned: 0,
        }
    }

    /// Report progress once per chunk.
    pub fn with_progress(mut self, callback: impl FnMut(f64, &str) + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn scanner(&self) -> &S {
        &self.scanner
    }

    /// Scan the next chunk into `pending`. Returns false when exhausted.
    fn advance(&mut self) -> bool {
        let (start, section_end) = match self.cursor {
            Some(cursor) => cursor,
            None => match self.sections.pop_front() {
                Some(section) => section,
                None => return false,
            },
        };

        let chunk_size = self.scanner.chunk_size().max(1);
        let chunk_end = start.saturating_add(chunk_size).min(section_end);
        let read_end = chunk_end.saturating_add(self.scanner.overlap()).min(section_end);
        self.cursor = (chunk_end < section_end).then_some((chunk_end, section_end));

        self.scanned += chunk_end - start;
        if let Some(callback) = self.progress.as_mut() {
            let percentage = if self.total == 0 {
                100.0
            } else {
                self.scanned as f64 * 100.0 / self.total as f64
            };
            let description = format!("Scanning {} using {}", self.layer.name(), self.scanner.name());
            callback(percentage, &description);
        }

        for (run_offset, data) in self.read_runs(start, read_end) {
            let hits = self.scanner.scan_chunk(&data, run_offset);
            self.pending
                .extend(hits.into_iter().filter(|hit| hit.offset() >= start && hit.offset() < chunk_end));
        }
        true
    }

    /// Readable runs of `[start, end)`. Translating layers contribute each
    /// logically contiguous stretch of mapped pieces; other layers the whole range.
    fn read_runs(&self, start: u64, end: u64) -> Vec<(u64, Vec<u8>)> {
        let length = end - start;
        let Some(translation) = self.layer.as_translation() else {
            return match self.layer.read(start, length as usize, false) {
                Ok(data) => vec![(start, data)],
                Err(e) => {
                    debug!(layer = %self.layer.name(), offset = start, error = %e, "skipping unreadable chunk");
                    Vec::new()
                }
            };
        };

        let pieces = match translation.mapping(start, length, true) {
            Ok(pieces) => pieces,
            Err(e) => {
                debug!(layer = %self.layer.name(), offset = start, error = %e, "skipping unmappable chunk");
                return Vec::new();
            }
        };

        let mut spans: Vec<(u64, u64)> = Vec::new();
        for piece in pieces.iter().filter(|p| p.length > 0) {
            match spans.last_mut() {
                Some((_, span_end)) if *span_end == piece.offset => *span_end += piece.length,
                _ => spans.push((piece.offset, piece.offset + piece.length)),
            }
        }

        spans
            .into_iter()
            .filter_map(|(span_start, span_end)| {
                match self.layer.read(span_start, (span_end - span_start) as usize, false) {
                    Ok(data) => Some((span_start, data)),
                    Err(e) => {
                        debug!(layer = %self.layer.name(), offset = span_start, error = %e, "skipping unreadable run");
                        None
                    }
                }
            })
            .collect()
    }
}

impl<S: Scanner> Iterator for ScanIterator<'_, S> {
    type Item = S::Match;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(hit) = self.pending.pop_front() {
                return Some(hit);
            }
            if !self.advance() {
                return None;
            }
        }
    }
}

impl dyn Layer + '_ {
    /// Lazily scan this layer, optionally restricted to `(start, length)` sections.
    pub fn scan<S: Scanner>(&self, scanner: S, sections: Option<Vec<(u64, u64)>>) -> ScanIterator<'_, S> {
        ScanIterator::new(self, scanner, sections)
    }
}
