//! Concrete scanners.
//!
//! Uses the `memchr` crate for SIMD-accelerated single-pattern search,
//! `aho-corasick` for multi-pattern matching and `regex` byte expressions
//! for structured signatures.

use super::{ScanHit, Scanner, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::error::{CoreError, CoreResult};
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use memchr::memmem::Finder;
use regex::bytes::Regex;

// =============================================================================
// BytesScanner
// =============================================================================

/// SIMD-accelerated byte pattern scanner.
///
/// ```rust,ignore
/// let hits: Vec<u64> = layer.scan(BytesScanner::new(b"MZ"), None).collect();
/// ```
#[derive(Clone)]
pub struct BytesScanner {
    finder: Finder<'static>,
    chunk_size: u64,
    overlap: u64,
}

impl BytesScanner {
    pub fn new(needle: &[u8]) -> Self {
        BytesScanner {
            finder: Finder::new(needle).into_owned(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }

    /// Override the chunking. The overlap should exceed the needle length.
    pub fn with_chunking(mut self, chunk_size: u64, overlap: u64) -> Self {
        self.chunk_size = chunk_size;
        self.overlap = overlap;
        self
    }

    pub fn needle(&self) -> &[u8] {
        self.finder.needle()
    }
}

impl Scanner for BytesScanner {
    type Match = u64;

    fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    fn overlap(&self) -> u64 {
        self.overlap
    }

    fn name(&self) -> &str {
        "BytesScanner"
    }

    fn scan_chunk(&mut self, data: &[u8], data_offset: u64) -> Vec<u64> {
        self.finder
            .find_iter(data)
            .map(|local| data_offset + local as u64)
            .collect()
    }
}

// =============================================================================
// MultiStringScanner
// =============================================================================

/// A pattern found by [`MultiStringScanner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub offset: u64,
    pub pattern: Vec<u8>,
}

impl ScanHit for PatternMatch {
    fn offset(&self) -> u64 {
        self.offset
    }
}

/// Aho-Corasick multi-pattern scanner.
///
/// Reports every occurrence of every pattern, including overlapping ones,
/// in offset order.
pub struct MultiStringScanner {
    /// The patterns to search for.
    needles: Vec<Vec<u8>>,
    /// Precompiled Aho-Corasick automaton.
    automaton: AhoCorasick,
}

impl std::fmt::Debug for MultiStringScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiStringScanner")
            .field("needles_count", &self.needles.len())
            .finish()
    }
}

impl MultiStringScanner {
    pub fn new(needles: Vec<Vec<u8>>) -> CoreResult<Self> {
        let automaton = AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .build(&needles)
            .map_err(|e| CoreError::InvalidParameter(format!("Failed to build automaton: {}", e)))?;
        Ok(MultiStringScanner { needles, automaton })
    }

    pub fn needles(&self) -> &[Vec<u8>] {
        &self.needles
    }
}

impl Scanner for MultiStringScanner {
    type Match = PatternMatch;

    fn name(&self) -> &str {
        "MultiStringScanner"
    }

    fn scan_chunk(&mut self, data: &[u8], data_offset: u64) -> Vec<PatternMatch> {
        let mut results: Vec<PatternMatch> = self
            .automaton
            .find_overlapping_iter(data)
            .map(|mat| PatternMatch {
                offset: data_offset + mat.start() as u64,
                pattern: self.needles[mat.pattern().as_usize()].clone(),
            })
            .collect();
        results.sort_by_key(|m| m.offset);
        results
    }
}

// =============================================================================
// RegexScanner
// =============================================================================

/// A match found by [`RegexScanner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexMatch {
    pub offset: u64,
    pub data: Vec<u8>,
}

impl ScanHit for RegexMatch {
    fn offset(&self) -> u64 {
        self.offset
    }
}

/// Byte regular expression scanner.
#[derive(Debug, Clone)]
pub struct RegexScanner {
    regex: Regex,
}

impl RegexScanner {
    pub fn new(pattern: &str) -> CoreResult<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| CoreError::InvalidParameter(format!("Invalid scan pattern {}: {}", pattern, e)))?;
        Ok(RegexScanner { regex })
    }
}

impl Scanner for RegexScanner {
    type Match = RegexMatch;

    fn name(&self) -> &str {
        "RegexScanner"
    }

    fn scan_chunk(&mut self, data: &[u8], data_offset: u64) -> Vec<RegexMatch> {
        self.regex
            .find_iter(data)
            .map(|m| RegexMatch {
                offset: data_offset + m.start() as u64,
                data: m.as_bytes().to_vec(),
            })
            .collect()
    }
}
