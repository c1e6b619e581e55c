//! Intel x86 paged address translation.
//!
//! One page-table walker serves the three Intel paging modes. Each mode is
//! described by a [`PagingStructure`] table: entry width, register and
//! address widths, and the list of levels with the number of index bits each
//! consumes. The walk masks a fixed-width index out of the virtual address
//! per level, reads that level's table from the physical layer and follows
//! the present entry, stopping early on large pages.

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::memory::traits::{is_valid_mapped, read_mapped, write_mapped, Layer, MappedRange, TranslationLayer};
use crate::memory::translators::windows;
use lru::LruCache;
use parking_lot::Mutex;
use std::any::Any;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;

/// Page Size Extension bit (large page).
const PAGE_PSE: u64 = 1 << 7;

/// All Intel paging modes work on 4096 byte pages.
pub const PAGE_SIZE_IN_BITS: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_SIZE_IN_BITS;

const DEFAULT_CACHE_SIZE: usize = 1024;

/// Describes one Intel paging mode.
#[derive(Debug)]
pub struct PagingStructure {
    pub architecture: &'static str,
    /// Width of a page table entry in bytes.
    pub entry_size: usize,
    pub bits_per_register: u32,
    pub maxphyaddr: u32,
    pub maxvirtaddr: u32,
    /// `(name, index bits, may map a large page)` per level, outermost first.
    pub levels: &'static [(&'static str, u32, bool)],
    /// Shift that exposes the pagefile offset of a swapped Windows entry.
    pub swap_bit_offset: u32,
}

/// 32-bit two-level paging.
pub const INTEL: PagingStructure = PagingStructure {
    architecture: "Intel32",
    entry_size: 4,
    bits_per_register: 32,
    maxphyaddr: 32,
    maxvirtaddr: 32,
    levels: &[("page directory", 10, true), ("page table", 10, false)],
    swap_bit_offset: PAGE_SIZE_IN_BITS,
};

/// Physical Address Extension paging.
pub const INTEL_PAE: PagingStructure = PagingStructure {
    architecture: "Intel32",
    entry_size: 8,
    bits_per_register: 32,
    maxphyaddr: 40,
    maxvirtaddr: 32,
    levels: &[
        ("page directory pointer", 2, false),
        ("page directory", 9, true),
        ("page table", 9, false),
    ],
    swap_bit_offset: 32,
};

/// 4-level long mode paging.
pub const INTEL_32E: PagingStructure = PagingStructure {
    architecture: "Intel64",
    entry_size: 8,
    bits_per_register: 64,
    maxphyaddr: 52,
    maxvirtaddr: 48,
    levels: &[
        ("page map layer 4", 9, false),
        ("page directory pointer", 9, true),
        ("page directory", 9, true),
        ("page table", 9, false),
    ],
    swap_bit_offset: 32,
};

impl PagingStructure {
    /// log2 of the entry size.
    fn index_shift(&self) -> u32 {
        self.entry_size.trailing_zeros()
    }

    fn initial_position(&self) -> u32 {
        self.maxvirtaddr.min(self.bits_per_register) - 1
    }

    fn decode_entry(&self, raw: &[u8]) -> u64 {
        let mut bytes = [0u8; 8];
        bytes[..self.entry_size].copy_from_slice(&raw[..self.entry_size]);
        u64::from_le_bytes(bytes)
    }
}

/// How an entry's present state is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageValidity {
    /// Hardware present bit only.
    Standard,
    /// Windows software bits: transition pages count as valid and swapped
    /// pages can be redirected to pagefile layers.
    Windows,
}

impl PageValidity {
    #[inline]
    pub fn page_is_valid(self, entry: u64) -> bool {
        match self {
            PageValidity::Standard => entry & 1 != 0,
            PageValidity::Windows => windows::page_is_valid(entry),
        }
    }
}

/// Bits of `value` between `high_bit` and `low_bit` inclusive.
#[inline]
pub fn mask(value: u64, high_bit: u32, low_bit: u32) -> u64 {
    let high_mask = if high_bit >= 63 {
        u64::MAX
    } else {
        (1u64 << (high_bit + 1)).wrapping_sub(1)
    };
    let low_mask = if low_bit >= 64 {
        u64::MAX
    } else {
        (1u64 << low_bit).wrapping_sub(1)
    };
    value & (high_mask ^ low_mask)
}

/// Cache entry type: maps page address to (entry, position).
type CacheEntry = (u64, u32);

/// Intel paged translation layer with LRU caching of tables and entries.
///
/// # Thread Safety
///
/// The caches sit behind `parking_lot::Mutex`, so a layer can be shared
/// across threads even though translation itself is synchronous.
pub struct IntelLayer {
    name: String,
    structure: &'static PagingStructure,
    validity: PageValidity,
    base: Arc<dyn Layer>,
    /// Pagefile layers, indexed by the swap file number stored in the entry.
    swap_layers: Vec<Arc<dyn Layer>>,
    /// Page map offset (CR3 value).
    page_map_offset: u64,
    kernel_virtual_offset: Option<u64>,
    entry_cache: Mutex<LruCache<u64, CacheEntry>>,
    /// Page tables keyed by physical address; `None` marks an invalid table.
    table_cache: Mutex<LruCache<u64, Option<Arc<[u8]>>>>,
}

impl IntelLayer {
    /// Create a translation layer over `base` rooted at `page_map_offset`.
    pub fn new(
        name: impl Into<String>,
        structure: &'static PagingStructure,
        base: Arc<dyn Layer>,
        page_map_offset: u64,
    ) -> Self {
        let cache_size = NonZeroUsize::new(DEFAULT_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        IntelLayer {
            name: name.into(),
            structure,
            validity: PageValidity::Standard,
            base,
            swap_layers: Vec::new(),
            page_map_offset,
            kernel_virtual_offset: None,
            entry_cache: Mutex::new(LruCache::new(cache_size)),
            table_cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Use Windows page validity rules, resolving swapped pages through `swap_layers`.
    pub fn with_windows_validity(mut self, swap_layers: Vec<Arc<dyn Layer>>) -> Self {
        self.validity = PageValidity::Windows;
        self.swap_layers = swap_layers;
        self
    }

    pub fn with_kernel_virtual_offset(mut self, offset: u64) -> Self {
        self.kernel_virtual_offset = Some(offset);
        self
    }

    /// Resize both translation caches.
    pub fn with_cache_size(self, cache_size: usize) -> Self {
        let size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        self.entry_cache.lock().resize(size);
        self.table_cache.lock().resize(size);
        self
    }

    /// Build from `memory_layer`, `page_map_offset`, and the optional
    /// `kernel_virtual_offset` and `swap_layers` keys under `config_path`.
    pub fn from_config(
        context: &Context,
        config_path: &str,
        name: &str,
        structure: &'static PagingStructure,
        validity: PageValidity,
    ) -> CoreResult<Self> {
        let config = context.config().branch(config_path);
        let base = context.layers().get(config.get_str("memory_layer")?)?;
        let mut layer = Self::new(name, structure, base, config.get_int("page_map_offset")?);
        if validity == PageValidity::Windows {
            let swap_layers = if config.contains("swap_layers") {
                config
                    .get_list("swap_layers")?
                    .iter()
                    .map(|swap| context.layers().get(swap))
                    .collect::<CoreResult<Vec<_>>>()?
            } else {
                Vec::new()
            };
            layer = layer.with_windows_validity(swap_layers);
        }
        if let Some(kvo) = config.get_int_opt("kernel_virtual_offset")? {
            layer = layer.with_kernel_virtual_offset(kvo);
        }
        Ok(layer)
    }

    pub fn structure(&self) -> &'static PagingStructure {
        self.structure
    }

    pub fn validity(&self) -> PageValidity {
        self.validity
    }

    pub fn page_map_offset(&self) -> u64 {
        self.page_map_offset
    }

    pub fn kernel_virtual_offset(&self) -> Option<u64> {
        self.kernel_virtual_offset
    }

    pub fn base_layer(&self) -> &Arc<dyn Layer> {
        &self.base
    }

    /// Get a valid page table, rejecting tables whose entries are all identical.
    fn get_valid_table(&self, base_address: u64) -> Option<Arc<[u8]>> {
        if let Some(cached) = self.table_cache.lock().get(&base_address) {
            return cached.clone();
        }

        let entry_size = self.structure.entry_size;
        let table: Option<Arc<[u8]>> = match self.base.read(base_address, PAGE_SIZE as usize, false) {
            Ok(t) => {
                let first_entry = &t[..entry_size];
                if t.chunks_exact(entry_size).all(|chunk| chunk == first_entry) {
                    None
                } else {
                    Some(Arc::from(t))
                }
            }
            Err(_) => None,
        };

        self.table_cache.lock().put(base_address, table.clone());
        table
    }

    /// Walk the page tables for `offset`, returning the final entry and bit position.
    fn translate_entry(&self, offset: u64) -> CoreResult<CacheEntry> {
        let page_address = mask(offset, self.structure.maxvirtaddr - 1, PAGE_SIZE_IN_BITS);
        if let Some(cached) = self.entry_cache.lock().get(&page_address) {
            return Ok(*cached);
        }

        let s = self.structure;
        let mut position = s.initial_position();
        let mut entry = mask(self.page_map_offset, position, 0) | 0x1;

        for (name, size, large_page) in s.levels {
            if !self.validity.page_is_valid(entry) {
                return Err(CoreError::paged_invalid_address(
                    &self.name,
                    offset,
                    position + 1,
                    entry,
                    format!("Page Fault at entry {:#x} in table {}", entry, name),
                ));
            }

            let base_address = mask(entry, s.maxphyaddr - 1, size + s.index_shift());
            let table = self.get_valid_table(base_address).ok_or_else(|| {
                CoreError::paged_invalid_address(
                    &self.name,
                    offset,
                    position + 1,
                    entry,
                    format!("Page Fault at entry {:#x} in table {}", entry, name),
                )
            })?;

            let start = position;
            position -= size;
            let index = (mask(offset, start, position + 1) >> (position + 1)) as usize;
            let entry_offset = index << s.index_shift();
            entry = s.decode_entry(&table[entry_offset..entry_offset + s.entry_size]);

            if *large_page && entry & PAGE_PSE != 0 {
                break;
            }
        }

        let result = (entry, position);
        self.entry_cache.lock().put(page_address, result);
        Ok(result)
    }

    /// Hardware translation without any swap handling.
    fn translate_paged(&self, offset: u64) -> CoreResult<(u64, u64, String)> {
        let (entry, position) = self.translate_entry(offset)?;
        if !self.validity.page_is_valid(entry) {
            return Err(CoreError::paged_invalid_address(
                &self.name,
                offset,
                position + 1,
                entry,
                format!("Page Fault at entry {:#x} in page entry", entry),
            ));
        }
        let physical = mask(entry, self.structure.maxphyaddr - 1, position + 1) | mask(offset, position, 0);
        Ok((physical, 1u64 << (position + 1), self.base.name().to_owned()))
    }

    /// Translate a virtual address.
    ///
    /// Returns `(mapped_offset, page_size, layer_name)`; the layer is the
    /// physical layer, or a pagefile layer for swapped Windows pages.
    pub fn translate(&self, offset: u64) -> CoreResult<(u64, u64, String)> {
        match self.translate_paged(offset) {
            Err(CoreError::PagedInvalidAddress {
                layer_name,
                invalid_address,
                invalid_bits,
                entry,
                message,
            }) if self.validity == PageValidity::Windows => {
                let Some(swap) = windows::swap_entry(entry, self.structure.swap_bit_offset, invalid_bits) else {
                    return Err(CoreError::PagedInvalidAddress {
                        layer_name,
                        invalid_address,
                        invalid_bits,
                        entry,
                        message,
                    });
                };
                match self.swap_layers.get(swap.index as usize) {
                    Some(layer) => {
                        trace!(layer = %self.name, offset, swap_index = swap.index, "swapped page");
                        Ok((swap.offset, 1u64 << invalid_bits, layer.name().to_owned()))
                    }
                    None => Err(CoreError::swapped_invalid_address(
                        layer_name,
                        invalid_address,
                        invalid_bits,
                        entry,
                        swap.offset,
                        swap.index,
                        "Page is swapped out to an unavailable pagefile",
                    )),
                }
            }
            other => other,
        }
    }

    fn target_is_valid(&self, layer_name: &str, offset: u64, length: u64) -> CoreResult<()> {
        let target = self.dependency(layer_name)?;
        if target.is_valid(offset, length.max(1)) {
            Ok(())
        } else {
            Err(CoreError::invalid_address(
                layer_name,
                offset,
                format!("Offset {:#x} is not valid in layer {}", offset, layer_name),
            ))
        }
    }
}

impl Layer for IntelLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn maximum_address(&self) -> u64 {
        (1u64 << self.structure.maxvirtaddr) - 1
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
        std::iter::once(&self.base)
            .chain(self.swap_layers.iter())
            .map(|l| l.name().to_owned())
            .collect()
    }

    fn as_translation(&self) -> Option<&dyn TranslationLayer> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TranslationLayer for IntelLayer {
    fn mapping(&self, offset: u64, length: u64, ignore_errors: bool) -> CoreResult<Vec<MappedRange>> {
        let mut results = Vec::new();

        if length == 0 {
            let mapped = self
                .translate(offset)
                .and_then(|(mapped, _, layer)| self.target_is_valid(&layer, mapped, 0).map(|_| (mapped, layer)));
            match mapped {
                Ok((mapped, layer)) => results.push(MappedRange::new(offset, mapped, 0, layer)),
                Err(e) if !ignore_errors => return Err(e),
                Err(_) => {}
            }
            return Ok(results);
        }

        let mut remaining = length;
        let mut current_offset = offset;
        while remaining > 0 {
            let chunk = self.translate(current_offset).and_then(|(mapped, page_size, layer)| {
                let chunk_size = (page_size - (mapped % page_size)).min(remaining);
                self.target_is_valid(&layer, mapped, chunk_size)?;
                Ok((mapped, chunk_size, layer))
            });
            match chunk {
                Ok((mapped, chunk_size, layer)) => {
                    results.push(MappedRange::new(current_offset, mapped, chunk_size, layer));
                    current_offset += chunk_size;
                    remaining -= chunk_size;
                }
                Err(e) => {
                    if !ignore_errors {
                        return Err(e);
                    }
                    let bits = e.invalid_bits().unwrap_or(PAGE_SIZE_IN_BITS);
                    let skip_mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
                    let skip = (skip_mask - (current_offset & skip_mask)).saturating_add(1).min(remaining);
                    current_offset += skip;
                    remaining -= skip;
                }
            }
        }

        Ok(results)
    }

    fn dependency(&self, name: &str) -> CoreResult<Arc<dyn Layer>> {
        std::iter::once(&self.base)
            .chain(self.swap_layers.iter())
            .find(|l| l.name() == name)
            .cloned()
            .ok_or_else(|| CoreError::LayerNotFound(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::layers::BufferLayer;
    use crate::test_support::{put_u32, put_u64};

    #[test]
    fn test_mask() {
        assert_eq!(mask(0xFF, 7, 0), 0xFF);
        assert_eq!(mask(0xFF, 7, 4), 0xF0);
        assert_eq!(mask(0x12345678, 15, 8), 0x5600);
        assert_eq!(mask(u64::MAX, 63, 0), u64::MAX);
    }

    #[test]
    fn test_page_is_valid() {
        assert!(PageValidity::Standard.page_is_valid(0x1));
        assert!(PageValidity::Standard.page_is_valid(0x1001));
        assert!(!PageValidity::Standard.page_is_valid(0x0));
        assert!(!PageValidity::Standard.page_is_valid(0x800));
        assert!(PageValidity::Windows.page_is_valid(0x800));
    }

    /// Long mode tables: CR3 0x1000, PML4 0x1000, PDPT 0x2000, PD 0x3000, PT 0x4000.
    fn long_mode_image() -> Vec<u8> {
        let mut mem = vec![0u8; 0x10000];
        put_u64(&mut mem, 0x1000, 0x2003);
        put_u64(&mut mem, 0x2000, 0x3003);
        put_u64(&mut mem, 0x3000, 0x4003);
        // 2MB page for virtual 0x200000 onto physical 0
        put_u64(&mut mem, 0x3008, 0x83);
        put_u64(&mut mem, 0x4000, 0x5003);
        put_u64(&mut mem, 0x4008, 0x6003);
        // 0x2000 stays unmapped
        put_u64(&mut mem, 0x4018, 0x7003);
        mem[0x5000..0x5005].copy_from_slice(b"PAGE0");
        mem[0x6000..0x6005].copy_from_slice(b"PAGE1");
        mem[0x6ff0..0x7000].copy_from_slice(&[0x11; 0x10]);
        mem[0x7000..0x7005].copy_from_slice(b"PAGE3");
        mem
    }

    fn long_mode(mem: Vec<u8>) -> IntelLayer {
        let base: Arc<dyn Layer> = Arc::new(BufferLayer::new("base", mem));
        IntelLayer::new("kernel", &INTEL_32E, base, 0x1000)
    }

    #[test]
    fn test_translate_4k() {
        let layer = long_mode(long_mode_image());
        assert_eq!(layer.translate(0x10).unwrap(), (0x5010, 0x1000, "base".to_string()));
        assert_eq!(layer.read(0x1000, 5, false).unwrap(), b"PAGE1");
        assert_eq!(layer.read(0x3000, 5, false).unwrap(), b"PAGE3");
        assert_eq!(layer.maximum_address(), (1 << 48) - 1);
        assert_eq!(layer.address_mask(), (1 << 48) - 1);
    }

    #[test]
    fn test_translate_large_page() {
        let layer = long_mode(long_mode_image());
        assert_eq!(layer.translate(0x205000).unwrap(), (0x5000, 0x200000, "base".to_string()));
    }

    #[test]
    fn test_mapping_crosses_pages() {
        let layer = long_mode(long_mode_image());
        let pieces = layer.mapping(0xff0, 0x20, false).unwrap();
        assert_eq!(
            pieces,
            vec![
                MappedRange::new(0xff0, 0x5ff0, 0x10, "base"),
                MappedRange::new(0x1000, 0x6000, 0x10, "base"),
            ]
        );
        let data = layer.read(0xff0, 0x20, false).unwrap();
        assert_eq!(&data[0x10..0x15], b"PAGE1");
    }

    #[test]
    fn test_unmapped_page() {
        let layer = long_mode(long_mode_image());
        let err = layer.translate(0x2000).unwrap_err();
        assert!(matches!(err, CoreError::PagedInvalidAddress { invalid_bits: 12, .. }));

        assert!(layer.read(0x1ff0, 0x20, false).is_err());
        let padded = layer.read(0x1ff0, 0x20, true).unwrap();
        assert_eq!(&padded[..0x10], &[0x11; 0x10]);
        assert!(padded[0x10..].iter().all(|b| *b == 0));
        assert!(layer.is_valid(0x1000, 0x1000));
        assert!(!layer.is_valid(0x1000, 0x1001));
    }

    #[test]
    fn test_mapping_ignore_errors_skips_holes() {
        let layer = long_mode(long_mode_image());
        let pieces = layer.mapping(0x1000, 0x3000, true).unwrap();
        assert_eq!(
            pieces,
            vec![
                MappedRange::new(0x1000, 0x6000, 0x1000, "base"),
                MappedRange::new(0x3000, 0x7000, 0x1000, "base"),
            ]
        );
    }

    #[test]
    fn test_upper_level_fault_reports_wide_invalid_bits() {
        let layer = long_mode(long_mode_image());
        let err = layer.translate(0x80_0000_0000).unwrap_err();
        assert!(matches!(err, CoreError::PagedInvalidAddress { invalid_bits: 39, .. }));
    }

    #[test]
    fn test_zero_length_mapping() {
        let layer = long_mode(long_mode_image());
        assert_eq!(
            layer.mapping(0x10, 0, false).unwrap(),
            vec![MappedRange::new(0x10, 0x5010, 0, "base")]
        );
        assert!(layer.mapping(0x2000, 0, true).unwrap().is_empty());
    }

    #[test]
    fn test_write_through_pages() {
        let layer = long_mode(long_mode_image());
        layer.write(0xffe, b"abcd").unwrap();
        assert_eq!(layer.base_layer().read(0x5ffe, 2, false).unwrap(), b"ab");
        assert_eq!(layer.base_layer().read(0x6000, 2, false).unwrap(), b"cd");
    }

    #[test]
    fn test_duplicate_table_is_invalid() {
        let mut mem = vec![0u8; 0x10000];
        put_u64(&mut mem, 0x1000, 0x2003);
        for i in 0..512 {
            put_u64(&mut mem, 0x2000 + i * 8, 0x3003);
        }
        let layer = long_mode(mem);
        assert!(matches!(layer.translate(0), Err(CoreError::PagedInvalidAddress { .. })));
    }

    #[test]
    fn test_intel32_with_large_page() {
        let mut mem = vec![0u8; 0x4000];
        put_u32(&mut mem, 0x1000, 0x2003);
        put_u32(&mut mem, 0x1004, 0x83);
        put_u32(&mut mem, 0x2000, 0x3003);
        mem[0x3010] = 0x5a;
        let base: Arc<dyn Layer> = Arc::new(BufferLayer::new("base", mem));
        let layer = IntelLayer::new("kernel", &INTEL, base, 0x1000);

        assert_eq!(layer.translate(0x10).unwrap(), (0x3010, 0x1000, "base".to_string()));
        assert_eq!(layer.translate(0x400010).unwrap(), (0x10, 0x400000, "base".to_string()));
        assert_eq!(layer.read(0x10, 1, false).unwrap(), vec![0x5a]);
        assert_eq!(layer.address_mask(), 0xffff_ffff);
    }

    #[test]
    fn test_pae() {
        let mut mem = vec![0u8; 0x5000];
        put_u64(&mut mem, 0x1000, 0x2001);
        put_u64(&mut mem, 0x2000, 0x3003);
        put_u64(&mut mem, 0x3000, 0x4003);
        mem[0x4010] = 0x7e;
        let base: Arc<dyn Layer> = Arc::new(BufferLayer::new("base", mem));
        let layer = IntelLayer::new("kernel", &INTEL_PAE, base, 0x1000);

        assert_eq!(layer.translate(0x10).unwrap(), (0x4010, 0x1000, "base".to_string()));
        assert!(matches!(
            layer.translate(0x4000_0000),
            Err(CoreError::PagedInvalidAddress { invalid_bits: 30, .. })
        ));
    }

    #[test]
    fn test_windows_transition_page() {
        let mut mem = long_mode_image();
        put_u64(&mut mem, 0x4010, 0x8800);
        mem[0x8000] = 0x42;
        let standard = long_mode(mem.clone());
        assert!(standard.translate(0x2000).is_err());

        let base: Arc<dyn Layer> = Arc::new(BufferLayer::new("base", mem));
        let layer = IntelLayer::new("kernel", &INTEL_32E, base, 0x1000).with_windows_validity(Vec::new());
        assert_eq!(layer.translate(0x2000).unwrap().0, 0x8000);
        assert_eq!(layer.read(0x2000, 1, false).unwrap(), vec![0x42]);
    }

    #[test]
    fn test_windows_swapped_page() {
        let mut mem = long_mode_image();
        // swap file 1, pagefile page 0x42
        put_u64(&mut mem, 0x4020, (0x42 << 32) | 0x80 | (1 << 1));
        let base: Arc<dyn Layer> = Arc::new(BufferLayer::new("base", mem));

        let without = IntelLayer::new("kernel", &INTEL_32E, base.clone(), 0x1000).with_windows_validity(Vec::new());
        match without.translate(0x4000) {
            Err(CoreError::SwappedInvalidAddress { swap_index, swap_offset, .. }) => {
                assert_eq!(swap_index, 1);
                assert_eq!(swap_offset, 0x42000);
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut pagefile = vec![0u8; 0x43000];
        pagefile[0x42000..0x42004].copy_from_slice(b"SWAP");
        let swap0: Arc<dyn Layer> = Arc::new(BufferLayer::new("swap0", Vec::new()));
        let swap1: Arc<dyn Layer> = Arc::new(BufferLayer::new("swap1", pagefile));
        let layer = IntelLayer::new("kernel", &INTEL_32E, base, 0x1000).with_windows_validity(vec![swap0, swap1]);

        assert_eq!(layer.translate(0x4000).unwrap(), (0x42000, 0x1000, "swap1".to_string()));
        assert_eq!(layer.read(0x4000, 4, false).unwrap(), b"SWAP");
        assert_eq!(layer.dependencies(), vec!["base", "swap0", "swap1"]);
    }
}
