//! Windows page table entry conventions.
//!
//! Windows uses software bits in non-present page table entries:
//! - Bit 10 (P-bit): Prototype flag
//! - Bit 11 (T-bit): Transition flag
//!
//! A page is considered valid if:
//! - V-bit (bit 0) is set, OR
//! - T-bit (bit 11) is set AND P-bit (bit 10) is NOT set
//!
//! A page is swapped when:
//! - V-bit = 0, T-bit = 0, P-bit = 0, and bit 7 is set
//! - Bits 1-4 contain the swap file index (0-15)
//! - The bits above the mode's swap shift hold the pagefile page number

const PAGE_PRESENT: u64 = 1 << 0;
const PAGE_SWAP_MARKER: u64 = 1 << 7;
const PAGE_PROTOTYPE: u64 = 1 << 10;
const PAGE_TRANSITION: u64 = 1 << 11;

const SWAP_INDEX_MASK: u64 = 0x1E;
const SWAP_INDEX_SHIFT: u32 = 1;

/// Location of a swapped page inside a pagefile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapEntry {
    pub index: u8,
    pub offset: u64,
}

/// Windows page validity: present, or in transition but not a prototype.
#[inline]
pub fn page_is_valid(entry: u64) -> bool {
    entry & PAGE_PRESENT != 0 || (entry & PAGE_TRANSITION != 0 && entry & PAGE_PROTOTYPE == 0)
}

/// Decode a swapped-out entry.
///
/// `bit_offset` is the shift exposing the pagefile page number, and
/// `invalid_bits` the size in bits of the region the faulting entry covered.
pub fn swap_entry(entry: u64, bit_offset: u32, invalid_bits: u32) -> Option<SwapEntry> {
    let flags_clear = entry & (PAGE_PRESENT | PAGE_PROTOTYPE | PAGE_TRANSITION) == 0;
    if !flags_clear || entry & PAGE_SWAP_MARKER == 0 {
        return None;
    }
    let page = entry.checked_shr(bit_offset).unwrap_or(0);
    if page == 0 {
        return None;
    }
    Some(SwapEntry {
        index: ((entry & SWAP_INDEX_MASK) >> SWAP_INDEX_SHIFT) as u8,
        offset: page.checked_shl(invalid_bits).unwrap_or(0),
    })
}
