//! Physical address decomposition shared by every cache instantiation.
//!
//! Grounded on `original_source/src/libs/cache_lib/cache.h` (`Cache_cpp::cache_index`,
//! `cache_tag`, `cache_line_addr`) and the teacher's `cache::CacheController` seam
//! (`romnn-gpucachesim/src/cache/data.rs`) for the trait split between "how to carve
//! up an address" and "how a cache uses that".

/// A byte address. Kept as a bare alias (not a newtype) to match the teacher's
/// `pub type address = u64;` convention used throughout `romnn-gpucachesim`.
pub type Address = u64;

/// The three components an address is split into for a given cache geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decomposed {
    pub tag: Address,
    pub set: usize,
    pub offset: usize,
}

/// Per-geometry address math. Every `Cache<T>` owns one of these, derived once
/// from `(line_size, num_sets)` at construction time (both are required to be
/// powers of two, checked by `config::CacheConfig::validate`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressMap {
    line_size: u32,
    num_sets: usize,
    offset_bits: u32,
    index_bits: u32,
}

impl AddressMap {
    #[must_use]
    pub fn new(line_size: u32, num_sets: usize) -> Self {
        debug_assert!(line_size.is_power_of_two());
        debug_assert!(num_sets.is_power_of_two());
        Self {
            line_size,
            num_sets,
            offset_bits: line_size.trailing_zeros(),
            index_bits: num_sets.trailing_zeros(),
        }
    }

    #[must_use]
    pub fn offset(&self, addr: Address) -> usize {
        (addr & u64::from(self.line_size - 1)) as usize
    }

    #[must_use]
    pub fn set_index(&self, addr: Address) -> usize {
        ((addr >> self.offset_bits) as usize) & (self.num_sets - 1)
    }

    #[must_use]
    pub fn tag(&self, addr: Address) -> Address {
        addr >> (self.offset_bits + self.index_bits)
    }

    /// The address of the cache line containing `addr` (offset bits cleared).
    #[must_use]
    pub fn line_addr(&self, addr: Address) -> Address {
        addr & !Address::from(self.line_size - 1)
    }

    /// Inverse of [`Self::decompose`] with `offset` assumed zero -- rebuilds
    /// the line address a `(tag, set)` pair denotes. Used when a line is
    /// evicted and only its tag/set survive to generate the writeback's
    /// address (spec §4.7, `l1_fill_line`'s `repl_line_addr`).
    #[must_use]
    pub fn reassemble(&self, tag: Address, set: usize) -> Address {
        (tag << (self.offset_bits + self.index_bits)) | ((set as Address) << self.offset_bits)
    }

    #[must_use]
    pub fn decompose(&self, addr: Address) -> Decomposed {
        Decomposed {
            tag: self.tag(addr),
            set: self.set_index(addr),
            offset: self.offset(addr),
        }
    }

    #[must_use]
    pub fn num_sets(&self) -> usize {
        self.num_sets
    }

    #[must_use]
    pub fn line_size(&self) -> u32 {
        self.line_size
    }
}

/// Seam for virtual -> physical translation. Spec treats `phys_addr` as an
/// opaque derived field; the concrete page-table walk that `addr_translate()`
/// performs in the original simulator is out of scope (external collaborator),
/// so this defaults to the identity mapping for a single-address-space model.
pub trait AddressTranslator: std::fmt::Debug {
    fn translate(&self, virt: Address) -> Address;
}

/// Identity translator: physical == virtual. Sufficient for every scenario in
/// spec §8 (none of them depend on a non-trivial translation).
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTranslator;

impl AddressTranslator for IdentityTranslator {
    fn translate(&self, virt: Address) -> Address {
        virt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> AddressMap {
        // 64 sets, 64B line -> matches scenario S1's 32KiB/8-way/64B geometry.
        AddressMap::new(64, 64)
    }

    #[test]
    fn decomposes_disjoint_bit_ranges() {
        let m = map();
        let addr: Address = 0x1234_5678;
        let d = m.decompose(addr);
        let offset_bits = 6;
        let index_bits = 6;
        let reconstructed =
            (d.tag << (offset_bits + index_bits)) | ((d.set as u64) << offset_bits) | d.offset as u64;
        assert_eq!(reconstructed, addr);
    }

    #[test]
    fn line_addr_clears_offset_only() {
        let m = map();
        let addr: Address = 0x1000 + 17;
        assert_eq!(m.line_addr(addr), 0x1000);
    }

    #[test]
    fn scenario_s1_set_index() {
        // S1: 32 KiB, 8-way, 64B line -> 64 sets. addr=0x1000 -> set = (0x1000/64) mod 64.
        let m = AddressMap::new(64, 64);
        assert_eq!(m.set_index(0x1000), (0x1000usize / 64) % 64);
    }

    #[test]
    fn reassemble_inverts_decompose_with_zero_offset() {
        let m = map();
        let addr: Address = 0x1234_5600; // offset bits already zero
        let d = m.decompose(addr);
        assert_eq!(m.reassemble(d.tag, d.set), addr);
    }

    #[test]
    fn identity_translator_is_noop() {
        let t = IdentityTranslator;
        assert_eq!(t.translate(0xdead_beef), 0xdead_beef);
    }
}
