//! Fixed array of page entries covering guest RAM, plus the pseudo-permission
//! rules for the kernel and framebuffer ranges that carry no real entry.

use bitflags::bitflags;

use crate::vm::memory::{FRAMEBUFFER_BASE, FB_SIZE, RAM_SIZE};

pub const PAGE_SIZE: u64 = 4096;
pub const PAGE_COUNT: usize = RAM_SIZE / PAGE_SIZE as usize;

/// Addresses at or above this threshold carry implicit {r,w,x} permission
/// with no backing page-table entry. In this hosted implementation no guest
/// address ever reaches it: there is no separate kernel-mode guest program,
/// so the rule exists for structural fidelity but is permanently inert.
pub const KERNEL_SPACE_BASE: u64 = u64::MAX;

/// Lowest address a user mapping may occupy; addresses below this remain
/// available to the page table but are never chosen as an auto-hint target.
pub const USER_BASE: u64 = 0x0010_0000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PagePerm: u8 {
        const R = 0b001;
        const W = 0b010;
        const X = 0b100;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PageEntry {
    mapped: bool,
    flags: u8,
}

pub struct PageTable {
    entries: Vec<PageEntry>,
}

impl PageTable {
    pub fn new() -> Self {
        PageTable { entries: vec![PageEntry::default(); PAGE_COUNT] }
    }

    fn page_index(vaddr: u64) -> Option<usize> {
        let index = (vaddr / PAGE_SIZE) as usize;
        if index < PAGE_COUNT {
            Some(index)
        } else {
            None
        }
    }

    /// Returns the effective permission for `vaddr`, or `None` if unmapped
    /// and outside every pseudo-permission range.
    pub fn check_permission(&self, vaddr: u64) -> Option<PagePerm> {
        if vaddr >= KERNEL_SPACE_BASE {
            return Some(PagePerm::R | PagePerm::W | PagePerm::X);
        }
        if vaddr >= FRAMEBUFFER_BASE && vaddr < FRAMEBUFFER_BASE + FB_SIZE as u64 {
            return Some(PagePerm::R | PagePerm::W);
        }
        let index = Self::page_index(vaddr)?;
        let entry = self.entries[index];
        if entry.mapped {
            PagePerm::from_bits(entry.flags)
        } else {
            None
        }
    }

    fn pages_for(addr: u64, size: u64) -> Option<std::ops::Range<usize>> {
        let start = Self::page_index(addr)?;
        let page_span = (size + PAGE_SIZE - 1) / PAGE_SIZE;
        let end = start + page_span as usize;
        if end > PAGE_COUNT {
            return None;
        }
        Some(start..end)
    }

    pub fn map_pages(&mut self, addr: u64, size: u64, flags: PagePerm) -> bool {
        match Self::pages_for(addr, size) {
            Some(range) => {
                for i in range {
                    self.entries[i] = PageEntry { mapped: true, flags: flags.bits() };
                }
                true
            }
            None => false,
        }
    }

    pub fn unmap_pages(&mut self, addr: u64, size: u64) -> bool {
        match Self::pages_for(addr, size) {
            Some(range) => {
                for i in range {
                    self.entries[i] = PageEntry::default();
                }
                true
            }
            None => false,
        }
    }

    pub fn protect_pages(&mut self, addr: u64, size: u64, flags: PagePerm) -> bool {
        match Self::pages_for(addr, size) {
            Some(range) => {
                for i in range {
                    if self.entries[i].mapped {
                        self.entries[i].flags = flags.bits();
                    }
                }
                true
            }
            None => false,
        }
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_user_address_has_no_permission() {
        let table = PageTable::new();
        assert_eq!(table.check_permission(USER_BASE), None);
    }

    #[test]
    fn framebuffer_range_is_implicitly_rw() {
        let table = PageTable::new();
        assert_eq!(table.check_permission(FRAMEBUFFER_BASE), Some(PagePerm::R | PagePerm::W));
    }

    #[test]
    fn map_then_check_then_unmap() {
        let mut table = PageTable::new();
        assert!(table.map_pages(USER_BASE, PAGE_SIZE, PagePerm::R | PagePerm::W));
        assert_eq!(table.check_permission(USER_BASE), Some(PagePerm::R | PagePerm::W));
        assert!(table.unmap_pages(USER_BASE, PAGE_SIZE));
        assert_eq!(table.check_permission(USER_BASE), None);
    }

    #[test]
    fn protect_updates_flags_on_mapped_pages_only() {
        let mut table = PageTable::new();
        table.map_pages(USER_BASE, PAGE_SIZE, PagePerm::R | PagePerm::W);
        table.protect_pages(USER_BASE, PAGE_SIZE, PagePerm::R);
        assert_eq!(table.check_permission(USER_BASE), Some(PagePerm::R));
    }

    #[test]
    fn out_of_range_request_is_rejected() {
        let mut table = PageTable::new();
        assert!(!table.map_pages(RAM_SIZE as u64, PAGE_SIZE, PagePerm::R));
    }
}
