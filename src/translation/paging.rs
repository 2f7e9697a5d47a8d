//! x86-64 paging structures: virtual address fields, DTB and table entries
use std::fmt;

use serde::{Deserialize, Serialize};

pub const PAGE_SHIFT_4K: u32 = 12;
pub const PAGE_SHIFT_2M: u32 = 21;
pub const PAGE_SHIFT_1G: u32 = 30;

pub const PAGE_SIZE_4K: u64 = 1 << PAGE_SHIFT_4K;
pub const PAGE_SIZE_2M: u64 = 1 << PAGE_SHIFT_2M;
pub const PAGE_SIZE_1G: u64 = 1 << PAGE_SHIFT_1G;

/// Size of one paging-structure entry.
pub const ENTRY_SIZE: u64 = 8;

const PRESENT: u64 = 1 << 0;
const PAGE_SIZE: u64 = 1 << 7;

/// Bits 12..=47: the physical frame field of a table entry or of CR3.
const FRAME_MASK: u64 = 0x0000_ffff_ffff_f000;
/// Bits 21..=47 of a 2 MiB leaf.
const LARGE_2M_MASK: u64 = 0x0000_ffff_ffe0_0000;
/// Bits 30..=47 of a 1 GiB leaf.
const LARGE_1G_MASK: u64 = 0x0000_ffff_c000_0000;

const INDEX_MASK: u64 = 0x1ff;

/// Number of translation levels above the page offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PagingMode {
    #[default]
    FourLevel,
    FiveLevel,
}

/// Paging structure a translation step reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PagingLevel {
    Pml5,
    Pml4,
    Pdpt,
    Pd,
    Pt,
}

impl fmt::Display for PagingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PagingLevel::Pml5 => "PML5E",
            PagingLevel::Pml4 => "PML4E",
            PagingLevel::Pdpt => "PDPTE",
            PagingLevel::Pd => "PDE",
            PagingLevel::Pt => "PTE",
        };
        f.write_str(name)
    }
}

/// Index fields of a 64-bit virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub fn page_offset(&self) -> u64 {
        self.0 & (PAGE_SIZE_4K - 1)
    }

    pub fn pt_index(&self) -> u64 {
        (self.0 >> 12) & INDEX_MASK
    }

    pub fn pd_index(&self) -> u64 {
        (self.0 >> 21) & INDEX_MASK
    }

    pub fn pdpt_index(&self) -> u64 {
        (self.0 >> 30) & INDEX_MASK
    }

    pub fn pml4_index(&self) -> u64 {
        (self.0 >> 39) & INDEX_MASK
    }

    /// Only meaningful with five-level paging.
    pub fn pml5_index(&self) -> u64 {
        (self.0 >> 48) & INDEX_MASK
    }

    pub fn large_2m_offset(&self) -> u64 {
        self.0 & (PAGE_SIZE_2M - 1)
    }

    pub fn large_1g_offset(&self) -> u64 {
        self.0 & (PAGE_SIZE_1G - 1)
    }
}

impl fmt::LowerHex for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// CR3-style directory table base. The low 12 bits carry cache control or
/// PCID bits and are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryTableBase(pub u64);

impl DirectoryTableBase {
    /// Physical address of the top-level table.
    pub fn table_address(&self) -> u64 {
        self.0 & FRAME_MASK
    }
}

/// One 8-byte paging-structure entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry(pub u64);

impl PageTableEntry {
    pub fn present(&self) -> bool {
        self.0 & PRESENT != 0
    }

    /// PS bit. Only meaningful for PDPTEs and PDEs.
    pub fn large_page(&self) -> bool {
        self.0 & PAGE_SIZE != 0
    }

    /// Page frame number (bits 12..=47, unshifted).
    pub fn pfn(&self) -> u64 {
        (self.0 & FRAME_MASK) >> PAGE_SHIFT_4K
    }

    /// Physical address of the next table, or of a 4 KiB page for a PTE.
    pub fn frame_address(&self) -> u64 {
        self.pfn() << PAGE_SHIFT_4K
    }

    /// Base of the 2 MiB page mapped by a large PDE.
    pub fn large_2m_base(&self) -> u64 {
        self.0 & LARGE_2M_MASK
    }

    /// Base of the 1 GiB page mapped by a large PDPTE.
    pub fn large_1g_base(&self) -> u64 {
        self.0 & LARGE_1G_MASK
    }
}
