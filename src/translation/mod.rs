//! Virtual to physical address translation by walking x86-64 page tables
use log::debug;
use serde::Serialize;

use crate::error::AnalysisError;
use crate::memory::PhysicalMemory;

pub mod paging;

use paging::{
    DirectoryTableBase, PageTableEntry, PagingLevel, PagingMode, VirtualAddress, ENTRY_SIZE,
    PAGE_SIZE_1G, PAGE_SIZE_2M, PAGE_SIZE_4K,
};

/// Result of a successful walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Translation {
    pub virtual_address: u64,
    pub physical_address: u64,
    /// Size of the page that mapped the address.
    pub page_size: u64,
}

/// Page-table walker over a physical memory image.
///
/// Every call re-reads each paging entry from the image; nothing is cached
/// between translations.
pub struct AddressTranslator<'a> {
    memory: &'a dyn PhysicalMemory,
    mode: PagingMode,
}

impl<'a> AddressTranslator<'a> {
    /// Create a four-level translator over `memory`.
    pub fn new(memory: &'a dyn PhysicalMemory) -> Self {
        Self::with_mode(memory, PagingMode::FourLevel)
    }

    pub fn with_mode(memory: &'a dyn PhysicalMemory, mode: PagingMode) -> Self {
        AddressTranslator { memory, mode }
    }

    pub fn mode(&self) -> PagingMode {
        self.mode
    }

    /// The image this translator reads page tables from.
    pub fn memory(&self) -> &'a dyn PhysicalMemory {
        self.memory
    }

    /// Translate `virtual_addr` under `dtb` to a physical offset in the image.
    pub fn translate(&self, virtual_addr: u64, dtb: u64) -> Result<u64, AnalysisError> {
        self.translate_detailed(virtual_addr, dtb)
            .map(|t| t.physical_address)
    }

    /// Translate and report the size of the leaf page as well.
    pub fn translate_detailed(
        &self,
        virtual_addr: u64,
        dtb: u64,
    ) -> Result<Translation, AnalysisError> {
        let va = VirtualAddress(virtual_addr);
        let mut table = DirectoryTableBase(dtb).table_address();

        if self.mode == PagingMode::FiveLevel {
            let pml5e = self.read_entry(table, va.pml5_index(), PagingLevel::Pml5, va)?;
            table = pml5e.frame_address();
        }

        let pml4e = self.read_entry(table, va.pml4_index(), PagingLevel::Pml4, va)?;

        let pdpte = self.read_entry(
            pml4e.frame_address(),
            va.pdpt_index(),
            PagingLevel::Pdpt,
            va,
        )?;
        if pdpte.large_page() {
            return Ok(self.leaf(va, pdpte.large_1g_base() + va.large_1g_offset(), PAGE_SIZE_1G));
        }

        let pde = self.read_entry(pdpte.frame_address(), va.pd_index(), PagingLevel::Pd, va)?;
        if pde.large_page() {
            return Ok(self.leaf(va, pde.large_2m_base() + va.large_2m_offset(), PAGE_SIZE_2M));
        }

        let pte = self.read_entry(pde.frame_address(), va.pt_index(), PagingLevel::Pt, va)?;
        Ok(self.leaf(va, pte.frame_address() + va.page_offset(), PAGE_SIZE_4K))
    }

    /// Read the 8-byte entry `index` of the table at `table` and require it
    /// to be present.
    fn read_entry(
        &self,
        table: u64,
        index: u64,
        level: PagingLevel,
        va: VirtualAddress,
    ) -> Result<PageTableEntry, AnalysisError> {
        let entry = PageTableEntry(self.memory.read_u64(table + index * ENTRY_SIZE)?);
        if !entry.present() {
            debug!(
                "{} not present for 0x{:x} (table=0x{:x}, index={}, entry=0x{:x})",
                level, va, table, index, entry.0
            );
            return Err(AnalysisError::Unmapped {
                address: va.0,
                level,
            });
        }
        Ok(entry)
    }

    fn leaf(&self, va: VirtualAddress, physical_address: u64, page_size: u64) -> Translation {
        debug!(
            "0x{:x} -> 0x{:x} ({} KiB page)",
            va,
            physical_address,
            page_size / 1024
        );
        Translation {
            virtual_address: va.0,
            physical_address,
            page_size,
        }
    }
}
