//! Synthetic memory images for unit tests
//!
//! [`ImageBuilder`] lays out real x86-64 page tables and kernel records in a
//! sparse image, so multi-gigabyte physical addresses can be exercised
//! without allocating the whole range.
use std::collections::HashMap;

use crate::core::layout::KernelLayout;
use crate::error::AnalysisError;
use crate::kernel::{VadNode, VpnFields};
use crate::memory::PhysicalMemory;
use crate::translation::paging::{VirtualAddress, PAGE_SIZE_4K};

const PAGE: u64 = PAGE_SIZE_4K;
/// Present | writable.
const TABLE_FLAGS: u64 = 0x3;
const LARGE_FLAGS: u64 = 0x83;

/// Image whose untouched pages read as zero.
pub struct SparseMemory {
    size: u64,
    pages: HashMap<u64, Vec<u8>>,
}

impl PhysicalMemory for SparseMemory {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<(), AnalysisError> {
        let end = offset.checked_add(buf.len() as u64);
        if end.map_or(true, |end| end > self.size) {
            return Err(AnalysisError::OutOfRange {
                offset,
                length: buf.len(),
                size: self.size,
            });
        }

        let mut done = 0usize;
        while done < buf.len() {
            let addr = offset + done as u64;
            let page = addr & !(PAGE - 1);
            let in_page = (addr - page) as usize;
            let take = (PAGE as usize - in_page).min(buf.len() - done);
            match self.pages.get(&page) {
                Some(bytes) => {
                    buf[done..done + take].copy_from_slice(&bytes[in_page..in_page + take])
                }
                None => buf[done..done + take].fill(0),
            }
            done += take;
        }
        Ok(())
    }
}

pub struct ImageBuilder {
    memory: SparseMemory,
    next_table: u64,
}

impl ImageBuilder {
    /// Page tables are allocated downwards from the top of the image.
    pub fn new(size: u64) -> Self {
        ImageBuilder {
            memory: SparseMemory {
                size,
                pages: HashMap::new(),
            },
            next_table: (size & !(PAGE - 1)) - PAGE,
        }
    }

    pub fn build(self) -> SparseMemory {
        self.memory
    }

    pub fn write_bytes(&mut self, phys: u64, bytes: &[u8]) {
        assert!(phys + bytes.len() as u64 <= self.memory.size, "write past image");
        for (i, byte) in bytes.iter().enumerate() {
            let addr = phys + i as u64;
            let page = addr & !(PAGE - 1);
            let entry = self
                .memory
                .pages
                .entry(page)
                .or_insert_with(|| vec![0u8; PAGE as usize]);
            entry[(addr - page) as usize] = *byte;
        }
    }

    pub fn write_u64(&mut self, phys: u64, value: u64) {
        self.write_bytes(phys, &value.to_le_bytes());
    }

    pub fn write_u32(&mut self, phys: u64, value: u32) {
        self.write_bytes(phys, &value.to_le_bytes());
    }

    pub fn read_u64(&self, phys: u64) -> u64 {
        self.memory.read_u64(phys).expect("fixture read")
    }

    fn alloc_table(&mut self) -> u64 {
        loop {
            let frame = self.next_table;
            self.next_table -= PAGE;
            if !self.memory.pages.contains_key(&frame) {
                self.memory.pages.insert(frame, vec![0u8; PAGE as usize]);
                return frame;
            }
        }
    }

    /// Next-level table referenced by `table[index]`, created on demand.
    fn ensure_table(&mut self, table: u64, index: u64) -> u64 {
        let slot = table + index * 8;
        let entry = self.read_u64(slot);
        if entry & 1 != 0 {
            return entry & 0x0000_ffff_ffff_f000;
        }
        let frame = self.alloc_table();
        self.write_u64(slot, frame | TABLE_FLAGS);
        frame
    }

    fn walk_to_pd(&mut self, pml4: u64, va: VirtualAddress) -> u64 {
        let pdpt = self.ensure_table(pml4, va.pml4_index());
        self.ensure_table(pdpt, va.pdpt_index())
    }

    pub fn map_page_4k(&mut self, dtb: u64, va: u64, phys: u64) {
        let va = VirtualAddress(va);
        let pml4 = dtb & 0x0000_ffff_ffff_f000;
        let pd = self.walk_to_pd(pml4, va);
        let pt = self.ensure_table(pd, va.pd_index());
        self.write_u64(pt + va.pt_index() * 8, (phys & !(PAGE - 1)) | TABLE_FLAGS);
    }

    /// Same as [`ImageBuilder::map_page_4k`] with a PML5 table at `dtb`.
    pub fn map_page_4k_la57(&mut self, dtb: u64, va: u64, phys: u64) {
        let v = VirtualAddress(va);
        let pml4 = self.ensure_table(dtb & 0x0000_ffff_ffff_f000, v.pml5_index());
        self.map_page_4k(pml4, va, phys);
    }

    pub fn map_page_2m(&mut self, dtb: u64, va: u64, phys: u64) {
        let va = VirtualAddress(va);
        let pd = self.walk_to_pd(dtb & 0x0000_ffff_ffff_f000, va);
        self.write_u64(pd + va.pd_index() * 8, phys | LARGE_FLAGS);
    }

    pub fn map_page_1g(&mut self, dtb: u64, va: u64, phys: u64) {
        let va = VirtualAddress(va);
        let pdpt = self.ensure_table(dtb & 0x0000_ffff_ffff_f000, va.pml4_index());
        self.write_u64(pdpt + va.pdpt_index() * 8, phys | LARGE_FLAGS);
    }

    /// Map `[va, va + len)` onto `[phys, phys + len)` with 4 KiB pages.
    /// Both must share the same page offset.
    pub fn map_range(&mut self, dtb: u64, va: u64, phys: u64, len: u64) {
        assert_eq!(va & (PAGE - 1), phys & (PAGE - 1), "page offsets differ");
        let first = va & !(PAGE - 1);
        let last = (va + len.max(1) - 1) & !(PAGE - 1);
        let mut page = first;
        while page <= last {
            self.map_page_4k(dtb, page, (phys & !(PAGE - 1)) + (page - first));
            page += PAGE;
        }
    }
}

/// Location of one kernel structure in both address spaces.
#[derive(Debug, Clone, Copy)]
pub struct Placed {
    pub phys: u64,
    pub va: u64,
}

/// Size of the `_EPROCESS` span the fixtures map.
const RECORD_SPAN: u64 = 0x1000;
/// Spacing between planted VAD nodes.
const VAD_STRIDE: u64 = 0x40;

/// Plants Windows kernel records into an [`ImageBuilder`].
pub struct KernelFixture {
    pub builder: ImageBuilder,
    pub layout: KernelLayout,
    pub kernel_dtb: u64,
}

impl KernelFixture {
    pub fn new(size: u64, kernel_dtb: u64) -> Self {
        KernelFixture {
            builder: ImageBuilder::new(size),
            layout: KernelLayout::default(),
            kernel_dtb,
        }
    }

    /// Write name and DTB of a process record and map it into kernel space.
    pub fn add_process(&mut self, at: Placed, name: &[u8], dtb: u64) {
        let layout = self.layout;
        self.builder
            .map_range(self.kernel_dtb, at.va, at.phys, RECORD_SPAN);
        self.builder
            .write_u64(at.phys + layout.directory_table_base, dtb);
        let mut field = vec![0u8; layout.image_file_name_len as usize];
        let n = name.len().min(field.len());
        field[..n].copy_from_slice(&name[..n]);
        self.builder
            .write_bytes(at.phys + layout.image_file_name, &field);
    }

    /// Point `from`'s Flink at `to` and `to`'s Blink at `from`.
    pub fn link(&mut self, from: Placed, to: Placed) {
        let links = self.layout.active_process_links;
        let blink = self.layout.active_process_links_blink;
        self.builder.write_u64(from.phys + links, to.va + links);
        self.builder.write_u64(to.phys + blink, from.va + links);
    }

    /// Link `records` into a circular list in the given order.
    pub fn link_ring(&mut self, records: &[Placed]) {
        for (i, from) in records.iter().enumerate() {
            let to = records[(i + 1) % records.len()];
            self.link(*from, to);
        }
    }

    /// Plant a balanced VAD tree for `ranges` (sorted ascending) and point
    /// the process's `VadRoot` at it. Node `i` lives at `base + i * 0x40` in
    /// both address spaces. Returns node locations by index.
    pub fn add_vad_tree(
        &mut self,
        kprocess: u64,
        dtb: u64,
        ranges: &[(u64, u64)],
        base: Placed,
    ) -> Vec<Placed> {
        let nodes: Vec<Placed> = (0..ranges.len() as u64)
            .map(|i| Placed {
                phys: base.phys + i * VAD_STRIDE,
                va: base.va + i * VAD_STRIDE,
            })
            .collect();
        if !nodes.is_empty() {
            self.builder
                .map_range(dtb, base.va, base.phys, nodes.len() as u64 * VAD_STRIDE);
        }
        for (node, &(start, end)) in nodes.iter().zip(ranges) {
            self.write_vad_range(node.phys, VadNode { start, end });
        }

        let root = self.link_subtree(&nodes, 0, nodes.len(), None);
        let root_va = root.map_or(0, |i| nodes[i].va);
        self.builder
            .write_u64(kprocess + self.layout.vad_root, root_va);
        nodes
    }

    fn link_subtree(
        &mut self,
        nodes: &[Placed],
        lo: usize,
        hi: usize,
        parent: Option<usize>,
    ) -> Option<usize> {
        if lo >= hi {
            return None;
        }
        let mid = (lo + hi) / 2;
        let left = self.link_subtree(nodes, lo, mid, Some(mid));
        let right = self.link_subtree(nodes, mid + 1, hi, Some(mid));
        let layout = self.layout;
        let node = nodes[mid];
        self.builder.write_u64(
            node.phys + layout.vad_left_child,
            left.map_or(0, |i| nodes[i].va),
        );
        self.builder.write_u64(
            node.phys + layout.vad_right_child,
            right.map_or(0, |i| nodes[i].va),
        );
        // Low bits of ParentValue carry balance state.
        let parent_value = parent.map_or(0, |i| nodes[i].va | 0x1);
        self.builder
            .write_u64(node.phys + layout.vad_parent_value, parent_value);
        Some(mid)
    }

    pub fn write_vad_range(&mut self, node_phys: u64, range: VadNode) {
        let layout = self.layout;
        let VpnFields {
            starting_vpn,
            starting_vpn_high,
            ending_vpn,
            ending_vpn_high,
        } = range.to_vpn_fields();
        self.builder
            .write_u32(node_phys + layout.vad_starting_vpn, starting_vpn);
        self.builder
            .write_u32(node_phys + layout.vad_ending_vpn, ending_vpn);
        self.builder
            .write_bytes(node_phys + layout.vad_starting_vpn_high, &[starting_vpn_high]);
        self.builder
            .write_bytes(node_phys + layout.vad_ending_vpn_high, &[ending_vpn_high]);
    }

    pub fn build(self) -> SparseMemory {
        self.builder.build()
    }
}
