//! Kernel data structure parsing module
use serde::Serialize;

use crate::core::layout::{field_address, KernelLayout};
use crate::error::{AnalysisError, AnalysisWarning};
use crate::memory::PhysicalMemory;
use crate::translation::paging::PAGE_SHIFT_4K;

pub mod process_enumerator;
pub mod process_locator;
pub mod vad;

/// Name reported for a record whose `ImageFileName` is empty.
pub const UNNAMED_PROCESS: &str = "<unnamed>";

/// Raw fields of one kernel process record, decoded at its physical offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRecord {
    /// Physical offset of the record; its identity for the whole analysis.
    pub kprocess: u64,
    pub dtb: u64,
    pub name: String,
}

impl ProcessRecord {
    /// Decode the name and DTB fields of the record at `kprocess`.
    pub fn read(
        memory: &dyn PhysicalMemory,
        layout: &KernelLayout,
        kprocess: u64,
    ) -> Result<Self, AnalysisError> {
        let dtb = memory.read_u64(field_address(kprocess, layout.directory_table_base)?)?;
        let name = read_image_file_name(memory, layout, kprocess)?;
        Ok(ProcessRecord {
            kprocess,
            dtb,
            name,
        })
    }
}

/// Read the fixed-width `ImageFileName` field. The field is not guaranteed
/// to be NUL-terminated; an empty name maps to [`UNNAMED_PROCESS`].
pub fn read_image_file_name(
    memory: &dyn PhysicalMemory,
    layout: &KernelLayout,
    kprocess: u64,
) -> Result<String, AnalysisError> {
    let raw = memory.read(
        field_address(kprocess, layout.image_file_name)?,
        layout.image_file_name_len as usize,
    )?;
    let nul_pos = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    let name = String::from_utf8_lossy(&raw[..nul_pos]).to_string();
    if name.is_empty() {
        Ok(UNNAMED_PROCESS.to_string())
    } else {
        Ok(name)
    }
}

/// One mapped virtual range `[start, end)` of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VadNode {
    pub start: u64,
    pub end: u64,
}

/// The four raw VPN fields of a `_MMVAD_SHORT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpnFields {
    pub starting_vpn: u32,
    pub starting_vpn_high: u8,
    /// Last page of the range, inclusive.
    pub ending_vpn: u32,
    pub ending_vpn_high: u8,
}

impl VadNode {
    /// Assemble the 40-bit VPNs from their 32-bit and 8-bit halves.
    pub fn from_vpn_fields(fields: VpnFields) -> Self {
        let starting_vpn = ((fields.starting_vpn_high as u64) << 32) | fields.starting_vpn as u64;
        let ending_vpn = ((fields.ending_vpn_high as u64) << 32) | fields.ending_vpn as u64;
        VadNode {
            start: starting_vpn << PAGE_SHIFT_4K,
            end: (ending_vpn + 1) << PAGE_SHIFT_4K,
        }
    }

    /// Inverse of [`VadNode::from_vpn_fields`].
    pub fn to_vpn_fields(&self) -> VpnFields {
        let starting_vpn = self.start >> PAGE_SHIFT_4K;
        let ending_vpn = (self.end >> PAGE_SHIFT_4K).wrapping_sub(1);
        VpnFields {
            starting_vpn: starting_vpn as u32,
            starting_vpn_high: (starting_vpn >> 32) as u8,
            ending_vpn: ending_vpn as u32,
            ending_vpn_high: (ending_vpn >> 32) as u8,
        }
    }

    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Non-empty and page aligned at both ends.
    pub fn is_well_formed(&self) -> bool {
        let page_mask = (1u64 << PAGE_SHIFT_4K) - 1;
        self.start < self.end && self.start & page_mask == 0 && self.end & page_mask == 0
    }
}

/// Mapped ranges of one process in ascending address order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VadTree {
    pub nodes: Vec<VadNode>,
    /// False when any part of the tree could not be recovered.
    pub complete: bool,
    pub warnings: Vec<AnalysisWarning>,
}

impl VadTree {
    pub fn new() -> Self {
        VadTree {
            nodes: Vec::new(),
            complete: true,
            warnings: Vec::new(),
        }
    }

    pub fn mark_partial(&mut self, warning: AnalysisWarning) {
        log::warn!("{}", warning);
        self.complete = false;
        self.warnings.push(warning);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for VadTree {
    fn default() -> Self {
        Self::new()
    }
}

/// A process recovered from the image together with its address space map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Process {
    pub kprocess: u64,
    pub dtb: u64,
    pub name: String,
    pub vad_tree: VadTree,
}

/// Result of walking the process list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessList {
    /// List order, starting with the anchor.
    pub processes: Vec<Process>,
    /// True when the walk returned to the anchor.
    pub complete: bool,
    pub warnings: Vec<AnalysisWarning>,
}

impl ProcessList {
    pub fn truncate_with(&mut self, warning: AnalysisWarning) {
        log::warn!("{}", warning);
        self.complete = false;
        self.warnings.push(warning);
    }

    /// Keep only the processes accepted by `keep`. Completeness and
    /// warnings describe the walk, so they are carried over unchanged.
    pub fn filtered<F>(mut self, keep: F) -> Self
    where
        F: Fn(&Process) -> bool,
    {
        self.processes.retain(|p| keep(p));
        self
    }

    /// Processes whose name matches `pattern`.
    pub fn filter_by_name(self, pattern: &regex::Regex) -> Self {
        self.filtered(|p| pattern.is_match(&p.name))
    }
}

/// Human-readable byte count for range sizes
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
