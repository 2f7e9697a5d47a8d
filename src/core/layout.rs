//! Kernel structure offset database for different Windows builds
use serde::{Deserialize, Serialize};

use crate::core::profile::hex_or_int;
use crate::error::AnalysisError;

/// Windows builds with a known `_EPROCESS` / `_MMVAD_SHORT` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowsBuild {
    /// 10.0.17763
    Win10_1809,
    /// 10.0.18362 / 18363
    Win10_1903,
    /// 10.0.19041 - 19045
    Win10_2004,
    /// 10.0.22000
    Win11_21H2,
    /// 10.0.22621 / 22631
    #[default]
    Win11_22H2,
    /// 10.0.26100
    Win11_24H2,
}

impl std::fmt::Display for WindowsBuild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WindowsBuild::Win10_1809 => "win10-1809",
            WindowsBuild::Win10_1903 => "win10-1903",
            WindowsBuild::Win10_2004 => "win10-2004",
            WindowsBuild::Win11_21H2 => "win11-21h2",
            WindowsBuild::Win11_22H2 => "win11-22h2",
            WindowsBuild::Win11_24H2 => "win11-24h2",
        };
        f.write_str(name)
    }
}

/// Byte offsets of every kernel structure field the engine reads.
///
/// Process fields are relative to the start of `_EPROCESS` (its embedded
/// `_KPROCESS` sits at offset 0). VAD fields are relative to `_MMVAD_SHORT`,
/// whose first member is the `_RTL_BALANCED_NODE` that links the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelLayout {
    /// `ActiveProcessLinks.Flink`
    #[serde(deserialize_with = "hex_or_int")]
    pub active_process_links: u64,
    /// `ActiveProcessLinks.Blink`
    #[serde(deserialize_with = "hex_or_int")]
    pub active_process_links_blink: u64,
    /// `_KPROCESS.DirectoryTableBase`
    #[serde(deserialize_with = "hex_or_int")]
    pub directory_table_base: u64,
    /// `ImageFileName`
    #[serde(deserialize_with = "hex_or_int")]
    pub image_file_name: u64,
    /// Width of the `ImageFileName` byte array.
    #[serde(deserialize_with = "hex_or_int")]
    pub image_file_name_len: u64,
    /// `VadRoot` (an `_RTL_AVL_TREE` whose first field is the root pointer)
    #[serde(deserialize_with = "hex_or_int")]
    pub vad_root: u64,
    #[serde(deserialize_with = "hex_or_int")]
    pub vad_left_child: u64,
    #[serde(deserialize_with = "hex_or_int")]
    pub vad_right_child: u64,
    /// `ParentValue`; the low three bits hold balance information.
    #[serde(deserialize_with = "hex_or_int")]
    pub vad_parent_value: u64,
    #[serde(deserialize_with = "hex_or_int")]
    pub vad_starting_vpn: u64,
    #[serde(deserialize_with = "hex_or_int")]
    pub vad_ending_vpn: u64,
    #[serde(deserialize_with = "hex_or_int")]
    pub vad_starting_vpn_high: u64,
    #[serde(deserialize_with = "hex_or_int")]
    pub vad_ending_vpn_high: u64,
}

/// Upper bound for any field offset; both structures are far smaller.
pub const MAX_FIELD_OFFSET: u64 = 0x2000;

/// Address of the field at `offset` inside the structure at `base`.
pub fn field_address(base: u64, offset: u64) -> Result<u64, AnalysisError> {
    base.checked_add(offset).ok_or_else(|| {
        AnalysisError::InvalidStructure(format!(
            "field offset 0x{:x} from 0x{:x} overflows the address space",
            offset, base
        ))
    })
}

/// `_MMVAD_SHORT` has kept the same shape since Windows 8.1.
const fn with_vad_short(
    active_process_links: u64,
    image_file_name: u64,
    vad_root: u64,
) -> KernelLayout {
    KernelLayout {
        active_process_links,
        active_process_links_blink: active_process_links + 8,
        directory_table_base: 0x28,
        image_file_name,
        image_file_name_len: 15,
        vad_root,
        vad_left_child: 0x0,
        vad_right_child: 0x8,
        vad_parent_value: 0x10,
        vad_starting_vpn: 0x18,
        vad_ending_vpn: 0x1c,
        vad_starting_vpn_high: 0x20,
        vad_ending_vpn_high: 0x21,
    }
}

impl KernelLayout {
    /// Offsets for a specific build
    pub fn for_build(build: WindowsBuild) -> Self {
        match build {
            WindowsBuild::Win10_1809 => with_vad_short(0x2e8, 0x450, 0x628),
            WindowsBuild::Win10_1903 => with_vad_short(0x2f0, 0x450, 0x658),
            WindowsBuild::Win10_2004 => with_vad_short(0x448, 0x5a8, 0x7d8),
            WindowsBuild::Win11_21H2 => with_vad_short(0x448, 0x5a8, 0x7d8),
            WindowsBuild::Win11_22H2 => with_vad_short(0x448, 0x5a8, 0x7d8),
            WindowsBuild::Win11_24H2 => with_vad_short(0x1d8, 0x338, 0x558),
        }
    }

    /// Reject layouts that cannot describe a real structure.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        for (name, offset) in self.field_offsets() {
            if offset > MAX_FIELD_OFFSET {
                return Err(AnalysisError::InvalidLayout(format!(
                    "{} offset 0x{:x} exceeds 0x{:x}",
                    name, offset, MAX_FIELD_OFFSET
                )));
            }
        }
        if self.image_file_name_len == 0 || self.image_file_name_len > 64 {
            return Err(AnalysisError::InvalidLayout(format!(
                "image_file_name_len must be between 1 and 64, got {}",
                self.image_file_name_len
            )));
        }
        if self.active_process_links == self.active_process_links_blink {
            return Err(AnalysisError::InvalidLayout(
                "Flink and Blink offsets must differ".to_string(),
            ));
        }
        if self.vad_left_child == self.vad_right_child {
            return Err(AnalysisError::InvalidLayout(
                "VAD left and right child offsets must differ".to_string(),
            ));
        }
        if self.vad_starting_vpn == self.vad_ending_vpn {
            return Err(AnalysisError::InvalidLayout(
                "VAD starting and ending VPN offsets must differ".to_string(),
            ));
        }
        Ok(())
    }

    fn field_offsets(&self) -> [(&'static str, u64); 12] {
        [
            ("active_process_links", self.active_process_links),
            ("active_process_links_blink", self.active_process_links_blink),
            ("directory_table_base", self.directory_table_base),
            ("image_file_name", self.image_file_name),
            ("vad_root", self.vad_root),
            ("vad_left_child", self.vad_left_child),
            ("vad_right_child", self.vad_right_child),
            ("vad_parent_value", self.vad_parent_value),
            ("vad_starting_vpn", self.vad_starting_vpn),
            ("vad_ending_vpn", self.vad_ending_vpn),
            ("vad_starting_vpn_high", self.vad_starting_vpn_high),
            ("vad_ending_vpn_high", self.vad_ending_vpn_high),
        ]
    }
}

impl Default for KernelLayout {
    fn default() -> Self {
        Self::for_build(WindowsBuild::default())
    }
}
