//! Analysis profiles: kernel layout plus anchor and traversal settings, loadable from JSON
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::core::layout::{KernelLayout, WindowsBuild};
use crate::error::AnalysisError;
use crate::translation::paging::PagingMode;

/// Bounds that keep walks over corrupted structures finite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalLimits {
    /// Most process records followed before the list is declared truncated.
    pub max_processes: usize,
    /// Deepest VAD node visited; real trees are AVL-balanced and shallow.
    pub max_vad_depth: usize,
    /// Most VAD nodes decoded for one process.
    pub max_vad_nodes: usize,
}

impl Default for TraversalLimits {
    fn default() -> Self {
        TraversalLimits {
            max_processes: 4096,
            max_vad_depth: 64,
            max_vad_nodes: 65536,
        }
    }
}

/// Everything the engine needs besides the image itself.
///
/// ```json
/// {
///   "layout": { "active_process_links": "0x448", "image_file_name": "0x5a8" },
///   "system_dtb": "0x1ad000",
///   "paging": "four-level",
///   "limits": { "max_processes": 2048 }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub layout: KernelLayout,
    /// Expected `DirectoryTableBase` of the System process. When absent the
    /// anchor is accepted by list self-consistency instead.
    #[serde(deserialize_with = "hex_or_int_opt")]
    pub system_dtb: Option<u64>,
    pub paging: PagingMode,
    pub limits: TraversalLimits,
}

impl AnalysisConfig {
    /// Configuration with the offsets of a known build.
    pub fn for_build(build: WindowsBuild) -> Self {
        AnalysisConfig {
            layout: KernelLayout::for_build(build),
            ..AnalysisConfig::default()
        }
    }

    /// Load a JSON profile. Missing fields keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, AnalysisError> {
        let content = fs::read_to_string(path)?;
        let config: AnalysisConfig = serde_json::from_str(&content)?;
        config.layout.validate()?;
        Ok(config)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u64),
    Text(String),
}

/// Parse `0x`-prefixed hexadecimal or plain decimal.
pub fn parse_u64(text: &str) -> Result<u64, String> {
    let text = text.trim();
    let parsed = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => text.replace('_', "").parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", text, e))
}

pub(crate) fn hex_or_int<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(value) => Ok(value),
        HexOrInt::Text(text) => parse_u64(&text).map_err(serde::de::Error::custom),
    }
}

fn hex_or_int_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<HexOrInt>::deserialize(deserializer)? {
        None => Ok(None),
        Some(HexOrInt::Int(value)) => Ok(Some(value)),
        Some(HexOrInt::Text(text)) => parse_u64(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
