//! VadInfo plugin - mapped virtual ranges per process
use regex::Regex;

use crate::error::AnalysisError;
use crate::plugins::plugin_trait::{AnalysisContext, ForensicPlugin, PluginOutput};

#[derive(Default)]
pub struct VadInfoPlugin {
    pub name_filter: Option<Regex>,
    /// Physical offset of a single process record.
    pub offset_filter: Option<u64>,
}

impl VadInfoPlugin {
    pub fn new(name_filter: Option<&str>, offset_filter: Option<u64>) -> Result<Self, AnalysisError> {
        Ok(VadInfoPlugin {
            name_filter: name_filter.map(Regex::new).transpose()?,
            offset_filter,
        })
    }
}

impl ForensicPlugin for VadInfoPlugin {
    fn name(&self) -> &str {
        "vadinfo"
    }

    fn description(&self) -> &str {
        "Show the VAD ranges of each process"
    }

    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError> {
        let mut list = context.walk_processes()?;
        if let Some(pattern) = &self.name_filter {
            list = list.filter_by_name(pattern);
        }
        if let Some(offset) = self.offset_filter {
            list = list.filtered(|p| p.kprocess == offset);
        }
        Ok(PluginOutput::Vads(list))
    }
}
