//! PsList plugin - lists processes linked into ActiveProcessLinks
use regex::Regex;

use crate::error::AnalysisError;
use crate::plugins::plugin_trait::{AnalysisContext, ForensicPlugin, PluginOutput};

#[derive(Default)]
pub struct PsListPlugin {
    /// Keep only processes whose name matches.
    pub name_filter: Option<Regex>,
}

impl PsListPlugin {
    pub fn new(name_filter: Option<&str>) -> Result<Self, AnalysisError> {
        Ok(PsListPlugin {
            name_filter: name_filter.map(Regex::new).transpose()?,
        })
    }
}

impl ForensicPlugin for PsListPlugin {
    fn name(&self) -> &str {
        "pslist"
    }

    fn description(&self) -> &str {
        "List processes linked from the System process"
    }

    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError> {
        let mut list = context.walk_processes()?;
        if let Some(pattern) = &self.name_filter {
            list = list.filter_by_name(pattern);
        }
        Ok(PluginOutput::Processes(list))
    }
}
