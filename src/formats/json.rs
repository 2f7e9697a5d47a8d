//! JSON output formatter for the Windows Memory Parser tool
use serde::Serialize;

use crate::error::{AnalysisError, AnalysisWarning};
use crate::formats::traits::{OutputFormatter, ProcessSummary};
use crate::kernel::{Process, ProcessList};
use crate::translation::Translation;

#[derive(Serialize)]
struct OutputWrapper<'a, T> {
    plugin: &'a str,
    timestamp: String,
    count: usize,
    /// False when the process list did not close.
    complete: bool,
    warnings: &'a [AnalysisWarning],
    results: Vec<T>,
}

impl<'a, T: Serialize> OutputWrapper<'a, T> {
    fn new(plugin: &'a str, complete: bool, warnings: &'a [AnalysisWarning], results: Vec<T>) -> Self {
        OutputWrapper {
            plugin,
            timestamp: chrono::Utc::now().to_rfc3339(),
            count: results.len(),
            complete,
            warnings,
            results,
        }
    }

    fn render(&self) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// JSON formatter that outputs data in JSON format with metadata
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format_processes(&self, list: &ProcessList) -> Result<String, AnalysisError> {
        let results: Vec<ProcessSummary> = list.processes.iter().map(ProcessSummary::from).collect();
        OutputWrapper::new("pslist", list.complete, &list.warnings, results).render()
    }

    fn format_vads(&self, list: &ProcessList) -> Result<String, AnalysisError> {
        let results: Vec<&Process> = list.processes.iter().collect();
        OutputWrapper::new("vadinfo", list.complete, &list.warnings, results).render()
    }

    fn format_translation(&self, translation: &Translation) -> Result<String, AnalysisError> {
        OutputWrapper::new("vtop", true, &[], vec![translation]).render()
    }
}
