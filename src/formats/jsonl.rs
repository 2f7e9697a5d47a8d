//! JSONL (JSON Lines) output formatter for the Windows Memory Parser tool
use serde::Serialize;

use crate::error::{AnalysisError, AnalysisWarning};
use crate::formats::traits::{OutputFormatter, ProcessSummary};
use crate::kernel::ProcessList;
use crate::translation::Translation;

/// Trailing line describing the walk itself.
#[derive(Serialize)]
struct ListStatus<'a> {
    list_complete: bool,
    count: usize,
    warnings: &'a [AnalysisWarning],
}

/// JSONL formatter that outputs data as JSON objects, one per line
pub struct JsonlFormatter;

fn push_line<T: Serialize>(output: &mut String, value: &T) -> Result<(), AnalysisError> {
    output.push_str(&serde_json::to_string(value)?);
    output.push('\n');
    Ok(())
}

fn push_status(output: &mut String, list: &ProcessList) -> Result<(), AnalysisError> {
    push_line(
        output,
        &ListStatus {
            list_complete: list.complete,
            count: list.processes.len(),
            warnings: &list.warnings,
        },
    )
}

impl OutputFormatter for JsonlFormatter {
    fn format_processes(&self, list: &ProcessList) -> Result<String, AnalysisError> {
        let mut output = String::new();
        for process in &list.processes {
            push_line(&mut output, &ProcessSummary::from(process))?;
        }
        push_status(&mut output, list)?;
        Ok(output)
    }

    fn format_vads(&self, list: &ProcessList) -> Result<String, AnalysisError> {
        let mut output = String::new();
        for process in &list.processes {
            push_line(&mut output, process)?;
        }
        push_status(&mut output, list)?;
        Ok(output)
    }

    fn format_translation(&self, translation: &Translation) -> Result<String, AnalysisError> {
        let mut output = String::new();
        push_line(&mut output, translation)?;
        Ok(output)
    }
}
