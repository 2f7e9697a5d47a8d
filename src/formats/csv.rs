//! CSV output formatter for the Windows Memory Parser tool
use csv::Writer;

use crate::error::AnalysisError;
use crate::formats::traits::OutputFormatter;
use crate::kernel::ProcessList;
use crate::translation::Translation;

/// CSV formatter that outputs data in comma-separated values format
///
/// Completeness is carried in columns, so every row stands on its own.
pub struct CsvFormatter;

fn finish(mut wtr: Writer<Vec<u8>>) -> Result<String, AnalysisError> {
    wtr.flush()?;
    let data = wtr.into_inner()?;
    Ok(String::from_utf8(data)?)
}

impl OutputFormatter for CsvFormatter {
    fn format_processes(&self, list: &ProcessList) -> Result<String, AnalysisError> {
        let mut wtr = Writer::from_writer(vec![]);
        wtr.write_record([
            "offset",
            "name",
            "dtb",
            "vad_count",
            "vad_complete",
            "list_complete",
        ])?;

        for process in &list.processes {
            wtr.write_record(&[
                format!("0x{:x}", process.kprocess),
                process.name.clone(),
                format!("0x{:x}", process.dtb),
                process.vad_tree.len().to_string(),
                process.vad_tree.complete.to_string(),
                list.complete.to_string(),
            ])?;
        }

        finish(wtr)
    }

    fn format_vads(&self, list: &ProcessList) -> Result<String, AnalysisError> {
        let mut wtr = Writer::from_writer(vec![]);
        wtr.write_record(["offset", "name", "start", "end", "size", "vad_complete"])?;

        for process in &list.processes {
            for node in &process.vad_tree.nodes {
                wtr.write_record(&[
                    format!("0x{:x}", process.kprocess),
                    process.name.clone(),
                    format!("0x{:x}", node.start),
                    format!("0x{:x}", node.end),
                    node.size().to_string(),
                    process.vad_tree.complete.to_string(),
                ])?;
            }
        }

        finish(wtr)
    }

    fn format_translation(&self, translation: &Translation) -> Result<String, AnalysisError> {
        let mut wtr = Writer::from_writer(vec![]);
        wtr.write_record(["virtual_address", "physical_address", "page_size"])?;
        wtr.write_record(&[
            format!("0x{:x}", translation.virtual_address),
            format!("0x{:x}", translation.physical_address),
            translation.page_size.to_string(),
        ])?;
        finish(wtr)
    }
}
