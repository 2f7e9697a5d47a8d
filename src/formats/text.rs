//! Text (table) output formatter for the Windows Memory Parser tool
use prettytable::{Cell, Row, Table};

use crate::error::{AnalysisError, AnalysisWarning};
use crate::formats::traits::{completeness, OutputFormatter};
use crate::kernel::{format_size, ProcessList};
use crate::translation::Translation;

/// Text formatter that outputs data in a human-readable table format
pub struct TextFormatter;

fn header(titles: &[&str]) -> Row {
    Row::new(titles.iter().map(|t| Cell::new(t).style_spec("c")).collect())
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.set_format(*prettytable::format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
    table
}

/// Status line plus one line per warning.
fn list_footer(list: &ProcessList) -> String {
    let mut footer = if list.complete {
        format!("Process list complete: {} process(es)\n", list.processes.len())
    } else {
        format!(
            "Process list TRUNCATED after {} process(es)\n",
            list.processes.len()
        )
    };
    push_warnings(&mut footer, &list.warnings);
    footer
}

fn push_warnings(out: &mut String, warnings: &[AnalysisWarning]) {
    for warning in warnings {
        out.push_str(&format!("  warning: {}\n", warning));
    }
}

impl OutputFormatter for TextFormatter {
    fn format_processes(&self, list: &ProcessList) -> Result<String, AnalysisError> {
        let mut table = new_table();
        table.set_titles(header(&["OFFSET(P)", "NAME", "DTB", "VADS", "VAD TREE"]));

        for process in &list.processes {
            table.add_row(Row::new(vec![
                Cell::new(&format!("0x{:x}", process.kprocess)),
                Cell::new(&process.name),
                Cell::new(&format!("0x{:x}", process.dtb)),
                Cell::new(&process.vad_tree.len().to_string()),
                Cell::new(completeness(process.vad_tree.complete)),
            ]));
        }

        Ok(format!("{}{}", table, list_footer(list)))
    }

    fn format_vads(&self, list: &ProcessList) -> Result<String, AnalysisError> {
        let mut output = String::new();

        for process in &list.processes {
            output.push_str(&format!(
                "{} @ 0x{:x} (DTB 0x{:x}): {} range(s), {}\n",
                process.name,
                process.kprocess,
                process.dtb,
                process.vad_tree.len(),
                completeness(process.vad_tree.complete)
            ));

            if !process.vad_tree.is_empty() {
                let mut table = new_table();
                table.set_titles(header(&["START", "END", "SIZE"]));
                for node in &process.vad_tree.nodes {
                    table.add_row(Row::new(vec![
                        Cell::new(&format!("0x{:012x}", node.start)),
                        Cell::new(&format!("0x{:012x}", node.end)),
                        Cell::new(&format_size(node.size())),
                    ]));
                }
                output.push_str(&table.to_string());
            }
            push_warnings(&mut output, &process.vad_tree.warnings);
            output.push('\n');
        }

        output.push_str(&list_footer(list));
        Ok(output)
    }

    fn format_translation(&self, translation: &Translation) -> Result<String, AnalysisError> {
        Ok(format!(
            "0x{:x} -> 0x{:x} ({} page)",
            translation.virtual_address,
            translation.physical_address,
            format_size(translation.page_size)
        ))
    }
}
