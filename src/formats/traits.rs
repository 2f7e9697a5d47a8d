//! Output format traits for the Windows Memory Parser tool
use std::cell::Cell;
use std::fs::OpenOptions;
use std::io::Write;

use serde::Serialize;

use crate::error::AnalysisError;
use crate::kernel::{Process, ProcessList};
use crate::translation::Translation;

/// Trait for output formatters
///
/// Every rendering of a process list states whether the list closed and,
/// per process, whether its VAD tree was recovered in full.
pub trait OutputFormatter: Send + Sync {
    fn format_processes(&self, list: &ProcessList) -> Result<String, AnalysisError>;
    fn format_vads(&self, list: &ProcessList) -> Result<String, AnalysisError>;
    fn format_translation(&self, translation: &Translation) -> Result<String, AnalysisError>;
}

/// One `pslist` row.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary<'a> {
    pub kprocess: u64,
    pub dtb: u64,
    pub name: &'a str,
    pub vad_count: usize,
    pub vad_complete: bool,
}

impl<'a> From<&'a Process> for ProcessSummary<'a> {
    fn from(process: &'a Process) -> Self {
        ProcessSummary {
            kprocess: process.kprocess,
            dtb: process.dtb,
            name: &process.name,
            vad_count: process.vad_tree.len(),
            vad_complete: process.vad_tree.complete,
        }
    }
}

pub fn completeness(complete: bool) -> &'static str {
    if complete {
        "complete"
    } else {
        "partial"
    }
}

/// Enum for output format types
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Text,
    Csv,
    Json,
    Jsonl,
}

/// Enum for output destination
#[derive(Debug, Clone)]
pub enum OutputDestination {
    Stdout,
    File(std::path::PathBuf),
}

/// Output writer that combines format and destination
pub struct OutputWriter {
    formatter: Box<dyn OutputFormatter>,
    destination: OutputDestination,
    /// A file destination is truncated on first write and appended to after.
    written: Cell<bool>,
}

impl OutputWriter {
    /// Create a new output writer
    pub fn new(format: OutputFormat, destination: OutputDestination) -> Self {
        let formatter: Box<dyn OutputFormatter> = match format {
            OutputFormat::Text => Box::new(crate::formats::text::TextFormatter),
            OutputFormat::Csv => Box::new(crate::formats::csv::CsvFormatter),
            OutputFormat::Json => Box::new(crate::formats::json::JsonFormatter),
            OutputFormat::Jsonl => Box::new(crate::formats::jsonl::JsonlFormatter),
        };

        Self {
            formatter,
            destination,
            written: Cell::new(false),
        }
    }

    pub fn write_processes(&self, list: &ProcessList) -> Result<(), AnalysisError> {
        let content = self.formatter.format_processes(list)?;
        self.emit(&content)
    }

    pub fn write_vads(&self, list: &ProcessList) -> Result<(), AnalysisError> {
        let content = self.formatter.format_vads(list)?;
        self.emit(&content)
    }

    pub fn write_translation(&self, translation: &Translation) -> Result<(), AnalysisError> {
        let content = self.formatter.format_translation(translation)?;
        self.emit(&content)
    }

    fn emit(&self, content: &str) -> Result<(), AnalysisError> {
        match &self.destination {
            OutputDestination::Stdout => {
                println!("{}", content);
            }
            OutputDestination::File(path) => {
                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(self.written.get())
                    .truncate(!self.written.get())
                    .open(path)?;
                writeln!(file, "{}", content)?;
            }
        }
        self.written.set(true);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::error::AnalysisWarning;
    use crate::kernel::{Process, ProcessList, VadNode, VadTree};

    /// Two processes; the second one's VAD tree is partial and the list
    /// itself was truncated.
    pub fn sample_list() -> ProcessList {
        let mut broken = VadTree::new();
        broken.nodes.push(VadNode {
            start: 0x7ff6_0000_0000,
            end: 0x7ff6_0001_0000,
        });
        broken.complete = false;
        broken.warnings.push(AnalysisWarning::MalformedSubtree {
            node: 0x5000,
            reason: "left child unusable".to_string(),
        });

        ProcessList {
            processes: vec![
                Process {
                    kprocess: 0x25d80178,
                    dtb: 0x1ad000,
                    name: "System".to_string(),
                    vad_tree: VadTree::new(),
                },
                Process {
                    kprocess: 0x6eba6080,
                    dtb: 0x6c905000,
                    name: "svchost.exe".to_string(),
                    vad_tree: broken,
                },
            ],
            complete: false,
            warnings: vec![AnalysisWarning::BrokenProcessLink {
                kprocess: 0x6eba6080,
                reason: "unmapped".to_string(),
            }],
        }
    }
}
