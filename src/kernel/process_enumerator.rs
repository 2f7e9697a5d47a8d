//! Process list traversal over `ActiveProcessLinks`
use std::collections::HashSet;

use log::{debug, info};

use crate::core::layout::field_address;
use crate::core::profile::AnalysisConfig;
use crate::error::{AnalysisError, AnalysisWarning};
use crate::kernel::process_locator::SystemAnchor;
use crate::kernel::vad::VadTreeReader;
use crate::kernel::{read_image_file_name, Process, ProcessList, ProcessRecord};
use crate::translation::AddressTranslator;

/// Walks the circular doubly linked process list.
///
/// `Flink` and `Blink` point at the `LIST_ENTRY` embedded in the neighbouring
/// record, so the link offset is subtracted after translation to get back to
/// the start of the record.
pub struct ProcessEnumerator<'a> {
    translator: &'a AddressTranslator<'a>,
    config: AnalysisConfig,
}

impl<'a> ProcessEnumerator<'a> {
    pub fn new(translator: &'a AddressTranslator<'a>, config: &AnalysisConfig) -> Self {
        ProcessEnumerator {
            translator,
            config: config.clone(),
        }
    }

    pub fn read_record(&self, kprocess: u64) -> Result<ProcessRecord, AnalysisError> {
        ProcessRecord::read(self.translator.memory(), &self.config.layout, kprocess)
    }

    pub fn process_name(&self, kprocess: u64) -> Result<String, AnalysisError> {
        read_image_file_name(self.translator.memory(), &self.config.layout, kprocess)
    }

    pub fn directory_table_base(&self, kprocess: u64) -> Result<u64, AnalysisError> {
        self.translator
            .memory()
            .read_u64(field_address(kprocess, self.config.layout.directory_table_base)?)
    }

    /// Physical offset of the record after `kprocess`, following `Flink`.
    pub fn next_process(&self, kprocess: u64, dtb: u64) -> Result<u64, AnalysisError> {
        self.follow_link(kprocess, self.config.layout.active_process_links, dtb)
    }

    /// Physical offset of the record before `kprocess`, following `Blink`.
    pub fn previous_process(&self, kprocess: u64, dtb: u64) -> Result<u64, AnalysisError> {
        self.follow_link(kprocess, self.config.layout.active_process_links_blink, dtb)
    }

    fn follow_link(&self, kprocess: u64, field: u64, dtb: u64) -> Result<u64, AnalysisError> {
        let links = self.config.layout.active_process_links;
        let pointer = self.translator.memory().read_u64(field_address(kprocess, field)?)?;
        let entry = self.translator.translate(pointer, dtb)?;
        entry.checked_sub(links).ok_or_else(|| {
            AnalysisError::InvalidStructure(format!(
                "link 0x{:x} of record 0x{:x} resolves to 0x{:x}, below the list entry offset 0x{:x}",
                pointer, kprocess, entry, links
            ))
        })
    }

    /// Walk the list from the anchor until it closes, decoding every record
    /// and its VAD tree.
    ///
    /// Links are translated with the anchor's DTB; each VAD tree with the
    /// owning process's DTB. A broken link, a loop that skips the anchor, or
    /// hitting `max_processes` ends the walk with a partial list. Only a
    /// failure to read the anchor itself is an error.
    pub fn walk_process_list(&self, anchor: &SystemAnchor) -> Result<ProcessList, AnalysisError> {
        let limit = self.config.limits.max_processes;
        let vad_reader = VadTreeReader::new(self.translator, &self.config);
        let mut list = ProcessList {
            processes: Vec::new(),
            complete: true,
            warnings: Vec::new(),
        };
        let mut visited = HashSet::new();
        let mut current = anchor.kprocess;

        loop {
            if list.processes.len() >= limit {
                list.truncate_with(AnalysisWarning::TraversalLimitExceeded { limit });
                break;
            }

            let record = match self.read_record(current) {
                Ok(record) => record,
                Err(e) if current != anchor.kprocess && e.is_structural() => {
                    list.truncate_with(AnalysisWarning::BrokenProcessLink {
                        kprocess: current,
                        reason: e.to_string(),
                    });
                    break;
                }
                Err(e) => return Err(e),
            };
            visited.insert(current);

            let vad_tree = vad_reader.read_tree(current, record.dtb);
            debug!(
                "process {} at 0x{:x}: DTB 0x{:x}, {} VAD node(s)",
                record.name,
                current,
                record.dtb,
                vad_tree.len()
            );
            list.processes.push(Process {
                kprocess: record.kprocess,
                dtb: record.dtb,
                name: record.name,
                vad_tree,
            });

            let next = match self.next_process(current, anchor.dtb) {
                Ok(next) => next,
                Err(e) if e.is_structural() => {
                    list.truncate_with(AnalysisWarning::BrokenProcessLink {
                        kprocess: current,
                        reason: e.to_string(),
                    });
                    break;
                }
                Err(e) => return Err(e),
            };

            if next == anchor.kprocess {
                break;
            }
            if visited.contains(&next) {
                list.truncate_with(AnalysisWarning::ProcessListCycle { kprocess: next });
                break;
            }
            current = next;
        }

        info!(
            "walked {} process(es), list {}",
            list.processes.len(),
            if list.complete { "complete" } else { "truncated" }
        );
        Ok(list)
    }
}
