//! Locate the System process record by scanning physical memory
use log::{debug, info};
use memchr::memmem;
use serde::Serialize;

use crate::core::layout::field_address;
use crate::core::profile::AnalysisConfig;
use crate::error::AnalysisError;
use crate::kernel::process_enumerator::ProcessEnumerator;
use crate::translation::paging::DirectoryTableBase;
use crate::translation::AddressTranslator;

/// `ImageFileName` of the System process, terminator included so longer
/// names sharing the prefix do not match.
pub const SYSTEM_SIGNATURE: &[u8] = b"System\0";

const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// The validated System process record the process list is walked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemAnchor {
    /// Physical offset of the record.
    pub kprocess: u64,
    /// Its `DirectoryTableBase`, used to translate every list link.
    pub dtb: u64,
}

pub struct ProcessLocator<'a> {
    translator: &'a AddressTranslator<'a>,
    config: AnalysisConfig,
    chunk_size: usize,
}

impl<'a> ProcessLocator<'a> {
    pub fn new(translator: &'a AddressTranslator<'a>, config: &AnalysisConfig) -> Self {
        ProcessLocator {
            translator,
            config: config.clone(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Scan window size; the image is never read in one piece.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(SYSTEM_SIGNATURE.len());
        self
    }

    pub fn locate(&self) -> Result<SystemAnchor, AnalysisError> {
        self.locate_with_progress(|_, _| {})
    }

    /// Find the first candidate that validates, scanning from offset 0.
    /// `progress` receives `(bytes_scanned, image_size)` after each chunk.
    pub fn locate_with_progress<F>(&self, mut progress: F) -> Result<SystemAnchor, AnalysisError>
    where
        F: FnMut(u64, u64),
    {
        let memory = self.translator.memory();
        let size = memory.size();
        let finder = memmem::Finder::new(SYSTEM_SIGNATURE);
        // Adjacent windows share this many bytes so a match straddling a
        // window boundary is still seen, and only seen once.
        let overlap = (SYSTEM_SIGNATURE.len() - 1) as u64;
        let name_offset = self.config.layout.image_file_name;

        let mut buf = Vec::new();
        let mut window_start = 0u64;
        let mut candidates = 0usize;

        while window_start < size {
            let window_len = (self.chunk_size as u64 + overlap).min(size - window_start);
            buf.resize(window_len as usize, 0);
            memory.read_into(window_start, &mut buf)?;

            for pos in finder.find_iter(&buf) {
                let hit = window_start + pos as u64;
                let Some(kprocess) = hit.checked_sub(name_offset) else {
                    continue;
                };
                candidates += 1;
                if let Some(anchor) = self.validate(kprocess) {
                    info!(
                        "System process at 0x{:x} (DTB 0x{:x}) after {} candidate(s)",
                        anchor.kprocess, anchor.dtb, candidates
                    );
                    progress(size, size);
                    return Ok(anchor);
                }
            }

            window_start += self.chunk_size as u64;
            progress(window_start.min(size), size);
        }

        info!("no valid System record among {} candidate(s)", candidates);
        Err(AnalysisError::SignatureNotFound)
    }

    /// Accept `kprocess` when its DTB matches the configured value, or, with
    /// none configured, when its process list closes on itself.
    pub fn validate(&self, kprocess: u64) -> Option<SystemAnchor> {
        let memory = self.translator.memory();
        let field = field_address(kprocess, self.config.layout.directory_table_base).ok()?;
        let dtb = memory.read_u64(field).ok()?;

        let accepted = match self.config.system_dtb {
            Some(expected) => dtb == expected,
            None => self.is_self_consistent(kprocess, dtb),
        };
        if accepted {
            Some(SystemAnchor { kprocess, dtb })
        } else {
            debug!("rejected System candidate 0x{:x} (DTB 0x{:x})", kprocess, dtb);
            None
        }
    }

    fn is_self_consistent(&self, kprocess: u64, dtb: u64) -> bool {
        if dtb == 0 || DirectoryTableBase(dtb).table_address() >= self.translator.memory().size() {
            return false;
        }

        let enumerator = ProcessEnumerator::new(self.translator, &self.config);
        let mut current = kprocess;
        for _ in 0..self.config.limits.max_processes {
            match enumerator.next_process(current, dtb) {
                Ok(next) if next == kprocess => return true,
                Ok(next) => current = next,
                Err(e) => {
                    debug!("candidate 0x{:x}: list broken at 0x{:x}: {}", kprocess, current, e);
                    return false;
                }
            }
        }
        false
    }
}
