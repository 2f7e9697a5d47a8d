//! Plugin system trait for the Windows Memory Parser tool
use std::cell::OnceCell;

use crate::core::profile::AnalysisConfig;
use crate::error::AnalysisError;
use crate::kernel::process_enumerator::ProcessEnumerator;
use crate::kernel::process_locator::SystemAnchor;
use crate::kernel::ProcessList;
use crate::translation::{AddressTranslator, Translation};

/// Analysis context that provides access to all necessary components
pub struct AnalysisContext<'a> {
    pub translator: &'a AddressTranslator<'a>,
    pub config: &'a AnalysisConfig,
    /// Located System process, when a plugin that needs it was selected.
    pub anchor: Option<SystemAnchor>,
    /// First successful walk, shared by every plugin of the run.
    processes: OnceCell<ProcessList>,
}

impl<'a> AnalysisContext<'a> {
    pub fn new(
        translator: &'a AddressTranslator<'a>,
        config: &'a AnalysisConfig,
        anchor: Option<SystemAnchor>,
    ) -> Self {
        AnalysisContext {
            translator,
            config,
            anchor,
            processes: OnceCell::new(),
        }
    }

    pub fn anchor(&self) -> Result<SystemAnchor, AnalysisError> {
        self.anchor.ok_or_else(|| {
            AnalysisError::PluginError("System process has not been located".to_string())
        })
    }

    /// The full process list from the anchor. The image is walked once per
    /// context; later calls get a copy of that result.
    pub fn walk_processes(&self) -> Result<ProcessList, AnalysisError> {
        if let Some(list) = self.processes.get() {
            return Ok(list.clone());
        }
        let anchor = self.anchor()?;
        let list = ProcessEnumerator::new(self.translator, self.config).walk_process_list(&anchor)?;
        Ok(self.processes.get_or_init(|| list).clone())
    }
}

/// Output from plugins - different types of data
#[derive(Debug)]
pub enum PluginOutput {
    Processes(ProcessList),
    /// Processes rendered with their mapped ranges.
    Vads(ProcessList),
    Translation(Translation),
}

/// Trait that all forensic plugins must implement
pub trait ForensicPlugin: Send + Sync {
    /// Get the name of the plugin
    fn name(&self) -> &str;

    /// Get a description of what the plugin does
    fn description(&self) -> &str;

    /// Whether [`AnalysisContext::anchor`] must be populated before `run`.
    fn requires_anchor(&self) -> bool {
        true
    }

    /// Run the plugin with the provided analysis context
    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError>;
}
