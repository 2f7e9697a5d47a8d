//! Vtop plugin - translate one virtual address
use crate::error::AnalysisError;
use crate::plugins::plugin_trait::{AnalysisContext, ForensicPlugin, PluginOutput};

pub struct VtopPlugin {
    pub address: u64,
    /// Address space to translate in; the System DTB when absent.
    pub dtb: Option<u64>,
}

impl ForensicPlugin for VtopPlugin {
    fn name(&self) -> &str {
        "vtop"
    }

    fn description(&self) -> &str {
        "Translate a virtual address to a physical offset"
    }

    fn requires_anchor(&self) -> bool {
        self.dtb.is_none()
    }

    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError> {
        let dtb = match self.dtb {
            Some(dtb) => dtb,
            None => context.anchor()?.dtb,
        };
        let translation = context.translator.translate_detailed(self.address, dtb)?;
        Ok(PluginOutput::Translation(translation))
    }
}
