//! Plugin registry for the Windows Memory Parser tool
pub mod plugin_trait;
pub mod pslist;
pub mod vadinfo;
pub mod vtop;

pub use pslist::PsListPlugin;
pub use vadinfo::VadInfoPlugin;
pub use vtop::VtopPlugin;

/// Names and one-line descriptions for `--list-plugins`.
pub fn list_plugins() -> Vec<(&'static str, &'static str)> {
    vec![
        ("pslist", "List processes linked from the System process"),
        ("vadinfo", "Show the VAD ranges of each process"),
        ("vtop", "Translate a virtual address to a physical offset"),
    ]
}

#[cfg(test)]
mod tests {
    use super::plugin_trait::{AnalysisContext, ForensicPlugin, PluginOutput};
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::core::profile::AnalysisConfig;
    use crate::error::AnalysisError;
    use crate::kernel::process_locator::SystemAnchor;
    use crate::memory::PhysicalMemory;
    use crate::test_support::{KernelFixture, Placed, SparseMemory};
    use crate::translation::AddressTranslator;

    const KERNEL_DTB: u64 = 0x1ad000;

    fn record(i: u64) -> Placed {
        Placed {
            phys: 0x20_0000 + i * 0x1_0000,
            va: 0xffff_b000_0000_0000 + i * 0x1_0000,
        }
    }

    fn image() -> SparseMemory {
        let mut fixture = KernelFixture::new(0x100_0000, KERNEL_DTB);
        fixture.add_process(record(0), b"System", KERNEL_DTB);
        fixture.add_process(record(1), b"explorer.exe", 0x50_0000);
        fixture.add_process(record(2), b"notepad.exe", 0x51_0000);
        fixture.link_ring(&[record(0), record(1), record(2)]);
        let base = Placed {
            phys: 0x60_0000,
            va: 0xffff_b100_0000_0000,
        };
        fixture.add_vad_tree(
            record(2).phys,
            0x51_0000,
            &[(0x1_0000, 0x2_0000), (0x7ff7_0000_0000, 0x7ff7_0004_0000)],
            base,
        );
        fixture.build()
    }

    fn anchor() -> SystemAnchor {
        SystemAnchor {
            kprocess: record(0).phys,
            dtb: KERNEL_DTB,
        }
    }

    /// Counts reads so tests can tell whether the image was walked again.
    struct CountingMemory {
        inner: SparseMemory,
        reads: AtomicUsize,
    }

    impl PhysicalMemory for CountingMemory {
        fn size(&self) -> u64 {
            self.inner.size()
        }

        fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<(), AnalysisError> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.inner.read_into(offset, buf)
        }
    }

    fn run(plugin: &dyn ForensicPlugin, image: &SparseMemory, with_anchor: bool) -> PluginOutput {
        let config = AnalysisConfig::default();
        let translator = AddressTranslator::new(image);
        let context = AnalysisContext::new(&translator, &config, with_anchor.then(anchor));
        plugin.run(&context).unwrap()
    }

    #[test]
    fn test_pslist_name_filter() {
        let image = image();
        let plugin = PsListPlugin::new(Some(r"\.exe$")).unwrap();
        match run(&plugin, &image, true) {
            PluginOutput::Processes(list) => {
                assert!(list.complete);
                let names: Vec<&str> = list.processes.iter().map(|p| p.name.as_str()).collect();
                assert_eq!(names, ["explorer.exe", "notepad.exe"]);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_invalid_filter_rejected() {
        assert!(PsListPlugin::new(Some("(")).is_err());
    }

    #[test]
    fn test_vadinfo_offset_filter() {
        let image = image();
        let plugin = VadInfoPlugin::new(None, Some(record(2).phys)).unwrap();
        match run(&plugin, &image, true) {
            PluginOutput::Vads(list) => {
                assert_eq!(list.processes.len(), 1);
                let tree = &list.processes[0].vad_tree;
                assert!(tree.complete);
                assert_eq!(tree.nodes[0].start, 0x1_0000);
                assert_eq!(tree.nodes[1].end, 0x7ff7_0004_0000);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_vtop_with_explicit_dtb_needs_no_anchor() {
        let image = image();
        let plugin = VtopPlugin {
            address: record(1).va + 0x28,
            dtb: Some(KERNEL_DTB),
        };
        assert!(!plugin.requires_anchor());
        match run(&plugin, &image, false) {
            PluginOutput::Translation(t) => assert_eq!(t.physical_address, record(1).phys + 0x28),
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_missing_anchor_is_plugin_error() {
        let image = image();
        let config = AnalysisConfig::default();
        let translator = AddressTranslator::new(&image);
        let context = AnalysisContext::new(&translator, &config, None);
        assert!(PsListPlugin::default().run(&context).is_err());
    }

    #[test]
    fn test_process_walk_shared_between_plugins() {
        let image = CountingMemory {
            inner: image(),
            reads: AtomicUsize::new(0),
        };
        let config = AnalysisConfig::default();
        let translator = AddressTranslator::new(&image);
        let context = AnalysisContext::new(&translator, &config, Some(anchor()));

        let processes = match PsListPlugin::default().run(&context).unwrap() {
            PluginOutput::Processes(list) => list,
            other => panic!("unexpected output {:?}", other),
        };
        let after_first = image.reads.load(Ordering::Relaxed);
        assert!(after_first > 0);

        let vads = match VadInfoPlugin::default().run(&context).unwrap() {
            PluginOutput::Vads(list) => list,
            other => panic!("unexpected output {:?}", other),
        };
        assert_eq!(image.reads.load(Ordering::Relaxed), after_first);
        assert_eq!(vads, processes);
        assert_eq!(vads.processes[2].vad_tree.len(), 2);
    }
}
