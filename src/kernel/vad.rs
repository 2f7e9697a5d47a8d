//! VAD tree traversal for a single process
use std::collections::HashSet;

use log::debug;

use crate::core::layout::{field_address, KernelLayout};
use crate::core::profile::{AnalysisConfig, TraversalLimits};
use crate::error::{AnalysisError, AnalysisWarning};
use crate::kernel::{VadNode, VadTree, VpnFields};
use crate::translation::AddressTranslator;

/// Balance bits stored in the low bits of `ParentValue`.
const PARENT_FLAG_MASK: u64 = 0x7;

#[derive(Debug, Clone, Copy)]
enum Child {
    Left,
    Right,
}

impl std::fmt::Display for Child {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Child::Left => f.write_str("left"),
            Child::Right => f.write_str("right"),
        }
    }
}

/// Reads the VAD tree hanging off a process record.
///
/// Nodes are identified by their physical offset. Pointers stored in the
/// tree are virtual and are translated with the owning process's DTB.
pub struct VadTreeReader<'a> {
    translator: &'a AddressTranslator<'a>,
    layout: KernelLayout,
    limits: TraversalLimits,
}

impl<'a> VadTreeReader<'a> {
    pub fn new(translator: &'a AddressTranslator<'a>, config: &AnalysisConfig) -> Self {
        VadTreeReader {
            translator,
            layout: config.layout,
            limits: config.limits,
        }
    }

    /// Physical offset of the root node, `None` for an empty tree.
    pub fn vad_root(&self, kprocess: u64, dtb: u64) -> Result<Option<u64>, AnalysisError> {
        self.follow(field_address(kprocess, self.layout.vad_root)?, 0, dtb)
    }

    pub fn left_child(&self, node: u64, dtb: u64) -> Result<Option<u64>, AnalysisError> {
        self.follow(field_address(node, self.layout.vad_left_child)?, 0, dtb)
    }

    pub fn right_child(&self, node: u64, dtb: u64) -> Result<Option<u64>, AnalysisError> {
        self.follow(field_address(node, self.layout.vad_right_child)?, 0, dtb)
    }

    /// Parent node, with the balance bits of `ParentValue` cleared.
    pub fn parent_of(&self, node: u64, dtb: u64) -> Result<Option<u64>, AnalysisError> {
        self.follow(
            field_address(node, self.layout.vad_parent_value)?,
            PARENT_FLAG_MASK,
            dtb,
        )
    }

    /// Decode the address range of the node at physical offset `node`.
    pub fn read_node(&self, node: u64) -> Result<VadNode, AnalysisError> {
        let memory = self.translator.memory();
        let fields = VpnFields {
            starting_vpn: memory.read_u32(field_address(node, self.layout.vad_starting_vpn)?)?,
            starting_vpn_high: memory.read_u8(field_address(node, self.layout.vad_starting_vpn_high)?)?,
            ending_vpn: memory.read_u32(field_address(node, self.layout.vad_ending_vpn)?)?,
            ending_vpn_high: memory.read_u8(field_address(node, self.layout.vad_ending_vpn_high)?)?,
        };
        Ok(VadNode::from_vpn_fields(fields))
    }

    /// Read the pointer stored at `field`, clear `flag_mask`, and translate.
    fn follow(&self, field: u64, flag_mask: u64, dtb: u64) -> Result<Option<u64>, AnalysisError> {
        let pointer = self.translator.memory().read_u64(field)? & !flag_mask;
        if pointer == 0 {
            return Ok(None);
        }
        self.translator.translate(pointer, dtb).map(Some)
    }

    /// In-order walk of the whole tree.
    ///
    /// Never fails. A node with an unusable range is skipped; an unusable
    /// child link loses that subtree. Both are recorded as warnings.
    pub fn read_tree(&self, kprocess: u64, dtb: u64) -> VadTree {
        let mut tree = VadTree::new();

        let root = match self.vad_root(kprocess, dtb) {
            Ok(Some(root)) => root,
            Ok(None) => return tree,
            Err(e) => {
                tree.mark_partial(AnalysisWarning::MalformedSubtree {
                    node: kprocess.saturating_add(self.layout.vad_root),
                    reason: format!("root pointer unusable: {}", e),
                });
                return tree;
            }
        };

        let mut visited = HashSet::new();
        let mut stack: Vec<(u64, usize)> = Vec::new();
        let mut current = Some((root, 1usize));
        let mut last_end = 0u64;

        loop {
            while let Some((node, depth)) = current.take() {
                if depth > self.limits.max_vad_depth {
                    tree.mark_partial(AnalysisWarning::MalformedSubtree {
                        node,
                        reason: format!("deeper than {} levels", self.limits.max_vad_depth),
                    });
                    break;
                }
                if !visited.insert(node) {
                    tree.mark_partial(AnalysisWarning::MalformedSubtree {
                        node,
                        reason: "node reached twice".to_string(),
                    });
                    break;
                }
                stack.push((node, depth));
                current = self
                    .child(&mut tree, node, dtb, Child::Left)
                    .map(|left| (left, depth + 1));
            }

            let Some((node, depth)) = stack.pop() else {
                break;
            };

            // A rejected node is dropped on its own; its right subtree is
            // still walked.
            match self.read_node(node) {
                Ok(range) if !range.is_well_formed() => {
                    tree.mark_partial(AnalysisWarning::MalformedSubtree {
                        node,
                        reason: format!("invalid range 0x{:x}-0x{:x}", range.start, range.end),
                    });
                }
                Err(e) => {
                    tree.mark_partial(AnalysisWarning::MalformedSubtree {
                        node,
                        reason: e.to_string(),
                    });
                }
                Ok(range) if range.start < last_end => {
                    tree.mark_partial(AnalysisWarning::MalformedSubtree {
                        node,
                        reason: format!(
                            "range 0x{:x}-0x{:x} overlaps or precedes 0x{:x}",
                            range.start, range.end, last_end
                        ),
                    });
                }
                Ok(_) if tree.nodes.len() >= self.limits.max_vad_nodes => {
                    tree.mark_partial(AnalysisWarning::MalformedSubtree {
                        node,
                        reason: format!("more than {} nodes", self.limits.max_vad_nodes),
                    });
                    break;
                }
                Ok(range) => {
                    debug!("VAD 0x{:x}: 0x{:x}-0x{:x}", node, range.start, range.end);
                    last_end = range.end;
                    tree.nodes.push(range);
                }
            }

            current = self
                .child(&mut tree, node, dtb, Child::Right)
                .map(|right| (right, depth + 1));
        }

        tree
    }

    /// Resolve a child link, downgrading failures to a warning.
    fn child(&self, tree: &mut VadTree, node: u64, dtb: u64, side: Child) -> Option<u64> {
        let resolved = match side {
            Child::Left => self.left_child(node, dtb),
            Child::Right => self.right_child(node, dtb),
        };
        match resolved {
            Ok(child) => child,
            Err(e) => {
                tree.mark_partial(AnalysisWarning::MalformedSubtree {
                    node,
                    reason: format!("{} child unusable: {}", side, e),
                });
                None
            }
        }
    }
}
