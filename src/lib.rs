//! Library crate for the Windows Memory Parser
//!
//! Recovers the process list and per-process VAD trees from a raw physical
//! memory image of a 64-bit Windows system.

pub mod error;
pub mod kernel;
pub mod memory;
pub mod translation;

// Core modules
pub mod core {
    pub mod layout;
    pub mod profile;
}

// CLI modules
pub mod cli {
    pub mod args;
}

pub mod plugins;

// Format modules
pub mod formats;

#[cfg(test)]
mod test_support;
