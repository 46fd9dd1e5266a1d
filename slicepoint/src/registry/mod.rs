//! Static registries shared by every thread
//!
//! - [`BlockRegistry`]: arena of code regions with per-thread counters
//! - [`ModuleRegistry`]: loaded code modules
//! - [`SliceStarts`]: addresses that have been used as slice markers
//!
//! The module registry and the slice-start set are unrelated and each sits
//! behind its own lock.

pub mod block;
pub mod modules;

pub use block::{Block, BlockKey, BlockRegistry};
pub use modules::{ModuleInfo, ModuleRegistry, SliceStarts};
