//! # tensched - Schedule primitives for tensor programs
//!
//! Rewrites a block-structured tensor IR to map it onto a memory hierarchy:
//! - `cache_read` / `cache_write`: stage a tensor region through a buffer in
//!   another memory scope
//! - `set_buffer`: rebind a tensor and its aliases to a fresh buffer, optionally
//!   shrinking thread-private buffers to their footprint
//! - `sync_threads`: insert a thread barrier next to a loop or block
//!
//! ## Architecture
//!
//! ```text
//! ir (nodes, tensors, registry) → analysis (access, affine, region) → schedule (primitives)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tensched::prelude::*;
//!
//! let mut sched = Schedule::new(module, DeviceApi::Gpu);
//! let block = sched.get_block("C").unwrap();
//! let fill = sched.cache_read(block, 0, MemoryScope::Shared)?;
//! sched.sync_threads(fill, true)?;
//! ```

#![warn(clippy::all)]

pub mod ir;
pub mod analysis;
pub mod schedule;
pub mod config;
pub mod script;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::ir::{
        Buffer, BufferId, DeviceApi, ElementType, IrBuilder, IterVar, MemoryScope, Module, NodeId,
        NodeKind, Tensor, TensorId,
    };
    pub use crate::analysis::{Interval, Region};
    pub use crate::schedule::{
        Diagnostic, ErrorMessageLevel, Frontend, Primitive, Schedule, ScheduleDiagnostic, Strict,
    };
    pub use crate::config::{ScheduleConfig, ScheduleScript, ScheduleStep};
    pub use crate::script::apply_script;
    pub use crate::utils::errors::*;
    pub use crate::utils::pretty::PrettyPrint;
}

use std::path::Path;
use utils::errors::TenschedResult;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Read a module from a JSON file.
pub fn load_module(path: impl AsRef<Path>) -> TenschedResult<ir::Module> {
    let source = std::fs::read_to_string(path)?;
    Ok(ir::Module::from_json(&source)?)
}

/// Read a schedule script from a JSON file.
pub fn load_script(path: impl AsRef<Path>) -> TenschedResult<config::ScheduleScript> {
    let source = std::fs::read_to_string(path)?;
    config::ScheduleScript::from_json(&source)
}
