//! Schedule primitives.
//!
//! Every primitive is implemented once as a function over `&mut Module`
//! returning [`ScheduleResult`]. [`Schedule`] exposes them through one of two
//! front ends:
//! - [`Diagnostic`]: violations become a [`ScheduleDiagnostic`] naming the
//!   primitive, the cause and the offending subtree
//! - [`Strict`]: violations abort with the bare error kind

pub mod cache;
pub mod insertion;
pub mod buffer;
pub mod sync;

pub use cache::{CacheInfo, writers_of};
pub use insertion::InsertionPoint;
pub use sync::SYNC_THREADS;

use crate::ir::module::Module;
use crate::ir::node::NodeId;
use crate::ir::tensor::{DeviceApi, MemoryScope};
use crate::utils::errors::{ScheduleError, ScheduleResult};
use crate::utils::pretty::indent;
use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The schedule primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    CacheRead,
    CacheWrite,
    SyncThreads,
    SetBuffer,
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Primitive::CacheRead => "CacheRead",
            Primitive::CacheWrite => "CacheWrite",
            Primitive::SyncThreads => "SyncThreads",
            Primitive::SetBuffer => "SetBuffer",
        };
        f.write_str(name)
    }
}

/// How much a diagnostic prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMessageLevel {
    /// Primitive and cause
    #[default]
    General,
    /// Primitive, cause and the offending subtree
    Detailed,
}

impl FromStr for ErrorMessageLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(ErrorMessageLevel::General),
            "detailed" => Ok(ErrorMessageLevel::Detailed),
            other => Err(format!("unknown error message level `{}`", other)),
        }
    }
}

/// A rejected primitive call, as reported by the diagnostic front end.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDiagnostic {
    pub primitive: Primitive,
    #[source]
    pub error: ScheduleError,
    pub level: ErrorMessageLevel,
    /// Rendering of the offending subtree
    pub subtree: Option<String>,
}

impl fmt::Display for ScheduleDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.primitive, self.error)?;
        if self.level == ErrorMessageLevel::Detailed {
            if let Some(ref subtree) = self.subtree {
                write!(f, "\n  offending subtree:\n{}", indent(subtree, 4))?;
            }
        }
        Ok(())
    }
}

/// How a front end reports the outcome of a primitive.
pub trait Frontend {
    /// What a primitive returning `T` hands back to the caller.
    type Output<T>;

    fn finish<T>(&self, module: &Module, primitive: Primitive, result: ScheduleResult<T>) -> Self::Output<T>;

    /// Recover a uniform result from a front-end output.
    fn lift<T>(output: Self::Output<T>) -> Result<T, ScheduleDiagnostic>;
}

/// Front end producing structured diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostic {
    pub level: ErrorMessageLevel,
}

impl Frontend for Diagnostic {
    type Output<T> = Result<T, ScheduleDiagnostic>;

    fn finish<T>(&self, module: &Module, primitive: Primitive, result: ScheduleResult<T>) -> Self::Output<T> {
        result.map_err(|error| {
            let subtree = match self.level {
                ErrorMessageLevel::Detailed => error.node.map(|n| module.display(n).to_string()),
                ErrorMessageLevel::General => None,
            };
            ScheduleDiagnostic { primitive, error, level: self.level, subtree }
        })
    }

    fn lift<T>(output: Self::Output<T>) -> Result<T, ScheduleDiagnostic> {
        output
    }
}

/// Front end for trusted call sites: any violation panics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Strict;

impl Frontend for Strict {
    type Output<T> = T;

    fn finish<T>(&self, _module: &Module, _primitive: Primitive, result: ScheduleResult<T>) -> Self::Output<T> {
        match result {
            Ok(value) => value,
            Err(error) => panic!("{}", error.kind),
        }
    }

    fn lift<T>(output: Self::Output<T>) -> Result<T, ScheduleDiagnostic> {
        Ok(output)
    }
}

/// A module under scheduling.
#[derive(Debug, Clone)]
pub struct Schedule<F = Diagnostic> {
    module: Module,
    device: DeviceApi,
    frontend: F,
}

impl Schedule<Diagnostic> {
    /// Diagnostic schedule reporting at `General` level.
    pub fn new(module: Module, device: DeviceApi) -> Self {
        Self { module, device, frontend: Diagnostic::default() }
    }

    /// Set the diagnostic verbosity.
    pub fn with_level(mut self, level: ErrorMessageLevel) -> Self {
        self.frontend.level = level;
        self
    }
}

impl Schedule<Strict> {
    pub fn strict(module: Module, device: DeviceApi) -> Self {
        Self { module, device, frontend: Strict }
    }
}

impl<F: Frontend> Schedule<F> {
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    pub fn into_module(self) -> Module {
        self.module
    }

    pub fn device(&self) -> DeviceApi {
        self.device
    }

    /// Find a realized block by name.
    pub fn get_block(&self, name: &str) -> Option<NodeId> {
        self.module.get_block(name)
    }

    /// Loops enclosing a block, outermost first.
    pub fn get_loops(&self, block: NodeId) -> Vec<NodeId> {
        self.module.loops_of(block)
    }

    /// Cache the `read_index`-th load of `block` in `memory`. Returns the
    /// fill block.
    pub fn cache_read(&mut self, block: NodeId, read_index: usize, memory: MemoryScope) -> F::Output<NodeId> {
        let result = cache::cache_read(&mut self.module, self.device, block, read_index, memory);
        self.frontend.finish(&self.module, Primitive::CacheRead, result)
    }

    /// Route the `write_index`-th store of `block` through a new tensor in
    /// `memory`. Returns the block writing the new tensor.
    pub fn cache_write(&mut self, block: NodeId, write_index: usize, memory: MemoryScope) -> F::Output<NodeId> {
        let result = cache::cache_write(&mut self.module, self.device, block, write_index, memory);
        self.frontend.finish(&self.module, Primitive::CacheWrite, result)
    }

    /// Insert a thread barrier before or after `node`.
    pub fn sync_threads(&mut self, node: NodeId, after: bool) -> F::Output<()> {
        let result = sync::sync_threads(&mut self.module, node, after).map(|_| ());
        self.frontend.finish(&self.module, Primitive::SyncThreads, result)
    }

    /// Bind the tensor stored by `block` to a fresh buffer in `memory`.
    pub fn set_buffer(&mut self, block: NodeId, memory: MemoryScope, fixed: bool) -> F::Output<()> {
        let result = buffer::set_buffer(&mut self.module, block, memory, fixed).map(|_| ());
        self.frontend.finish(&self.module, Primitive::SetBuffer, result)
    }
}

/// Require `node` to be a realized block.
pub(crate) fn expect_realize(module: &Module, node: NodeId) -> ScheduleResult<()> {
    let kind = module.kind(node);
    if kind.is_realize() {
        Ok(())
    } else {
        Err(ScheduleError::invalid_node_kind(node, "ScheduleBlockRealize", kind.variant_name()))
    }
}
