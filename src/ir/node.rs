//! Tree nodes of the schedule IR.
//!
//! The IR is a block-structured tree:
//! - A root `ScheduleBlockRealize` whose `ScheduleBlock` body holds the program
//! - Loops (`For`) nesting realized computation blocks
//! - Realized blocks binding iteration values to the iteration variables of
//!   their `ScheduleBlock`
//! - `Store`s and `Load`s referencing tensors by id
//!
//! Nodes are stored in the module arena and addressed by [`NodeId`].

use crate::ir::tensor::{DeviceApi, TensorId};
use serde::{Serialize, Deserialize};
use std::fmt;

/// A unique identifier for IR nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize { self.0 as usize }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A node in the arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    /// Rebuilt from the kinds on load
    #[serde(skip)]
    pub parent: Option<NodeId>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self { kind, parent: None }
    }
}

/// Node kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Integer literal
    IntImm(i64),
    /// Float literal
    FloatImm(f64),
    /// Variable reference (loop or iteration variable)
    Var(String),
    /// Binary operation
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    /// Tensor read
    Load {
        tensor: TensorId,
        indices: Vec<NodeId>,
    },
    /// Function or intrinsic call
    Call {
        name: String,
        kind: CallKind,
        args: Vec<NodeId>,
    },
    /// Tensor write
    Store {
        tensor: TensorId,
        indices: Vec<NodeId>,
        value: NodeId,
    },
    /// Ordered statement sequence
    Block {
        stmts: Vec<NodeId>,
    },
    /// Loop
    For(ForLoop),
    /// Realized block: iteration values bound to a `ScheduleBlock`
    ScheduleBlockRealize {
        iter_values: Vec<NodeId>,
        block: NodeId,
    },
    /// Iteration block: the declarative body of a realized block
    ScheduleBlock {
        name: String,
        iter_vars: Vec<IterVar>,
        body: NodeId,
    },
}

impl NodeKind {
    /// Children in visiting order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::IntImm(_) | NodeKind::FloatImm(_) | NodeKind::Var(_) => Vec::new(),
            NodeKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            NodeKind::Load { indices, .. } => indices.clone(),
            NodeKind::Call { args, .. } => args.clone(),
            NodeKind::Store { indices, value, .. } => {
                let mut children = vec![*value];
                children.extend(indices.iter().copied());
                children
            }
            NodeKind::Block { stmts } => stmts.clone(),
            NodeKind::For(l) => vec![l.min, l.extent, l.body],
            NodeKind::ScheduleBlockRealize { iter_values, block } => {
                let mut children = iter_values.clone();
                children.push(*block);
                children
            }
            NodeKind::ScheduleBlock { body, .. } => vec![*body],
        }
    }

    /// Replace every occurrence of `old` among the children with `new`.
    /// Returns whether anything changed.
    pub fn replace_child(&mut self, old: NodeId, new: NodeId) -> bool {
        let mut changed = false;
        let mut swap = |slot: &mut NodeId| {
            if *slot == old {
                *slot = new;
                changed = true;
            }
        };
        match self {
            NodeKind::IntImm(_) | NodeKind::FloatImm(_) | NodeKind::Var(_) => {}
            NodeKind::Binary { lhs, rhs, .. } => {
                swap(lhs);
                swap(rhs);
            }
            NodeKind::Load { indices, .. } => indices.iter_mut().for_each(&mut swap),
            NodeKind::Call { args, .. } => args.iter_mut().for_each(&mut swap),
            NodeKind::Store { indices, value, .. } => {
                swap(value);
                indices.iter_mut().for_each(&mut swap);
            }
            NodeKind::Block { stmts } => stmts.iter_mut().for_each(&mut swap),
            NodeKind::For(l) => {
                swap(&mut l.min);
                swap(&mut l.extent);
                swap(&mut l.body);
            }
            NodeKind::ScheduleBlockRealize { iter_values, block } => {
                iter_values.iter_mut().for_each(&mut swap);
                swap(block);
            }
            NodeKind::ScheduleBlock { body, .. } => swap(body),
        }
        changed
    }

    /// Short variant name used in diagnostics.
    pub fn variant_name(&self) -> &'static str {
        match self {
            NodeKind::IntImm(_) => "IntImm",
            NodeKind::FloatImm(_) => "FloatImm",
            NodeKind::Var(_) => "Var",
            NodeKind::Binary { .. } => "Binary",
            NodeKind::Load { .. } => "Load",
            NodeKind::Call { .. } => "Call",
            NodeKind::Store { .. } => "Store",
            NodeKind::Block { .. } => "Block",
            NodeKind::For(_) => "For",
            NodeKind::ScheduleBlockRealize { .. } => "ScheduleBlockRealize",
            NodeKind::ScheduleBlock { .. } => "ScheduleBlock",
        }
    }

    pub fn is_realize(&self) -> bool {
        matches!(self, NodeKind::ScheduleBlockRealize { .. })
    }

    pub fn is_for(&self) -> bool {
        matches!(self, NodeKind::For(_))
    }

    pub fn is_block(&self) -> bool {
        matches!(self, NodeKind::Block { .. })
    }

    /// Tensor accessed by a load or store.
    pub fn accessed_tensor(&self) -> Option<TensorId> {
        match self {
            NodeKind::Load { tensor, .. } | NodeKind::Store { tensor, .. } => Some(*tensor),
            _ => None,
        }
    }

    /// Indices of a load or store.
    pub fn access_indices(&self) -> Option<&[NodeId]> {
        match self {
            NodeKind::Load { indices, .. } | NodeKind::Store { indices, .. } => Some(indices),
            _ => None,
        }
    }
}

/// A loop `for var in [min, min + extent)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForLoop {
    pub var: String,
    pub min: NodeId,
    pub extent: NodeId,
    pub kind: ForKind,
    pub device: DeviceApi,
    pub body: NodeId,
}

/// Loop execution kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForKind {
    #[default]
    Serial,
    Parallel,
    Vectorized,
    Unrolled,
    /// Bound to a GPU block axis
    GpuBlock(u8),
    /// Bound to a GPU thread axis
    GpuThread(u8),
}

impl fmt::Display for ForKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForKind::Serial => write!(f, "serial"),
            ForKind::Parallel => write!(f, "parallel"),
            ForKind::Vectorized => write!(f, "vectorize"),
            ForKind::Unrolled => write!(f, "unroll"),
            ForKind::GpuBlock(axis) => write!(f, "thread_bind[blockIdx.{}]", axis_name(*axis)),
            ForKind::GpuThread(axis) => write!(f, "thread_bind[threadIdx.{}]", axis_name(*axis)),
        }
    }
}

fn axis_name(axis: u8) -> char {
    match axis {
        0 => 'x',
        1 => 'y',
        _ => 'z',
    }
}

/// An iteration variable of a `ScheduleBlock` with its domain `[min, min + extent)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterVar {
    pub name: String,
    pub min: i64,
    pub extent: i64,
    /// Reduction axis
    #[serde(default)]
    pub is_reduce: bool,
}

impl IterVar {
    pub fn new(name: impl Into<String>, min: i64, extent: i64) -> Self {
        Self { name: name.into(), min, extent, is_reduce: false }
    }

    pub fn reduce(name: impl Into<String>, min: i64, extent: i64) -> Self {
        Self { name: name.into(), min, extent, is_reduce: true }
    }
}

/// Binary operators. `Div` and `Mod` round toward negative infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Add, Sub, Mul, Div, Mod, Min, Max,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
        }
    }
}

/// Call kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    /// Compiler intrinsic, e.g. a barrier
    Intrinsic,
    /// External function
    Extern,
}
