//! Access region inference.
//!
//! The region an access induces on a tensor is a closed integer interval per
//! dimension. Variables are bounded by the loops and realized blocks that
//! enclose the access; block iteration variables are replaced by the affine
//! form of their iteration values so that indices stay exact across block
//! boundaries. Non-affine indices fall back to interval arithmetic.

use crate::analysis::affine::AffineExpr;
use crate::ir::module::Module;
use crate::ir::node::{BinaryOp, NodeId, NodeKind};
use crate::ir::tensor::TensorId;
use crate::utils::errors::{ScheduleError, ScheduleResult};
use crate::utils::pretty::format_list;
use log::trace;
use num_integer::Integer;
use serde::{Serialize, Deserialize};
use std::collections::HashMap;
use std::fmt;

/// A closed integer interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub min: i64,
    pub max: i64,
}

impl Interval {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn point(value: i64) -> Self {
        Self { min: value, max: value }
    }

    /// `[min, min + extent - 1]`
    pub fn from_extent(min: i64, extent: i64) -> Self {
        Self { min, max: min + extent - 1 }
    }

    pub fn extent(&self) -> i64 {
        self.max - self.min + 1
    }

    pub fn is_empty(&self) -> bool {
        self.max < self.min
    }

    pub fn union(&self, other: &Interval) -> Interval {
        Interval::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval::new(self.min.max(other.min), self.max.min(other.max))
    }

    fn apply(op: BinaryOp, a: Interval, b: Interval) -> Option<Interval> {
        match op {
            BinaryOp::Add => Some(Interval::new(a.min + b.min, a.max + b.max)),
            BinaryOp::Sub => Some(Interval::new(a.min - b.max, a.max - b.min)),
            BinaryOp::Mul => {
                let products = [a.min * b.min, a.min * b.max, a.max * b.min, a.max * b.max];
                let min = products.iter().copied().min()?;
                let max = products.iter().copied().max()?;
                Some(Interval::new(min, max))
            }
            BinaryOp::Div => {
                // Only division by a positive constant is bounded
                let d = (b.min == b.max && b.min > 0).then_some(b.min)?;
                Some(Interval::new(Integer::div_floor(&a.min, &d), Integer::div_floor(&a.max, &d)))
            }
            BinaryOp::Mod => {
                let m = (b.min == b.max && b.min > 0).then_some(b.min)?;
                if Integer::div_floor(&a.min, &m) == Integer::div_floor(&a.max, &m) {
                    Some(Interval::new(Integer::mod_floor(&a.min, &m), Integer::mod_floor(&a.max, &m)))
                } else {
                    Some(Interval::new(0, m - 1))
                }
            }
            BinaryOp::Min => Some(Interval::new(a.min.min(b.min), a.max.min(b.max))),
            BinaryOp::Max => Some(Interval::new(a.min.max(b.min), a.max.max(b.max))),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.min, self.max + 1)
    }
}

/// A multi-dimensional region, one interval per tensor dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub dims: Vec<Interval>,
}

impl Region {
    /// The whole tensor of the given shape.
    pub fn full(shape: &[i64]) -> Self {
        Self { dims: shape.iter().map(|&s| Interval::from_extent(0, s)).collect() }
    }

    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    pub fn extents(&self) -> Vec<i64> {
        self.dims.iter().map(Interval::extent).collect()
    }

    pub fn mins(&self) -> Vec<i64> {
        self.dims.iter().map(|d| d.min).collect()
    }

    /// Dimension-wise union. Regions of different rank are not unioned.
    pub fn union(&self, other: &Region) -> Option<Region> {
        if self.ndims() != other.ndims() {
            return None;
        }
        Some(Region {
            dims: self.dims.iter().zip(&other.dims).map(|(a, b)| a.union(b)).collect(),
        })
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", format_list(&self.dims, ", "))
    }
}

/// Bounds of the variables visible at some point of the tree.
#[derive(Debug, Clone, Default)]
pub struct IterDomain {
    ranges: HashMap<String, Interval>,
    /// Block iteration variables bound to the affine form of their value
    bindings: HashMap<String, AffineExpr>,
}

impl IterDomain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Domain of every loop and realized block enclosing `node`, up to and
    /// including `root`.
    pub fn enclosing(module: &Module, node: NodeId, root: NodeId) -> Self {
        let mut domain = Self::new();
        let mut chain: Vec<NodeId> = module
            .ancestors(node)
            .into_iter()
            .take_while(|&a| module.is_within(a, root))
            .collect();
        chain.reverse();
        for id in chain {
            domain.enter(module, id);
        }
        domain
    }

    /// Add the variables introduced by a loop or realized block.
    pub fn enter(&mut self, module: &Module, id: NodeId) {
        match module.kind(id) {
            NodeKind::For(l) => {
                let min = self.bound(module, l.min);
                let extent = self.bound(module, l.extent);
                match (min, extent) {
                    (Some(min), Some(extent)) => {
                        self.bind_range(&l.var, Interval::new(min.min, min.max + extent.max - 1));
                    }
                    _ => {
                        self.ranges.remove(&l.var);
                    }
                }
            }
            NodeKind::ScheduleBlockRealize { iter_values, block } => {
                let iter_vars = match module.kind(*block) {
                    NodeKind::ScheduleBlock { iter_vars, .. } => iter_vars,
                    _ => return,
                };
                for (iv, &value) in iter_vars.iter().zip(iter_values) {
                    let declared = Interval::from_extent(iv.min, iv.extent);
                    match self.affine_of(module, value) {
                        Some(aff) => {
                            self.bind_range(&iv.name, declared);
                            self.bindings.insert(iv.name.clone(), aff);
                        }
                        None => {
                            let range = self
                                .interval_of(module, value)
                                .map_or(declared, |r| r.intersect(&declared));
                            self.bindings.remove(&iv.name);
                            self.bind_range(&iv.name, range);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    pub fn bind_range(&mut self, name: &str, range: Interval) {
        self.ranges.insert(name.to_string(), range);
    }

    pub fn range(&self, name: &str) -> Option<Interval> {
        self.ranges.get(name).copied()
    }

    /// Names of the variables with known bounds.
    pub fn vars(&self) -> Vec<String> {
        self.ranges.keys().cloned().collect()
    }

    /// Affine form of an expression in terms of loop variables.
    pub fn affine_of(&self, module: &Module, id: NodeId) -> Option<AffineExpr> {
        let mut aff = AffineExpr::from_node(module, id)?;
        let bound: Vec<String> = aff.vars().filter(|v| self.bindings.contains_key(*v)).map(String::from).collect();
        for name in bound {
            if let Some(value) = self.bindings.get(&name) {
                aff = aff.substitute(&name, value);
            }
        }
        Some(aff)
    }

    /// Bounds of an affine expression over the known ranges.
    pub fn bound_affine(&self, aff: &AffineExpr) -> Option<Interval> {
        aff.bounds(|v| self.range(v).map(|r| (r.min, r.max)))
            .map(|(lo, hi)| Interval::new(lo, hi))
    }

    /// Bounds of an expression: exact for affine expressions, interval
    /// arithmetic otherwise. `None` means unbounded.
    pub fn bound(&self, module: &Module, id: NodeId) -> Option<Interval> {
        if let Some(exact) = self.affine_of(module, id).and_then(|aff| self.bound_affine(&aff)) {
            return Some(exact);
        }
        self.interval_of(module, id)
    }

    fn interval_of(&self, module: &Module, id: NodeId) -> Option<Interval> {
        match module.kind(id) {
            NodeKind::IntImm(v) => Some(Interval::point(*v)),
            NodeKind::Var(name) => match self.bindings.get(name) {
                Some(aff) => self.bound_affine(aff).or_else(|| self.range(name)),
                None => self.range(name),
            },
            NodeKind::Binary { op, lhs, rhs } => {
                let a = self.bound(module, *lhs)?;
                let b = self.bound(module, *rhs)?;
                Interval::apply(*op, a, b)
            }
            _ => None,
        }
    }
}

/// Whether the expression at `id` reads a tensor.
pub fn contains_load(module: &Module, id: NodeId) -> bool {
    !module.collect(id, |_, k| matches!(k, NodeKind::Load { .. }), true).is_empty()
}

/// Reject accesses region inference cannot bound: rank mismatches and
/// indices that read another tensor (gathers and scatters).
pub fn validate_indices(module: &Module, access: NodeId, indices: &[NodeId], tensor: TensorId) -> ScheduleResult<()> {
    let rank = module.tensor(tensor).ndims();
    let name = module.tensor_name(tensor);
    if indices.len() != rank {
        return Err(ScheduleError::unsupported_access(format!(
            "access of {} has {} indices but the tensor has rank {}",
            name,
            indices.len(),
            rank
        ))
        .at(access));
    }
    if let Some(pos) = indices.iter().position(|&i| contains_load(module, i)) {
        return Err(ScheduleError::unsupported_access(format!(
            "index {} of {} depends on another tensor read",
            pos, name
        ))
        .at(access));
    }
    Ok(())
}

/// Validate a load or store node.
pub fn validate_access(module: &Module, access: NodeId) -> ScheduleResult<()> {
    let kind = module.kind(access);
    match (kind.accessed_tensor(), kind.access_indices()) {
        (Some(tensor), Some(indices)) => validate_indices(module, access, indices, tensor),
        _ => Err(ScheduleError::unsupported_access(format!(
            "{} is not a plain load or store",
            kind.variant_name()
        ))
        .at(access)),
    }
}

/// Infer the region that `indices`, evaluated at `access`, induce on
/// `tensor`. Variables are relaxed over every loop and realized block
/// between `root` and the access.
pub fn infer_region(
    module: &Module,
    access: NodeId,
    indices: &[NodeId],
    tensor: TensorId,
    root: NodeId,
) -> ScheduleResult<Region> {
    validate_indices(module, access, indices, tensor)?;
    let shape = &module.tensor(tensor).shape;
    let name = module.tensor_name(tensor);

    let domain = IterDomain::enclosing(module, access, root);
    let dims = indices
        .iter()
        .zip(shape)
        .map(|(&index, &size)| {
            let full = Interval::from_extent(0, size);
            match domain.bound(module, index) {
                Some(b) => {
                    let clamped = b.intersect(&full);
                    if clamped.is_empty() { full } else { clamped }
                }
                None => full,
            }
        })
        .collect();
    let region = Region { dims };
    trace!("region of {} at {}: {}", name, access, region);
    Ok(region)
}

/// Union of the regions of several accesses of the same tensor.
pub fn infer_union_region(module: &Module, accesses: &[NodeId], root: NodeId) -> ScheduleResult<Option<Region>> {
    let mut result: Option<Region> = None;
    for &access in accesses {
        let kind = module.kind(access);
        let (tensor, indices) = match (kind.accessed_tensor(), kind.access_indices()) {
            (Some(t), Some(idx)) => (t, idx),
            _ => continue,
        };
        let region = infer_region(module, access, indices, tensor, root)?;
        result = match result {
            None => Some(region),
            Some(prev) => Some(prev.union(&region).ok_or_else(|| {
                ScheduleError::unsupported_access(format!(
                    "accesses of {} disagree on rank",
                    module.tensor_name(tensor)
                ))
                .at(access)
            })?),
        };
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::node::IterVar;
    use crate::ir::tensor::{ElementType, Tensor};
    use crate::utils::errors::ScheduleErrorKind;

    #[test]
    fn test_interval_arith() {
        let a = Interval::new(0, 9);
        let m = Interval::point(4);
        assert_eq!(Interval::apply(BinaryOp::Div, a, m), Some(Interval::new(0, 2)));
        assert_eq!(Interval::apply(BinaryOp::Mod, a, m), Some(Interval::new(0, 3)));
        assert_eq!(Interval::apply(BinaryOp::Mod, Interval::new(5, 6), m), Some(Interval::new(1, 2)));
        assert_eq!(Interval::apply(BinaryOp::Mul, Interval::new(-2, 3), Interval::new(1, 2)), Some(Interval::new(-4, 6)));
        assert_eq!(Interval::apply(BinaryOp::Div, a, Interval::new(1, 2)), None);
    }

    #[test]
    fn test_region_display() {
        let region = Region::full(&[128, 64]);
        assert_eq!(region.to_string(), "[0:128, 0:64]");
        assert_eq!(region.extents(), vec![128, 64]);
    }

    /// for i in [0,4): for k in [0,4): B[vi] = A[vi*4 + k]
    #[test]
    fn test_infer_tiled_region() {
        let mut module = Module::new("tiled");
        let a = module.declare_tensor(Tensor::new("A", vec![32], ElementType::Float));
        let out = module.declare_tensor(Tensor::new("B", vec![4], ElementType::Float));
        let mut b = IrBuilder::new(&mut module);
        let i = b.var("i");
        let vi = b.var("vi");
        let four = b.int(4);
        let scaled = b.mul(vi, four);
        let k = b.var("k");
        let idx = b.add(scaled, k);
        let load = b.load(a, vec![idx]);
        let vi2 = b.var("vi");
        let store = b.store(out, vec![vi2], load);
        let inner = b.for_loop("k", 0, 4, vec![store]);
        let block = b.realize("B", vec![IterVar::new("vi", 0, 4)], vec![i], vec![inner]);
        let outer = b.for_loop("i", 0, 4, vec![block]);
        let root = b.root(vec![outer]);

        let region = infer_region(&module, load, &[idx], a, root).unwrap();
        assert_eq!(region.dims, vec![Interval::new(0, 15)]);
    }

    #[test]
    fn test_unknown_var_gives_full_dim() {
        let mut module = Module::new("unknown");
        let a = module.declare_tensor(Tensor::new("A", vec![10], ElementType::Float));
        let mut b = IrBuilder::new(&mut module);
        let n = b.var("n");
        let load = b.load(a, vec![n]);
        let root = b.root(vec![load]);
        let region = infer_region(&module, load, &[n], a, root).unwrap();
        assert_eq!(region, Region::full(&[10]));
    }

    #[test]
    fn test_gather_rejected() {
        let mut module = Module::new("gather");
        let a = module.declare_tensor(Tensor::new("A", vec![10], ElementType::Float));
        let idx_t = module.declare_tensor(Tensor::new("I", vec![10], ElementType::Int));
        let mut b = IrBuilder::new(&mut module);
        let i = b.var("i");
        let inner = b.load(idx_t, vec![i]);
        let load = b.load(a, vec![inner]);
        let root = b.root(vec![load]);
        let err = infer_region(&module, load, &[inner], a, root).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::UnsupportedAccessPattern);

        let err = infer_region(&module, load, &[], a, root).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::UnsupportedAccessPattern);
    }
}
