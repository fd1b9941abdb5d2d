//! Convenience constructors for schedule IR trees.

use crate::ir::module::Module;
use crate::ir::node::{BinaryOp, CallKind, ForKind, ForLoop, IterVar, NodeId, NodeKind};
use crate::ir::tensor::{DeviceApi, TensorId};

/// Name of the root schedule block of every top-level expression.
pub const ROOT_BLOCK_NAME: &str = "root";

/// Builder appending nodes to a module.
#[derive(Debug)]
pub struct IrBuilder<'m> {
    module: &'m mut Module,
    device: DeviceApi,
}

impl<'m> IrBuilder<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        Self { module, device: DeviceApi::Host }
    }

    /// Stamp loops built from now on with `device`.
    pub fn with_device(mut self, device: DeviceApi) -> Self {
        self.device = device;
        self
    }

    pub fn module(&mut self) -> &mut Module {
        &mut *self.module
    }

    pub fn int(&mut self, value: i64) -> NodeId {
        self.module.alloc(NodeKind::IntImm(value))
    }

    pub fn float(&mut self, value: f64) -> NodeId {
        self.module.alloc(NodeKind::FloatImm(value))
    }

    pub fn var(&mut self, name: &str) -> NodeId {
        self.module.alloc(NodeKind::Var(name.to_string()))
    }

    /// Several variables at once.
    pub fn vars(&mut self, names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| self.var(n)).collect()
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.module.alloc(NodeKind::Binary { op, lhs, rhs })
    }

    pub fn add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn load(&mut self, tensor: TensorId, indices: Vec<NodeId>) -> NodeId {
        self.module.alloc(NodeKind::Load { tensor, indices })
    }

    pub fn store(&mut self, tensor: TensorId, indices: Vec<NodeId>, value: NodeId) -> NodeId {
        self.module.alloc(NodeKind::Store { tensor, indices, value })
    }

    pub fn call(&mut self, name: &str, kind: CallKind, args: Vec<NodeId>) -> NodeId {
        self.module.alloc(NodeKind::Call { name: name.to_string(), kind, args })
    }

    pub fn seq(&mut self, stmts: Vec<NodeId>) -> NodeId {
        self.module.alloc(NodeKind::Block { stmts })
    }

    /// Serial loop `for var in [min, min + extent)` over `body`.
    pub fn for_loop(&mut self, var: &str, min: i64, extent: i64, body: Vec<NodeId>) -> NodeId {
        self.for_kind(var, min, extent, ForKind::Serial, body)
    }

    /// Loop with an explicit kind.
    pub fn for_kind(&mut self, var: &str, min: i64, extent: i64, kind: ForKind, body: Vec<NodeId>) -> NodeId {
        let min = self.int(min);
        let extent = self.int(extent);
        let body = self.seq(body);
        self.module.alloc(NodeKind::For(ForLoop {
            var: var.to_string(),
            min,
            extent,
            kind,
            device: self.device,
            body,
        }))
    }

    /// Realized block named `name` binding `iter_values` to `iter_vars`.
    pub fn realize(
        &mut self,
        name: &str,
        iter_vars: Vec<IterVar>,
        iter_values: Vec<NodeId>,
        body: Vec<NodeId>,
    ) -> NodeId {
        let body = self.seq(body);
        let block = self.module.alloc(NodeKind::ScheduleBlock {
            name: name.to_string(),
            iter_vars,
            body,
        });
        self.module.alloc(NodeKind::ScheduleBlockRealize { iter_values, block })
    }

    /// Root realized block over `body`, registered as a top-level expression.
    pub fn root(&mut self, body: Vec<NodeId>) -> NodeId {
        let root = self.realize(ROOT_BLOCK_NAME, Vec::new(), Vec::new(), body);
        self.module.add_expr(root);
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::tensor::{ElementType, Tensor};

    #[test]
    fn test_build_loop_nest() {
        let mut module = Module::new("build");
        let a = module.declare_tensor(Tensor::new("A", vec![8], ElementType::Float));
        let mut b = IrBuilder::new(&mut module);
        let i = b.var("i");
        let vi = b.var("vi");
        let one = b.float(1.0);
        let store = b.store(a, vec![vi], one);
        let block = b.realize("A", vec![IterVar::new("vi", 0, 8)], vec![i], vec![store]);
        let l = b.for_loop("i", 0, 8, vec![block]);
        let root = b.root(vec![l]);

        assert_eq!(module.exprs(), &[root]);
        assert_eq!(module.get_block("A"), Some(block));
        assert_eq!(module.loops_of(block), vec![l]);
        assert_eq!(module.root_of(store), root);
        assert_eq!(module.stored_tensor(block), Some(a));
    }
}
