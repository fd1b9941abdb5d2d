//! Textual rendering of schedule IR.
//!
//! ```text
//! ScheduleBlock(root)
//! {
//!   serial for (i, 0, 128)
//!   {
//!     ScheduleBlock(C)
//!     {
//!       vi = axis.bind(i)
//!       C[vi] = (A[vi] + B[vi])
//!     }
//!   }
//! }
//! ```

use crate::ir::module::Module;
use crate::ir::node::{BinaryOp, NodeId, NodeKind};
use crate::utils::pretty::{format_list, format_list_with, PrettyPrint};
use pretty::{DocAllocator, DocBuilder};
use std::fmt;

/// A node viewed together with the module that owns it.
#[derive(Clone, Copy)]
pub struct NodeRef<'m> {
    pub module: &'m Module,
    pub id: NodeId,
}

impl Module {
    /// View a node for printing.
    pub fn display(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { module: self, id }
    }

    /// Render an expression on one line.
    pub fn expr_to_string(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::IntImm(v) => v.to_string(),
            NodeKind::FloatImm(v) => format!("{:?}", v),
            NodeKind::Var(name) => name.clone(),
            NodeKind::Binary { op: op @ (BinaryOp::Min | BinaryOp::Max), lhs, rhs } => {
                format!("{}({}, {})", op.symbol(), self.expr_to_string(*lhs), self.expr_to_string(*rhs))
            }
            NodeKind::Binary { op, lhs, rhs } => {
                format!("({} {} {})", self.expr_to_string(*lhs), op.symbol(), self.expr_to_string(*rhs))
            }
            NodeKind::Load { tensor, indices } => {
                format!("{}[{}]", self.tensor_name(*tensor), self.indices_to_string(indices))
            }
            NodeKind::Call { name, args, .. } => {
                format!("{}({})", name, self.indices_to_string(args))
            }
            NodeKind::Store { tensor, indices, value } => {
                format!(
                    "{}[{}] = {}",
                    self.tensor_name(*tensor),
                    self.indices_to_string(indices),
                    self.expr_to_string(*value)
                )
            }
            other => format!("<{}>", other.variant_name()),
        }
    }

    fn indices_to_string(&self, indices: &[NodeId]) -> String {
        format_list_with(indices, ", ", |&i| self.expr_to_string(i))
    }

    /// Render every top-level expression followed by the tensor table.
    /// Two modules with equal dumps are structurally identical.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for &root in self.exprs() {
            out.push_str(&self.display(root).pretty());
            out.push('\n');
        }
        for (_, tensor) in self.tensors() {
            out.push_str(&format!("tensor {}[{}]", tensor.name, format_list(&tensor.shape, ", ")));
            if let Some(buffer) = tensor.buffer.map(|b| self.buffer(b)) {
                out.push_str(&format!(
                    " -> {}<{}>[{}]",
                    buffer.name,
                    buffer.scope,
                    format_list(&buffer.shape, ", ")
                ));
            }
            out.push('\n');
        }
        out
    }
}

fn braced<'a, D: DocAllocator<'a>>(
    allocator: &'a D,
    items: Vec<DocBuilder<'a, D>>,
) -> DocBuilder<'a, D> {
    let mut inner = allocator.nil();
    for item in items {
        inner = inner.append(allocator.hardline()).append(item);
    }
    allocator
        .text("{")
        .append(inner.nest(2))
        .append(allocator.hardline())
        .append(allocator.text("}"))
}

fn stmt_doc<'a, D: DocAllocator<'a>>(
    module: &Module,
    id: NodeId,
    allocator: &'a D,
) -> DocBuilder<'a, D> {
    match module.kind(id) {
        NodeKind::Block { stmts } => {
            let items = stmts.iter().map(|&s| stmt_doc(module, s, allocator)).collect();
            braced(allocator, items)
        }
        NodeKind::For(l) => allocator
            .text(format!(
                "{} for ({}, {}, {})",
                l.kind,
                l.var,
                module.expr_to_string(l.min),
                module.expr_to_string(l.extent)
            ))
            .append(allocator.hardline())
            .append(stmt_doc(module, l.body, allocator)),
        NodeKind::ScheduleBlockRealize { iter_values, block } => {
            let (name, iter_vars, body) = match module.kind(*block) {
                NodeKind::ScheduleBlock { name, iter_vars, body } => (name, iter_vars, *body),
                _ => return allocator.text(module.expr_to_string(id)),
            };
            let mut items = Vec::new();
            if !iter_vars.is_empty() {
                items.push(allocator.text(format!(
                    "{} = axis.bind({})",
                    format_list_with(iter_vars, ", ", |iv| if iv.is_reduce {
                        format!("{}(reduce)", iv.name)
                    } else {
                        iv.name.clone()
                    }),
                    module.indices_to_string(iter_values)
                )));
            }
            match module.kind(body) {
                NodeKind::Block { stmts } => {
                    items.extend(stmts.iter().map(|&s| stmt_doc(module, s, allocator)));
                }
                _ => items.push(stmt_doc(module, body, allocator)),
            }
            allocator
                .text(format!("ScheduleBlock({})", name))
                .append(allocator.hardline())
                .append(braced(allocator, items))
        }
        NodeKind::ScheduleBlock { name, body, .. } => allocator
            .text(format!("ScheduleBlock({})", name))
            .append(allocator.hardline())
            .append(stmt_doc(module, *body, allocator)),
        _ => allocator.text(module.expr_to_string(id)),
    }
}

impl PrettyPrint for NodeRef<'_> {
    fn to_doc<'a, D: DocAllocator<'a>>(&self, allocator: &'a D) -> DocBuilder<'a, D> {
        stmt_doc(self.module, self.id, allocator)
    }
}

impl fmt::Display for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty())
    }
}
