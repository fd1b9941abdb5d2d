//! The module: an arena of nodes, tensors and buffers.
//!
//! Every top-level expression of the module is a root `ScheduleBlockRealize`.
//! Nodes keep a parent link so ancestors can be found from any handle, and
//! subtree substitution is a handle swap in the parent.

use crate::ir::node::{Node, NodeId, NodeKind};
use crate::ir::registry::AliasRegistry;
use crate::ir::tensor::{Buffer, BufferId, Tensor, TensorId};
use serde::{Serialize, Deserialize};
use std::collections::BTreeSet;

/// A program: top-level expressions plus the arenas they reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    nodes: Vec<Node>,
    exprs: Vec<NodeId>,
    tensors: Vec<Tensor>,
    buffers: Vec<Buffer>,
    #[serde(skip)]
    registry: AliasRegistry,
    /// Every name in use, for fresh-name generation
    #[serde(skip)]
    names: BTreeSet<String>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            exprs: Vec::new(),
            tensors: Vec::new(),
            buffers: Vec::new(),
            registry: AliasRegistry::new(),
            names: BTreeSet::new(),
        }
    }

    /// Load a module from JSON and rebuild the derived tables. Dangling
    /// ids and nodes reachable along more than one path are rejected.
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        let mut module: Module = serde_json::from_str(source)?;
        module
            .relink()
            .map_err(<serde_json::Error as serde::de::Error>::custom)?;
        Ok(module)
    }

    /// Serialize the module to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Rebuild parent links, the name table and the alias registry.
    fn relink(&mut self) -> Result<(), String> {
        self.check_ids()?;
        for node in &mut self.nodes {
            node.parent = None;
        }
        // Only the trees under `exprs` are linked; detached nodes left behind
        // by substitutions keep no parent.
        let mut seen = vec![false; self.nodes.len()];
        for root in self.exprs.clone() {
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                if std::mem::replace(&mut seen[id.index()], true) {
                    return Err(format!("node {} is reachable along more than one path", id));
                }
                for child in self.nodes[id.index()].kind.children() {
                    self.nodes[child.index()].parent = Some(id);
                    stack.push(child);
                }
            }
        }

        self.names.clear();
        for i in 0..self.nodes.len() {
            let kind = self.nodes[i].kind.clone();
            self.record_names(&kind);
        }

        self.registry.clear();
        for (i, tensor) in self.tensors.iter().enumerate() {
            self.registry.register(&tensor.name, TensorId(i as u32));
            self.names.insert(tensor.name.clone());
        }
        self.registry.restore_bindings(
            self.tensors
                .iter()
                .filter_map(|t| t.buffer.map(|b| (t.name.as_str(), b))),
        );
        for buffer in &self.buffers {
            self.names.insert(buffer.name.clone());
        }
        Ok(())
    }

    /// Every node, tensor and buffer id must point into its arena.
    fn check_ids(&self) -> Result<(), String> {
        let num_nodes = self.nodes.len();
        if let Some(root) = self.exprs.iter().find(|r| r.index() >= num_nodes) {
            return Err(format!("top-level expression {} does not exist", root));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(child) = node.kind.children().into_iter().find(|c| c.index() >= num_nodes) {
                return Err(format!("node %{} references missing node {}", i, child));
            }
            if let Some(tensor) = node.kind.accessed_tensor() {
                if tensor.index() >= self.tensors.len() {
                    return Err(format!("node %{} references missing tensor #{}", i, tensor.0));
                }
            }
        }
        for tensor in &self.tensors {
            if let Some(buffer) = tensor.buffer {
                if buffer.index() >= self.buffers.len() {
                    return Err(format!("tensor {} is bound to missing buffer #{}", tensor.name, buffer.0));
                }
            }
        }
        Ok(())
    }

    fn record_names(&mut self, kind: &NodeKind) {
        match kind {
            NodeKind::Var(name) => {
                self.names.insert(name.clone());
            }
            NodeKind::For(l) => {
                self.names.insert(l.var.clone());
            }
            NodeKind::ScheduleBlock { name, iter_vars, .. } => {
                self.names.insert(name.clone());
                for iv in iter_vars {
                    self.names.insert(iv.name.clone());
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Allocate a node and adopt its children.
    pub fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for child in kind.children() {
            self.nodes[child.index()].parent = Some(id);
        }
        self.record_names(&kind);
        self.nodes.push(Node::new(kind));
        id
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub(crate) fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.index()].kind
    }

    pub(crate) fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        self.nodes[id.index()].parent = parent;
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.kind(id).children()
    }

    /// Top-level expressions.
    pub fn exprs(&self) -> &[NodeId] {
        &self.exprs
    }

    pub fn add_expr(&mut self, root: NodeId) {
        self.exprs.push(root);
    }

    /// Ancestors of `id`, innermost first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            if chain.len() >= self.nodes.len() {
                break;
            }
            chain.push(p);
            cur = self.parent(p);
        }
        chain
    }

    /// The top-level realized block enclosing `id`.
    pub fn root_of(&self, id: NodeId) -> NodeId {
        self.ancestors(id).last().copied().unwrap_or(id)
    }

    /// Whether `node` lies in the subtree rooted at `ancestor` (inclusive).
    pub fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        node == ancestor || self.ancestors(node).contains(&ancestor)
    }

    /// Collect the nodes of the subtree at `root` satisfying `pred`, in
    /// pre-order. Stops at the first match when `first_only` is set.
    pub fn collect<F>(&self, root: NodeId, mut pred: F, first_only: bool) -> Vec<NodeId>
    where
        F: FnMut(NodeId, &NodeKind) -> bool,
    {
        let mut found = Vec::new();
        let mut stack = vec![root];
        let mut budget = self.nodes.len();
        while let Some(id) = stack.pop() {
            if budget == 0 {
                break;
            }
            budget -= 1;
            let kind = self.kind(id);
            if pred(id, kind) {
                found.push(id);
                if first_only {
                    break;
                }
            }
            let children = kind.children();
            stack.extend(children.into_iter().rev());
        }
        found
    }

    /// Substitute the subtree at `old` with the subtree at `new`.
    /// Returns false when `old` is neither attached nor a top-level expression.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> bool {
        match self.parent(old) {
            Some(parent) => {
                if !self.kind_mut(parent).replace_child(old, new) {
                    return false;
                }
                self.set_parent(new, Some(parent));
                self.set_parent(old, None);
                true
            }
            None => match self.exprs.iter_mut().find(|e| **e == old) {
                Some(slot) => {
                    *slot = new;
                    self.set_parent(new, None);
                    true
                }
                None => false,
            },
        }
    }

    /// Insert `stmt` into the sequence `seq` at `pos`.
    pub fn insert_stmt(&mut self, seq: NodeId, pos: usize, stmt: NodeId) -> bool {
        match self.kind_mut(seq) {
            NodeKind::Block { stmts } if pos <= stmts.len() => {
                stmts.insert(pos, stmt);
            }
            _ => return false,
        }
        self.set_parent(stmt, Some(seq));
        true
    }

    /// Make every loop and iteration-block body in the subtree an explicit
    /// `Block`. Returns the number of bodies wrapped.
    pub fn normalize_bodies(&mut self, root: NodeId) -> usize {
        let owners = self.collect(
            root,
            |_, kind| matches!(kind, NodeKind::For(_) | NodeKind::ScheduleBlock { .. }),
            false,
        );
        let mut wrapped = 0;
        for owner in owners {
            let body = match self.kind(owner) {
                NodeKind::For(l) => l.body,
                NodeKind::ScheduleBlock { body, .. } => *body,
                _ => continue,
            };
            if self.kind(body).is_block() {
                continue;
            }
            let seq = self.alloc(NodeKind::Block { stmts: vec![body] });
            self.kind_mut(owner).replace_child(body, seq);
            self.set_parent(seq, Some(owner));
            wrapped += 1;
        }
        wrapped
    }

    // ------------------------------------------------------------------
    // Schedule blocks
    // ------------------------------------------------------------------

    /// The `ScheduleBlock` of a realized block.
    pub fn schedule_block(&self, realize: NodeId) -> Option<NodeId> {
        match self.kind(realize) {
            NodeKind::ScheduleBlockRealize { block, .. } => Some(*block),
            _ => None,
        }
    }

    /// Name of a realized block.
    pub fn block_name(&self, realize: NodeId) -> Option<&str> {
        match self.kind(self.schedule_block(realize)?) {
            NodeKind::ScheduleBlock { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Body of a realized block.
    pub fn block_body(&self, realize: NodeId) -> Option<NodeId> {
        match self.kind(self.schedule_block(realize)?) {
            NodeKind::ScheduleBlock { body, .. } => Some(*body),
            _ => None,
        }
    }

    /// Find a realized block by name in any top-level expression.
    pub fn get_block(&self, name: &str) -> Option<NodeId> {
        self.exprs.iter().find_map(|&root| {
            self.collect(
                root,
                |id, kind| kind.is_realize() && self.block_name(id) == Some(name),
                true,
            )
            .first()
            .copied()
        })
    }

    /// Loops enclosing `id`, outermost first.
    pub fn loops_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut loops: Vec<NodeId> = self.ancestors(id)
            .into_iter()
            .filter(|&a| self.kind(a).is_for())
            .collect();
        loops.reverse();
        loops
    }

    /// Tensor written by the first store of a realized block.
    pub fn stored_tensor(&self, realize: NodeId) -> Option<TensorId> {
        let first = self.collect(realize, |_, kind| matches!(kind, NodeKind::Store { .. }), true);
        first.first().and_then(|&s| self.kind(s).accessed_tensor())
    }

    // ------------------------------------------------------------------
    // Tensors and buffers
    // ------------------------------------------------------------------

    /// Add a tensor object. A tensor joining an already bound alias group
    /// adopts the group's buffer.
    pub fn declare_tensor(&mut self, mut tensor: Tensor) -> TensorId {
        let id = TensorId(self.tensors.len() as u32);
        if tensor.buffer.is_none() {
            tensor.buffer = self.registry.binding_for(&tensor.name);
        }
        self.registry.register(&tensor.name, id);
        self.names.insert(tensor.name.clone());
        self.tensors.push(tensor);
        id
    }

    pub fn tensor(&self, id: TensorId) -> &Tensor {
        &self.tensors[id.index()]
    }

    pub(crate) fn tensor_mut(&mut self, id: TensorId) -> &mut Tensor {
        &mut self.tensors[id.index()]
    }

    pub fn tensor_name(&self, id: TensorId) -> &str {
        &self.tensors[id.index()].name
    }

    /// All tensor objects with their ids.
    pub fn tensors(&self) -> impl Iterator<Item = (TensorId, &Tensor)> {
        self.tensors.iter().enumerate().map(|(i, t)| (TensorId(i as u32), t))
    }

    /// Tensor objects named exactly `name`.
    pub fn tensors_named(&self, name: &str) -> &[TensorId] {
        self.registry.tensors_named(name)
    }

    pub fn add_buffer(&mut self, buffer: Buffer) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.names.insert(buffer.name.clone());
        self.buffers.push(buffer);
        id
    }

    pub fn buffer(&self, id: BufferId) -> &Buffer {
        &self.buffers[id.index()]
    }

    pub(crate) fn buffer_mut(&mut self, id: BufferId) -> &mut Buffer {
        &mut self.buffers[id.index()]
    }

    /// Buffer bound to a tensor, if any.
    pub fn buffer_of(&self, tensor: TensorId) -> Option<&Buffer> {
        self.tensor(tensor).buffer.map(|b| self.buffer(b))
    }

    /// Bind a single tensor object to a buffer.
    pub fn bind_buffer(&mut self, tensor: TensorId, buffer: BufferId) {
        self.tensor_mut(tensor).buffer = Some(buffer);
    }

    /// Bind the alias group rooted at `base` to `buffer` and refresh the
    /// cached binding of every member. Returns the number of members.
    pub fn bind_alias_group(&mut self, base: &str, buffer: BufferId) -> usize {
        let members = self.registry.bind_group(base, buffer);
        for &member in &members {
            self.tensor_mut(member).buffer = Some(buffer);
        }
        members.len()
    }

    /// Tensor objects bound to a buffer named `name`.
    pub fn tensors_with_buffer_named(&self, name: &str) -> Vec<TensorId> {
        self.tensors()
            .filter(|(_, t)| t.buffer.map_or(false, |b| self.buffer(b).name == name))
            .map(|(id, _)| id)
            .collect()
    }

    /// Bind `tensor` to `buffer` and record the binding under its exact
    /// name, so objects declared later with that name follow it.
    pub fn rebind_tensor(&mut self, tensor: TensorId, buffer: BufferId) {
        self.tensor_mut(tensor).buffer = Some(buffer);
        let name = self.tensors[tensor.index()].name.clone();
        self.registry.set_binding(&name, buffer);
    }

    /// Move every recorded binding on a buffer named `from` to `to`, except
    /// the one recorded under `keep`. Returns the number of bindings moved.
    pub fn move_bindings(&mut self, from: &str, keep: &str, to: BufferId) -> usize {
        let keys: Vec<String> = self
            .registry
            .bindings()
            .filter(|&(key, buffer)| key != keep && self.buffers[buffer.index()].name == from)
            .map(|(key, _)| key.to_string())
            .collect();
        for key in &keys {
            self.registry.set_binding(key, to);
        }
        keys.len()
    }

    /// Reserve a name derived from `base` that is not used anywhere in the
    /// module: `base`, then `base_1`, `base_2`, ...
    pub fn fresh_name(&mut self, base: &str) -> String {
        let name = if !self.names.contains(base) {
            base.to_string()
        } else {
            (1..)
                .map(|i| format!("{}_{}", base, i))
                .find(|candidate| !self.names.contains(candidate))
                .unwrap_or_else(|| base.to_string())
        };
        self.names.insert(name.clone());
        name
    }
}
