//! Cache read and cache write.
//!
//! Both primitives follow the same shape:
//! 1. validate the request against the untouched tree
//! 2. normalize the root and infer the cached region
//! 3. search the insertion point and check the rewrite is unambiguous
//! 4. allocate the cache tensor and synthesize its fill/drain block
//! 5. commit: redirect accesses and splice the new block into the root
//!
//! Only step 5 mutates reachable state, and it cannot fail.

use crate::analysis::access::{accesses_of_named, nth_access, AccessKind};
use crate::analysis::region::{infer_union_region, validate_access, Region};
use crate::ir::builder::IrBuilder;
use crate::ir::module::Module;
use crate::ir::node::{BinaryOp, IterVar, NodeId, NodeKind};
use crate::ir::tensor::{Buffer, DeviceApi, MemoryScope, Tensor, TensorId};
use crate::schedule::insertion::{find_insertion_point, InsertionPoint};
use crate::schedule::expect_realize;
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, ScheduleResult};
use log::debug;

/// State of one cache request. Dropped when the request ends.
#[derive(Debug, Clone, Default)]
pub struct CacheInfo {
    /// Tensor the fill block reads
    pub read_tensor: Option<TensorId>,
    /// Tensor the fill/drain block writes
    pub write_tensor: Option<TensorId>,
    /// Freshly allocated cache tensor
    pub alloc: Option<TensorId>,
    pub region: Option<Region>,
    pub insertion: Option<InsertionPoint>,
}

/// Direction of the copy between the original tensor and its cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyKind {
    /// `cache[v - min] = source[v]`
    Fill,
    /// `dest[v] = cache[v - min]`
    Drain,
}

/// Cache the `read_index`-th load of `block` in `memory`. Returns the
/// realized fill block.
pub fn cache_read(
    module: &mut Module,
    device: DeviceApi,
    block: NodeId,
    read_index: usize,
    memory: MemoryScope,
) -> ScheduleResult<NodeId> {
    expect_realize(module, block)?;
    let load = nth_access(module, block, read_index, AccessKind::Read)?;
    validate_access(module, load)?;
    let source = access_tensor(module, load)?;
    let source_name = module.tensor_name(source).to_string();

    let root = module.root_of(block);
    module.normalize_bodies(root);

    let body = block_body(module, block)?;
    let redirected = accesses_of_named(module, body, &source_name)
        .into_iter()
        .filter(|&a| matches!(module.kind(a), NodeKind::Load { .. }))
        .collect::<Vec<_>>();
    let mut info = CacheInfo {
        read_tensor: Some(source),
        ..CacheInfo::default()
    };
    info.region = infer_union_region(module, &redirected, root)?;
    info.insertion = Some(find_insertion_point(module, block, root, &source_name, AccessKind::Read)?);

    let (region, point) = match (info.region.take(), info.insertion) {
        (Some(region), Some(point)) => (region, point),
        _ => return Err(ScheduleError::unsupported_access("no load to cache").at(block)),
    };

    let cache = allocate_cache(module, device, source, memory, &region);
    info.alloc = Some(cache);
    info.write_tensor = Some(cache);
    let cache_name = module.tensor_name(cache).to_string();
    let (fill_nest, fill_block) =
        synthesize_copy(module, device, CopyKind::Fill, source, cache, &region, &cache_name);

    // Commit
    let mins = region.mins();
    for &access in &redirected {
        redirect_access(module, access, cache, &mins);
    }
    splice(module, point, fill_nest);

    debug!(
        "cache_read: {} -> {} ({}) region {} at {}",
        source_name, cache_name, memory, region, point
    );
    Ok(fill_block)
}

/// Route the `write_index`-th store of `block` through a new tensor in
/// `memory`. Returns the realized block that now writes the new tensor.
pub fn cache_write(
    module: &mut Module,
    device: DeviceApi,
    block: NodeId,
    write_index: usize,
    memory: MemoryScope,
) -> ScheduleResult<NodeId> {
    expect_realize(module, block)?;
    let store = nth_access(module, block, write_index, AccessKind::Write)?;
    validate_access(module, store)?;
    let dest = access_tensor(module, store)?;
    let dest_name = module.tensor_name(dest).to_string();
    let dest_buffer = module
        .buffer_of(dest)
        .map(|b| b.name.clone())
        .ok_or_else(|| {
            ScheduleError::new(
                ScheduleErrorKind::UnboundBuffer,
                format!("{} has no buffer to cache", dest_name),
            )
            .at(store)
        })?;

    let root = module.root_of(block);
    module.normalize_bodies(root);

    let body = block_body(module, block)?;
    let redirected = accesses_of_named(module, body, &dest_name);
    let mut info = CacheInfo {
        write_tensor: Some(dest),
        ..CacheInfo::default()
    };
    info.region = infer_union_region(module, &redirected, root)?;
    info.insertion = Some(find_insertion_point(module, block, root, &dest_name, AccessKind::Write)?);

    // Blocks that write the scratch tensor once the stores are redirected
    let writers = writers_of(module, block, &dest_name);
    if writers.len() != 1 {
        return Err(ScheduleError::new(
            ScheduleErrorKind::AmbiguousRewriteResult,
            format!("{} blocks would write the cache of {}, expected 1", writers.len(), dest_name),
        )
        .at(block));
    }
    let writer = writers[0];

    let (region, point) = match (info.region.take(), info.insertion) {
        (Some(region), Some(point)) => (region, point),
        _ => return Err(ScheduleError::unsupported_access("no store to cache").at(block)),
    };

    let scratch = allocate_cache(module, device, dest, memory, &region);
    info.alloc = Some(scratch);
    info.read_tensor = Some(scratch);
    let scratch_name = module.tensor_name(scratch).to_string();
    let (drain_nest, _) =
        synthesize_copy(module, device, CopyKind::Drain, dest, scratch, &region, &dest_name);

    // Commit
    let mins = region.mins();
    for &access in &redirected {
        redirect_access(module, access, scratch, &mins);
    }
    if let Some(sb) = module.schedule_block(block) {
        if let NodeKind::ScheduleBlock { name, .. } = module.kind_mut(sb) {
            *name = scratch_name.clone();
        }
    }
    splice(module, point, drain_nest);

    // Everything else sharing the destination's buffer now sees the scratch
    // buffer, including tensors declared later under those names
    let mut rebound = 0;
    if let Some(buffer) = module.tensor(scratch).buffer {
        for alias in module.tensors_with_buffer_named(&dest_buffer) {
            if module.tensor_name(alias) != dest_name {
                module.rebind_tensor(alias, buffer);
                rebound += 1;
            }
        }
        module.move_bindings(&dest_buffer, &dest_name, buffer);
    }

    debug!(
        "cache_write: {} -> {} ({}) region {} at {}, {} aliases rebound",
        dest_name, scratch_name, memory, region, point, rebound
    );
    Ok(writer)
}

fn access_tensor(module: &Module, access: NodeId) -> ScheduleResult<TensorId> {
    module.kind(access).accessed_tensor().ok_or_else(|| {
        ScheduleError::unsupported_access("access does not reference a tensor").at(access)
    })
}

fn block_body(module: &Module, block: NodeId) -> ScheduleResult<NodeId> {
    module
        .block_body(block)
        .ok_or_else(|| ScheduleError::invalid_node_kind(block, "ScheduleBlockRealize", "detached block"))
}

/// Allocate `<orig>_<scope>_temp_buffer` sized by `region` and bind it to a
/// fresh buffer in `memory`.
fn allocate_cache(
    module: &mut Module,
    device: DeviceApi,
    orig: TensorId,
    memory: MemoryScope,
    region: &Region,
) -> TensorId {
    let orig_tensor = module.tensor(orig);
    let dtype = orig_tensor.dtype;
    let base = format!("{}_{}_temp_buffer", orig_tensor.name, memory);
    let name = module.fresh_name(&base);
    let buffer_name = module.fresh_name(&format!("_{}", name));

    let mut buffer = Buffer::new(buffer_name, memory, region.extents());
    buffer.device = Some(device);
    let buffer = module.add_buffer(buffer);

    let mut tensor = Tensor::new(name, region.extents(), dtype);
    tensor.buffer = Some(buffer);
    module.declare_tensor(tensor)
}

/// Build the loop nest copying `region` between `orig` and `cache`.
/// Returns the outermost node and the realized copy block.
fn synthesize_copy(
    module: &mut Module,
    device: DeviceApi,
    kind: CopyKind,
    orig: TensorId,
    cache: TensorId,
    region: &Region,
    block_name: &str,
) -> (NodeId, NodeId) {
    let rank = region.ndims();
    let loop_vars: Vec<String> = (0..rank).map(|i| module.fresh_name(&format!("cache_ax{}", i))).collect();
    let iter_names: Vec<String> = (0..rank).map(|i| module.fresh_name(&format!("v{}", i))).collect();

    let mut b = IrBuilder::new(module).with_device(device);
    let mut iter_vars = Vec::with_capacity(rank);
    let mut iter_values = Vec::with_capacity(rank);
    let mut orig_indices = Vec::with_capacity(rank);
    let mut cache_indices = Vec::with_capacity(rank);
    for (d, dim) in region.dims.iter().enumerate() {
        iter_vars.push(IterVar::new(iter_names[d].clone(), dim.min, dim.extent()));
        let ax = b.var(&loop_vars[d]);
        iter_values.push(offset(&mut b, ax, dim.min, BinaryOp::Add));
        orig_indices.push(b.var(&iter_names[d]));
        let v = b.var(&iter_names[d]);
        cache_indices.push(offset(&mut b, v, dim.min, BinaryOp::Sub));
    }

    let store = match kind {
        CopyKind::Fill => {
            let value = b.load(orig, orig_indices);
            b.store(cache, cache_indices, value)
        }
        CopyKind::Drain => {
            let value = b.load(cache, cache_indices);
            b.store(orig, orig_indices, value)
        }
    };
    let realize = b.realize(block_name, iter_vars, iter_values, vec![store]);

    let mut nest = realize;
    for d in (0..rank).rev() {
        nest = b.for_loop(&loop_vars[d], 0, region.dims[d].extent(), vec![nest]);
    }
    (nest, realize)
}

/// `base op amount`, or `base` itself when `amount` is zero.
fn offset(b: &mut IrBuilder<'_>, base: NodeId, amount: i64, op: BinaryOp) -> NodeId {
    if amount == 0 {
        return base;
    }
    let amount = b.int(amount);
    b.binary(op, base, amount)
}

/// Point a load or store at `target`, shifting each index by `-mins[d]`.
pub(crate) fn redirect_access(module: &mut Module, access: NodeId, target: TensorId, mins: &[i64]) {
    let indices = module.kind(access).access_indices().map(<[NodeId]>::to_vec).unwrap_or_default();
    let shifted: Vec<NodeId> = indices
        .iter()
        .zip(mins)
        .map(|(&index, &min)| {
            if min == 0 {
                index
            } else {
                let amount = module.alloc(NodeKind::IntImm(min));
                module.alloc(NodeKind::Binary { op: BinaryOp::Sub, lhs: index, rhs: amount })
            }
        })
        .collect();
    for &index in &shifted {
        module.set_parent(index, Some(access));
    }
    match module.kind_mut(access) {
        NodeKind::Load { tensor, indices } | NodeKind::Store { tensor, indices, .. } => {
            *tensor = target;
            *indices = shifted;
        }
        _ => {}
    }
}

/// Substitute the target sequence with a copy holding `fragment` at the
/// insertion point.
fn splice(module: &mut Module, point: InsertionPoint, fragment: NodeId) -> NodeId {
    let mut stmts = match module.kind(point.seq) {
        NodeKind::Block { stmts } => stmts.clone(),
        _ => Vec::new(),
    };
    stmts.insert(point.pos.min(stmts.len()), fragment);
    let seq = module.alloc(NodeKind::Block { stmts });
    module.replace(point.seq, seq);
    seq
}

/// Realized blocks under `root` with iteration values whose first store
/// targets a tensor named `name`.
pub fn writers_of(module: &Module, root: NodeId, name: &str) -> Vec<NodeId> {
    module.collect(
        root,
        |id, kind| match kind {
            NodeKind::ScheduleBlockRealize { iter_values, .. } => {
                !iter_values.is_empty()
                    && module.stored_tensor(id).map_or(false, |t| module.tensor_name(t) == name)
            }
            _ => false,
        },
        false,
    )
}
