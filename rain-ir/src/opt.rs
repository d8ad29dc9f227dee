use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::arith;
use crate::error::IrError;
use crate::module::{Function, InstKind, Module, Terminator};
use crate::value::{BlockId, FuncId, InstId, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OptStats {
    pub folded: usize,
    pub removed_insts: usize,
    pub removed_blocks: usize,
}

pub fn optimize_module(module: &mut Module) -> Result<OptStats, IrError> {
    let mut total = OptStats::default();
    for id in module.function_ids() {
        let stats = optimize_function(module, id)?;
        total.folded += stats.folded;
        total.removed_insts += stats.removed_insts;
        total.removed_blocks += stats.removed_blocks;
    }
    debug!(
        folded = total.folded,
        removed_insts = total.removed_insts,
        removed_blocks = total.removed_blocks,
        "optimized module"
    );
    Ok(total)
}

pub fn optimize_function(module: &mut Module, id: FuncId) -> Result<OptStats, IrError> {
    let mut stats = OptStats::default();
    if module.function(id)?.is_declaration() {
        return Ok(stats);
    }
    // Each pass is local; iterate so folds feed branch simplification and
    // the removal passes.
    for _ in 0..16 {
        let mut changed = false;
        changed |= fold_constants(module, id, &mut stats)?;
        changed |= fold_branches(module, id)?;
        changed |= remove_unreachable_blocks(module.function_mut(id)?, &mut stats);
        changed |= remove_dead_insts(module.function_mut(id)?, &mut stats);
        if !changed {
            break;
        }
    }
    Ok(stats)
}

fn fold_constants(module: &mut Module, id: FuncId, stats: &mut OptStats) -> Result<bool, IrError> {
    let mut replacements: HashMap<InstId, Value> = HashMap::new();
    let mut folded_constants = Vec::new();
    {
        let function = module.function(id)?;
        let scalar = |v: &Value| module.value_constant(*v).and_then(arith::scalar_of);
        for (_, inst) in function.placed_insts() {
            let Some(data) = function.inst(inst) else { continue };
            let folded = match &data.kind {
                InstKind::Binary { op, lhs, rhs } => match (scalar(lhs), scalar(rhs)) {
                    (Some(a), Some(b)) => arith::binary(*op, &a, &b).ok(),
                    _ => None,
                },
                InstKind::ICmp { pred, lhs, rhs } => match (scalar(lhs), scalar(rhs)) {
                    (Some(a), Some(b)) => arith::icmp(*pred, &a, &b).ok(),
                    _ => None,
                },
                InstKind::FCmp { pred, lhs, rhs } => match (scalar(lhs), scalar(rhs)) {
                    (Some(a), Some(b)) => arith::fcmp(*pred, &a, &b).ok(),
                    _ => None,
                },
                InstKind::Cast { op, value } => scalar(value).and_then(|v| arith::cast(*op, &v, &data.ty).ok()),
                InstKind::Phi { incoming } => {
                    let mut sources = incoming
                        .iter()
                        .map(|(v, _)| *v)
                        .filter(|v| *v != Value::Inst(inst));
                    if let Some(first) = sources.next() {
                        if sources.all(|v| v == first) {
                            replacements.insert(inst, first);
                        }
                    }
                    None
                }
                _ => None,
            };
            if let Some(constant) = folded.as_ref().and_then(arith::constant_of) {
                folded_constants.push((inst, constant));
            }
        }
    }
    for (inst, constant) in folded_constants {
        let value = module.const_value(constant);
        replacements.insert(inst, value);
    }
    if replacements.is_empty() {
        return Ok(false);
    }
    stats.folded += replacements.len();

    let function = module.function_mut(id)?;
    let resolve = |mut v: Value| {
        // Chains of replaced phis resolve to their final source.
        let mut hops = 0;
        while let Value::Inst(i) = v {
            match replacements.get(&i) {
                Some(next) if hops < replacements.len() => {
                    v = *next;
                    hops += 1;
                }
                _ => break,
            }
        }
        v
    };
    for data in &mut function.insts {
        for operand in data.kind.operands_mut() {
            *operand = resolve(*operand);
        }
    }
    for block in &mut function.blocks {
        if let Some(term) = &mut block.terminator {
            for operand in term.operands_mut() {
                *operand = resolve(*operand);
            }
        }
        block.insts.retain(|i| !replacements.contains_key(i));
    }
    Ok(true)
}

fn fold_branches(module: &mut Module, id: FuncId) -> Result<bool, IrError> {
    let mut rewrites = Vec::new();
    {
        let function = module.function(id)?;
        for (index, block) in function.blocks.iter().enumerate() {
            let Some(Terminator::CondBr {
                cond,
                then_block,
                else_block,
            }) = &block.terminator
            else {
                continue;
            };
            let Some(taken) = module.value_constant(*cond).and_then(|c| c.as_i64()) else {
                continue;
            };
            let (keep, drop) = if taken != 0 {
                (*then_block, *else_block)
            } else {
                (*else_block, *then_block)
            };
            rewrites.push((BlockId(index as u32), keep, drop));
        }
    }
    if rewrites.is_empty() {
        return Ok(false);
    }
    let function = module.function_mut(id)?;
    for (from, keep, drop) in rewrites {
        function.blocks[from.index()].terminator = Some(Terminator::Br(keep));
        if keep != drop {
            remove_phi_edges(function, drop, |pred| pred == from);
        }
    }
    Ok(true)
}

fn remove_phi_edges(function: &mut Function, block: BlockId, mut dead: impl FnMut(BlockId) -> bool) {
    let Some(data) = function.blocks.get(block.index()) else { return };
    for inst in data.insts.clone() {
        if let Some(InstKind::Phi { incoming }) = function.insts.get_mut(inst.index()).map(|d| &mut d.kind) {
            incoming.retain(|(_, pred)| !dead(*pred));
        }
    }
}

fn remove_unreachable_blocks(function: &mut Function, stats: &mut OptStats) -> bool {
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::from([BlockId(0)]);
    while let Some(block) = queue.pop_front() {
        if !reachable.insert(block) {
            continue;
        }
        if let Some(term) = function.block(block).and_then(|b| b.terminator.as_ref()) {
            queue.extend(term.successors());
        }
    }
    if reachable.len() == function.blocks.len() {
        return false;
    }

    let total = function.blocks.len();
    let mut remap = HashMap::new();
    let mut kept = Vec::new();
    for (index, block) in std::mem::take(&mut function.blocks).into_iter().enumerate() {
        let old = BlockId(index as u32);
        if reachable.contains(&old) {
            remap.insert(old, BlockId(kept.len() as u32));
            kept.push(block);
        }
    }
    stats.removed_blocks += total - kept.len();
    function.blocks = kept;
    let moved = |b: &BlockId| remap.get(b).copied().unwrap_or(*b);

    for block in &mut function.blocks {
        if let Some(term) = &mut block.terminator {
            match term {
                Terminator::Br(target) => *target = moved(target),
                Terminator::CondBr {
                    then_block,
                    else_block,
                    ..
                } => {
                    *then_block = moved(then_block);
                    *else_block = moved(else_block);
                }
                Terminator::Ret(_) | Terminator::Unreachable => {}
            }
        }
    }
    let placed: Vec<InstId> = function.blocks.iter().flat_map(|b| b.insts.clone()).collect();
    for inst in placed {
        if let Some(InstKind::Phi { incoming }) = function.insts.get_mut(inst.index()).map(|d| &mut d.kind) {
            incoming.retain(|(_, pred)| remap.contains_key(pred));
            for (_, pred) in incoming.iter_mut() {
                *pred = moved(pred);
            }
        }
    }
    true
}

fn remove_dead_insts(function: &mut Function, stats: &mut OptStats) -> bool {
    let mut changed = false;
    loop {
        let mut used = HashSet::new();
        for (_, inst) in function.placed_insts() {
            if let Some(data) = function.inst(inst) {
                used.extend(data.kind.operands());
            }
        }
        for block in &function.blocks {
            if let Some(term) = &block.terminator {
                used.extend(term.operands());
            }
        }
        let insts = &function.insts;
        let mut removed = 0;
        for block in &mut function.blocks {
            let before = block.insts.len();
            block.insts.retain(|i| {
                used.contains(&Value::Inst(*i))
                    || insts.get(i.index()).is_some_and(|d| d.kind.has_side_effects())
            });
            removed += before - block.insts.len();
        }
        if removed == 0 {
            return changed;
        }
        stats.removed_insts += removed;
        changed = true;
    }
}
