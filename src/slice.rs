//! Backward dataflow slicer (C5, §4.5).
//!
//! Grounded on `original_source/src/cfg/cfg-gen.c`'s `trace_reg_dataflow` and
//! `trace_flag_dataflow`: scan a block backward from a dependent instruction,
//! maintaining a working set of registers the dependent instruction still
//! needs a producer for, and collect every instruction that writes one of
//! them. The slice succeeds only if the working set empties out before
//! reaching the top of the block; if it doesn't, the original gives up where
//! this engine instead recurses into predecessor blocks, bounded by
//! [`crate::consts::MAX_SLICE_DEPTH`] (§9's bounded-recursion redesign,
//! since the C original has no equivalent cross-block fallback).

use std::collections::HashSet;

use crate::addr::Rva;
use crate::cfg::{BlockTag, Cfg};
use crate::consts::MAX_SLICE_DEPTH;
use crate::decoder::{DecodedInsn, InstructionDecoder, Operand};
use crate::error::{RecoveryError, SliceError};
use crate::pe::PeImage;
use crate::register::Eflags;

/// Decodes every instruction in `block` starting from its start address, up
/// to (but not including) `before` if given, else to the block's end.
/// Mirrors `read_insns_at_block`/`read_insns_at_block_before`.
pub fn read_block_insns(
    pe: &PeImage,
    decoder: &dyn InstructionDecoder,
    cfg: &Cfg,
    block: BlockTag,
    before: Option<Rva>,
) -> Result<Vec<DecodedInsn>, RecoveryError> {
    let bb = cfg.get_basic_block(block)?;
    let limit = before.unwrap_or(bb.start);
    if let Some(before) = before {
        if before.value() < bb.start.value() {
            return Err(RecoveryError::BlockRangeViolation {
                addr: before,
                block_start: bb.start,
                block_end: bb.end.unwrap_or(bb.start),
            });
        }
    }
    let read_len = (limit.value() - bb.start.value()) as usize;
    if before.is_some() && read_len == 0 {
        return Ok(Vec::new());
    }
    let len = before.map(|_| read_len).or_else(|| bb.size().map(|s| s as usize)).unwrap_or(0);
    if len == 0 {
        return Ok(Vec::new());
    }

    let bytes = pe.read_bytes(bb.start, len)?;
    Ok(decoder.disasm(bytes, bb.start))
}

struct SliceState<'a> {
    pe: &'a PeImage,
    decoder: &'a dyn InstructionDecoder,
    cfg: &'a Cfg,
}

/// Traces backward from `dependent`'s first register operand through `block`
/// (and, if needed, its predecessors) collecting every producer instruction,
/// in program order.
pub fn slice_registers(
    pe: &PeImage,
    decoder: &dyn InstructionDecoder,
    cfg: &Cfg,
    block: BlockTag,
    dependent: &DecodedInsn,
) -> Result<Vec<DecodedInsn>, SliceError> {
    let Some(Operand::Reg(seed)) = dependent.operands.first() else {
        return Err(SliceError::IndeterminateRegister(zydis::Register::NONE));
    };
    let state = SliceState { pe, decoder, cfg };
    let mut wanted = HashSet::new();
    wanted.insert(*seed);
    slice_registers_from(&state, block, dependent.address, &mut wanted, 0)
}

fn slice_registers_from(
    state: &SliceState<'_>,
    block: BlockTag,
    before: Rva,
    wanted: &mut HashSet<zydis::Register>,
    depth: u32,
) -> Result<Vec<DecodedInsn>, SliceError> {
    if depth > MAX_SLICE_DEPTH {
        return Err(SliceError::DepthExceeded);
    }

    let insns = read_block_insns(state.pe, state.decoder, state.cfg, block, Some(before))
        .map_err(|_| SliceError::IndeterminateMemory)?;

    let mut collected = Vec::new();
    for insn in insns.iter().rev() {
        let dst = insn.operands.first();
        let Some(Operand::Reg(dst_reg)) = dst else { continue };
        if !wanted.contains(dst_reg) {
            continue;
        }

        if is_load(insn) {
            wanted.remove(dst_reg);
        }

        for src in insn.regs_read() {
            wanted.insert(src);
        }

        collected.insert(0, insn.clone());
    }

    if wanted.is_empty() {
        return Ok(collected);
    }

    let preds = state.cfg.block_preds(block);
    if preds.is_empty() {
        return Err(SliceError::DepthExceeded);
    }

    let mut merged = Vec::new();
    for pred in preds {
        let pred_bb = state
            .cfg
            .get_basic_block(pred)
            .map_err(|_| SliceError::DepthExceeded)?;
        let pred_end = pred_bb.end.unwrap_or(pred_bb.start);
        let mut pred_wanted = wanted.clone();
        let mut pred_insns = slice_registers_from(state, pred, pred_end, &mut pred_wanted, depth + 1)?;
        merged.append(&mut pred_insns);
    }
    merged.extend(collected);
    Ok(merged)
}

/// MOV/LEA-family loads break a register's dataflow chain (§4.5): once a
/// register is overwritten by a load, nothing earlier in program order
/// produced the value the dependent instruction sees.
fn is_load(insn: &DecodedInsn) -> bool {
    matches!(insn.mnemonic, zydis::Mnemonic::MOV | zydis::Mnemonic::MOVABS | zydis::Mnemonic::LEA | zydis::Mnemonic::MOVSXD)
}

/// Finds the nearest preceding instruction in `block` whose tested/set/
/// modified eflags are a superset of `wanted`, then slices that
/// instruction's own register dataflow. This is the one piece of
/// `trace_flag_dataflow` the redesign keeps as-is (producer search); what
/// changes is how the *result* is interpreted by the resolver (§9 Open
/// Question (b)).
pub fn slice_flags(
    pe: &PeImage,
    decoder: &dyn InstructionDecoder,
    cfg: &Cfg,
    block: BlockTag,
    branch: &DecodedInsn,
    wanted: Eflags,
) -> Result<Vec<DecodedInsn>, SliceError> {
    let insns = read_block_insns(pe, decoder, cfg, block, Some(branch.address))
        .map_err(|_| SliceError::IndeterminatePredicate)?;

    let producer = insns
        .iter()
        .rev()
        .find(|insn| {
            let touched = insn.eflags_tested | insn.eflags_set | insn.eflags_modified;
            touched.contains(wanted)
        })
        .cloned();

    let Some(producer) = producer else {
        return Err(SliceError::IndeterminatePredicate);
    };

    if matches!(producer.operands.first(), Some(Operand::Reg(_))) {
        slice_registers(pe, decoder, cfg, block, &producer)
    } else {
        Ok(vec![producer])
    }
}
