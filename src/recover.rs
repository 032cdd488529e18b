//! Recovery driver (C7, §4.6, §9).
//!
//! Grounded on `original_source/src/cfg/cfg-gen.c`'s
//! `cfg_gen$recurse_branch_insns`/`cfg_gen$recurse_function_block`, with the
//! call-graph and intra-function recursion both flattened onto a single
//! explicit work list (§9's bounded-recursion redesign) instead of the
//! original's native C recursion, which has no bound other than the host
//! stack.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, trace};

use crate::addr::Rva;
use crate::cfg::{BlockTag, Cfg, FnTag};
use crate::consts::{MAX_SCAN_PAGES, SCAN_PAGE_SIZE};
use crate::decoder::{DecodedInsn, InsnGroups, InstructionDecoder};
use crate::error::RecoveryError;
use crate::pe::PeImage;
use crate::resolve::{self, CallTarget, Terminator};

/// The result of a completed recovery run.
pub struct Recovery {
    pub cfg: Cfg,
}

struct WorkItem {
    func: FnTag,
    block: BlockTag,
    start: Rva,
}

/// Recovers the CFG reachable from `entry_points`. Each entry point is
/// treated as a distinct function; entry points that collide with an
/// address reached by a call elsewhere are merged automatically since both
/// paths resolve to the same function tag through `fn_entries`.
pub fn recover(
    pe: &PeImage,
    decoder: &dyn InstructionDecoder,
    entry_points: &[Rva],
) -> Result<Recovery, RecoveryError> {
    let mut cfg = Cfg::new();
    let mut fn_entries: HashMap<Rva, FnTag> = HashMap::new();
    let mut work: VecDeque<WorkItem> = VecDeque::new();

    for &entry in entry_points {
        if fn_entries.contains_key(&entry) {
            continue;
        }
        let (func, block) = cfg.add_function_block(entry);
        fn_entries.insert(entry, func);
        work.push_back(WorkItem { func, block, start: entry });
    }

    while let Some(item) = work.pop_front() {
        process_block(pe, decoder, &mut cfg, &mut fn_entries, &mut work, item)?;
    }

    Ok(Recovery { cfg })
}

fn process_block(
    pe: &PeImage,
    decoder: &dyn InstructionDecoder,
    cfg: &mut Cfg,
    fn_entries: &mut HashMap<Rva, FnTag>,
    work: &mut VecDeque<WorkItem>,
    item: WorkItem,
) -> Result<(), RecoveryError> {
    let WorkItem { func, block, start } = item;
    trace!(?start, "scanning block for terminator");

    let terminator_insn = find_next_terminator(pe, decoder, start)?;
    cfg.set_basic_block_end(block, terminator_insn.end())?;

    match resolve::classify(pe, decoder, cfg, block, &terminator_insn) {
        Terminator::Jump { target } => {
            link_target(cfg, work, func, block, target)?;
        }
        Terminator::CondJump { taken, fallthrough } => {
            link_target(cfg, work, func, block, taken)?;
            if let Some(fallthrough) = fallthrough {
                link_target(cfg, work, func, block, fallthrough)?;
            }
        }
        Terminator::Call { target, return_addr } => {
            if let CallTarget::Direct(callee_entry) | CallTarget::Indirect(callee_entry) = target {
                link_function(cfg, fn_entries, work, func, callee_entry);
            }
            link_target(cfg, work, func, block, return_addr)?;
        }
        Terminator::Return => {
            debug!(?start, "function returns here");
        }
    }

    Ok(())
}

/// Connects `pred` to the block starting at (or containing) `target`,
/// splitting an already-visited block if `target` lands mid-block, or
/// queuing a fresh one otherwise. Mirrors the back-reference handling in
/// `dispatch_jump_imm`'s final loop.
fn link_target(
    cfg: &mut Cfg,
    work: &mut VecDeque<WorkItem>,
    func: FnTag,
    pred: BlockTag,
    target: Rva,
) -> Result<(), RecoveryError> {
    if let Some(existing) = cfg.block_at(target) {
        let bb = cfg.get_basic_block(existing)?;
        if bb.start == target {
            cfg.connect_basic_blocks(pred, existing);
        } else {
            // If the block being split is `pred` itself (a self-referential
            // back edge, e.g. a tight loop whose own terminator jumps into
            // its own body), the split renames `pred`'s tag to the
            // truncated head: the terminator — and hence the real edge
            // source — ends up owned by `tail`, not by `pred`.
            let splitting_self = existing == pred;
            let tail = cfg.split_basic_block(existing, target)?;
            let source = if splitting_self { tail } else { pred };
            cfg.connect_basic_blocks(source, tail);
        }
        return Ok(());
    }

    let new_block = cfg.add_basic_block_succ(pred, func, target);
    work.push_back(WorkItem { func, block: new_block, start: target });
    Ok(())
}

/// Resolves `entry` to a function, creating a new one (and a call-graph edge
/// from `caller`) if this is the first time it's been reached.
fn link_function(
    cfg: &mut Cfg,
    fn_entries: &mut HashMap<Rva, FnTag>,
    work: &mut VecDeque<WorkItem>,
    caller: FnTag,
    entry: Rva,
) {
    if fn_entries.contains_key(&entry) {
        return;
    }

    let (callee, block) = cfg.add_function_block_succ(caller, entry);
    fn_entries.insert(entry, callee);
    work.push_back(WorkItem { func: callee, block, start: entry });
}

/// Forward-scans from `start` until a jump/call/ret instruction is found,
/// reading up to [`MAX_SCAN_PAGES`] chunks of [`SCAN_PAGE_SIZE`] bytes.
/// Mirrors `find_next_branch`'s retry loop.
fn find_next_terminator(pe: &PeImage, decoder: &dyn InstructionDecoder, start: Rva) -> Result<DecodedInsn, RecoveryError> {
    let mut addr = start;

    for _ in 0..MAX_SCAN_PAGES {
        let bytes = pe.read_bytes(addr, SCAN_PAGE_SIZE)?;
        if bytes.is_empty() {
            break;
        }

        let insns = decoder.disasm(bytes, addr);
        if insns.is_empty() {
            return Err(RecoveryError::EmptyDisassembly(bytes.len(), addr));
        }

        if let Some(terminator) = insns.iter().find(|i| is_terminator(i)) {
            return Ok(terminator.clone());
        }

        addr = insns.last().expect("checked non-empty above").end();
    }

    Err(RecoveryError::NoTerminatorFound { scanned_pages: MAX_SCAN_PAGES, start })
}

fn is_terminator(insn: &DecodedInsn) -> bool {
    insn.groups.intersects(InsnGroups::JUMP | InsnGroups::CALL | InsnGroups::RET)
}
