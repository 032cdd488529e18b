//! Branch/terminator resolver (C6, §4.6).
//!
//! Classifies a basic block's terminator instruction and, for branches whose
//! target isn't a plain immediate, attempts to resolve it by slicing and
//! simulating a short dataflow window (§4.5/§4.3). Grounded on
//! `original_source/src/cfg/cfg-gen.c`'s `cfg_gen$recurse_branch_insns` and
//! `dispatch_jump_imm`.
//!
//! Two deliberate departures from the original, per the redesign notes:
//! - Conditional-jump resolution asks [`cc::evaluate`] what the condition
//!   code *means* given the simulated flags, instead of the original's
//!   "simulated eflags are a superset of the tested bits" shortcut — the
//!   original's test can't distinguish "branch taken" from "branch not
//!   taken" when more flags are set than the one the `Jcc` actually reads
//!   (Open Question (b)).
//! - A resolved fallthrough target is `Option<Rva>` rather than the
//!   original's `0`-as-sentinel (Open Question (c)): a fallthrough address
//!   of literal RVA 0 is not a valid PE code address, but spelling "absent"
//!   as a real address value is still a foot-gun worth avoiding.

pub mod cc;

use crate::addr::Rva;
use crate::cfg::{BlockTag, Cfg};
use crate::decoder::{DecodedInsn, InstructionDecoder, Operand};
use crate::error::SliceError;
use crate::pe::{ImportEntry, PeImage};
use crate::sim::Simulator;
use crate::slice::{slice_flags, slice_registers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Direct(Rva),
    Import { module: String, name: String },
    Indirect(Rva),
    Unresolvable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// Unconditional jump; always falls through to `target`.
    Jump { target: Rva },
    /// Conditional jump. `fallthrough` is `None` only when the predicate was
    /// resolved and the branch is provably never/always taken (§9 Open
    /// Question (c)); the unresolved case always carries both.
    CondJump { taken: Rva, fallthrough: Option<Rva> },
    Call { target: CallTarget, return_addr: Rva },
    Return,
}

/// Classifies `insn` (assumed to be `block`'s terminator) into a
/// [`Terminator`], resolving indirect targets where possible.
pub fn classify(
    pe: &PeImage,
    decoder: &dyn InstructionDecoder,
    cfg: &Cfg,
    block: BlockTag,
    insn: &DecodedInsn,
) -> Terminator {
    use crate::decoder::InsnGroups;

    if insn.groups.contains(InsnGroups::RET) {
        return Terminator::Return;
    }

    if insn.groups.contains(InsnGroups::CALL) {
        return classify_call(pe, decoder, cfg, block, insn);
    }

    if insn.groups.contains(InsnGroups::JUMP) {
        return classify_jump(pe, decoder, cfg, block, insn);
    }

    // Not actually a terminator; callers only invoke this on instructions
    // found via the forward terminator scan, so this would indicate a
    // decoder/group-classification mismatch rather than a code path that
    // normal input reaches.
    unreachable!("classify called on a non-terminator instruction: {insn:?}")
}

fn classify_jump(
    pe: &PeImage,
    decoder: &dyn InstructionDecoder,
    cfg: &Cfg,
    block: BlockTag,
    insn: &DecodedInsn,
) -> Terminator {
    let Some(Operand::Imm(imm)) = insn.operands.first() else {
        panic!("unimplemented jump operand shape: {insn:?}");
    };
    let target = Rva::new(*imm as u64);
    let fallthrough = insn.end();

    if insn.mnemonic == zydis::Mnemonic::JMP {
        return Terminator::Jump { target };
    }

    match resolve_conditional(pe, decoder, cfg, block, insn) {
        Ok(JccOutcome::AlwaysTaken) => Terminator::CondJump { taken: target, fallthrough: None },
        Ok(JccOutcome::NeverTaken) => Terminator::CondJump { taken: fallthrough, fallthrough: None },
        Err(_) => Terminator::CondJump { taken: target, fallthrough: Some(fallthrough) },
    }
}

enum JccOutcome {
    AlwaysTaken,
    NeverTaken,
}

fn resolve_conditional(
    pe: &PeImage,
    decoder: &dyn InstructionDecoder,
    cfg: &Cfg,
    block: BlockTag,
    branch: &DecodedInsn,
) -> Result<JccOutcome, SliceError> {
    let wanted = branch.eflags_tested;
    let producers = slice_flags(pe, decoder, cfg, block, branch, wanted)?;

    let mut sim = Simulator::new();
    sim.run(&producers)?;

    if !sim.regs.flags_known() {
        return Err(SliceError::IndeterminatePredicate);
    }

    let taken = cc::evaluate(branch.mnemonic, sim.regs.get_flags()).ok_or(SliceError::IndeterminatePredicate)?;
    Ok(if taken { JccOutcome::AlwaysTaken } else { JccOutcome::NeverTaken })
}

fn classify_call(
    pe: &PeImage,
    decoder: &dyn InstructionDecoder,
    cfg: &Cfg,
    block: BlockTag,
    insn: &DecodedInsn,
) -> Terminator {
    let return_addr = insn.end();

    let target = match insn.operands.first() {
        Some(Operand::Imm(imm)) => CallTarget::Direct(Rva::new(*imm as u64)),

        Some(Operand::Mem(mem)) if mem.is_rip_relative => {
            let iat_addr = Rva::new(insn.end().value().wrapping_add(mem.disp as u64));
            match import_at(pe, iat_addr) {
                Some(entry) => CallTarget::Import { module: entry.module.clone(), name: entry.name.clone() },
                None => CallTarget::Unresolvable,
            }
        }

        Some(Operand::Reg(_)) => resolve_indirect_call(pe, decoder, cfg, block, insn)
            .map(CallTarget::Indirect)
            .unwrap_or(CallTarget::Unresolvable),

        _ => CallTarget::Unresolvable,
    };

    Terminator::Call { target, return_addr }
}

fn import_at<'a>(pe: &'a PeImage, thunk_rva: Rva) -> Option<&'a ImportEntry> {
    pe.import_at_thunk(thunk_rva)
}

fn resolve_indirect_call(
    pe: &PeImage,
    decoder: &dyn InstructionDecoder,
    cfg: &Cfg,
    block: BlockTag,
    branch: &DecodedInsn,
) -> Result<Rva, SliceError> {
    let producers = slice_registers(pe, decoder, cfg, block, branch)?;

    let mut sim = Simulator::new();
    sim.run(&producers)?;

    let Some(Operand::Reg(reg)) = branch.operands.first() else {
        return Err(SliceError::IndeterminateRegister(zydis::Register::NONE));
    };

    let (value, _) = sim.regs.read_determinate(*reg)?;
    Ok(Rva::new(value))
}

