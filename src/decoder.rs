//! Instruction decoder wrapper (external collaborator, §6).
//!
//! Wraps the `zydis` x86/x86-64 decoder behind a small trait so the core
//! never names `zydis` types directly, mirroring the teacher's own habit of
//! putting `fuel_asm`/`fuel_tx` wire types behind crate-local newtypes
//! (`Opcode`, `Instruction`) rather than threading a third-party crate's
//! types through every module.
//!
//! [`DecodedInsn`] owns all of its fields. That ownership *is* the deep copy
//! the dataflow slicer (§4.5/§9) needs to retain instructions past the
//! lifetime of the decoder's own scratch buffers — no hand-rolled
//! `memcpy`/`memmove` hook is needed, unlike `original_source`'s
//! `cs_malloc`-backed `cs_insn` detail records.

use crate::addr::Rva;
use crate::register::Eflags;
use bitflags::bitflags;

bitflags! {
    /// The decoder-reported instruction groups the resolver cares about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InsnGroups: u8 {
        const JUMP = 1 << 0;
        const CALL = 1 << 1;
        const RET  = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Reg(zydis::Register),
    Imm(i64),
    Mem(MemOperand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOperand {
    pub base: Option<zydis::Register>,
    pub index: Option<zydis::Register>,
    pub scale: u8,
    pub disp: i64,
    pub is_rip_relative: bool,
    pub is_gs_relative: bool,
}

/// Coarse operand-kind tuple the simulator dispatches on (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandShape {
    None,
    Reg,
    Imm,
    Mem,
    RegReg,
    RegImm,
    RegMem,
    MemReg,
    MemImm,
    Unsupported,
}

/// A decoded instruction, independent of the decoder's own lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInsn {
    pub mnemonic: zydis::Mnemonic,
    pub address: Rva,
    pub size: u8,
    pub operands: Vec<Operand>,
    pub eflags_tested: Eflags,
    pub eflags_set: Eflags,
    pub eflags_modified: Eflags,
    pub groups: InsnGroups,
}

impl DecodedInsn {
    pub fn end(&self) -> Rva {
        self.address + self.size as u64
    }

    pub fn operand_shape(&self) -> OperandShape {
        match (self.operands.first(), self.operands.get(1)) {
            (None, _) => OperandShape::None,
            (Some(Operand::Reg(_)), None) => OperandShape::Reg,
            (Some(Operand::Imm(_)), None) => OperandShape::Imm,
            (Some(Operand::Mem(_)), None) => OperandShape::Mem,
            (Some(Operand::Reg(_)), Some(Operand::Reg(_))) => OperandShape::RegReg,
            (Some(Operand::Reg(_)), Some(Operand::Imm(_))) => OperandShape::RegImm,
            (Some(Operand::Reg(_)), Some(Operand::Mem(_))) => OperandShape::RegMem,
            (Some(Operand::Mem(_)), Some(Operand::Reg(_))) => OperandShape::MemReg,
            (Some(Operand::Mem(_)), Some(Operand::Imm(_))) => OperandShape::MemImm,
            _ => OperandShape::Unsupported,
        }
    }

    /// Registers read by this instruction (for dataflow slicing, §4.5).
    pub fn regs_read(&self) -> Vec<zydis::Register> {
        let mut out = Vec::new();
        match self.operands.as_slice() {
            [Operand::Reg(_dst)] => {}
            [Operand::Reg(_dst), Operand::Reg(src)] => out.push(*src),
            [Operand::Reg(_dst), Operand::Mem(m)] | [Operand::Mem(m), Operand::Reg(_dst)] => {
                out.extend(m.base);
                out.extend(m.index);
            }
            [Operand::Reg(dst)] if self.is_unary_rmw() => out.push(*dst),
            _ => {}
        }
        if self.is_unary_rmw() {
            if let Some(Operand::Reg(r)) = self.operands.first() {
                out.push(*r);
            }
        }
        out.dedup();
        out
    }

    /// Registers written by this instruction.
    pub fn regs_written(&self) -> Vec<zydis::Register> {
        match self.operands.first() {
            Some(Operand::Reg(r)) => vec![*r],
            _ => Vec::new(),
        }
    }

    fn is_unary_rmw(&self) -> bool {
        use zydis::Mnemonic::*;
        matches!(self.mnemonic, INC | DEC | NOT | NEG)
    }
}

pub trait InstructionDecoder {
    /// Decodes a byte buffer starting at `base_rva`, yielding every
    /// instruction found until the buffer is exhausted or decoding fails.
    fn disasm(&self, bytes: &[u8], base_rva: Rva) -> Vec<DecodedInsn>;
}

/// `zydis`-backed implementation of [`InstructionDecoder`].
pub struct ZydisDecoder {
    inner: zydis::Decoder,
}

impl ZydisDecoder {
    pub fn new_amd64() -> Self {
        Self {
            inner: zydis::Decoder::new(zydis::MachineMode::LONG_64, zydis::AddressWidth::_64)
                .expect("zydis decoder construction for amd64 is infallible"),
        }
    }
}

impl InstructionDecoder for ZydisDecoder {
    fn disasm(&self, bytes: &[u8], base_rva: Rva) -> Vec<DecodedInsn> {
        let mut out = Vec::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            let addr = base_rva + offset as u64;
            match self.inner.decode_first::<zydis::VisibleOperands>(&bytes[offset..]) {
                Ok(Some(insn)) => {
                    let decoded = translate(&insn, addr);
                    offset += decoded.size as usize;
                    out.push(decoded);
                }
                _ => break,
            }
        }

        out
    }
}

fn translate(insn: &zydis::DecodedInstruction<zydis::VisibleOperands>, address: Rva) -> DecodedInsn {
    let operands = insn
        .operands
        .iter()
        .filter(|op| op.visibility == zydis::OperandVisibility::EXPLICIT)
        .map(translate_operand)
        .collect();

    let mut groups = InsnGroups::empty();
    if insn.meta.category == zydis::InstructionCategory::COND_BR || insn.meta.category == zydis::InstructionCategory::UNCOND_BR {
        groups |= InsnGroups::JUMP;
    }
    if insn.meta.category == zydis::InstructionCategory::CALL {
        groups |= InsnGroups::CALL;
    }
    if insn.meta.category == zydis::InstructionCategory::RET {
        groups |= InsnGroups::RET;
    }

    DecodedInsn {
        mnemonic: insn.mnemonic,
        address,
        size: insn.length,
        operands,
        eflags_tested: eflags_from_action(insn, zydis::CPUFlagAction::TESTED),
        eflags_set: eflags_from_action(insn, zydis::CPUFlagAction::SET_1),
        eflags_modified: eflags_from_action(insn, zydis::CPUFlagAction::MODIFIED),
        groups,
    }
}

fn translate_operand(op: &zydis::DecodedOperand) -> Operand {
    match op.ty {
        zydis::OperandType::REGISTER => Operand::Reg(op.reg.value),
        zydis::OperandType::IMMEDIATE => Operand::Imm(op.imm.value.signed),
        zydis::OperandType::MEMORY => Operand::Mem(MemOperand {
            base: non_invalid(op.mem.base),
            index: non_invalid(op.mem.index),
            scale: op.mem.scale,
            disp: op.mem.disp.value,
            is_rip_relative: op.mem.base == zydis::Register::RIP,
            is_gs_relative: op.mem.segment == zydis::Register::GS,
        }),
        _ => Operand::None,
    }
}

fn non_invalid(reg: zydis::Register) -> Option<zydis::Register> {
    (reg != zydis::Register::NONE).then_some(reg)
}

fn eflags_from_action(
    insn: &zydis::DecodedInstruction<zydis::VisibleOperands>,
    action: zydis::CPUFlagAction,
) -> Eflags {
    let mut out = Eflags::empty();
    let Some(accessed) = insn.cpu_flags.as_ref() else {
        return out;
    };
    for (flag, flag_action) in accessed.iter() {
        if *flag_action == action {
            out |= eflags_bit(*flag);
        }
    }
    out
}

fn eflags_bit(flag: zydis::CPUFlag) -> Eflags {
    use zydis::CPUFlag::*;
    match flag {
        CF => Eflags::CF,
        PF => Eflags::PF,
        AF => Eflags::AF,
        ZF => Eflags::ZF,
        SF => Eflags::SF,
        TF => Eflags::TF,
        IF => Eflags::IF,
        DF => Eflags::DF,
        OF => Eflags::OF,
        _ => Eflags::empty(),
    }
}
