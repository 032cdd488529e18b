//! Partial CPU simulator (C3, §4.3).
//!
//! Runs a short instruction window against a [`RegisterFile`] to resolve an
//! opaque predicate or an indirect branch target. Grounded on
//! `original_source/src/cfg/cfg-sim.c`'s `cfg_sim$simulate_insns`: RIP is
//! advanced *before* the handler for each instruction runs (so a handler that
//! reads RIP — e.g. a `lea rax, [rip + disp]`) sees the address of the next
//! instruction, matching real CPU semantics.

mod exec;
pub mod semantics;

use crate::decoder::DecodedInsn;
use crate::error::SliceError;
use crate::register::RegisterFile;

/// A partial CPU state plus the handler dispatch that advances it one
/// instruction at a time.
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    pub regs: RegisterFile,
}

impl Simulator {
    pub fn new() -> Self {
        Self { regs: RegisterFile::new() }
    }

    /// Seeds the simulator's register file with values known at the start of
    /// the slice (from the dataflow slicer's producer resolution, §4.5).
    pub fn with_regs(regs: RegisterFile) -> Self {
        Self { regs }
    }

    /// Executes one instruction, returning an error without mutating
    /// anything the handler hasn't already committed to if the instruction
    /// can't be simulated (unhandled opcode, indeterminate operand).
    pub fn step(&mut self, insn: &DecodedInsn) -> Result<(), SliceError> {
        self.regs.set_pc(insn.end().value());
        exec::dispatch(&mut self.regs, insn)
    }

    /// Runs every instruction in `insns` in order, stopping at the first
    /// failure.
    pub fn run(&mut self, insns: &[DecodedInsn]) -> Result<(), SliceError> {
        for insn in insns {
            self.step(insn)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Rva;
    use crate::decoder::{DecodedInsn, InsnGroups, Operand};
    use crate::register::Eflags;

    fn insn(mnemonic: zydis::Mnemonic, operands: Vec<Operand>) -> DecodedInsn {
        DecodedInsn {
            mnemonic,
            address: Rva::new(0x1000),
            size: 3,
            operands,
            eflags_tested: Eflags::empty(),
            eflags_set: Eflags::empty(),
            eflags_modified: Eflags::empty(),
            groups: InsnGroups::empty(),
        }
    }

    #[test]
    fn mov_reg_imm_writes_register() {
        let mut sim = Simulator::new();
        let mov = insn(zydis::Mnemonic::MOV, vec![Operand::Reg(zydis::Register::EAX), Operand::Imm(42)]);
        sim.step(&mov).unwrap();
        assert_eq!(sim.regs.read_any(zydis::Register::EAX).0, 42);
    }

    #[test]
    fn add_reg_imm_updates_flags_and_register() {
        let mut sim = Simulator::new();
        sim.regs.write(zydis::Register::EAX, 0);
        let add = insn(zydis::Mnemonic::ADD, vec![Operand::Reg(zydis::Register::EAX), Operand::Imm(1)]);
        sim.step(&add).unwrap();
        assert_eq!(sim.regs.read_any(zydis::Register::EAX).0, 1);
        assert!(!sim.regs.get_flags().contains(Eflags::ZF));
    }

    #[test]
    fn cmp_reg_reg_sets_zf_when_equal() {
        let mut sim = Simulator::new();
        sim.regs.write(zydis::Register::EAX, 7);
        sim.regs.write(zydis::Register::EBX, 7);
        let cmp = insn(zydis::Mnemonic::CMP, vec![Operand::Reg(zydis::Register::EAX), Operand::Reg(zydis::Register::EBX)]);
        sim.step(&cmp).unwrap();
        assert!(sim.regs.get_flags().contains(Eflags::ZF));
    }

    #[test]
    fn unhandled_opcode_is_a_slice_error() {
        let mut sim = Simulator::new();
        let cpuid = insn(zydis::Mnemonic::CPUID, vec![]);
        assert!(matches!(sim.step(&cpuid), Err(SliceError::UnhandledOpcode(_))));
    }
}
