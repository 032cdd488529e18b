//! Instruction handlers (C2, §4.2).
//!
//! Dispatch is keyed by `(Mnemonic, OperandShape)`, generalizing
//! `original_source/src/cfg/insns/reg_imm.c`'s `sim_dispatch$binop_reg_imm`
//! table (and its `reg_reg`/`reg_mem` siblings) into a single match instead
//! of one dispatch table per operand shape. Only the subset of the ISA the
//! slicer/resolver actually needs to track register and flag producers is
//! implemented; anything else falls through to
//! [`SliceError::UnhandledOpcode`], which the slicer treats as "give up on
//! this producer", not a crash.

use super::semantics::*;
use crate::decoder::{DecodedInsn, Operand};
use crate::error::SliceError;
use crate::register::{Reg, RegWidth, RegisterFile};
use zydis::Mnemonic::*;

pub fn dispatch(regs: &mut RegisterFile, insn: &DecodedInsn) -> Result<(), SliceError> {
    match (insn.mnemonic, insn.operands.as_slice()) {
        (NOP, _) => Ok(()),

        (MOV | MOVABS, [Operand::Reg(dst), Operand::Imm(imm)]) => {
            write_imm(regs, *dst, *imm);
            Ok(())
        }
        (MOV, [Operand::Reg(dst), Operand::Reg(src)]) => {
            let (v, _) = read_reg(regs, *src)?;
            regs.write(*dst, v);
            Ok(())
        }
        (MOV, [Operand::Reg(dst), Operand::Mem(mem)]) => {
            let _ = resolve_memop(regs, mem)?;
            // The loaded value itself is unknowable without reading the
            // target binary's data section; the destination becomes
            // indeterminate rather than silently wrong.
            invalidate(regs, *dst);
            Ok(())
        }
        (MOV, [Operand::Mem(mem), Operand::Reg(_) | Operand::Imm(_)]) => {
            resolve_memop(regs, mem).map(|_| ())
        }

        (MOVSXD, [Operand::Reg(dst), Operand::Reg(src)]) => {
            let (v, src_width) = read_reg(regs, *src)?;
            let sign_extended = sign_extend(v, src_width);
            regs.write(*dst, sign_extended);
            Ok(())
        }

        (LEA, [Operand::Reg(dst), Operand::Mem(mem)]) => {
            let addr = resolve_memop(regs, mem)?;
            regs.write(*dst, addr);
            Ok(())
        }

        (ADD, [Operand::Reg(dst), Operand::Imm(imm)]) => binop_reg_imm(regs, *dst, *imm, false),
        (ADD, [Operand::Reg(dst), Operand::Reg(src)]) => binop_reg_reg(regs, *dst, *src, false),

        (SUB, [Operand::Reg(dst), Operand::Imm(imm)]) => binop_reg_imm(regs, *dst, *imm, true),
        (SUB, [Operand::Reg(dst), Operand::Reg(src)]) => binop_reg_reg(regs, *dst, *src, true),

        (CMP, [Operand::Reg(dst), Operand::Imm(imm)]) => cmp_reg_imm(regs, *dst, *imm),
        (CMP, [Operand::Reg(dst), Operand::Reg(src)]) => cmp_reg_reg(regs, *dst, *src),

        (TEST, [Operand::Reg(a), Operand::Reg(b)]) => {
            let (va, width) = read_reg(regs, *a)?;
            let (vb, _) = read_reg(regs, *b)?;
            update_flags_logic(regs, width, va & vb);
            Ok(())
        }
        (TEST, [Operand::Reg(a), Operand::Imm(imm)]) => {
            let (va, width) = read_reg(regs, *a)?;
            update_flags_logic(regs, width, va & (*imm as u64));
            Ok(())
        }

        (AND, [Operand::Reg(dst), Operand::Reg(src)]) => logic_reg_reg(regs, *dst, *src, |a, b| a & b),
        (AND, [Operand::Reg(dst), Operand::Imm(imm)]) => logic_reg_imm(regs, *dst, *imm, |a, b| a & b),
        (OR, [Operand::Reg(dst), Operand::Reg(src)]) => logic_reg_reg(regs, *dst, *src, |a, b| a | b),
        (OR, [Operand::Reg(dst), Operand::Imm(imm)]) => logic_reg_imm(regs, *dst, *imm, |a, b| a | b),
        (XOR, [Operand::Reg(dst), Operand::Reg(src)]) => logic_reg_reg(regs, *dst, *src, |a, b| a ^ b),
        (XOR, [Operand::Reg(dst), Operand::Imm(imm)]) => logic_reg_imm(regs, *dst, *imm, |a, b| a ^ b),

        (ROL, [Operand::Reg(dst), Operand::Imm(imm)]) => rotate(regs, *dst, *imm as u64, true),
        (ROR, [Operand::Reg(dst), Operand::Imm(imm)]) => rotate(regs, *dst, *imm as u64, false),

        (SHL, [Operand::Reg(dst), Operand::Imm(imm)]) => shift(regs, *dst, *imm as u64, true, false),
        (SHR, [Operand::Reg(dst), Operand::Imm(imm)]) => shift(regs, *dst, *imm as u64, false, false),
        (SAR, [Operand::Reg(dst), Operand::Imm(imm)]) => shift(regs, *dst, *imm as u64, false, true),

        (INC, [Operand::Reg(dst)]) => inc_dec(regs, *dst, false),
        (DEC, [Operand::Reg(dst)]) => inc_dec(regs, *dst, true),

        (PUSH, [Operand::Reg(src)]) => {
            let _ = read_reg(regs, *src)?;
            adjust_rsp(regs, -8)
        }
        (POP, [Operand::Reg(dst)]) => {
            invalidate(regs, *dst);
            adjust_rsp(regs, 8)
        }

        (mnemonic, _) => Err(SliceError::UnhandledOpcode(format!("{mnemonic:?}"))),
    }
}

fn sign_extend(value: u64, width: RegWidth) -> u64 {
    let bits = width.bits();
    if bits >= 64 {
        return value;
    }
    let shift = 64 - bits;
    ((value << shift) as i64 >> shift) as u64
}

fn write_imm(regs: &mut RegisterFile, dst: Reg, imm: i64) {
    regs.write(dst, imm as u64);
}

fn invalidate(regs: &mut RegisterFile, dst: Reg) {
    regs.invalidate(dst);
}

fn binop_reg_imm(regs: &mut RegisterFile, dst: Reg, imm: i64, is_sub: bool) -> Result<(), SliceError> {
    let (a, width) = read_reg(regs, dst)?;
    let b = imm as u64;
    let result = if is_sub { a.wrapping_sub(b) } else { a.wrapping_add(b) };
    regs.write(dst, result);
    update_flags_arith(regs, width, result, a, b, is_sub);
    Ok(())
}

fn binop_reg_reg(regs: &mut RegisterFile, dst: Reg, src: Reg, is_sub: bool) -> Result<(), SliceError> {
    let (a, width) = read_reg(regs, dst)?;
    let (b, _) = read_reg(regs, src)?;
    let result = if is_sub { a.wrapping_sub(b) } else { a.wrapping_add(b) };
    regs.write(dst, result);
    update_flags_arith(regs, width, result, a, b, is_sub);
    Ok(())
}

fn cmp_reg_imm(regs: &mut RegisterFile, dst: Reg, imm: i64) -> Result<(), SliceError> {
    let (a, width) = read_reg(regs, dst)?;
    let b = imm as u64;
    let result = a.wrapping_sub(b);
    update_flags_arith(regs, width, result, a, b, true);
    Ok(())
}

fn cmp_reg_reg(regs: &mut RegisterFile, dst: Reg, src: Reg) -> Result<(), SliceError> {
    let (a, width) = read_reg(regs, dst)?;
    let (b, _) = read_reg(regs, src)?;
    let result = a.wrapping_sub(b);
    update_flags_arith(regs, width, result, a, b, true);
    Ok(())
}

fn logic_reg_reg(regs: &mut RegisterFile, dst: Reg, src: Reg, op: impl Fn(u64, u64) -> u64) -> Result<(), SliceError> {
    let (a, width) = read_reg(regs, dst)?;
    let (b, _) = read_reg(regs, src)?;
    let result = op(a, b);
    regs.write(dst, result);
    update_flags_logic(regs, width, result);
    Ok(())
}

fn logic_reg_imm(regs: &mut RegisterFile, dst: Reg, imm: i64, op: impl Fn(u64, u64) -> u64) -> Result<(), SliceError> {
    let (a, width) = read_reg(regs, dst)?;
    let result = op(a, imm as u64);
    regs.write(dst, result);
    update_flags_logic(regs, width, result);
    Ok(())
}

fn rotate(regs: &mut RegisterFile, dst: Reg, amount: u64, left: bool) -> Result<(), SliceError> {
    let (a, width) = read_reg(regs, dst)?;
    let bits = width.bits() as u64;
    let amount = amount % bits;
    let mask = if width == RegWidth::Qword { u64::MAX } else { (1u64 << bits) - 1 };
    let val = a & mask;
    let result = if left {
        ((val << amount) | (val >> (bits - amount.max(1)))) & mask
    } else {
        ((val >> amount) | (val << (bits - amount.max(1)))) & mask
    };
    regs.write(dst, result);
    update_flags_rot(regs, width, amount, result);
    Ok(())
}

fn shift(regs: &mut RegisterFile, dst: Reg, amount: u64, left: bool, arithmetic: bool) -> Result<(), SliceError> {
    let (a, width) = read_reg(regs, dst)?;
    let bits = width.bits() as u64;
    let mask = if width == RegWidth::Qword { u64::MAX } else { (1u64 << bits) - 1 };
    let val = a & mask;

    let (result, last_bit_out) = if amount == 0 {
        (val, false)
    } else if left {
        let out = (val >> (bits - amount)) & 1 != 0;
        ((val << amount) & mask, out)
    } else if arithmetic {
        let signed = sign_extend(val, width) as i64;
        let out = (val >> (amount - 1)) & 1 != 0;
        (((signed >> amount) as u64) & mask, out)
    } else {
        let out = (val >> (amount - 1)) & 1 != 0;
        (val >> amount, out)
    };

    regs.write(dst, result);
    update_flags_shift(regs, width, result, amount, last_bit_out, left);
    Ok(())
}

fn inc_dec(regs: &mut RegisterFile, dst: Reg, is_dec: bool) -> Result<(), SliceError> {
    let (old, width) = read_reg(regs, dst)?;
    let new = if is_dec { old.wrapping_sub(1) } else { old.wrapping_add(1) };
    regs.write(dst, new);
    update_flags_inc_dec(regs, width, old, new, is_dec);
    Ok(())
}

fn adjust_rsp(regs: &mut RegisterFile, delta: i64) -> Result<(), SliceError> {
    let (rsp, _) = read_reg(regs, zydis::Register::RSP)?;
    regs.write(zydis::Register::RSP, rsp.wrapping_add(delta as u64));
    Ok(())
}

