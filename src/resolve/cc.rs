//! Condition-code evaluation table (§9 Open Question (b)).
//!
//! Replaces `original_source/src/cfg/cfg-gen.c`'s `dispatch_jump_imm` flags-
//! superset test, which can only tell whether the simulated flags *touch*
//! every bit a `Jcc` tests — not whether the condition is actually true.
//! This table evaluates the real x86-64 condition-code formula for each
//! `Jcc` mnemonic against a concrete, fully-simulated [`Eflags`] value.

use crate::register::Eflags;

/// Evaluates `mnemonic`'s condition against `flags`, or `None` if `mnemonic`
/// isn't a conditional jump this table knows about.
pub fn evaluate(mnemonic: zydis::Mnemonic, flags: Eflags) -> Option<bool> {
    use zydis::Mnemonic::*;

    let cf = flags.contains(Eflags::CF);
    let zf = flags.contains(Eflags::ZF);
    let sf = flags.contains(Eflags::SF);
    let of = flags.contains(Eflags::OF);
    let pf = flags.contains(Eflags::PF);

    Some(match mnemonic {
        JZ => zf,
        JNZ => !zf,
        JS => sf,
        JNS => !sf,
        JO => of,
        JNO => !of,
        JB => cf,
        JNB => !cf,
        JBE => cf || zf,
        JNBE => !cf && !zf,
        JP => pf,
        JNP => !pf,
        JL => sf != of,
        JNL => sf == of,
        JLE => zf || (sf != of),
        JNLE => !zf && (sf == of),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jz_true_only_when_zf_set() {
        assert_eq!(evaluate(zydis::Mnemonic::JZ, Eflags::ZF), Some(true));
        assert_eq!(evaluate(zydis::Mnemonic::JZ, Eflags::empty()), Some(false));
    }

    #[test]
    fn jl_uses_sign_overflow_mismatch() {
        assert_eq!(evaluate(zydis::Mnemonic::JL, Eflags::SF), Some(true));
        assert_eq!(evaluate(zydis::Mnemonic::JL, Eflags::SF | Eflags::OF), Some(false));
        assert_eq!(evaluate(zydis::Mnemonic::JL, Eflags::empty()), Some(false));
    }

    #[test]
    fn jbe_is_cf_or_zf() {
        assert_eq!(evaluate(zydis::Mnemonic::JBE, Eflags::CF), Some(true));
        assert_eq!(evaluate(zydis::Mnemonic::JBE, Eflags::ZF), Some(true));
        assert_eq!(evaluate(zydis::Mnemonic::JBE, Eflags::empty()), Some(false));
    }

    #[test]
    fn non_conditional_mnemonic_is_unknown() {
        assert_eq!(evaluate(zydis::Mnemonic::JMP, Eflags::empty()), None);
    }
}
