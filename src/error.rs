//! Error taxonomy (§7).
//!
//! The core distinguishes two failure shapes, mirroring the teacher's own
//! [`RuntimeError`]-style `Recoverable`/`Halt` split:
//!
//! - [`RecoveryError`] — fatal aborts: invariant violations that indicate a
//!   bug or non-code input (unknown register id, out-of-bounds block
//!   access, a decoder returning zero instructions where one was required,
//!   splitting a block on an address outside its range, exceeding the
//!   terminator-scan page budget). These terminate the whole recovery run.
//! - [`SliceError`] — recoverable slice/simulation failures. The current
//!   slicer/simulator attempt is abandoned and the branch resolver falls
//!   back to "both branches taken" or "indirect call unresolvable"; overall
//!   CFG recovery continues.
//!
//! Duplicate-block / already-visited-target handling (§7 class 4) is not an
//! error at all — it is ordinary control flow in [`crate::resolve`].

use crate::addr::Rva;
use thiserror::Error;

/// Fatal, process-aborting errors (§7 class 1, and class 3 once the page
/// budget for a terminator scan is exhausted).
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("unrecognized register id {0:?}")]
    UnknownRegister(zydis::Register),

    #[error("address {addr} is outside block [{block_start}, {block_end})")]
    BlockRangeViolation {
        addr: Rva,
        block_start: Rva,
        block_end: Rva,
    },

    #[error("split address {addr} is outside block [{block_start}, {block_end})")]
    SplitOutOfRange {
        addr: Rva,
        block_start: Rva,
        block_end: Rva,
    },

    #[error("no terminator found within {scanned_pages} page(s) starting at {start}; likely non-executable data")]
    NoTerminatorFound { scanned_pages: u32, start: Rva },

    #[error("decoder returned zero instructions for {0} bytes at {1}")]
    EmptyDisassembly(usize, Rva),

    #[error("unknown function tag")]
    UnknownFunction,

    #[error("unknown basic block tag")]
    UnknownBlock,

    #[error(transparent)]
    Pe(#[from] crate::pe::PeError),
}

/// Recoverable failures of a single slicer/simulator attempt (§7 class 2).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SliceError {
    #[error("register {0:?} has no known value at this program point")]
    IndeterminateRegister(zydis::Register),

    #[error("memory operand could not be resolved to a determinate address")]
    IndeterminateMemory,

    #[error("unhandled opcode: {0}")]
    UnhandledOpcode(String),

    #[error("dataflow slice exceeded the maximum predecessor-block depth")]
    DepthExceeded,

    #[error("no dominating flag-producer instruction found")]
    IndeterminatePredicate,
}

/// Top-level error the CLI surfaces.
#[derive(Debug, Error)]
pub enum UcfgError {
    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Pe(#[from] crate::pe::PeError),
}
