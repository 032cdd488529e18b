//! Static control-flow-graph recovery for x86-64 PE binaries.
//!
//! Starting from one or more entry points, [`recover`] walks reachable code,
//! partitions it into functions and basic blocks, and resolves
//! indirect/conditional branches by symbolically simulating small backward
//! dataflow slices against a partial CPU model.

pub mod addr;
pub mod cfg;
pub mod cli;
pub mod consts;
pub mod decoder;
pub mod error;
pub mod graph;
pub mod pe;
pub mod recover;
pub mod register;
pub mod resolve;
pub mod sim;
pub mod slice;

pub mod prelude {
    pub use crate::addr::Rva;
    pub use crate::cfg::{BasicBlock, Cfg, Function};
    pub use crate::decoder::{DecodedInsn, InstructionDecoder, ZydisDecoder};
    pub use crate::error::{RecoveryError, SliceError, UcfgError};
    pub use crate::pe::PeImage;
    pub use crate::recover::Recovery;
    pub use crate::register::{Eflags, Reg, RegisterFile};
}
