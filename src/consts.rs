//! Tunables for the recovery engine.

/// Depth bound on the dataflow slicer's predecessor-block recursion (§4.5).
pub const MAX_SLICE_DEPTH: u32 = 8;

/// Number of pages the forward terminator scan will read before aborting
/// with [`crate::error::RecoveryError::NoTerminatorFound`].
pub const MAX_SCAN_PAGES: u32 = 3;

/// Default synthetic stack-frame size when a function's `sub rsp, imm`
/// prologue could not be determined.
pub const DEFAULT_STACK_FRAME_SIZE: u64 = 0x1000;

/// Chunk size the forward terminator scan reads at a time (§4.6). Named
/// after the original's `pe$get_pagesize`, though here it's just a read
/// granularity, not a real page size.
pub const SCAN_PAGE_SIZE: usize = 0x1000;
