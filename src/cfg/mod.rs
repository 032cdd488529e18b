//! CFG store (C4, §3/§4.4).
//!
//! Two [`Graph`]s layered on top of each other: `functions` is the call
//! graph (vertices are [`Function`]s, edges are call sites), `blocks` is the
//! control-flow graph shared by every function (vertices are [`BasicBlock`]s,
//! edges are fallthrough/branch targets). A function owns a contiguous run of
//! basic blocks reachable from its entry block.
//!
//! Grounded on `original_source/include/cfg/cfg.h`'s public API
//! (`cfg$add_function_block`, `cfg$add_basic_block`, `cfg$split_basic_block`,
//! `cfg$connect_basic_blocks`, `cfg$is_address_visited`,
//! `cfg$new_stack_frame`/`cfg$free_stack_frame`) translated onto
//! [`crate::graph::Graph`] instead of the original's raw `map_vertex_edges`.

mod bitmap;

pub use bitmap::AddressMap;

use crate::addr::Rva;
use crate::error::RecoveryError;
use crate::graph::{Graph, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FnTag(Tag);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockTag(Tag);

/// A function's stack-frame bookkeeping, allocated lazily on first need
/// (§4.4's `new_stack_frame`/`free_stack_frame` pair).
#[derive(Debug, Clone, Default)]
pub struct StackFrame {
    pub sp_offset: i64,
    pub size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub entry: Rva,
    pub entry_block: BlockTag,
    pub stack_frame: Option<StackFrame>,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub owner: FnTag,
    pub start: Rva,
    /// Exclusive end address. `None` until [`Cfg::set_basic_block_end`] is
    /// called once the block's terminator has been found.
    pub end: Option<Rva>,
}

impl BasicBlock {
    pub fn contains(&self, addr: Rva) -> bool {
        match self.end {
            Some(end) => addr.value() >= self.start.value() && addr.value() < end.value(),
            None => addr == self.start,
        }
    }

    pub fn size(&self) -> Option<u64> {
        self.end.map(|end| end.value() - self.start.value())
    }
}

#[derive(Debug, Default)]
pub struct Cfg {
    functions: Graph<Function>,
    blocks: Graph<BasicBlock>,
    /// Maps a block's start address back to its tag, so
    /// [`Cfg::is_address_visited`] and the mid-block split lookup don't need
    /// a linear scan.
    block_starts: AddressMap<BlockTag>,
}

impl Cfg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function_block(&mut self, entry: Rva) -> (FnTag, BlockTag) {
        let block_tag = BlockTag(self.blocks.insert(BasicBlock {
            owner: FnTag(Tag::dangling()),
            start: entry,
            end: None,
        }));
        let fn_tag = FnTag(self.functions.insert(Function {
            entry,
            entry_block: block_tag,
            stack_frame: None,
        }));
        self.blocks.get_mut(block_tag.0).unwrap().owner = fn_tag;
        self.block_starts.insert(entry, block_tag);
        (fn_tag, block_tag)
    }

    pub fn add_function_block_succ(&mut self, caller: FnTag, entry: Rva) -> (FnTag, BlockTag) {
        let (callee, block) = self.add_function_block(entry);
        self.functions.connect(caller.0, callee.0);
        (callee, block)
    }

    pub fn add_basic_block(&mut self, owner: FnTag, start: Rva) -> BlockTag {
        let tag = BlockTag(self.blocks.insert(BasicBlock {
            owner,
            start,
            end: None,
        }));
        self.block_starts.insert(start, tag);
        tag
    }

    pub fn add_basic_block_succ(&mut self, pred: BlockTag, owner: FnTag, start: Rva) -> BlockTag {
        let tag = self.add_basic_block(owner, start);
        self.connect_basic_blocks(pred, tag);
        tag
    }

    pub fn connect_basic_blocks(&mut self, from: BlockTag, to: BlockTag) {
        self.blocks.connect(from.0, to.0);
    }

    pub fn set_basic_block_end(&mut self, block: BlockTag, end: Rva) -> Result<(), RecoveryError> {
        let bb = self.blocks.get_mut(block.0).ok_or(RecoveryError::UnknownBlock)?;
        bb.end = Some(end);
        Ok(())
    }

    pub fn get_basic_block(&self, block: BlockTag) -> Result<&BasicBlock, RecoveryError> {
        self.blocks.get(block.0).ok_or(RecoveryError::UnknownBlock)
    }

    pub fn get_function(&self, f: FnTag) -> Result<&Function, RecoveryError> {
        self.functions.get(f.0).ok_or(RecoveryError::UnknownFunction)
    }

    pub fn get_function_mut(&mut self, f: FnTag) -> Result<&mut Function, RecoveryError> {
        self.functions.get_mut(f.0).ok_or(RecoveryError::UnknownFunction)
    }

    pub fn entry_block(&self, f: FnTag) -> Result<BlockTag, RecoveryError> {
        Ok(self.get_function(f)?.entry_block)
    }

    pub fn block_preds(&self, block: BlockTag) -> Vec<BlockTag> {
        self.blocks.predecessors(block.0).into_iter().map(BlockTag).collect()
    }

    pub fn block_succs(&self, block: BlockTag) -> &[Tag] {
        self.blocks.successors(block.0)
    }

    /// Returns the block owning `addr`, if any block's `[start, end)` range
    /// (or exact `start`, for an as-yet-unterminated block) covers it.
    pub fn block_at(&self, addr: Rva) -> Option<BlockTag> {
        if let Some(tag) = self.block_starts.get(addr) {
            return Some(*tag);
        }
        self.blocks
            .iter()
            .find(|(_, bb)| bb.contains(addr))
            .map(|(tag, _)| BlockTag(tag))
    }

    pub fn is_address_visited(&self, addr: Rva) -> bool {
        self.block_at(addr).is_some()
    }

    /// Splits the block containing `split_at` into two: the original block
    /// is truncated to end at `split_at`, a fresh block starting at
    /// `split_at` inherits its successors (§8, P1-P5).
    pub fn split_basic_block(&mut self, block: BlockTag, split_at: Rva) -> Result<BlockTag, RecoveryError> {
        let bb = self.get_basic_block(block)?.clone();
        let (start, end) = (bb.start, bb.end);
        if split_at.value() <= start.value() || end.is_some_and(|e| split_at.value() >= e.value()) {
            return Err(RecoveryError::SplitOutOfRange {
                addr: split_at,
                block_start: start,
                block_end: end.unwrap_or(start),
            });
        }

        let owner = bb.owner;
        let tail_tag = self.add_basic_block(owner, split_at);
        if let Some(end) = end {
            self.set_basic_block_end(tail_tag, end)?;
        }

        let succs: Vec<Tag> = self.blocks.successors(block.0).to_vec();
        for succ in succs {
            self.blocks.connect(tail_tag.0, succ);
        }
        self.blocks.get_mut(block.0).unwrap().end = Some(split_at);
        self.blocks.connect(block.0, tail_tag.0);

        Ok(tail_tag)
    }

    pub fn set_function_block_sp_offset(&mut self, f: FnTag, sp_offset: i64) -> Result<(), RecoveryError> {
        let func = self.get_function_mut(f)?;
        func.stack_frame.get_or_insert_with(StackFrame::default).sp_offset = sp_offset;
        Ok(())
    }

    pub fn new_stack_frame(&mut self, f: FnTag, size: u64) -> Result<(), RecoveryError> {
        let func = self.get_function_mut(f)?;
        let frame = func.stack_frame.get_or_insert_with(StackFrame::default);
        frame.size = Some(size);
        Ok(())
    }

    pub fn free_stack_frame(&mut self, f: FnTag) -> Result<(), RecoveryError> {
        self.get_function_mut(f)?.stack_frame = None;
        Ok(())
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}
