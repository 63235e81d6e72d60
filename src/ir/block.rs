//! Basic blocks: an intrusive, arena-indexed doubly-linked instruction
//! list plus CFG edges filled in by the CFA pass.

use super::types::{BlockId, InstrId};

#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub label: Option<String>,
    pub head: Option<InstrId>,
    pub tail: Option<InstrId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    pub scratch: u32,
}

impl BlockData {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}
