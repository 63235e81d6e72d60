//! Block metadata (§3 "block meta"): the frontend analyzer's cached
//! verdict for one guest entry point, keyed by guest address.

/// Reserved sentinel for "no such address" (§3).
pub const INVALID_ADDR: u32 = 0xFFFF_FFFF;

/// How a block's terminating branch resolves, per §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchType {
    FallThrough,
    Static,
    StaticTrue,
    StaticFalse,
    Dynamic,
    DynamicTrue,
    DynamicFalse,
}

impl BranchType {
    /// Whether the child at `branch_addr` can be compiled inline as a
    /// block, per §6's translation contract (only the static family has
    /// a statically known branch target to fold).
    pub fn is_static(self) -> bool {
        matches!(
            self,
            BranchType::Static | BranchType::StaticTrue | BranchType::StaticFalse
        )
    }

    pub fn is_conditional(self) -> bool {
        matches!(
            self,
            BranchType::StaticTrue
                | BranchType::StaticFalse
                | BranchType::DynamicTrue
                | BranchType::DynamicFalse
        )
    }
}

/// Cached analysis of a basic block at one guest address (§3).
#[derive(Debug, Clone)]
pub struct Meta {
    pub guest_addr: u32,
    pub branch_type: BranchType,
    pub branch_addr: u32,
    pub next_addr: u32,
    pub num_instrs: u32,
    pub num_cycles: u32,
    pub size: u32,
    /// Compile units (by index into the coordinator's unit arena)
    /// currently referencing this meta. Freed only when this is empty.
    pub compile_refs: Vec<u32>,
    /// Stamped with the walk's token when visited; cuts cycles (§4.1).
    pub visit_token: u64,
}

impl Meta {
    pub fn new(guest_addr: u32) -> Self {
        Self {
            guest_addr,
            branch_type: BranchType::FallThrough,
            branch_addr: INVALID_ADDR,
            next_addr: INVALID_ADDR,
            num_instrs: 0,
            num_cycles: 0,
            size: 0,
            compile_refs: Vec::new(),
            visit_token: 0,
        }
    }
}
