//! Frontend contract (§4.2) and the ISA-agnostic half of translation:
//! the cycle/instruction-count preamble and the terminator shapes from
//! §6's translation contract table. Per-ISA instruction decoding lives
//! in [`isa16`] and [`isa32`].

pub mod isa16;
pub mod isa32;

use crate::cache::meta::{BranchType, Meta};
use crate::cache::unit::{Analyzer, UnitId, UnitTree};
use crate::guest::Memory;
use crate::ir::{InsertPoint, Ir, Type, ValueId};

/// Guest-context field offsets shared by both shipped ISAs. A real
/// frontend would derive these from the guest CPU's context layout;
/// fixed here since that layout is out of scope (§1).
pub const CTX_PC_OFFSET: i32 = 0;
pub const CTX_REMAINING_CYCLES_OFFSET: i32 = 4;
pub const CTX_RAN_INSTRS_OFFSET: i32 = 8;
pub const CTX_PENDING_INTERRUPT_OFFSET: i32 = 12;
/// Boolean condition-code scratch slot the shipped ISAs use for their
/// compare-and-branch idiom.
pub const CTX_FLAG_OFFSET: i32 = 16;
pub const CTX_REG_BASE_OFFSET: i32 = 20;

/// Opaque thunk addresses the guest dispatcher resolves at link time.
/// Modeled as `Call`/`CallCond` targets per §6's "noreturn call
/// dispatch-*-thunk" terminator shapes.
pub const DISPATCH_DYNAMIC_THUNK: u64 = 1;
pub const DISPATCH_STATIC_THUNK: u64 = 2;
pub const DISPATCH_LEAVE_THUNK: u64 = 3;
pub const DISPATCH_INTERRUPT_THUNK: u64 = 4;

/// What one unit's decoded body contributed toward its terminator: the
/// branch condition for a conditional `branch_type`, and the computed
/// destination value for a dynamic one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslatedBody {
    pub cond: Option<ValueId>,
    pub dynamic_target: Option<ValueId>,
}

/// A guest-ISA frontend (§4.2).
pub trait Frontend: Analyzer {
    fn name(&self) -> &'static str;

    /// Decode and emit IR for one unit's body into the block the
    /// current insertion cursor points at (the preamble has already
    /// been emitted). `fastmem` mirrors the code's `fastmem` flag
    /// (§4.6): when set, memory accesses should prefer `load_fast`/
    /// `store_fast` over `load_direct`/`store_direct`. Returns whatever
    /// the terminator needs.
    fn decode_body(&self, ir: &mut Ir, guest: &dyn Memory, meta: &Meta, fastmem: bool) -> TranslatedBody;

    fn dump_code(&self, guest: &dyn Memory, addr: u32, size: u32) -> String;
}

/// Walk `tree`, emitting one IR block per unit with the shared
/// preamble/terminator wrapped around the ISA-specific body (§4.2
/// `translate_code`).
pub fn translate_code<F: Frontend>(
    frontend: &F,
    guest: &dyn Memory,
    tree: &UnitTree,
    ir: &mut Ir,
    fastmem: bool,
) {
    if let Some(root) = tree.root {
        translate_unit(frontend, guest, tree, root, ir, fastmem);
    }
}

fn translate_unit<F: Frontend>(
    frontend: &F,
    guest: &dyn Memory,
    tree: &UnitTree,
    id: UnitId,
    ir: &mut Ir,
    fastmem: bool,
) -> crate::ir::BlockId {
    let unit = tree.arena.get(id);
    let guest_addr = unit.guest_addr;
    let branch_child = unit.branch;
    let next_child = unit.next;
    let meta = tree.metas.get(&guest_addr).expect("unit always has a meta");

    let block = ir.push_block(Some(format!("0x{guest_addr:08x}")));
    ir.set_cursor(InsertPoint { block, after: None });
    emit_preamble(ir, meta.num_cycles, meta.num_instrs);
    let body = frontend.decode_body(ir, guest, meta, fastmem);

    let branch_type = meta.branch_type;
    let branch_addr = meta.branch_addr;
    let next_addr = meta.next_addr;

    let next_block = if branch_type.is_conditional() {
        Some(match next_child {
            Some(n) => translate_unit(frontend, guest, tree, n, ir, fastmem),
            None => make_static_trailer(ir, next_addr, DISPATCH_DYNAMIC_THUNK),
        })
    } else {
        None
    };

    let taken_block = match branch_type {
        BranchType::Static | BranchType::StaticTrue | BranchType::StaticFalse => {
            Some(match branch_child {
                Some(c) => translate_unit(frontend, guest, tree, c, ir, fastmem),
                None => make_static_trailer(ir, branch_addr, DISPATCH_STATIC_THUNK),
            })
        }
        BranchType::DynamicTrue | BranchType::DynamicFalse => {
            let dest = body
                .dynamic_target
                .expect("dynamic branch_type requires a computed destination");
            Some(make_dynamic_trailer(ir, dest, DISPATCH_DYNAMIC_THUNK))
        }
        _ => None,
    };

    let after = ir.block(block).tail;
    ir.set_cursor(InsertPoint { block, after });
    emit_terminator(ir, branch_type, branch_addr, next_addr, &body, taken_block, next_block);
    block
}

fn emit_preamble(ir: &mut Ir, num_cycles: u32, num_instrs: u32) {
    let mut b = ir.builder();
    let remaining = b.load_context(CTX_REMAINING_CYCLES_OFFSET, Type::I32);
    let spent = b.const_i32(num_cycles as i32);
    let new_remaining = b.isub(remaining, spent);
    b.store_context(CTX_REMAINING_CYCLES_OFFSET, new_remaining);

    let ran = b.load_context(CTX_RAN_INSTRS_OFFSET, Type::I32);
    let decoded = b.const_i32(num_instrs as i32);
    let new_ran = b.iadd(ran, decoded);
    b.store_context(CTX_RAN_INSTRS_OFFSET, new_ran);

    let zero = b.const_i32(0);
    let should_leave = b.icmp(crate::ir::Cond::Le, new_remaining, zero);
    b.call_cond(DISPATCH_LEAVE_THUNK, should_leave, &[]);

    let pending = b.load_context(CTX_PENDING_INTERRUPT_OFFSET, Type::I8);
    let zero8 = b.const_i8(0);
    let has_interrupt = b.icmp(crate::ir::Cond::Ne, pending, zero8);
    b.call_cond(DISPATCH_INTERRUPT_THUNK, has_interrupt, &[]);
}

fn make_static_trailer(ir: &mut Ir, addr: u32, thunk: u64) -> crate::ir::BlockId {
    let block = ir.push_block(None);
    ir.set_cursor(InsertPoint { block, after: None });
    let mut b = ir.builder();
    let pc = b.const_i32(addr as i32);
    b.store_context(CTX_PC_OFFSET, pc);
    b.call_noreturn(thunk, &[]);
    block
}

fn make_dynamic_trailer(ir: &mut Ir, dest: ValueId, thunk: u64) -> crate::ir::BlockId {
    let block = ir.push_block(None);
    ir.set_cursor(InsertPoint { block, after: None });
    let mut b = ir.builder();
    b.store_context(CTX_PC_OFFSET, dest);
    b.call_noreturn(thunk, &[]);
    block
}

fn emit_terminator(
    ir: &mut Ir,
    branch_type: BranchType,
    branch_addr: u32,
    next_addr: u32,
    body: &TranslatedBody,
    taken_block: Option<crate::ir::BlockId>,
    next_block: Option<crate::ir::BlockId>,
) {
    let mut b = ir.builder();
    match branch_type {
        BranchType::FallThrough => {
            let _ = (branch_addr, next_block);
            let pc = b.const_i32(next_addr as i32);
            b.store_context(CTX_PC_OFFSET, pc);
            b.call_noreturn(DISPATCH_DYNAMIC_THUNK, &[]);
        }
        BranchType::Static => {
            b.jump(taken_block.expect("static branch_type always resolves a taken block"));
        }
        BranchType::StaticTrue => {
            let cond = body.cond.expect("STATIC_TRUE requires a computed condition");
            b.branch_true(cond, taken_block.expect("resolved above"));
            let _ = next_block;
        }
        BranchType::StaticFalse => {
            let cond = body.cond.expect("STATIC_FALSE requires a computed condition");
            b.branch_false(cond, taken_block.expect("resolved above"));
            let _ = next_block;
        }
        BranchType::Dynamic => {
            let dest = body.dynamic_target.expect("DYNAMIC requires a computed destination");
            b.store_context(CTX_PC_OFFSET, dest);
            b.call_noreturn(DISPATCH_DYNAMIC_THUNK, &[]);
        }
        BranchType::DynamicTrue => {
            let cond = body.cond.expect("DYNAMIC_TRUE requires a computed condition");
            b.branch_true(cond, taken_block.expect("resolved above"));
            let _ = next_block;
        }
        BranchType::DynamicFalse => {
            let cond = body.cond.expect("DYNAMIC_FALSE requires a computed condition");
            b.branch_false(cond, taken_block.expect("resolved above"));
            let _ = next_block;
        }
    }
}

