//! Arena-backed SSA IR, per SPEC_FULL.md §3/§4.3.
//!
//! `Ir` plays the role of `nvm::jit::ir::IrBlock` generalized into a
//! reusable arena: one `Ir` is reset and reused across compilations
//! (conceptually the fixed 16 MiB buffer of §3 — this crate expresses
//! that as `Vec`s whose capacity survives `reset()`, the same way the
//! teacher's `IrBlock` is a plain struct of `Vec`s rather than a raw
//! byte buffer with manual layout).

mod block;
mod builder;
mod instr;
mod local;
pub mod text;
mod types;
mod value;

pub use block::BlockData;
pub use builder::IrBuilder;
pub use instr::{Cond, InstrFlags, Instruction, Opcode, Width};
pub use local::LocalData;
pub use types::{BlockId, InstrId, LocalId, Type, ValueId};
pub use value::{ConstPayload, Use, ValueData, ValueKind};

use std::fmt;

/// Errors surfaced by the arena/textual-IR machinery.
#[derive(Debug)]
pub enum IrError {
    /// `read()` encountered text that does not parse as a value of IR.
    Parse(String),
    /// The read-back IR is not structurally equivalent to what was
    /// written (should only happen if `write`/`read` drift apart).
    RoundTripMismatch(String),
}

impl fmt::Display for IrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrError::Parse(s) => write!(f, "parse error: {s}"),
            IrError::RoundTripMismatch(s) => write!(f, "round-trip mismatch: {s}"),
        }
    }
}

impl std::error::Error for IrError {}

/// An insertion cursor: the block to insert into, and the instruction
/// after which new instructions are appended (`None` = at the head).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertPoint {
    pub block: BlockId,
    pub after: Option<InstrId>,
}

/// The IR container for one compile unit's worth of code: all of its
/// blocks, instructions, values and locals, plus the active insertion
/// cursor.
#[derive(Debug, Default)]
pub struct Ir {
    values: Vec<ValueData>,
    instrs: Vec<Instruction>,
    blocks: Vec<BlockData>,
    locals: Vec<LocalData>,
    /// Total bytes handed out to locals so far (the guest-context frame
    /// grows by this much).
    locals_size: u32,
    /// Block creation order == iteration order (the "textual-next"
    /// block the CFA pass falls through to is `blocks[i + 1]`).
    order: Vec<BlockId>,
    cursor: InsertPoint,
}

impl Ir {
    pub fn new() -> Self {
        let mut ir = Ir::default();
        let entry = ir.push_block(None);
        ir.cursor = InsertPoint {
            block: entry,
            after: None,
        };
        ir
    }

    /// Reset the arena for reuse in the next compilation, keeping the
    /// underlying `Vec` allocations (the bump-arena behavior of §3).
    pub fn reset(&mut self) {
        self.values.clear();
        self.instrs.clear();
        self.blocks.clear();
        self.locals.clear();
        self.locals_size = 0;
        self.order.clear();
        let entry = self.push_block(None);
        self.cursor = InsertPoint {
            block: entry,
            after: None,
        };
    }

    pub fn locals_size(&self) -> u32 {
        self.locals_size
    }

    pub fn entry_block(&self) -> BlockId {
        self.order[0]
    }

    pub fn blocks(&self) -> &[BlockId] {
        &self.order
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BlockData {
        &mut self.blocks[id.index()]
    }

    /// The block that textually follows `id`, if any (the CFA
    /// fall-through target for conditional branches).
    pub fn next_block(&self, id: BlockId) -> Option<BlockId> {
        let pos = self.order.iter().position(|&b| b == id)?;
        self.order.get(pos + 1).copied()
    }

    pub fn push_block(&mut self, label: Option<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            label,
            ..Default::default()
        });
        self.order.push(id);
        id
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.index()]
    }

    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instrs[id.index()]
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instruction {
        &mut self.instrs[id.index()]
    }

    pub fn local(&self, id: LocalId) -> &LocalData {
        &self.locals[id.index()]
    }

    pub fn cursor(&self) -> InsertPoint {
        self.cursor
    }

    pub fn set_cursor(&mut self, ip: InsertPoint) {
        self.cursor = ip;
    }

    /// Run `f` with the cursor temporarily moved to `ip`, restoring the
    /// previous cursor on return — the save-modify-restore pattern of
    /// §4.3 that lets callers emit into another block without rewriting
    /// existing builder call sites.
    pub fn with_cursor<T>(&mut self, ip: InsertPoint, f: impl FnOnce(&mut Ir) -> T) -> T {
        let saved = self.cursor;
        self.cursor = ip;
        let result = f(self);
        self.cursor = saved;
        result
    }

    pub fn builder(&mut self) -> IrBuilder<'_> {
        IrBuilder::new(self)
    }

    // -- value/const/local allocation -----------------------------------

    pub fn new_const(&mut self, payload: ConstPayload) -> ValueId {
        let ty = payload.ty();
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData {
            ty,
            kind: ValueKind::Const(payload),
            uses: Vec::new(),
        });
        id
    }

    fn new_def_value(&mut self, ty: Type, def: InstrId) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData {
            ty,
            kind: ValueKind::Def(def),
            uses: Vec::new(),
        });
        id
    }

    pub fn new_local(&mut self, ty: Type) -> LocalId {
        let size = (ty.bits().max(8) / 8) as u32;
        let align = size;
        self.locals_size = (self.locals_size + align - 1) / align * align;
        let offset = self.locals_size as i32;
        self.locals_size += size;
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(LocalData { ty, offset });
        id
    }

    /// Reuse an existing local's storage under a new handle with a
    /// possibly different type of the same width (§4.3 "reuse of an
    /// existing offset").
    pub fn reuse_local(&mut self, existing: LocalId, ty: Type) -> LocalId {
        let offset = self.locals[existing.index()].offset;
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(LocalData { ty, offset });
        id
    }

    // -- instruction insertion / removal --------------------------------

    /// Insert `opcode` with the given `args` and result type at the
    /// current cursor, advancing the cursor past it. Returns the result
    /// value, or `None` if `result_ty` is `Type::V`.
    pub fn emit(
        &mut self,
        opcode: Opcode,
        args: [Option<ValueId>; 4],
        result_ty: Type,
        guest_addr: Option<u32>,
    ) -> Option<ValueId> {
        let flags = opcode.default_flags();
        let instr_id = InstrId(self.instrs.len() as u32);
        let block = self.cursor.block;
        self.instrs.push(Instruction {
            opcode,
            args,
            result: None,
            block,
            label: guest_addr.map(|a| format!("0x{a:08x}")),
            flags,
            scratch: 0,
            prev: None,
            next: None,
        });

        // Register uses.
        for (slot, arg) in args.iter().enumerate() {
            if let Some(v) = arg {
                self.values[v.index()].uses.push(Use {
                    instr: instr_id,
                    slot: slot as u8,
                });
            }
        }

        let result = if result_ty == Type::V {
            None
        } else {
            let v = self.new_def_value(result_ty, instr_id);
            self.instrs[instr_id.index()].result = Some(v);
            Some(v)
        };

        self.link_after(instr_id, self.cursor.after, block);
        self.cursor.after = Some(instr_id);
        result
    }

    fn link_after(&mut self, instr_id: InstrId, after: Option<InstrId>, block: BlockId) {
        match after {
            None => {
                let old_head = self.blocks[block.index()].head;
                self.instrs[instr_id.index()].next = old_head;
                if let Some(h) = old_head {
                    self.instrs[h.index()].prev = Some(instr_id);
                } else {
                    self.blocks[block.index()].tail = Some(instr_id);
                }
                self.blocks[block.index()].head = Some(instr_id);
            }
            Some(after_id) => {
                let old_next = self.instrs[after_id.index()].next;
                self.instrs[instr_id.index()].prev = Some(after_id);
                self.instrs[instr_id.index()].next = old_next;
                self.instrs[after_id.index()].next = Some(instr_id);
                match old_next {
                    Some(n) => self.instrs[n.index()].prev = Some(instr_id),
                    None => self.blocks[block.index()].tail = Some(instr_id),
                }
            }
        }
    }

    /// Remove `instr` from its block's list in O(1), unlinking it from
    /// the use-lists of every value it reads. Used by DCE.
    pub fn remove_instr(&mut self, instr: InstrId) {
        let (block, prev, next, args) = {
            let i = &self.instrs[instr.index()];
            (i.block, i.prev, i.next, i.args)
        };
        match prev {
            Some(p) => self.instrs[p.index()].next = next,
            None => self.blocks[block.index()].head = next,
        }
        match next {
            Some(n) => self.instrs[n.index()].prev = prev,
            None => self.blocks[block.index()].tail = prev,
        }
        for arg in args.into_iter().flatten() {
            let uses = &mut self.values[arg.index()].uses;
            if let Some(pos) = uses.iter().position(|u| u.instr == instr) {
                uses.swap_remove(pos);
            }
        }
        if self.cursor.after == Some(instr) {
            self.cursor.after = prev;
        }
    }

    /// Iterate the instructions of `block` in order.
    pub fn block_instrs(&self, block: BlockId) -> BlockInstrIter<'_> {
        BlockInstrIter {
            ir: self,
            next: self.blocks[block.index()].head,
        }
    }

    /// Rewrite every use of `old` to point at `new`, per §4.3. Preserves
    /// the bidirectional use/def invariant by walking `old`'s use list
    /// and swapping the slot each use names.
    pub fn replace_uses(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let uses = std::mem::take(&mut self.values[old.index()].uses);
        for u in uses {
            self.instrs[u.instr.index()].args[u.slot as usize] = Some(new);
            self.values[new.index()].uses.push(u);
        }
    }

    /// Sanity-check the bidirectional use/def invariant (§3, §8 property
    /// 6). Intended for tests and debug assertions after a pass runs.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (vi, v) in self.values.iter().enumerate() {
            for u in &v.uses {
                let instr = &self.instrs[u.instr.index()];
                if instr.args[u.slot as usize] != Some(ValueId(vi as u32)) {
                    return Err(format!(
                        "value {vi} has a use record pointing at {}/{} but that slot holds {:?}",
                        u.instr, u.slot, instr.args[u.slot as usize]
                    ));
                }
            }
        }
        for (ii, instr) in self.instrs.iter().enumerate() {
            for (slot, arg) in instr.args_used() {
                let uses = &self.values[arg.index()].uses;
                let found = uses
                    .iter()
                    .any(|u| u.instr == InstrId(ii as u32) && u.slot == slot);
                if !found {
                    return Err(format!(
                        "instruction {ii} arg {slot} (value {arg}) has no matching use record"
                    ));
                }
            }
        }
        Ok(())
    }
}

pub struct BlockInstrIter<'a> {
    ir: &'a Ir,
    next: Option<InstrId>,
}

impl<'a> Iterator for BlockInstrIter<'a> {
    type Item = InstrId;
    fn next(&mut self) -> Option<InstrId> {
        let current = self.next?;
        self.next = self.ir.instrs[current.index()].next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_links_uses_bidirectionally() {
        let mut ir = Ir::new();
        let c1 = ir.new_const(ConstPayload::I32(1));
        let c2 = ir.new_const(ConstPayload::I32(2));
        let sum = ir
            .emit(Opcode::Add, [Some(c1), Some(c2), None, None], Type::I32, None)
            .unwrap();
        assert!(ir.check_invariants().is_ok());
        assert_eq!(ir.value(c1).uses.len(), 1);
        assert_eq!(ir.value(sum).uses.len(), 0);
    }

    #[test]
    fn replace_uses_moves_every_reference() {
        let mut ir = Ir::new();
        let c1 = ir.new_const(ConstPayload::I32(1));
        let c2 = ir.new_const(ConstPayload::I32(2));
        let a = ir
            .emit(Opcode::Add, [Some(c1), Some(c2), None, None], Type::I32, None)
            .unwrap();
        let b = ir
            .emit(Opcode::Sub, [Some(c1), Some(a), None, None], Type::I32, None)
            .unwrap();
        let _ = b;
        let folded = ir.new_const(ConstPayload::I32(3));
        ir.replace_uses(a, folded);
        assert!(ir.value(a).uses.is_empty());
        assert_eq!(ir.value(folded).uses.len(), 1);
        assert!(ir.check_invariants().is_ok());
    }

    #[test]
    fn remove_instr_unlinks_list_and_uses() {
        let mut ir = Ir::new();
        let c1 = ir.new_const(ConstPayload::I32(1));
        let c2 = ir.new_const(ConstPayload::I32(2));
        let entry = ir.entry_block();
        let _a = ir
            .emit(Opcode::Add, [Some(c1), Some(c2), None, None], Type::I32, None)
            .unwrap();
        let dead = ir.instr_id_of_last_emit();
        ir.remove_instr(dead);
        assert!(ir.block_instrs(entry).next().is_none());
        assert!(ir.value(c1).uses.is_empty());
        assert!(ir.check_invariants().is_ok());
    }

    impl Ir {
        /// Test helper: id of the instruction most recently emitted at
        /// the (still current) cursor.
        fn instr_id_of_last_emit(&self) -> InstrId {
            self.cursor.after.expect("an instruction was just emitted")
        }
    }
}
