//! Load/store elimination (§4.4 pass 2): within a block, track the last
//! known value written to or read from each context offset and local
//! slot, and elide a redundant reload or a same-value store. A call may
//! reenter the guest and observe or mutate context state, so it
//! invalidates everything tracked so far.

use std::collections::HashMap;

use crate::ir::{BlockId, InstrId, Ir, LocalId, Opcode, ValueId};

pub fn run(ir: &mut Ir) {
    let blocks: Vec<BlockId> = ir.blocks().to_vec();
    for b in blocks {
        run_block(ir, b);
    }
}

fn run_block(ir: &mut Ir, b: BlockId) {
    let instrs: Vec<InstrId> = ir.block_instrs(b).collect();
    let mut context_state: HashMap<i32, ValueId> = HashMap::new();
    let mut local_state: HashMap<LocalId, ValueId> = HashMap::new();
    let mut to_remove = Vec::new();

    for id in instrs {
        let instr = ir.instr(id);
        let opcode = instr.opcode.clone();
        let args = instr.args;
        let result = instr.result;

        match opcode {
            Opcode::LoadContext { offset, .. } => match (context_state.get(&offset), result) {
                (Some(&known), Some(r)) => {
                    ir.replace_uses(r, known);
                    to_remove.push(id);
                }
                (None, Some(r)) => {
                    context_state.insert(offset, r);
                }
                _ => {}
            },
            Opcode::StoreContext { offset } => {
                if let Some(v) = args[0] {
                    if context_state.get(&offset) == Some(&v) {
                        to_remove.push(id);
                    }
                    context_state.insert(offset, v);
                }
            }
            Opcode::LoadLocal(local) => match (local_state.get(&local), result) {
                (Some(&known), Some(r)) => {
                    ir.replace_uses(r, known);
                    to_remove.push(id);
                }
                (None, Some(r)) => {
                    local_state.insert(local, r);
                }
                _ => {}
            },
            Opcode::StoreLocal(local) => {
                if let Some(v) = args[0] {
                    if local_state.get(&local) == Some(&v) {
                        to_remove.push(id);
                    }
                    local_state.insert(local, v);
                }
            }
            Opcode::Call { .. } | Opcode::CallCond { .. } | Opcode::Fallback => {
                context_state.clear();
            }
            _ => {}
        }
    }

    for id in to_remove {
        ir.remove_instr(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    #[test]
    fn second_load_of_same_offset_is_elided() {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let v1 = b.load_context(16, Type::I32);
        let v2 = b.load_context(16, Type::I32);
        let sum = b.iadd(v1, v2);
        b.store_context(0, sum);
        drop(b);

        let entry = ir.entry_block();
        let before = ir.block_instrs(entry).count();
        run(&mut ir);
        let after = ir.block_instrs(entry).count();
        assert_eq!(after, before - 1);
        assert!(ir.check_invariants().is_ok());
    }

    #[test]
    fn call_invalidates_tracked_context_state() {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let v1 = b.load_context(16, Type::I32);
        b.call(0x1000, &[]);
        let v2 = b.load_context(16, Type::I32);
        let _ = b.iadd(v1, v2);
        drop(b);

        let entry = ir.entry_block();
        let before = ir.block_instrs(entry).count();
        run(&mut ir);
        assert_eq!(ir.block_instrs(entry).count(), before);
    }
}
