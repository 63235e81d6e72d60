//! Control-flow analysis (§4.4 pass 1): derive block-level CFG edges
//! from terminator IR. `Jump` points at a `Type::Block` operand;
//! `BranchTrue`/`BranchFalse` additionally fall through to the
//! textual-next block.

use crate::ir::{BlockId, ConstPayload, Ir, Opcode, ValueId, ValueKind};

pub fn run(ir: &mut Ir) {
    let blocks: Vec<BlockId> = ir.blocks().to_vec();
    for &b in &blocks {
        let bd = ir.block_mut(b);
        bd.succs.clear();
        bd.preds.clear();
    }

    for &b in &blocks {
        let Some(term) = ir.block_instrs(b).last() else {
            continue;
        };
        let instr = ir.instr(term);
        let is_jump = matches!(instr.opcode, Opcode::Jump);
        let is_cond = matches!(instr.opcode, Opcode::BranchTrue | Opcode::BranchFalse);
        let args = instr.args;

        if is_jump {
            if let Some(target) = block_operand(ir, args[0]) {
                add_edge(ir, b, target);
            }
        } else if is_cond {
            if let Some(target) = block_operand(ir, args[1]) {
                add_edge(ir, b, target);
            }
            if let Some(fallthrough) = ir.next_block(b) {
                add_edge(ir, b, fallthrough);
            }
        }
    }
}

fn block_operand(ir: &Ir, v: Option<ValueId>) -> Option<BlockId> {
    match &ir.value(v?).kind {
        ValueKind::Const(ConstPayload::Block(bid)) => Some(*bid),
        _ => None,
    }
}

fn add_edge(ir: &mut Ir, src: BlockId, dst: BlockId) {
    ir.block_mut(src).succs.push(dst);
    ir.block_mut(dst).preds.push(src);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    #[test]
    fn jump_adds_single_successor() {
        let mut ir = Ir::new();
        let entry = ir.entry_block();
        let target = ir.push_block(None);
        ir.with_cursor(
            crate::ir::InsertPoint { block: entry, after: None },
            |ir| ir.builder().jump(target),
        );
        run(&mut ir);
        assert_eq!(ir.block(entry).succs, vec![target]);
        assert_eq!(ir.block(target).preds, vec![entry]);
    }

    #[test]
    fn conditional_branch_adds_target_and_fallthrough() {
        let mut ir = Ir::new();
        let entry = ir.entry_block();
        let taken = ir.push_block(None);
        let fallthrough = ir.push_block(None);
        ir.with_cursor(
            crate::ir::InsertPoint { block: entry, after: None },
            |ir| {
                let cond = ir.builder().const_i8(1);
                ir.builder().branch_true(cond, taken);
            },
        );
        let _ = Type::I8;
        run(&mut ir);
        let mut succs = ir.block(entry).succs.clone();
        succs.sort_by_key(|b| b.0);
        let mut expected = vec![taken, fallthrough];
        expected.sort_by_key(|b| b.0);
        assert_eq!(succs, expected);
    }
}
