//! Dead-code elimination (§4.4 pass 5): remove an instruction whose
//! result has no live uses and carries neither `SIDE_EFFECT` nor
//! `MAY_TRAP` — exactly the liveness rule §3 already states as an IR
//! invariant. Runs to a fixed point since removing a dead instruction
//! can make its own operands' defining instructions dead in turn.

use crate::ir::{InstrFlags, Ir};

pub fn run(ir: &mut Ir) {
    loop {
        let mut changed = false;
        let blocks: Vec<_> = ir.blocks().to_vec();
        for b in blocks {
            let instrs: Vec<_> = ir.block_instrs(b).collect();
            for id in instrs {
                let instr = ir.instr(id);
                let Some(result) = instr.result else { continue };
                if instr.flags.intersects(InstrFlags::SIDE_EFFECT | InstrFlags::MAY_TRAP) {
                    continue;
                }
                if !ir.value(result).uses.is_empty() {
                    continue;
                }
                ir.remove_instr(id);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Ir;

    #[test]
    fn dead_arithmetic_chain_is_fully_removed() {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let x = b.const_i32(1);
        let y = b.const_i32(2);
        let a = b.iadd(x, y);
        let _unused = b.imul(a, a);
        b.ret();
        drop(b);

        let entry = ir.entry_block();
        run(&mut ir);
        // Only `ret` (has SIDE_EFFECT via default flags) should remain.
        assert_eq!(ir.block_instrs(entry).count(), 1);
        assert!(ir.check_invariants().is_ok());
    }

    #[test]
    fn side_effecting_store_survives_with_no_uses() {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let x = b.const_i32(5);
        b.store_context(0, x);
        drop(b);

        let entry = ir.entry_block();
        run(&mut ir);
        assert_eq!(ir.block_instrs(entry).count(), 1);
    }

    #[test]
    fn fastmem_load_with_no_uses_survives_as_may_trap() {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let addr = b.const_i64(0x1000);
        let _v = b.load_fast(addr, crate::ir::Width::W32, crate::ir::Type::I32);
        b.ret();
        drop(b);

        let entry = ir.entry_block();
        run(&mut ir);
        assert_eq!(ir.block_instrs(entry).count(), 2);
    }
}
