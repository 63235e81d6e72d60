//! Expression simplification (§4.4 pass 4): a small fixed table of
//! algebraic identities (`x+0`, `x*1`, `x*0`, `x&0`, `x|0`, `x^x`,
//! double negation, compare-with-self). Runs before DCE so DCE can
//! remove whatever this pass proves dead.

use crate::ir::{Cond, ConstPayload, Ir, Opcode, Type, ValueId, ValueKind};

enum Outcome {
    SameAs(ValueId),
    Zero(Type),
    Bool(bool),
}

pub fn run(ir: &mut Ir) {
    let blocks: Vec<_> = ir.blocks().to_vec();
    for b in blocks {
        let instrs: Vec<_> = ir.block_instrs(b).collect();
        for id in instrs {
            let instr = ir.instr(id);
            let Some(result) = instr.result else { continue };
            let opcode = instr.opcode.clone();
            let args = instr.args;

            let Some(outcome) = simplify(ir, &opcode, &args) else {
                continue;
            };
            let replacement = match outcome {
                Outcome::SameAs(v) => v,
                Outcome::Zero(ty) => ir.new_const(zero_payload(ty)),
                Outcome::Bool(v) => ir.new_const(ConstPayload::I8(v as i8)),
            };
            ir.replace_uses(result, replacement);
        }
    }
}

fn zero_payload(ty: Type) -> ConstPayload {
    match ty {
        Type::I8 => ConstPayload::I8(0),
        Type::I16 => ConstPayload::I16(0),
        Type::I32 => ConstPayload::I32(0),
        Type::F32 => ConstPayload::F32(0.0),
        Type::F64 => ConstPayload::F64(0.0),
        _ => ConstPayload::I64(0),
    }
}

fn const_i64(ir: &Ir, v: Option<ValueId>) -> Option<i64> {
    match &ir.value(v?).kind {
        ValueKind::Const(payload) => payload.as_i64(),
        _ => None,
    }
}

fn is_zero(ir: &Ir, v: Option<ValueId>) -> bool {
    const_i64(ir, v) == Some(0)
}

fn is_one(ir: &Ir, v: Option<ValueId>) -> bool {
    const_i64(ir, v) == Some(1)
}

fn same_operand(a: Option<ValueId>, b: Option<ValueId>) -> bool {
    a.is_some() && a == b
}

fn simplify(ir: &Ir, opcode: &Opcode, args: &[Option<ValueId>; 4]) -> Option<Outcome> {
    match opcode {
        Opcode::Add if is_zero(ir, args[1]) => Some(Outcome::SameAs(args[0]?)),
        Opcode::Add if is_zero(ir, args[0]) => Some(Outcome::SameAs(args[1]?)),
        Opcode::Sub if is_zero(ir, args[1]) => Some(Outcome::SameAs(args[0]?)),
        Opcode::Mul if is_one(ir, args[1]) => Some(Outcome::SameAs(args[0]?)),
        Opcode::Mul if is_one(ir, args[0]) => Some(Outcome::SameAs(args[1]?)),
        Opcode::Mul if is_zero(ir, args[0]) => Some(Outcome::SameAs(args[0]?)),
        Opcode::Mul if is_zero(ir, args[1]) => Some(Outcome::SameAs(args[1]?)),
        Opcode::And if is_zero(ir, args[0]) => Some(Outcome::SameAs(args[0]?)),
        Opcode::And if is_zero(ir, args[1]) => Some(Outcome::SameAs(args[1]?)),
        Opcode::Or if is_zero(ir, args[1]) => Some(Outcome::SameAs(args[0]?)),
        Opcode::Or if is_zero(ir, args[0]) => Some(Outcome::SameAs(args[1]?)),
        Opcode::Xor if same_operand(args[0], args[1]) => Some(Outcome::Zero(ir.value(args[0]?).ty)),
        Opcode::Sub if same_operand(args[0], args[1]) => Some(Outcome::Zero(ir.value(args[0]?).ty)),
        Opcode::Icmp(cond) if same_operand(args[0], args[1]) => Some(Outcome::Bool(cond_true_for_self(*cond))),
        Opcode::Fcmp(cond) if same_operand(args[0], args[1]) => Some(Outcome::Bool(cond_true_for_self(*cond))),
        Opcode::Neg => negate_of_neg(ir, args[0]).map(Outcome::SameAs),
        _ => None,
    }
}

/// Whether `cond` holds when both operands are the same value.
fn cond_true_for_self(cond: Cond) -> bool {
    match cond {
        Cond::Eq | Cond::Le | Cond::Ge | Cond::UnsignedLe | Cond::UnsignedGe => true,
        Cond::Ne | Cond::Lt | Cond::Gt | Cond::UnsignedLt | Cond::UnsignedGt => false,
    }
}

fn negate_of_neg(ir: &Ir, v: Option<ValueId>) -> Option<ValueId> {
    match &ir.value(v?).kind {
        ValueKind::Def(def) => {
            let defining = ir.instr(*def);
            matches!(defining.opcode, Opcode::Neg).then_some(defining.args[0]).flatten()
        }
        ValueKind::Const(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueKind;

    #[test]
    fn add_zero_is_replaced_by_the_non_zero_operand() {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let x = b.const_i32(41);
        let zero = b.const_i32(0);
        let sum = b.iadd(x, zero);
        b.store_context(0, sum);
        drop(b);

        run(&mut ir);
        assert!(ir.value(sum).uses.is_empty());
    }

    #[test]
    fn double_negation_folds_to_the_original_operand() {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let x = b.const_i32(7);
        let neg1 = b.ineg(x);
        let neg2 = b.ineg(neg1);
        b.store_context(0, neg2);
        drop(b);

        run(&mut ir);
        assert!(ir.value(neg2).uses.is_empty());
        assert!(matches!(ir.value(neg1).kind, ValueKind::Def(_)));
    }

    #[test]
    fn xor_of_self_becomes_a_fresh_zero_constant() {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let x = b.const_i32(9);
        let z = b.bxor(x, x);
        b.store_context(0, z);
        drop(b);

        run(&mut ir);
        assert!(ir.value(z).uses.is_empty());
    }

    #[test]
    fn icmp_eq_of_self_folds_to_a_true_constant() {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let x = b.const_i32(9);
        let eq = b.icmp(Cond::Eq, x, x);
        b.store_context(0, eq);
        drop(b);

        run(&mut ir);
        assert!(ir.value(eq).uses.is_empty());
    }

    #[test]
    fn icmp_lt_of_self_folds_to_a_false_constant() {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let x = b.const_i32(9);
        let lt = b.icmp(Cond::Lt, x, x);
        b.store_context(0, lt);
        drop(b);

        run(&mut ir);
        assert!(ir.value(lt).uses.is_empty());
    }
}
