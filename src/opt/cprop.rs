//! Constant propagation (§4.4 pass 3): fold an instruction whose
//! operands are all constants into a single new constant, wrapping
//! integer results to the result type's bit width, then rewrite every
//! use of the old result to the fold. The instruction itself is left
//! in place with zero uses for DCE to remove.

use crate::ir::{Cond, ConstPayload, Ir, Opcode, Type, ValueId, ValueKind};

pub fn run(ir: &mut Ir) {
    let blocks: Vec<_> = ir.blocks().to_vec();
    for b in blocks {
        let instrs: Vec<_> = ir.block_instrs(b).collect();
        for id in instrs {
            let instr = ir.instr(id);
            let Some(result) = instr.result else { continue };
            let opcode = instr.opcode.clone();
            let args = instr.args;
            let result_ty = ir.value(result).ty;

            let Some(folded) = fold(ir, &opcode, &args, result_ty) else {
                continue;
            };
            let new_value = ir.new_const(folded);
            ir.replace_uses(result, new_value);
        }
    }
}

fn const_i64(ir: &Ir, v: Option<ValueId>) -> Option<i64> {
    match &ir.value(v?).kind {
        ValueKind::Const(payload) => payload.as_i64(),
        _ => None,
    }
}

fn const_f32(ir: &Ir, v: Option<ValueId>) -> Option<f32> {
    match &ir.value(v?).kind {
        ValueKind::Const(ConstPayload::F32(f)) => Some(*f),
        _ => None,
    }
}

fn const_f64(ir: &Ir, v: Option<ValueId>) -> Option<f64> {
    match &ir.value(v?).kind {
        ValueKind::Const(ConstPayload::F64(f)) => Some(*f),
        _ => None,
    }
}

fn wrap(ty: Type, v: i64) -> i64 {
    match ty {
        Type::I8 => v as i8 as i64,
        Type::I16 => v as i16 as i64,
        Type::I32 => v as i32 as i64,
        _ => v,
    }
}

fn make_int(ty: Type, v: i64) -> ConstPayload {
    match ty {
        Type::I8 => ConstPayload::I8(v as i8),
        Type::I16 => ConstPayload::I16(v as i16),
        Type::I32 => ConstPayload::I32(v as i32),
        Type::I64 => ConstPayload::I64(v),
        _ => ConstPayload::I64(v),
    }
}

fn eval_cond_i64(cond: Cond, a: i64, b: i64) -> bool {
    match cond {
        Cond::Eq => a == b,
        Cond::Ne => a != b,
        Cond::Lt => a < b,
        Cond::Le => a <= b,
        Cond::Gt => a > b,
        Cond::Ge => a >= b,
        Cond::UnsignedLt => (a as u64) < (b as u64),
        Cond::UnsignedLe => (a as u64) <= (b as u64),
        Cond::UnsignedGt => (a as u64) > (b as u64),
        Cond::UnsignedGe => (a as u64) >= (b as u64),
    }
}

fn eval_cond_f64(cond: Cond, a: f64, b: f64) -> bool {
    match cond {
        Cond::Eq => a == b,
        Cond::Ne => a != b,
        Cond::Lt => a < b,
        Cond::Le => a <= b,
        Cond::Gt => a > b,
        Cond::Ge => a >= b,
        // Unordered comparisons have no unsigned analogue for floats.
        Cond::UnsignedLt | Cond::UnsignedLe | Cond::UnsignedGt | Cond::UnsignedGe => false,
    }
}

fn fold(
    ir: &Ir,
    opcode: &Opcode,
    args: &[Option<ValueId>; 4],
    result_ty: Type,
) -> Option<ConstPayload> {
    match opcode {
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor
        | Opcode::Shl | Opcode::LShr | Opcode::AShr => {
            let a = const_i64(ir, args[0])?;
            let b = const_i64(ir, args[1])?;
            let raw = match opcode {
                Opcode::Add => a.wrapping_add(b),
                Opcode::Sub => a.wrapping_sub(b),
                Opcode::Mul => a.wrapping_mul(b),
                Opcode::And => a & b,
                Opcode::Or => a | b,
                Opcode::Xor => a ^ b,
                Opcode::Shl => a.wrapping_shl(b as u32),
                Opcode::LShr => ((a as u64) >> (b as u32 & 63)) as i64,
                Opcode::AShr => a.wrapping_shr(b as u32),
                _ => unreachable!(),
            };
            Some(make_int(result_ty, wrap(result_ty, raw)))
        }
        Opcode::UDiv | Opcode::URem => {
            let a = const_i64(ir, args[0])? as u64;
            let b = const_i64(ir, args[1])? as u64;
            if b == 0 {
                return None;
            }
            let raw = if matches!(opcode, Opcode::UDiv) { a / b } else { a % b };
            Some(make_int(result_ty, wrap(result_ty, raw as i64)))
        }
        Opcode::SDiv | Opcode::SRem => {
            let a = const_i64(ir, args[0])?;
            let b = const_i64(ir, args[1])?;
            if b == 0 {
                return None;
            }
            let raw = if matches!(opcode, Opcode::SDiv) { a.wrapping_div(b) } else { a.wrapping_rem(b) };
            Some(make_int(result_ty, wrap(result_ty, raw)))
        }
        Opcode::Neg => {
            let a = const_i64(ir, args[0])?;
            Some(make_int(result_ty, wrap(result_ty, a.wrapping_neg())))
        }
        Opcode::Not => {
            let a = const_i64(ir, args[0])?;
            Some(make_int(result_ty, wrap(result_ty, !a)))
        }
        Opcode::Icmp(cond) => {
            let a = const_i64(ir, args[0])?;
            let b = const_i64(ir, args[1])?;
            Some(ConstPayload::I8(eval_cond_i64(*cond, a, b) as i8))
        }
        Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv => {
            if result_ty == Type::F32 {
                let a = const_f32(ir, args[0])?;
                let b = const_f32(ir, args[1])?;
                let r = match opcode {
                    Opcode::FAdd => a + b,
                    Opcode::FSub => a - b,
                    Opcode::FMul => a * b,
                    Opcode::FDiv => a / b,
                    _ => unreachable!(),
                };
                Some(ConstPayload::F32(r))
            } else {
                let a = const_f64(ir, args[0])?;
                let b = const_f64(ir, args[1])?;
                let r = match opcode {
                    Opcode::FAdd => a + b,
                    Opcode::FSub => a - b,
                    Opcode::FMul => a * b,
                    Opcode::FDiv => a / b,
                    _ => unreachable!(),
                };
                Some(ConstPayload::F64(r))
            }
        }
        Opcode::FNeg => {
            if result_ty == Type::F32 {
                Some(ConstPayload::F32(-const_f32(ir, args[0])?))
            } else {
                Some(ConstPayload::F64(-const_f64(ir, args[0])?))
            }
        }
        Opcode::Fcmp(cond) => {
            let arg_ty = ir.value(args[0]?).ty;
            let result = if arg_ty == Type::F32 {
                let a = const_f32(ir, args[0])? as f64;
                let b = const_f32(ir, args[1])? as f64;
                eval_cond_f64(*cond, a, b)
            } else {
                let a = const_f64(ir, args[0])?;
                let b = const_f64(ir, args[1])?;
                eval_cond_f64(*cond, a, b)
            };
            Some(ConstPayload::I8(result as i8))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_constant_add_and_rewrites_uses() {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let x = b.const_i32(2);
        let y = b.const_i32(3);
        let sum = b.iadd(x, y);
        let doubled = b.iadd(sum, sum);
        b.store_context(0, doubled);
        drop(b);

        run(&mut ir);
        assert!(ir.check_invariants().is_ok());
        match &ir.value(sum).kind {
            ValueKind::Def(_) => {}
            ValueKind::Const(_) => panic!("fold must not mutate the original instruction result"),
        }
        // sum's result now has no uses; `doubled`'s args were rewritten
        // to fresh constants whose folded value is 10.
        assert!(ir.value(sum).uses.is_empty());
    }

    #[test]
    fn division_by_constant_zero_is_left_unfolded() {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let x = b.const_i32(7);
        let zero = b.const_i32(0);
        let q = b.sdiv(x, zero);
        b.store_context(0, q);
        drop(b);

        run(&mut ir);
        assert!(matches!(ir.value(q).kind, ValueKind::Def(_)));
    }
}
