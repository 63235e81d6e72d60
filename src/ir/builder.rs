//! Typed construction helpers over [`Ir`], per SPEC_FULL.md §4.3.
//!
//! `IrBuilder` is a thin `&mut Ir` wrapper — it exists so call sites read
//! as `ir.builder().iadd(a, b)` instead of threading opcodes and arg
//! arrays by hand, the same role `nvm::jit::ir::IrBuilder` plays for its
//! fixed x86 translation, generalized here into opcode-agnostic helpers.

use std::fmt;

use super::{BlockId, Cond, ConstPayload, Ir, LocalId, Opcode, Type, ValueId, Width};

pub struct IrBuilder<'a> {
    ir: &'a mut Ir,
}

macro_rules! binop {
    ($name:ident, $opcode:expr, $ty_of:expr) => {
        pub fn $name(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
            let ty = $ty_of(self.ir, lhs);
            self.ir
                .emit($opcode, [Some(lhs), Some(rhs), None, None], ty, None)
                .expect("binary op always produces a result")
        }
    };
}

macro_rules! unop {
    ($name:ident, $opcode:expr, $ty_of:expr) => {
        pub fn $name(&mut self, v: ValueId) -> ValueId {
            let ty = $ty_of(self.ir, v);
            self.ir
                .emit($opcode, [Some(v), None, None, None], ty, None)
                .expect("unary op always produces a result")
        }
    };
}

fn same_ty(ir: &Ir, v: ValueId) -> Type {
    ir.value(v).ty
}

impl<'a> IrBuilder<'a> {
    pub fn new(ir: &'a mut Ir) -> Self {
        Self { ir }
    }

    pub fn ir(&mut self) -> &mut Ir {
        self.ir
    }

    // -- constants --------------------------------------------------
    pub fn const_i8(&mut self, v: i8) -> ValueId {
        self.ir.new_const(ConstPayload::I8(v))
    }
    pub fn const_i16(&mut self, v: i16) -> ValueId {
        self.ir.new_const(ConstPayload::I16(v))
    }
    pub fn const_i32(&mut self, v: i32) -> ValueId {
        self.ir.new_const(ConstPayload::I32(v))
    }
    pub fn const_i64(&mut self, v: i64) -> ValueId {
        self.ir.new_const(ConstPayload::I64(v))
    }
    pub fn const_f32(&mut self, v: f32) -> ValueId {
        self.ir.new_const(ConstPayload::F32(v))
    }
    pub fn const_f64(&mut self, v: f64) -> ValueId {
        self.ir.new_const(ConstPayload::F64(v))
    }
    pub fn const_str(&mut self, args: fmt::Arguments<'_>) -> ValueId {
        self.ir.new_const(ConstPayload::String(args.to_string()))
    }
    pub fn const_ptr(&mut self, v: u64) -> ValueId {
        self.ir.new_const(ConstPayload::Ptr(v))
    }
    pub fn const_block(&mut self, b: BlockId) -> ValueId {
        self.ir.new_const(ConstPayload::Block(b))
    }

    // -- locals -------------------------------------------------------
    pub fn new_local(&mut self, ty: Type) -> LocalId {
        self.ir.new_local(ty)
    }
    pub fn reuse_local(&mut self, existing: LocalId, ty: Type) -> LocalId {
        self.ir.reuse_local(existing, ty)
    }

    // -- arithmetic / bitwise -----------------------------------------
    binop!(iadd, Opcode::Add, same_ty);
    binop!(isub, Opcode::Sub, same_ty);
    binop!(imul, Opcode::Mul, same_ty);
    binop!(udiv, Opcode::UDiv, same_ty);
    binop!(sdiv, Opcode::SDiv, same_ty);
    binop!(urem, Opcode::URem, same_ty);
    binop!(srem, Opcode::SRem, same_ty);
    binop!(band, Opcode::And, same_ty);
    binop!(bor, Opcode::Or, same_ty);
    binop!(bxor, Opcode::Xor, same_ty);
    binop!(shl, Opcode::Shl, same_ty);
    binop!(lshr, Opcode::LShr, same_ty);
    binop!(ashr, Opcode::AShr, same_ty);
    unop!(ineg, Opcode::Neg, same_ty);
    unop!(bnot, Opcode::Not, same_ty);

    pub fn icmp(&mut self, cond: Cond, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.ir
            .emit(
                Opcode::Icmp(cond),
                [Some(lhs), Some(rhs), None, None],
                Type::I8,
                None,
            )
            .unwrap()
    }

    // -- floating point -------------------------------------------------
    binop!(fadd, Opcode::FAdd, same_ty);
    binop!(fsub, Opcode::FSub, same_ty);
    binop!(fmul, Opcode::FMul, same_ty);
    binop!(fdiv, Opcode::FDiv, same_ty);
    unop!(fneg, Opcode::FNeg, same_ty);

    pub fn fcmp(&mut self, cond: Cond, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.ir
            .emit(
                Opcode::Fcmp(cond),
                [Some(lhs), Some(rhs), None, None],
                Type::I8,
                None,
            )
            .unwrap()
    }

    // -- vector (minimal) -------------------------------------------------
    binop!(vadd, Opcode::VAdd, same_ty);
    binop!(vsub, Opcode::VSub, same_ty);
    binop!(vand, Opcode::VAnd, same_ty);
    binop!(vor, Opcode::VOr, same_ty);
    binop!(vxor, Opcode::VXor, same_ty);

    // -- conversions -------------------------------------------------
    pub fn sext(&mut self, v: ValueId, to: Type) -> ValueId {
        let op = match to {
            Type::I16 => Opcode::Sext8,
            Type::I32 => Opcode::Sext16,
            Type::I64 => Opcode::Sext32,
            _ => panic!("sext: unsupported target type {to}"),
        };
        self.ir.emit(op, [Some(v), None, None, None], to, None).unwrap()
    }
    pub fn zext(&mut self, v: ValueId, to: Type) -> ValueId {
        let op = match to {
            Type::I16 => Opcode::Zext8,
            Type::I32 => Opcode::Zext16,
            Type::I64 => Opcode::Zext32,
            _ => panic!("zext: unsupported target type {to}"),
        };
        self.ir.emit(op, [Some(v), None, None, None], to, None).unwrap()
    }
    pub fn trunc(&mut self, v: ValueId, to: Type) -> ValueId {
        let op = match to {
            Type::I8 => Opcode::Trunc8,
            Type::I16 => Opcode::Trunc16,
            Type::I32 => Opcode::Trunc32,
            _ => panic!("trunc: unsupported target type {to}"),
        };
        self.ir.emit(op, [Some(v), None, None, None], to, None).unwrap()
    }
    pub fn float_to_int(&mut self, v: ValueId, to: Type) -> ValueId {
        self.ir
            .emit(Opcode::FloatToInt, [Some(v), None, None, None], to, None)
            .unwrap()
    }
    pub fn int_to_float(&mut self, v: ValueId, to: Type) -> ValueId {
        self.ir
            .emit(Opcode::IntToFloat, [Some(v), None, None, None], to, None)
            .unwrap()
    }
    pub fn fext(&mut self, v: ValueId) -> ValueId {
        self.ir
            .emit(Opcode::FExt, [Some(v), None, None, None], Type::F64, None)
            .unwrap()
    }
    pub fn ftrunc(&mut self, v: ValueId) -> ValueId {
        self.ir
            .emit(Opcode::FTrunc, [Some(v), None, None, None], Type::F32, None)
            .unwrap()
    }

    // -- loads / stores -------------------------------------------------
    pub fn load_context(&mut self, offset: i32, ty: Type) -> ValueId {
        self.ir
            .emit(
                Opcode::LoadContext {
                    offset,
                    ty_bits: ty.bits(),
                },
                [None; 4],
                ty,
                None,
            )
            .unwrap()
    }
    pub fn store_context(&mut self, offset: i32, value: ValueId) {
        self.ir.emit(
            Opcode::StoreContext { offset },
            [Some(value), None, None, None],
            Type::V,
            None,
        );
    }
    pub fn load_local(&mut self, local: LocalId, ty: Type) -> ValueId {
        self.ir
            .emit(Opcode::LoadLocal(local), [None; 4], ty, None)
            .unwrap()
    }
    pub fn store_local(&mut self, local: LocalId, value: ValueId) {
        self.ir
            .emit(Opcode::StoreLocal(local), [Some(value), None, None, None], Type::V, None);
    }
    pub fn load_direct(&mut self, addr: ValueId, width: Width, ty: Type) -> ValueId {
        self.ir
            .emit(Opcode::LoadDirect(width), [Some(addr), None, None, None], ty, None)
            .unwrap()
    }
    pub fn store_direct(&mut self, addr: ValueId, value: ValueId, width: Width) {
        self.ir.emit(
            Opcode::StoreDirect(width),
            [Some(addr), Some(value), None, None],
            Type::V,
            None,
        );
    }
    pub fn load_fast(&mut self, addr: ValueId, width: Width, ty: Type) -> ValueId {
        self.ir
            .emit(Opcode::LoadFast(width), [Some(addr), None, None, None], ty, None)
            .unwrap()
    }
    pub fn store_fast(&mut self, addr: ValueId, value: ValueId, width: Width) {
        self.ir.emit(
            Opcode::StoreFast(width),
            [Some(addr), Some(value), None, None],
            Type::V,
            None,
        );
    }
    pub fn load_slow(&mut self, addr: ValueId, width: Width, ty: Type) -> ValueId {
        self.ir
            .emit(Opcode::LoadSlow(width), [Some(addr), None, None, None], ty, None)
            .unwrap()
    }
    pub fn store_slow(&mut self, addr: ValueId, value: ValueId, width: Width) {
        self.ir.emit(
            Opcode::StoreSlow(width),
            [Some(addr), Some(value), None, None],
            Type::V,
            None,
        );
    }

    // -- branches -------------------------------------------------
    pub fn jump(&mut self, target: BlockId) {
        let t = self.const_block(target);
        self.ir.emit(Opcode::Jump, [Some(t), None, None, None], Type::V, None);
    }
    pub fn branch_true(&mut self, cond: ValueId, target: BlockId) {
        let t = self.const_block(target);
        self.ir
            .emit(Opcode::BranchTrue, [Some(cond), Some(t), None, None], Type::V, None);
    }
    pub fn branch_false(&mut self, cond: ValueId, target: BlockId) {
        let t = self.const_block(target);
        self.ir
            .emit(Opcode::BranchFalse, [Some(cond), Some(t), None, None], Type::V, None);
    }

    // -- calls -------------------------------------------------
    pub fn call(&mut self, target: u64, args: &[ValueId]) {
        self.emit_call(Opcode::Call { target, noreturn: false }, args);
    }
    pub fn call_noreturn(&mut self, target: u64, args: &[ValueId]) {
        self.emit_call(Opcode::Call { target, noreturn: true }, args);
    }
    pub fn call_cond(&mut self, target: u64, cond: ValueId, args: &[ValueId]) {
        assert!(args.len() <= 2, "calls take at most 2 arguments");
        let mut slots = [Some(cond), None, None, None];
        for (i, a) in args.iter().enumerate() {
            slots[i + 1] = Some(*a);
        }
        self.ir.emit(Opcode::CallCond { target }, slots, Type::V, None);
    }
    pub fn fallback(&mut self) {
        self.ir.emit(Opcode::Fallback, [None; 4], Type::V, None);
    }
    pub fn ret(&mut self) {
        self.ir.emit(Opcode::Ret, [None; 4], Type::V, None);
    }

    fn emit_call(&mut self, opcode: Opcode, args: &[ValueId]) {
        assert!(args.len() <= 2, "calls take at most 2 arguments");
        let mut slots = [None; 4];
        for (i, a) in args.iter().enumerate() {
            slots[i] = Some(*a);
        }
        self.ir.emit(opcode, slots, Type::V, None);
    }

    // -- debug directives -------------------------------------------------
    pub fn debug_info(&mut self, msg: impl Into<String>) {
        self.ir
            .emit(Opcode::DebugInfo(msg.into()), [None; 4], Type::V, None);
    }
    pub fn breakpoint(&mut self) {
        self.ir.emit(Opcode::Breakpoint, [None; 4], Type::V, None);
    }
    pub fn runtime_assert(&mut self, cond: ValueId, msg: impl Into<String>) {
        self.ir
            .emit(Opcode::Assert(msg.into()), [Some(cond), None, None, None], Type::V, None);
    }
}
