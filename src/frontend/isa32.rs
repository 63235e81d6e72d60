//! A 32-bit load/store guest ISA: three-address ALU ops, a dedicated
//! compare instruction feeding a condition flag, and non-delayed
//! branches — the load/store shape of an ARM7-like encoding without
//! delay slots, to exercise the frontend contract against a second,
//! structurally different ISA.

use crate::cache::meta::{BranchType, Meta, INVALID_ADDR};
use crate::cache::unit::Analyzer;
use crate::guest::Memory;
use crate::ir::{Cond, Ir, Type, Width};

use super::{Frontend, TranslatedBody, CTX_FLAG_OFFSET, CTX_REG_BASE_OFFSET};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoded {
    Nop,
    MovImm { rd: u8, imm: i16 },
    Alu { rd: u8, rs: u8, rt: u8, op: u8 },
    Load { rd: u8, rb: u8, disp: i16 },
    Store { rs: u8, rb: u8, disp: i16 },
    Cmp { ra: u8, rb: u8 },
    Beq { disp: i16 },
    Bne { disp: i16 },
    Bra { disp: i16 },
    Bx { rb: u8 },
    Invalid,
}

fn decode_word(word: u32) -> Decoded {
    let class = (word >> 28) & 0xF;
    let rd = ((word >> 20) & 0xF) as u8;
    let rs = ((word >> 16) & 0xF) as u8;
    let rt = ((word >> 12) & 0xF) as u8;
    let disp16 = (word & 0xFFFF) as u16 as i16;
    let op4 = ((word >> 12) & 0xF) as u8;
    match class {
        0x0 => Decoded::Nop,
        0x1 => Decoded::MovImm { rd, imm: disp16 },
        0x2 => Decoded::Alu { rd, rs, rt, op: op4 },
        0x3 => Decoded::Load { rd, rb: rs, disp: disp16 },
        0x4 => Decoded::Store { rs: rd, rb: rs, disp: disp16 },
        0x5 => Decoded::Cmp { ra: rd, rb: rs },
        0x6 => Decoded::Beq { disp: disp16 },
        0x7 => Decoded::Bne { disp: disp16 },
        0x8 => Decoded::Bra { disp: disp16 },
        0x9 => Decoded::Bx { rb: rs },
        _ => Decoded::Invalid,
    }
}

fn is_terminator(d: Decoded) -> bool {
    matches!(
        d,
        Decoded::Beq { .. } | Decoded::Bne { .. } | Decoded::Bra { .. } | Decoded::Bx { .. }
    )
}

fn reg_offset(r: u8) -> i32 {
    CTX_REG_BASE_OFFSET + r as i32 * 4
}

/// Displacements are counted in 32-bit words, relative to the address
/// immediately after the branch itself (no delay slot on this ISA).
fn branch_target(after: u32, disp: i16) -> u32 {
    (after as i64 + disp as i64 * 4) as u32
}

pub struct Isa32;

impl Analyzer for Isa32 {
    fn analyze_code(&self, guest: &dyn Memory, meta: &mut Meta) -> bool {
        let start = meta.guest_addr;
        let mut addr = start;
        let mut num_instrs = 0u32;

        loop {
            let decoded = decode_word(guest.read32(addr));
            if matches!(decoded, Decoded::Invalid) {
                if num_instrs == 0 {
                    return false;
                }
                meta.branch_type = BranchType::FallThrough;
                meta.branch_addr = INVALID_ADDR;
                meta.next_addr = addr;
                finish(meta, start, addr, num_instrs);
                return true;
            }
            addr += 4;
            num_instrs += 1;

            if is_terminator(decoded) {
                match decoded {
                    Decoded::Beq { disp } => {
                        meta.branch_type = BranchType::StaticTrue;
                        meta.branch_addr = branch_target(addr, disp);
                        meta.next_addr = addr;
                    }
                    Decoded::Bne { disp } => {
                        meta.branch_type = BranchType::StaticFalse;
                        meta.branch_addr = branch_target(addr, disp);
                        meta.next_addr = addr;
                    }
                    Decoded::Bra { disp } => {
                        meta.branch_type = BranchType::Static;
                        meta.branch_addr = branch_target(addr, disp);
                        meta.next_addr = INVALID_ADDR;
                    }
                    Decoded::Bx { .. } => {
                        meta.branch_type = BranchType::Dynamic;
                        meta.branch_addr = INVALID_ADDR;
                        meta.next_addr = INVALID_ADDR;
                    }
                    _ => unreachable!(),
                }
                finish(meta, start, addr, num_instrs);
                return true;
            }
        }
    }
}

fn finish(meta: &mut Meta, start: u32, end: u32, num_instrs: u32) {
    meta.size = end - start;
    meta.num_instrs = num_instrs;
    meta.num_cycles = num_instrs;
}

impl Frontend for Isa32 {
    fn name(&self) -> &'static str {
        "isa32"
    }

    fn decode_body(&self, ir: &mut Ir, guest: &dyn Memory, meta: &Meta, fastmem: bool) -> TranslatedBody {
        let mut addr = meta.guest_addr;
        let end = meta.guest_addr + meta.size;
        let mut body = TranslatedBody::default();

        while addr < end {
            let decoded = decode_word(guest.read32(addr));
            addr += 4;
            let mut b = ir.builder();

            match decoded {
                Decoded::Nop | Decoded::Invalid => {}
                Decoded::MovImm { rd, imm } => {
                    let v = b.const_i32(imm as i32);
                    b.store_context(reg_offset(rd), v);
                }
                Decoded::Alu { rd, rs, rt, op } => {
                    let a = b.load_context(reg_offset(rs), Type::I32);
                    let c = b.load_context(reg_offset(rt), Type::I32);
                    let r = match op {
                        0 => b.iadd(a, c),
                        1 => b.isub(a, c),
                        2 => b.band(a, c),
                        3 => b.bor(a, c),
                        4 => b.bxor(a, c),
                        5 => b.shl(a, c),
                        _ => b.lshr(a, c),
                    };
                    b.store_context(reg_offset(rd), r);
                }
                Decoded::Load { rd, rb, disp } => {
                    let base = b.load_context(reg_offset(rb), Type::I32);
                    let off = b.const_i32(disp as i32);
                    let eff = b.iadd(base, off);
                    let v = if fastmem {
                        b.load_fast(eff, Width::W32, Type::I32)
                    } else {
                        b.load_direct(eff, Width::W32, Type::I32)
                    };
                    b.store_context(reg_offset(rd), v);
                }
                Decoded::Store { rs, rb, disp } => {
                    let base = b.load_context(reg_offset(rb), Type::I32);
                    let off = b.const_i32(disp as i32);
                    let eff = b.iadd(base, off);
                    let v = b.load_context(reg_offset(rs), Type::I32);
                    if fastmem {
                        b.store_fast(eff, v, Width::W32);
                    } else {
                        b.store_direct(eff, v, Width::W32);
                    }
                }
                Decoded::Cmp { ra, rb } => {
                    let a = b.load_context(reg_offset(ra), Type::I32);
                    let c = b.load_context(reg_offset(rb), Type::I32);
                    let flag = b.icmp(Cond::Eq, a, c);
                    b.store_context(CTX_FLAG_OFFSET, flag);
                }
                Decoded::Beq { .. } => {
                    let flag = b.load_context(CTX_FLAG_OFFSET, Type::I8);
                    let zero = b.const_i8(0);
                    body.cond = Some(b.icmp(Cond::Ne, flag, zero));
                }
                Decoded::Bne { .. } => {
                    let flag = b.load_context(CTX_FLAG_OFFSET, Type::I8);
                    let zero = b.const_i8(0);
                    body.cond = Some(b.icmp(Cond::Eq, flag, zero));
                }
                Decoded::Bra { .. } => {}
                Decoded::Bx { rb } => {
                    body.dynamic_target = Some(b.load_context(reg_offset(rb), Type::I32));
                }
            }
        }
        body
    }

    fn dump_code(&self, guest: &dyn Memory, addr: u32, size: u32) -> String {
        let mut out = String::new();
        let mut a = addr;
        while a < addr + size {
            let decoded = decode_word(guest.read32(a));
            out.push_str(&format!("0x{a:08x}: {decoded:?}\n"));
            a += 4;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::test_support::FakeGuest;

    fn word(class: u8, rd: u8, rs: u8, rt: u8) -> u32 {
        ((class as u32) << 28) | ((rd as u32) << 20) | ((rs as u32) << 16) | ((rt as u32) << 12)
    }

    #[test]
    fn beq_with_positive_displacement_is_static_true() {
        let mut guest = FakeGuest::with_capacity(32);
        let beq = word(0x6, 0, 0, 0) | 2; // disp = 2 words
        guest.load(0, &beq.to_le_bytes());

        let isa = Isa32;
        let mut meta = Meta::new(0);
        assert!(isa.analyze_code(&guest, &mut meta));
        assert_eq!(meta.branch_type, BranchType::StaticTrue);
        assert_eq!(meta.next_addr, 4);
        assert_eq!(meta.branch_addr, 4u32.wrapping_add(2 * 4));
    }

    #[test]
    fn invalid_opening_instruction_fails_analysis() {
        let mut guest = FakeGuest::with_capacity(16);
        guest.load(0, &0xF000_0000u32.to_le_bytes());
        let isa = Isa32;
        let mut meta = Meta::new(0);
        assert!(!isa.analyze_code(&guest, &mut meta));
    }

    #[test]
    fn bx_terminates_as_dynamic_with_no_delay_slot() {
        let mut guest = FakeGuest::with_capacity(16);
        let bx = word(0x9, 0, 3, 0);
        guest.load(0, &bx.to_le_bytes());
        let isa = Isa32;
        let mut meta = Meta::new(0);
        assert!(isa.analyze_code(&guest, &mut meta));
        assert_eq!(meta.branch_type, BranchType::Dynamic);
        assert_eq!(meta.num_instrs, 1);
        assert_eq!(meta.size, 4);
    }
}
