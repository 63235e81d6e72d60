//! A reference [`Backend`] that performs no real host encoding. It
//! bump-allocates host addresses and treats each IR instruction as one
//! fixed-size opaque record — enough to drive the coordinator's
//! cache/edge/invalidation logic end to end without a real x64 emitter
//! (out of scope per §1), grounded in the bump-allocation shape of
//! `nvm::jit::codegen::CodeBuffer` without its actual x86 byte encoding.

use crate::ir::{Instruction, InstrFlags, Ir, Opcode};

use super::{AssembleError, Assembled, Backend, Exception, Register, RegisterBank, TypeMask};

/// Bytes charged per IR instruction, regardless of opcode.
const RECORD_SIZE: u64 = 8;
/// Host addresses are bump-allocated starting here so they are visibly
/// distinct from guest addresses in logs and tests.
const BASE_ADDR: u64 = 0x7f00_0000_0000;

pub struct MockBackend {
    capacity: u64,
    cursor: u64,
    /// `[start, end)` host-address ranges of fastmem-tagged instructions,
    /// consulted by `handle_exception`.
    fastmem_sites: Vec<(u64, u64)>,
    register_bank: RegisterBank,
}

impl MockBackend {
    pub fn new(capacity: u64) -> Self {
        let registers = vec![
            Register { id: 0, type_mask: TypeMask::GPR },
            Register { id: 1, type_mask: TypeMask::GPR },
            Register { id: 2, type_mask: TypeMask::GPR },
            Register { id: 3, type_mask: TypeMask::GPR },
            Register { id: 4, type_mask: TypeMask::F32 | TypeMask::F64 },
            Register { id: 5, type_mask: TypeMask::F32 | TypeMask::F64 },
        ];
        Self {
            capacity,
            cursor: 0,
            fastmem_sites: Vec::new(),
            register_bank: RegisterBank { registers },
        }
    }

    fn is_fastmem(instr: &Instruction) -> bool {
        instr.flags.contains(InstrFlags::MAY_TRAP)
            && matches!(instr.opcode, Opcode::LoadFast(_) | Opcode::StoreFast(_))
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(1 << 20)
    }
}

impl Backend for MockBackend {
    fn reset(&mut self) {
        self.cursor = 0;
        self.fastmem_sites.clear();
    }

    fn assemble_code(&mut self, ir: &Ir) -> Result<Assembled, AssembleError> {
        let instr_count: u64 = ir
            .blocks()
            .iter()
            .map(|&b| ir.block_instrs(b).count() as u64)
            .sum();
        let size = instr_count.max(1) * RECORD_SIZE;
        if self.cursor.checked_add(size).map(|end| end > self.capacity).unwrap_or(true) {
            return Err(AssembleError::Overflow);
        }

        let host_addr = BASE_ADDR + self.cursor;
        let mut pc = host_addr;
        for &block in ir.blocks() {
            for instr_id in ir.block_instrs(block) {
                let instr = ir.instr(instr_id);
                if Self::is_fastmem(instr) {
                    self.fastmem_sites.push((pc, pc + RECORD_SIZE));
                }
                pc += RECORD_SIZE;
            }
        }
        self.cursor += size;
        Ok(Assembled {
            host_addr,
            host_size: size as u32,
        })
    }

    fn handle_exception(&mut self, ex: Exception) -> bool {
        match self
            .fastmem_sites
            .iter()
            .position(|&(start, end)| ex.pc >= start && ex.pc < end)
        {
            Some(pos) => {
                self.fastmem_sites.remove(pos);
                true
            }
            None => false,
        }
    }

    fn dump_code(&self, host_addr: u64, size: u32) -> String {
        format!(
            "<mock code @ 0x{host_addr:x}, {size} bytes, {} instrs>",
            size as u64 / RECORD_SIZE
        )
    }

    fn register_bank(&self) -> &RegisterBank {
        &self.register_bank
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Ir, Type, Width};

    fn ir_with_fastmem_load() -> Ir {
        let mut ir = Ir::new();
        let mut b = ir.builder();
        let addr = b.const_i64(0x1000);
        let _v = b.load_fast(addr, Width::W32, Type::I32);
        b.ret();
        ir
    }

    #[test]
    fn assemble_reports_fastmem_site_that_faults() {
        let mut be = MockBackend::new(1 << 16);
        let ir = ir_with_fastmem_load();
        let assembled = be.assemble_code(&ir).unwrap();
        let fault_pc = assembled.host_addr;
        assert!(be.handle_exception(Exception { pc: fault_pc }));
        // Second fault at the same pc is no longer tracked (patched once).
        assert!(!be.handle_exception(Exception { pc: fault_pc }));
    }

    #[test]
    fn overflow_when_capacity_exhausted() {
        let mut be = MockBackend::new(RECORD_SIZE);
        let mut ir = Ir::new();
        {
            let mut b = ir.builder();
            b.ret();
        }
        assert!(be.assemble_code(&ir).is_ok());
        let mut ir2 = Ir::new();
        {
            let mut b = ir2.builder();
            b.ret();
        }
        assert!(matches!(
            be.assemble_code(&ir2),
            Err(AssembleError::Overflow)
        ));
    }

    #[test]
    fn reset_clears_cursor_and_fastmem_sites() {
        let mut be = MockBackend::new(1 << 16);
        let ir = ir_with_fastmem_load();
        be.assemble_code(&ir).unwrap();
        be.reset();
        let assembled = be.assemble_code(&ir).unwrap();
        assert_eq!(assembled.host_addr, BASE_ADDR);
    }
}
