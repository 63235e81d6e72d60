//! Backend contract (§4.5): the host-ISA code generator. A real x64
//! encoder is out of scope per §1; this module is the trait plus the
//! register-bank types RA (`opt::ra`) consumes, grounded in
//! `nvm::jit::codegen::{HostReg, CodeBuffer}` generalized away from one
//! fixed ISA.

pub mod mock;

use std::fmt;

use crate::ir::{Ir, Type};

bitflags::bitflags! {
    /// Which IR [`Type`]s a register can hold, per §4.4 "each host
    /// register exposes a type-mask of IR types it can hold".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeMask: u16 {
        const I8    = 1 << 0;
        const I16   = 1 << 1;
        const I32   = 1 << 2;
        const I64   = 1 << 3;
        const F32   = 1 << 4;
        const F64   = 1 << 5;
        const V128  = 1 << 6;
        const GPR   = Self::I8.bits() | Self::I16.bits() | Self::I32.bits() | Self::I64.bits();
    }
}

impl TypeMask {
    pub fn accepts(&self, ty: Type) -> bool {
        let bit = match ty {
            Type::I8 => TypeMask::I8,
            Type::I16 => TypeMask::I16,
            Type::I32 => TypeMask::I32,
            Type::I64 => TypeMask::I64,
            Type::F32 => TypeMask::F32,
            Type::F64 => TypeMask::F64,
            Type::V128 => TypeMask::V128,
            Type::V | Type::String | Type::Block => return false,
        };
        self.contains(bit)
    }
}

/// One host register, as exposed to RA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub id: u8,
    pub type_mask: TypeMask,
}

/// The register bank description consumed by RA (§4.4 "registers[],
/// num_registers").
#[derive(Debug, Clone)]
pub struct RegisterBank {
    pub registers: Vec<Register>,
}

impl RegisterBank {
    pub fn num_registers(&self) -> usize {
        self.registers.len()
    }
}

/// Errors `Backend::assemble_code` can report (§3 `[AMBIENT]`).
#[derive(Debug)]
pub enum AssembleError {
    /// The fixed-size code buffer has no room left for this code.
    Overflow,
    /// A pass handed the backend an opcode it has no lowering for — a
    /// fatal contract violation per §7, not a recoverable case.
    Unsupported(String),
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssembleError::Overflow => write!(f, "backend code buffer overflow"),
            AssembleError::Unsupported(op) => write!(f, "backend cannot lower opcode: {op}"),
        }
    }
}

impl std::error::Error for AssembleError {}

/// One host-side exception report handed to [`Backend::handle_exception`].
#[derive(Debug, Clone, Copy)]
pub struct Exception {
    pub pc: u64,
}

/// Result of assembling one code: host address/size plus whatever
/// per-instruction metadata the backend needs for fastmem fault lookups.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub host_addr: u64,
    pub host_size: u32,
}

/// The host-ISA contract (§4.5). Implementations assemble finalized IR
/// into a bounded code buffer and answer fastmem faults raised against
/// code they emitted.
pub trait Backend {
    /// Drop all host code and reset the emitter state. Used on cache
    /// reset and on an overflow retry.
    fn reset(&mut self);

    /// Assemble `ir` into the code buffer. Returns the host address/size
    /// on success.
    fn assemble_code(&mut self, ir: &Ir) -> Result<Assembled, AssembleError>;

    /// If `ex.pc` is inside a fastmem access site this backend knows
    /// about, patch it to a slow-path call and return `true`. Otherwise
    /// `false` (the caller should let the fault propagate).
    fn handle_exception(&mut self, ex: Exception) -> bool;

    /// Disassembly for debugging.
    fn dump_code(&self, host_addr: u64, size: u32) -> String;

    fn register_bank(&self) -> &RegisterBank;
}
