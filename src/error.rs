//! Crate-wide error types.
//!
//! Grounded in `nvm::jit::JitError`: a plain enum with a hand-written
//! `Display`/`Error` impl rather than a derive macro, plus `From` glue for
//! the error types of the sub-components it wraps.

use std::fmt;

use crate::backend::AssembleError;
use crate::ir::IrError;

/// Result alias used throughout the crate.
pub type JitResult<T> = Result<T, JitError>;

/// Errors the coordinator can report to its caller.
///
/// Per SPEC_FULL.md §7, only the two *recoverable* classes are
/// represented here: expected analysis failure and backend overflow.
/// Invariant violations (the *fatal* class) are programming errors and
/// are reported via `panic!` naming the violated invariant, not via this
/// enum — see `cache::coordinator` for the panic sites.
#[derive(Debug)]
pub enum JitError {
    /// The frontend could not analyze the entry block (e.g. guest memory
    /// not yet materialized). The guest dispatcher should simply retry.
    AnalysisFailed { guest_addr: u32 },
    /// The backend's code buffer overflowed during assembly. The whole
    /// cache has already been freed and the backend reset by the time
    /// this is returned.
    BackendOverflow,
    /// A pass or the frontend produced IR the backend could not lower.
    Assemble(AssembleError),
    /// Malformed textual IR on `read()`.
    Ir(IrError),
}

impl fmt::Display for JitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnalysisFailed { guest_addr } => {
                write!(f, "analysis failed at guest address 0x{guest_addr:08x}")
            }
            Self::BackendOverflow => write!(f, "backend code buffer overflow"),
            Self::Assemble(e) => write!(f, "assemble failed: {e}"),
            Self::Ir(e) => write!(f, "ir error: {e}"),
        }
    }
}

impl std::error::Error for JitError {}

impl From<AssembleError> for JitError {
    fn from(e: AssembleError) -> Self {
        JitError::Assemble(e)
    }
}

impl From<IrError> for JitError {
    fn from(e: IrError) -> Self {
        JitError::Ir(e)
    }
}
