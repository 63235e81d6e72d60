//! The six-pass optimization pipeline (§4.4), run in fixed order over
//! one compile unit's IR. Each pass is a free function over `&mut Ir`
//! (stateless between runs — "passes are self-contained"), the same
//! `fn(&mut IrBlock, ...)` shape `nvm::jit::compiler_s2`/`loop_opt` use
//! for their pass modules, minus the `_create`/`_destroy` ceremony the
//! teacher keeps only for hypothetical future pass-private state.

pub mod cfa;
pub mod cprop;
pub mod dce;
pub mod esimp;
pub mod lse;
pub mod ra;

use crate::backend::RegisterBank;
use crate::ir::Ir;

/// Run CFA, LSE, CPROP, ESIMP, DCE, RA over `ir` in that order, per
/// §4.4. RA needs the backend's register bank as input.
pub fn run_pipeline(ir: &mut Ir, registers: &RegisterBank) {
    cfa::run(ir);
    lse::run(ir);
    cprop::run(ir);
    esimp::run(ir);
    dce::run(ir);
    ra::run(ir, registers);
}
