//! The code cache and JIT coordinator (§3, §4.6): meta cache,
//! compile-unit tree, forward/reverse code maps, edges, and the
//! orchestration that ties analysis, translation, optimization and
//! assembly together.

pub mod code;
pub mod coordinator;
pub mod meta;
pub mod unit;

pub use code::{Code, CodeId, CodeState, Edge, EdgeId};
pub use coordinator::Coordinator;
pub use meta::{BranchType, Meta, INVALID_ADDR};
pub use unit::{Analyzer, CompileUnit, UnitArena, UnitId, UnitTree};
