//! `dbtcore`: block discovery, SSA IR, an optimization pipeline, and a
//! fault-aware code cache for a dynamic binary translator's JIT core.
//!
//! The guest CPU, its memory, and the host-ISA encoder are external
//! collaborators this crate is generic over ([`guest::Guest`],
//! [`backend::Backend`]) rather than concrete implementations.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod frontend;
pub mod guest;
pub mod ir;
pub mod opt;

pub use cache::Coordinator;
pub use config::Options;
pub use error::{JitError, JitResult};
