//! Global process configuration for the coordinator.
//!
//! Per SPEC_FULL.md §9 / §6: `perf` and `dump_code` are configuration,
//! not control flow, so they live on a small struct owned by the
//! coordinator rather than as free-floating globals or cfg flags.

use std::path::PathBuf;

/// Coordinator-wide options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Append a line to the perf map on every successful finalization.
    pub perf: bool,
    /// Write the pre-optimization IR to `<appdir>/ir/0x<addr>.ir` before
    /// running the optimization pipeline.
    pub dump_code: bool,
    /// Root directory for IR dumps (`<appdir>/ir/...`).
    pub appdir: PathBuf,
    /// Mirrors the guest debug-build switch that forces `fastmem` off
    /// for every newly compiled code, regardless of its predecessor's
    /// flag (§4.6 `compile_code` step (a)). Kept as an option rather
    /// than a `cfg!` so tests can exercise both paths.
    pub debug: bool,
    /// Path the perf map is appended to. Defaults to
    /// `/tmp/perf-<pid>.map` via [`Options::default`]; tests should
    /// override this with a path inside a `tempfile::TempDir`.
    pub perf_map_path: PathBuf,
}

impl Options {
    pub fn new(appdir: impl Into<PathBuf>) -> Self {
        let appdir = appdir.into();
        Self {
            perf: false,
            dump_code: false,
            debug: false,
            perf_map_path: default_perf_map_path(),
            appdir,
        }
    }

    pub fn ir_dump_path(&self, guest_addr: u32) -> PathBuf {
        self.appdir.join("ir").join(format!("0x{guest_addr:08x}.ir"))
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new(".")
    }
}

fn default_perf_map_path() -> PathBuf {
    PathBuf::from(format!("/tmp/perf-{}.map", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ir_dump_path_is_hex_padded() {
        let opts = Options::new("/tmp/app");
        assert_eq!(
            opts.ir_dump_path(0x8c01_0000),
            PathBuf::from("/tmp/app/ir/0x8c010000.ir")
        );
    }
}
