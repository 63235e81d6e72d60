//! The JIT coordinator (§4.6): orchestrates analysis, translation,
//! optimization, assembly, the code/edge maps and their invalidation.
//! One coordinator per guest CPU, driven synchronously from that CPU's
//! run loop — no internal synchronization, per §5.

use std::collections::{BTreeMap, HashMap};
use std::io::Write as _;

use crate::backend::{Backend, Exception};
use crate::config::Options;
use crate::error::{JitError, JitResult};
use crate::frontend::{self, Frontend};
use crate::guest::Guest;
use crate::ir::{text, Ir};
use crate::opt;

use super::code::{Code, CodeId, CodeState, Edge, EdgeId};
use super::meta::Meta;
use super::unit::{self, UnitArena, UnitTree};

pub struct Coordinator<G: Guest, F: Frontend, B: Backend> {
    guest: G,
    frontend: F,
    backend: B,
    options: Options,
    ir: Ir,
    metas: BTreeMap<u32, Meta>,
    codes: HashMap<CodeId, Code>,
    /// The compile-unit tree each live code was built from, kept around
    /// so `invalidate_code` can detach every unit from its meta.
    units: HashMap<CodeId, UnitArena>,
    edges: HashMap<EdgeId, Edge>,
    forward: BTreeMap<u32, CodeId>,
    reverse: BTreeMap<u64, CodeId>,
    next_code: u32,
    next_edge: u32,
    visit_token: u64,
}

impl<G: Guest, F: Frontend, B: Backend> Coordinator<G, F, B> {
    pub fn new(guest: G, frontend: F, backend: B, options: Options) -> Self {
        Self {
            guest,
            frontend,
            backend,
            options,
            ir: Ir::new(),
            metas: BTreeMap::new(),
            codes: HashMap::new(),
            units: HashMap::new(),
            edges: HashMap::new(),
            forward: BTreeMap::new(),
            reverse: BTreeMap::new(),
            next_code: 0,
            next_edge: 0,
            visit_token: 0,
        }
    }

    pub fn guest(&self) -> &G {
        &self.guest
    }

    pub fn guest_mut(&mut self) -> &mut G {
        &mut self.guest
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn meta(&self, guest_addr: u32) -> Option<&Meta> {
        self.metas.get(&guest_addr)
    }

    pub fn code_count(&self) -> usize {
        self.codes.len()
    }

    pub fn meta_count(&self) -> usize {
        self.metas.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn code(&self, id: CodeId) -> &Code {
        self.codes.get(&id).expect("CodeId always refers to a live code while held by the caller")
    }

    pub fn lookup_code(&self, guest_addr: u32) -> Option<CodeId> {
        self.forward.get(&guest_addr).copied()
    }

    /// Upper-bound search in the host-address-ordered reverse map (§4.6,
    /// §8 property 1). `host_addr` may land anywhere inside the code.
    pub fn lookup_code_reverse(&self, host_addr: u64) -> Option<CodeId> {
        let (_, &id) = self.reverse.range(..=host_addr).next_back()?;
        let code = &self.codes[&id];
        code.contains_host_addr(host_addr).then_some(id)
    }

    fn alloc_code_id(&mut self) -> CodeId {
        let id = CodeId(self.next_code);
        self.next_code += 1;
        id
    }

    fn alloc_edge_id(&mut self) -> EdgeId {
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        id
    }

    /// Removes every unit of `arena` from its meta's `compile_refs`, so an
    /// arena that never made it into (or is being torn out of) `self.units`
    /// doesn't leave a meta permanently unreclaimable.
    fn detach_arena(&mut self, arena: &UnitArena) {
        for i in 0..arena.len() {
            let unit = arena.get(super::unit::UnitId(i as u32));
            if let Some(meta) = self.metas.get_mut(&unit.guest_addr) {
                if let Some(pos) = meta.compile_refs.iter().position(|&v| v == i as u32) {
                    meta.compile_refs.remove(pos);
                }
            }
        }
    }

    /// The central orchestration (§4.6).
    pub fn compile_code(&mut self, guest_addr: u32) -> JitResult<CodeId> {
        log::debug!("compile_code: entering guest_addr=0x{guest_addr:08x}");

        let prior_fastmem = self.lookup_code(guest_addr).map(|id| self.code(id).fastmem);
        if let Some(id) = self.lookup_code(guest_addr) {
            self.free_code(id);
        }
        let fastmem = if self.options.debug { false } else { prior_fastmem.unwrap_or(true) };

        self.visit_token += 1;
        let (arena, root) = unit::discover(
            &self.guest,
            &self.frontend,
            &mut self.metas,
            self.visit_token,
            guest_addr,
        );
        let Some(root) = root else {
            log::debug!("compile_code: analysis failed at guest_addr=0x{guest_addr:08x}");
            return Err(JitError::AnalysisFailed { guest_addr });
        };

        self.ir.reset();
        let tree = UnitTree { arena: &arena, metas: &self.metas, root: Some(root) };
        frontend::translate_code(&self.frontend, &self.guest, &tree, &mut self.ir, fastmem);

        if self.options.dump_code {
            let path = self.options.ir_dump_path(guest_addr);
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Ok(mut file) = std::fs::File::create(&path) {
                let _ = text::write(&self.ir, &mut file);
            }
        }

        opt::run_pipeline(&mut self.ir, self.backend.register_bank());

        match self.backend.assemble_code(&self.ir) {
            Ok(assembled) => {
                let mut code = Code::new(guest_addr, assembled.host_addr, assembled.host_size, fastmem);
                code.root_unit = Some(root);
                let id = self.finalize_code(code, arena);
                log::debug!(
                    "compile_code: finalized guest_addr=0x{guest_addr:08x} host_addr=0x{:x}",
                    assembled.host_addr
                );
                Ok(id)
            }
            Err(_overflow) => {
                log::warn!("compile_code: backend overflow, freeing cache for guest_addr=0x{guest_addr:08x}");
                // This arena was discovered but never handed to `finalize_code`,
                // so `free_cache` won't see it — detach it here or its
                // `compile_refs` entries outlive the meta sweep below.
                self.detach_arena(&arena);
                self.free_cache();
                Err(JitError::BackendOverflow)
            }
        }
    }

    fn finalize_code(&mut self, code: Code, arena: UnitArena) -> CodeId {
        if !code.in_edges.is_empty() || !code.out_edges.is_empty() {
            panic!("finalize_code: code already has edges for guest_addr={:#x}", code.guest_addr);
        }
        if self.forward.contains_key(&code.guest_addr) {
            panic!("finalize_code: code already present in forward map for guest_addr={:#x}", code.guest_addr);
        }
        if self.reverse.contains_key(&code.host_addr) {
            panic!("finalize_code: code already present in reverse map for host_addr={:#x}", code.host_addr);
        }

        let guest_addr = code.guest_addr;
        let host_addr = code.host_addr;
        let host_size = code.host_size;

        self.guest.cache_code(guest_addr, host_addr);

        let id = self.alloc_code_id();
        self.forward.insert(guest_addr, id);
        self.reverse.insert(host_addr, id);
        self.units.insert(id, arena);
        self.codes.insert(id, code);

        if self.options.perf {
            self.append_perf_line(guest_addr, host_addr, host_size);
        }

        id
    }

    fn append_perf_line(&self, guest_addr: u32, host_addr: u64, host_size: u32) {
        let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&self.options.perf_map_path)
        else {
            return;
        };
        let _ = writeln!(
            file,
            "{:x} {:x} {}_0x{:08x}",
            host_addr,
            host_size,
            self.frontend.name(),
            guest_addr
        );
    }

    /// `add_edge` (§4.6): invoked when the runtime discovers a direct
    /// branch between two compiled blocks.
    pub fn add_edge(&mut self, branch_host_addr: u64, dst_guest_addr: u32) {
        let Some(src) = self.lookup_code_reverse(branch_host_addr) else {
            return;
        };
        let Some(dst) = self.lookup_code(dst_guest_addr) else {
            return;
        };

        let id = self.alloc_edge_id();
        let edge = Edge { branch_host_addr, src, dst, patched: false };
        self.edges.insert(id, edge);
        self.codes.get_mut(&src).unwrap().out_edges.push(id);
        self.codes.get_mut(&dst).unwrap().in_edges.push(id);
        self.patch_edges(src);
    }

    /// `patch_edges` (§4.6): rewrites every unpatched edge touching
    /// `code`, in either direction. Idempotent via the per-edge flag.
    pub fn patch_edges(&mut self, code: CodeId) {
        let edge_ids: Vec<EdgeId> = {
            let c = &self.codes[&code];
            c.in_edges.iter().chain(c.out_edges.iter()).copied().collect()
        };
        for edge_id in edge_ids {
            let edge = self.edges[&edge_id];
            if edge.patched {
                continue;
            }
            let dst_host_addr = self.codes[&edge.dst].host_addr;
            self.guest.patch_edge(edge.branch_host_addr, dst_host_addr);
            self.edges.get_mut(&edge_id).unwrap().patched = true;
        }
    }

    /// `restore_edges` (§4.6): inverse of `patch_edges` for incoming
    /// edges only — used before `code` becomes unreachable.
    pub fn restore_edges(&mut self, code: CodeId) {
        let dst_guest_addr = self.codes[&code].guest_addr;
        let edge_ids = self.codes[&code].in_edges.clone();
        for edge_id in edge_ids {
            let edge = self.edges[&edge_id];
            if !edge.patched {
                continue;
            }
            self.guest.restore_edge(edge.branch_host_addr, dst_guest_addr);
            self.edges.get_mut(&edge_id).unwrap().patched = false;
        }
    }

    /// `invalidate_code` (§4.6): detaches the compile-unit tree from
    /// every meta it touched, drops the guest's direct-dispatch entry,
    /// restores incoming edges, then destroys every edge touching this
    /// code. Idempotent (§8 property 4): a second call on an already
    /// tombstoned code is a no-op.
    pub fn invalidate_code(&mut self, code: CodeId) {
        let c = &self.codes[&code];
        if c.state == CodeState::Tombstoned {
            return;
        }
        let guest_addr = c.guest_addr;

        if let Some(arena) = self.units.remove(&code) {
            self.detach_arena(&arena);
        }

        self.guest.invalidate_code(guest_addr);
        self.restore_edges(code);

        let c = self.codes.get_mut(&code).unwrap();
        let in_edges = std::mem::take(&mut c.in_edges);
        let out_edges = std::mem::take(&mut c.out_edges);
        c.state = CodeState::Tombstoned;

        for edge_id in in_edges.iter().chain(out_edges.iter()) {
            if let Some(edge) = self.edges.remove(edge_id) {
                let other = if edge.src == code { edge.dst } else { edge.src };
                if let Some(other_code) = self.codes.get_mut(&other) {
                    other_code.in_edges.retain(|e| e != edge_id);
                    other_code.out_edges.retain(|e| e != edge_id);
                }
            }
        }
    }

    /// `free_code` (§4.6): invalidates, then removes from both maps.
    pub fn free_code(&mut self, code: CodeId) {
        self.invalidate_code(code);
        let c = self.codes.remove(&code).expect("free_code: code must still be present");
        self.forward.remove(&c.guest_addr);
        self.reverse.remove(&c.host_addr);
    }

    /// `invalidate_cache` (§4.6): invalidates every code without
    /// removing map entries (safe while a frame is executing), then
    /// sweeps metas whose `compile_refs` are now empty.
    pub fn invalidate_cache(&mut self) {
        let ids: Vec<CodeId> = self.codes.keys().copied().collect();
        for id in ids {
            self.invalidate_code(id);
        }
        self.metas.retain(|_, m| !m.compile_refs.is_empty());
    }

    /// `free_cache` (§4.6): frees every code, sweeps all meta, resets
    /// the backend.
    pub fn free_cache(&mut self) {
        let ids: Vec<CodeId> = self.codes.keys().copied().collect();
        for id in ids {
            self.free_code(id);
        }
        self.metas.retain(|_, m| !m.compile_refs.is_empty());
        self.backend.reset();
    }

    /// The fastmem fault handler (§4.6), installed as a process-wide
    /// exception callback. Returns `false` to let the signal propagate.
    pub fn handle_fastmem_fault(&mut self, ex: Exception) -> bool {
        let Some(id) = self.lookup_code_reverse(ex.pc) else {
            return false;
        };
        if !self.backend.handle_exception(ex) {
            return false;
        }
        let guest_addr = self.codes[&id].guest_addr;
        log::warn!("fastmem fault: disabling fastmem for guest_addr=0x{guest_addr:08x}");
        self.codes.get_mut(&id).unwrap().fastmem = false;
        self.invalidate_code(id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::frontend::isa16::Isa16;
    use crate::guest::test_support::FakeGuest;

    fn coordinator() -> Coordinator<FakeGuest, Isa16, MockBackend> {
        Coordinator::new(FakeGuest::with_capacity(1 << 16), Isa16, MockBackend::default(), Options::default())
    }

    /// `NOP` forever is FallThrough and eventually hits uninitialized
    /// (zeroed = decodes as class 0 = Nop) memory — give it one real
    /// terminator instead: a register-indirect jump (`JmpReg`), whose
    /// encoding is class 0x8.
    fn write_jmp_reg(guest: &mut FakeGuest, addr: u32, rb: u8) {
        let word: u16 = (0x8u16 << 12) | ((rb as u16) << 4);
        guest.load(addr, &word.to_le_bytes());
    }

    #[test]
    fn compile_code_finalizes_and_registers_reverse_lookup() {
        let mut co = coordinator();
        write_jmp_reg(co.guest_mut(), 0x1000, 0);
        let id = co.compile_code(0x1000).expect("compiles");
        let code = co.code(id);
        assert!(co.lookup_code_reverse(code.host_addr).is_some());
        assert!(co.lookup_code_reverse(code.host_addr + 1).is_some());
    }

    #[test]
    fn invalidate_code_twice_is_a_no_op() {
        let mut co = coordinator();
        write_jmp_reg(co.guest_mut(), 0x1000, 0);
        let id = co.compile_code(0x1000).unwrap();
        co.invalidate_code(id);
        co.invalidate_code(id);
        assert_eq!(co.codes[&id].state, CodeState::Tombstoned);
    }

    #[test]
    fn add_edge_with_stale_branch_address_is_silently_dropped() {
        let mut co = coordinator();
        write_jmp_reg(co.guest_mut(), 0x1000, 0);
        co.compile_code(0x1000).unwrap();
        let edges_before = co.edges.len();
        co.add_edge(0xdead_beef, 0x1000);
        assert_eq!(co.edges.len(), edges_before);
    }

    #[test]
    fn free_cache_empties_both_maps_and_meta() {
        let mut co = coordinator();
        write_jmp_reg(co.guest_mut(), 0x1000, 0);
        co.compile_code(0x1000).unwrap();
        co.free_cache();
        assert!(co.forward.is_empty());
        assert!(co.reverse.is_empty());
        assert!(co.metas.is_empty());
    }
}
