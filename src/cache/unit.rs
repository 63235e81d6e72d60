//! Compile-unit tree (§3, §4.1): one node per meta visited during a
//! single compilation, arena-allocated and indexed by [`UnitId`].

use std::collections::BTreeMap;

use crate::guest::Memory;

use super::meta::{BranchType, Meta, INVALID_ADDR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u32);

impl UnitId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node of the per-compilation tree: a meta paired with its parent
/// code, plus up to two children (§3).
#[derive(Debug, Clone)]
pub struct CompileUnit {
    pub guest_addr: u32,
    pub branch: Option<UnitId>,
    pub next: Option<UnitId>,
}

/// Owns the nodes of one compile-unit tree, built fresh per
/// `compile_code` call.
#[derive(Debug, Default)]
pub struct UnitArena {
    units: Vec<CompileUnit>,
}

impl UnitArena {
    pub fn new() -> Self {
        Self { units: Vec::new() }
    }

    pub fn get(&self, id: UnitId) -> &CompileUnit {
        &self.units[id.index()]
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn push(&mut self, guest_addr: u32) -> UnitId {
        let id = UnitId(self.units.len() as u32);
        self.units.push(CompileUnit { guest_addr, branch: None, next: None });
        id
    }
}

/// An `analyze_code` implementation (§4.2), called once per unvisited
/// meta during discovery.
pub trait Analyzer {
    fn analyze_code(&self, guest: &dyn Memory, meta: &mut Meta) -> bool;
}

/// A finished discovery walk: the unit arena, the metas it touched
/// (borrowed from the coordinator's meta cache), and the root unit.
pub struct UnitTree<'a> {
    pub arena: &'a UnitArena,
    pub metas: &'a BTreeMap<u32, Meta>,
    pub root: Option<UnitId>,
}

/// Depth-first discovery walk (§4.1): explores guest control flow from
/// `entry_addr`, populating `metas` lazily and cutting cycles with a
/// monotonically increasing `visit_token`. Returns the root unit, or
/// `None` if the entry itself fails to analyze.
pub fn discover(
    guest: &dyn Memory,
    analyzer: &dyn Analyzer,
    metas: &mut BTreeMap<u32, Meta>,
    visit_token: u64,
    entry_addr: u32,
) -> (UnitArena, Option<UnitId>) {
    let mut arena = UnitArena::new();
    let root = walk(guest, analyzer, metas, visit_token, &mut arena, entry_addr);
    (arena, root)
}

fn walk(
    guest: &dyn Memory,
    analyzer: &dyn Analyzer,
    metas: &mut BTreeMap<u32, Meta>,
    visit_token: u64,
    arena: &mut UnitArena,
    addr: u32,
) -> Option<UnitId> {
    if addr == INVALID_ADDR {
        return None;
    }

    if let Some(meta) = metas.get(&addr) {
        if meta.visit_token == visit_token {
            return None;
        }
    }

    if !metas.contains_key(&addr) {
        let mut meta = Meta::new(addr);
        if !analyzer.analyze_code(guest, &mut meta) {
            return None;
        }
        metas.insert(addr, meta);
    }

    let meta = metas.get_mut(&addr).expect("just inserted or already present");
    meta.visit_token = visit_token;
    let branch_type = meta.branch_type;
    let branch_addr = meta.branch_addr;
    let next_addr = meta.next_addr;

    let unit = arena.push(addr);
    metas.get_mut(&addr).unwrap().compile_refs.push(unit.0);

    let branch_child = if branch_type == BranchType::FallThrough {
        None
    } else {
        walk(guest, analyzer, metas, visit_token, arena, branch_addr)
    };
    let next_child = if branch_type.is_conditional() || branch_type == BranchType::FallThrough {
        walk(guest, analyzer, metas, visit_token, arena, next_addr)
    } else {
        None
    };

    let node = &mut arena.units[unit.index()];
    node.branch = branch_child;
    node.next = next_child;
    Some(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::test_support::FakeGuest;

    struct FixedAnalyzer {
        table: BTreeMap<u32, (BranchType, u32, u32)>,
    }

    impl Analyzer for FixedAnalyzer {
        fn analyze_code(&self, _guest: &dyn Memory, meta: &mut Meta) -> bool {
            match self.table.get(&meta.guest_addr) {
                Some(&(bt, branch_addr, next_addr)) => {
                    meta.branch_type = bt;
                    meta.branch_addr = branch_addr;
                    meta.next_addr = next_addr;
                    true
                }
                None => false,
            }
        }
    }

    #[test]
    fn cycle_is_cut_by_visit_token() {
        // A -> B (fall-through), B -> A (fall-through): a 2-cycle.
        let mut table = BTreeMap::new();
        table.insert(0x100, (BranchType::FallThrough, INVALID_ADDR, 0x200));
        table.insert(0x200, (BranchType::FallThrough, INVALID_ADDR, 0x100));
        let analyzer = FixedAnalyzer { table };
        let guest = FakeGuest::default();
        let mut metas = BTreeMap::new();

        let (arena, root) = discover(&guest, &analyzer, &mut metas, 1, 0x100);
        let root = root.unwrap();
        assert_eq!(arena.len(), 2);
        let a = arena.get(root);
        assert_eq!(a.guest_addr, 0x100);
        let b = arena.get(a.next.unwrap());
        assert_eq!(b.guest_addr, 0x200);
        assert!(b.next.is_none());
    }

    #[test]
    fn failed_analysis_prunes_the_branch() {
        let table = BTreeMap::new();
        let analyzer = FixedAnalyzer { table };
        let guest = FakeGuest::default();
        let mut metas = BTreeMap::new();
        let (arena, root) = discover(&guest, &analyzer, &mut metas, 1, 0x100);
        assert!(root.is_none());
        assert!(arena.is_empty());
    }
}
