//! End-to-end scenarios against the public `Coordinator` API: one code
//! compiled through a full discover → translate → optimize → assemble
//! pipeline, edges patched between two independently compiled codes, a
//! fastmem fault downgrading a code, a cyclic guest CFG, a backend
//! overflow resetting the cache, and a stale edge target.

use dbtcore::backend::mock::MockBackend;
use dbtcore::backend::{AssembleError, Assembled, Backend, Exception, Register, RegisterBank, TypeMask};
use dbtcore::cache::meta::{BranchType, Meta};
use dbtcore::cache::unit::Analyzer;
use dbtcore::cache::{CodeState, Coordinator};
use dbtcore::config::Options;
use dbtcore::error::JitError;
use dbtcore::frontend::isa16::Isa16;
use dbtcore::frontend::{Frontend, TranslatedBody};
use dbtcore::guest::test_support::FakeGuest;
use dbtcore::guest::Memory;
use dbtcore::ir::Ir;

fn mov_imm(rd: u8, imm: i8) -> u16 {
    (0x1u16 << 12) | ((rd as u16) << 8) | (imm as u8 as u16)
}

fn load(rd: u8, rb: u8, disp: i8) -> u16 {
    (0x3u16 << 12) | ((rd as u16) << 8) | ((rb as u16) << 4) | ((disp as u8 as u16) & 0xF)
}

fn bt(disp: i8) -> u16 {
    (0x5u16 << 12) | (disp as u8 as u16)
}

fn jmp_reg(rb: u8) -> u16 {
    (0x8u16 << 12) | ((rb as u16) << 4)
}

fn nop() -> u16 {
    0
}

fn invalid() -> u16 {
    0xF000
}

fn write16(guest: &mut FakeGuest, addr: u32, word: u16) {
    guest.load(addr, &word.to_le_bytes());
}

fn isa16_coordinator() -> Coordinator<FakeGuest, Isa16, MockBackend> {
    Coordinator::new(
        FakeGuest::with_capacity(1 << 16),
        Isa16,
        MockBackend::default(),
        Options::default(),
    )
}

// S1: a single static-true branch compiles to one finalized code, with
// the analyzed branch target and fall-through address both recoverable
// through meta, and reverse lookup resolving any host address in range.
#[test]
fn s1_simple_static_branch() {
    let mut co = isa16_coordinator();
    let entry = 0x2000u32;
    write16(co.guest_mut(), entry, bt(3));

    let id = co.compile_code(entry).expect("analyzable single-instruction block compiles");

    let meta = co.meta(entry).expect("meta cached after compile");
    assert_eq!(meta.branch_type, BranchType::StaticTrue);
    assert_eq!(meta.next_addr, entry + 2);
    assert_eq!(meta.branch_addr, entry + 2 + 3 * 2);

    let code = co.code(id);
    assert!(co.lookup_code_reverse(code.host_addr).is_some());
    assert!(co.lookup_code_reverse(code.host_addr + code.host_size as u64 - 1).is_some());
    assert!(co.lookup_code_reverse(code.host_addr + code.host_size as u64).is_none());
}

// S2: two codes compiled independently get linked by `add_edge`, which
// patches exactly once and records the link on both endpoints.
#[test]
fn s2_edge_patching() {
    let mut co = isa16_coordinator();
    let entry = 0x2000u32;
    let target = 0x2008u32;

    write16(co.guest_mut(), entry, bt(3));
    // `target` must fail analysis while `entry` is compiled, or discovery
    // would inline it as a child unit instead of leaving it for a
    // separately compiled code to link up with later.
    write16(co.guest_mut(), target, invalid());
    let s1 = co.compile_code(entry).unwrap();
    assert_eq!(co.meta(entry).unwrap().branch_addr, target);

    write16(co.guest_mut(), target, jmp_reg(0));
    write16(co.guest_mut(), target + 2, nop());
    let s2 = co.compile_code(target).unwrap();

    let branch_host_addr = co.code(s1).host_addr;
    co.add_edge(branch_host_addr, target);

    assert_eq!(co.code(s1).out_edges.len(), 1);
    assert_eq!(co.code(s2).in_edges.len(), 1);
    assert_eq!(co.edge_count(), 1);
    assert_eq!(co.guest().patch_calls.len(), 1);
}

// S3: a fastmem access that faults disables fastmem on its code and
// leaves the code tombstoned but still present in the forward map; a
// fresh compile of the same address comes back with fastmem off.
#[test]
fn s3_fastmem_fault_disables_fastmem() {
    let mut co = isa16_coordinator();
    let entry = 0x4000u32;
    write16(co.guest_mut(), entry, load(0, 1, 0));
    write16(co.guest_mut(), entry + 2, jmp_reg(0));
    write16(co.guest_mut(), entry + 4, nop());

    let id = co.compile_code(entry).unwrap();
    assert!(co.code(id).fastmem);

    let code = co.code(id).clone();
    let mut pc = code.host_addr;
    let mut faulted = false;
    while pc < code.host_addr + code.host_size as u64 {
        if co.handle_fastmem_fault(Exception { pc }) {
            faulted = true;
            break;
        }
        pc += 8;
    }
    assert!(faulted, "expected a fastmem site somewhere in the compiled code");
    assert!(!co.code(id).fastmem);
    assert_eq!(co.code(id).state, CodeState::Tombstoned);
    assert!(co.lookup_code(entry).is_some());

    let new_id = co.compile_code(entry).unwrap();
    assert!(!co.code(new_id).fastmem);
}

// S4: a two-block fall-through cycle (A -> B -> A) is discovered without
// infinite recursion, and both blocks get their own cached meta.
#[test]
fn s4_cycle_cutoff() {
    struct CycleIsa;

    impl Analyzer for CycleIsa {
        fn analyze_code(&self, _guest: &dyn Memory, meta: &mut Meta) -> bool {
            match meta.guest_addr {
                0x100 => {
                    meta.branch_type = BranchType::FallThrough;
                    meta.next_addr = 0x200;
                    true
                }
                0x200 => {
                    meta.branch_type = BranchType::FallThrough;
                    meta.next_addr = 0x100;
                    true
                }
                _ => false,
            }
        }
    }

    impl Frontend for CycleIsa {
        fn name(&self) -> &'static str {
            "cycle"
        }
        fn decode_body(&self, _ir: &mut Ir, _guest: &dyn Memory, _meta: &Meta, _fastmem: bool) -> TranslatedBody {
            TranslatedBody::default()
        }
        fn dump_code(&self, _guest: &dyn Memory, _addr: u32, _size: u32) -> String {
            String::new()
        }
    }

    let mut co = Coordinator::new(FakeGuest::default(), CycleIsa, MockBackend::default(), Options::default());
    co.compile_code(0x100).expect("cyclic fall-through chain compiles without overflowing the stack");
    assert_eq!(co.meta_count(), 2);
    assert!(co.meta(0x100).is_some());
    assert!(co.meta(0x200).is_some());
}

// S5: a backend that always overflows leaves the cache (both maps, and
// every meta it discovered along the way) empty, and resets the backend.
#[test]
fn s5_overflow_resets_the_cache() {
    #[derive(Clone)]
    struct AlwaysOverflowBackend {
        register_bank: RegisterBank,
        reset_called: std::rc::Rc<std::cell::Cell<bool>>,
    }

    impl Backend for AlwaysOverflowBackend {
        fn reset(&mut self) {
            self.reset_called.set(true);
        }
        fn assemble_code(&mut self, _ir: &Ir) -> Result<Assembled, AssembleError> {
            Err(AssembleError::Overflow)
        }
        fn handle_exception(&mut self, _ex: Exception) -> bool {
            false
        }
        fn dump_code(&self, _host_addr: u64, _size: u32) -> String {
            String::new()
        }
        fn register_bank(&self) -> &RegisterBank {
            &self.register_bank
        }
    }

    let reset_called = std::rc::Rc::new(std::cell::Cell::new(false));
    let backend = AlwaysOverflowBackend {
        register_bank: RegisterBank {
            registers: vec![Register { id: 0, type_mask: TypeMask::GPR }],
        },
        reset_called: reset_called.clone(),
    };

    let mut co = Coordinator::new(FakeGuest::with_capacity(1 << 16), Isa16, backend, Options::default());
    let entry = 0x5000u32;
    write16(co.guest_mut(), entry, jmp_reg(0));
    write16(co.guest_mut(), entry + 2, nop());

    let err = co.compile_code(entry).unwrap_err();
    assert!(matches!(err, JitError::BackendOverflow));
    assert_eq!(co.code_count(), 0);
    assert_eq!(co.meta_count(), 0);
    assert!(reset_called.get());
}

// S6: adding an edge whose branch address resolves to no live code is a
// silent no-op, even when that address used to belong to a freed code.
#[test]
fn s6_stale_edge_is_dropped_silently() {
    let mut co = isa16_coordinator();
    let entry = 0x6000u32;
    write16(co.guest_mut(), entry, jmp_reg(0));
    write16(co.guest_mut(), entry + 2, nop());

    let id = co.compile_code(entry).unwrap();
    let stale_host_addr = co.code(id).host_addr;
    co.free_code(id);

    co.add_edge(stale_host_addr, entry);
    assert_eq!(co.edge_count(), 0);

    co.add_edge(0xdead_beef, entry);
    assert_eq!(co.edge_count(), 0);
}
