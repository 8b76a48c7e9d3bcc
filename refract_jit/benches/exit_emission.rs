//! Exit-Emission Benchmarks
//!
//! Measures the code-emission cost of tier transitions:
//!
//! 1. **Identity bridge**: the no-op fast path every hot exit should hit
//! 2. **Full-bank rotation**: worst-case cycle resolution
//! 3. **OSR materialisation**: a mixed descriptor table dumped to the frame

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use refract_core::Value;
use refract_jit::backend::{Emitter, Fpr, Gpr, InstStream};
use refract_jit::exit::{
    Binding, EntrySite, ExitDriver, ExitSite, LogicalId, OsrTarget, ScratchReservoir, Shuffler,
    ValueDescriptor, ValueTag,
};
use refract_jit::frame::StackSlot;
use refract_jit::ir::{BridgeExitRecord, ExitTable, OsrExitRecord};

// =============================================================================
// Descriptor Generators
// =============================================================================

/// Exit and entry with identical full-bank register maps.
fn identity_sites() -> (ExitSite, ExitSite) {
    let mut site = ExitSite::new();
    for (i, gpr) in Gpr::BANK.into_iter().enumerate() {
        site.set_gpr(gpr, Binding::new(LogicalId(i as u32), ValueTag::Boxed));
    }
    (site.clone(), site)
}

/// Exit and entry forming one cycle over the whole GPR bank, with a
/// representation change on every edge.
fn rotation_sites() -> (ExitSite, ExitSite) {
    let mut exit = ExitSite::new();
    let mut entry = ExitSite::new();
    for (i, gpr) in Gpr::BANK.into_iter().enumerate() {
        let tag = if i % 2 == 0 {
            ValueTag::Int32
        } else {
            ValueTag::Boxed
        };
        let entry_tag = if i % 2 == 0 {
            ValueTag::Boxed
        } else {
            ValueTag::Int32
        };
        exit.set_gpr(gpr, Binding::new(LogicalId(i as u32), tag));
        entry.set_gpr(
            Gpr::BANK[(i + 1) % Gpr::BANK.len()],
            Binding::new(LogicalId(i as u32), entry_tag),
        );
    }
    (exit, entry)
}

/// A representative OSR descriptor table: registers, doubles, displaced
/// slots, and constants.
fn osr_variables() -> Vec<ValueDescriptor> {
    vec![
        ValueDescriptor::in_gpr(Gpr::R0, ValueTag::Int32),
        ValueDescriptor::in_gpr(Gpr::R1, ValueTag::Boxed),
        ValueDescriptor::in_gpr(Gpr::R2, ValueTag::Cell),
        ValueDescriptor::in_fpr(Fpr::F0),
        ValueDescriptor::in_fpr(Fpr::F1),
        ValueDescriptor::displaced(StackSlot::for_variable(0)),
        ValueDescriptor::displaced(StackSlot::for_variable(12)),
        ValueDescriptor::constant(Value::undefined()),
        ValueDescriptor::constant(Value::undefined()),
        ValueDescriptor::constant(Value::int32(17)),
        ValueDescriptor::Dead,
        ValueDescriptor::Spilled {
            slot: StackSlot::for_variable(11),
            tag: ValueTag::Boxed,
        },
    ]
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_bridge_identity(c: &mut Criterion) {
    let (exit, entry_regs) = identity_sites();
    let ir = ExitTable::new();

    c.bench_function("bridge_identity_exit", |b| {
        b.iter(|| {
            let mut em = InstStream::new();
            let check = em.jump();
            let mut entry = EntrySite::new(em.new_label());
            entry.regs = entry_regs.clone();
            let record = BridgeExitRecord {
                site_id: LogicalId(0),
                check,
                exit: exit.clone(),
                recovery: None,
            };
            Shuffler::link_exit(&mut em, &ir, &record, &entry);
            black_box(em.len())
        })
    });
}

fn bench_bridge_rotation(c: &mut Criterion) {
    let (exit, entry_regs) = rotation_sites();
    let ir = ExitTable::new();

    c.bench_function("bridge_full_bank_rotation", |b| {
        b.iter(|| {
            let mut em = InstStream::new();
            let check = em.jump();
            let mut entry = EntrySite::new(em.new_label());
            entry.regs = entry_regs.clone();
            let record = BridgeExitRecord {
                site_id: LogicalId(0),
                check,
                exit: exit.clone(),
                recovery: None,
            };
            Shuffler::link_exit(&mut em, &ir, &record, &entry);
            black_box(em.len())
        })
    });
}

fn bench_osr_materialisation(c: &mut Criterion) {
    let target = OsrTarget::new(0x4000, 0x1, 0x2, [(0, 0), (21, 0x100)]);
    let reservoir = ScratchReservoir::new();
    let variables = osr_variables();

    c.bench_function("osr_exit_materialisation", |b| {
        b.iter(|| {
            let mut em = InstStream::new();
            let check = em.jump();
            let mut ir = ExitTable::new();
            ir.osr_exits.push(OsrExitRecord {
                site_id: LogicalId(0),
                bytecode_offset: 21,
                check,
                variables: variables.clone(),
                recovery: None,
                last_set_variable: Some(1),
            });
            let mut driver = ExitDriver::default();
            driver
                .emit_all_exits(&mut em, &ir, &target, &reservoir)
                .unwrap();
            black_box(em.len())
        })
    });
}

criterion_group!(
    benches,
    bench_bridge_identity,
    bench_bridge_rotation,
    bench_osr_materialisation
);
criterion_main!(benches);
