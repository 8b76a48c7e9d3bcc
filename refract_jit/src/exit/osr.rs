//! On-stack-replacement exits.
//!
//! The one-way variant: baseline code was compiled separately, so it has no
//! register expectations at all: every live variable must be in its home
//! slot when the jump lands. The emitter dumps register state to the frame,
//! untangles displaced values, materialises constants, and jumps into the
//! baseline code block at the machine offset of the failing bytecode.
//!
//! The pass structure maximises the distance between computing a value and
//! storing it: reboxing happens for all registers before any store, doubles
//! are boxed into the GPR bank before the double stores, and displaced
//! values move in a load-everything-then-store-everything rhythm whenever
//! they fit in the register file.

use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

use refract_core::value::UNDEFINED;
use refract_core::ReconcileResult;

use super::descriptor::{RecoveryAction, ValueDescriptor, ValueTag};
use crate::backend::emitter::Emitter;
use crate::backend::registers::{Gpr, NUM_GPRS};
use crate::codemap::BytecodeMap;
use crate::frame::StackSlot;
use crate::ir::OsrExitRecord;

/// Register receiving the last-set variable; baseline code reads its result
/// register on arrival. Also the staging register for memory-to-memory
/// moves.
const RESULT_GPR: Gpr = Gpr::R0;

/// Register used for the final indirect jump. Must differ from
/// [`RESULT_GPR`], which is live by then.
const TARGET_GPR: Gpr = Gpr::R1;

// =============================================================================
// Scratch-Buffer Reservoir
// =============================================================================

/// The runtime's shared OSR scratch buffer.
///
/// One exit emission borrows the buffer at a time, under the same lock the
/// runtime's compilation sessions already serialise on. The reservoir is
/// owned by the caller and passed in; the engine never holds one globally.
#[derive(Debug, Default)]
pub struct ScratchReservoir {
    cells: Mutex<Vec<u64>>,
}

impl ScratchReservoir {
    /// Create an empty reservoir.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the buffer with at least `len` cells, growing it if needed.
    /// The lease holds the lock until dropped.
    pub fn reserve(&self, len: usize) -> ScratchLease<'_> {
        let mut cells = self.cells.lock();
        if cells.len() < len {
            cells.resize(len, 0);
        }
        ScratchLease { cells }
    }
}

/// Exclusive borrow of the scratch buffer for one exit emission.
#[derive(Debug)]
pub struct ScratchLease<'a> {
    cells: MutexGuard<'a, Vec<u64>>,
}

impl ScratchLease<'_> {
    /// Current capacity in cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

// =============================================================================
// OSR Target
// =============================================================================

/// Everything the emitter needs to know about the baseline code block it
/// jumps into. Built once per compiled function; the bytecode map is decoded
/// here and reused by every exit.
#[derive(Debug)]
pub struct OsrTarget {
    map: BytecodeMap,
    /// Address of the baseline code block's first instruction.
    pub code_start: u64,
    /// The baseline code-block pointer stored into the frame header.
    pub code_block_ptr: u64,
    /// Address of the baseline tier's reoptimisation counter.
    pub counter_address: u64,
}

impl OsrTarget {
    /// Decode the bytecode map and capture the baseline block's addresses.
    pub fn new(
        code_start: u64,
        code_block_ptr: u64,
        counter_address: u64,
        map_pairs: impl IntoIterator<Item = (u32, u32)>,
    ) -> Self {
        Self {
            map: BytecodeMap::decode(map_pairs),
            code_start,
            code_block_ptr,
            counter_address,
        }
    }

    /// The decoded map.
    pub fn map(&self) -> &BytecodeMap {
        &self.map
    }
}

// =============================================================================
// Exit Profile
// =============================================================================

/// One pass over the descriptors, counting the work the later steps fan out
/// over. Most exits have no doubles and no constants; the booleans let those
/// steps vanish entirely.
#[derive(Debug, Default)]
struct ExitProfile {
    poisoned: SmallVec<[bool; 32]>,
    poisoned_count: usize,
    displaced_count: usize,
    have_unboxed_ints: bool,
    have_fprs: bool,
    have_constants: bool,
    have_undefined: bool,
}

impl ExitProfile {
    fn classify(variables: &[ValueDescriptor]) -> Self {
        let mut profile = ExitProfile {
            poisoned: SmallVec::from_elem(false, variables.len()),
            ..ExitProfile::default()
        };

        for descriptor in variables {
            match descriptor {
                ValueDescriptor::Displaced { source_slot } => {
                    profile.displaced_count += 1;
                    // If the displaced value's source slot is the home of a
                    // register-resident variable, that home slot must not be
                    // stored to until the displaced value has been lifted
                    // out: the slot is poisoned.
                    if source_slot.is_variable() {
                        let victim = source_slot.variable_index() as usize;
                        if victim < variables.len()
                            && variables[victim].in_register()
                            && !profile.poisoned[victim]
                        {
                            profile.poisoned[victim] = true;
                            profile.poisoned_count += 1;
                        }
                    }
                }
                ValueDescriptor::InGpr {
                    tag: ValueTag::Int32,
                    ..
                } => profile.have_unboxed_ints = true,
                ValueDescriptor::InFpr { .. } => profile.have_fprs = true,
                ValueDescriptor::Constant { value } => {
                    profile.have_constants = true;
                    if value.is_undefined() {
                        profile.have_undefined = true;
                    }
                }
                _ => {}
            }
        }
        profile
    }

    /// Scratch-buffer cells this exit needs: one per poisoned slot, plus one
    /// per displaced value when they overflow the register file.
    fn scratch_cells(&self) -> usize {
        self.poisoned_count
            + if self.displaced_count > NUM_GPRS {
                self.displaced_count
            } else {
                0
            }
    }
}

// =============================================================================
// OSR Exit Emitter
// =============================================================================

/// Emits the materialisation sequence for OSR exits of one compiled
/// function.
pub struct OsrExitEmitter<'a, E: Emitter> {
    em: &'a mut E,
    target: &'a OsrTarget,
    reservoir: &'a ScratchReservoir,
    /// Counter value that delays the next reoptimisation attempt.
    warmup_counter: u32,
}

impl<'a, E: Emitter> OsrExitEmitter<'a, E> {
    /// Create an emitter against one baseline target.
    pub fn new(
        em: &'a mut E,
        target: &'a OsrTarget,
        reservoir: &'a ScratchReservoir,
        warmup_counter: u32,
    ) -> Self {
        Self {
            em,
            target,
            reservoir,
            warmup_counter,
        }
    }

    /// Emit one exit's materialisation code and the jump into baseline.
    pub fn emit_exit(&mut self, exit: &OsrExitRecord) -> ReconcileResult<()> {
        let here = self.em.here();
        self.em.link(exit.check, here);

        // 1) Undo any pre-check mutation; remember which register the
        //    recovery already boxed.
        let already_boxed = self.apply_recovery(exit);

        // 2) Classify descriptors and borrow the scratch buffer for the
        //    whole emission.
        let profile = ExitProfile::classify(&exit.variables);
        let _lease = self.reservoir.reserve(profile.scratch_cells());

        // 3) Rebox every raw int32 before anything is stored.
        if profile.have_unboxed_ints {
            for descriptor in &exit.variables {
                if let ValueDescriptor::InGpr {
                    gpr,
                    tag: ValueTag::Int32,
                } = descriptor
                {
                    if Some(*gpr) != already_boxed {
                        self.em.or_gpr(Gpr::TagNumber, *gpr);
                    }
                }
            }
        }

        // 4) Dump GPRs; poisoned destinations go to the scratch buffer.
        let mut scratch_index = 0;
        for (index, descriptor) in exit.variables.iter().enumerate() {
            if let ValueDescriptor::InGpr { gpr, .. } = descriptor {
                if profile.poisoned[index] {
                    self.em.store_scratch(*gpr, scratch_index);
                    scratch_index += 1;
                } else {
                    self.em.store_slot(*gpr, StackSlot::for_variable(index as u32));
                }
            }
        }

        // From here on every GPR is dead and usable as a temporary.

        if profile.have_fprs {
            // 5) Box each double into the same-index GPR, then dump them the
            //    same way. Two passes keep the boxing distant from the
            //    stores.
            for descriptor in &exit.variables {
                if let ValueDescriptor::InFpr { fpr } = descriptor {
                    self.em.box_double(*fpr, fpr.paired_gpr());
                }
            }
            for (index, descriptor) in exit.variables.iter().enumerate() {
                if let ValueDescriptor::InFpr { fpr } = descriptor {
                    let gpr = fpr.paired_gpr();
                    if profile.poisoned[index] {
                        self.em.store_scratch(gpr, scratch_index);
                        scratch_index += 1;
                    } else {
                        self.em.store_slot(gpr, StackSlot::for_variable(index as u32));
                    }
                }
            }
        }

        debug_assert_eq!(scratch_index, profile.poisoned_count);

        // 6) Move displaced values to their new homes.
        if profile.displaced_count > 0 {
            self.resolve_displaced(exit, &profile, &mut scratch_index);
        }

        // 7) Drain the poisoned stashes into their now-safe home slots.
        if profile.poisoned_count > 0 {
            let mut drain_index = 0;
            for (index, poisoned) in profile.poisoned.iter().enumerate() {
                if !poisoned {
                    continue;
                }
                self.em.load_scratch(drain_index, RESULT_GPR);
                drain_index += 1;
                self.em
                    .store_slot(RESULT_GPR, StackSlot::for_variable(index as u32));
            }
            debug_assert_eq!(drain_index, profile.poisoned_count);
        }

        // 8) Materialise constants, sharing one register for the common
        //    undefined case.
        if profile.have_constants {
            if profile.have_undefined {
                self.em.move_imm(UNDEFINED, RESULT_GPR);
            }
            for (index, descriptor) in exit.variables.iter().enumerate() {
                if let ValueDescriptor::Constant { value } = descriptor {
                    let slot = StackSlot::for_variable(index as u32);
                    if value.is_undefined() {
                        self.em.store_slot(RESULT_GPR, slot);
                    } else {
                        self.em.store_imm_slot(value.bits(), slot);
                    }
                }
            }
        }

        // 9) Push the baseline tier's reoptimisation counter back to its
        //    warm-up value so the code we just bailed from is not immediately
        //    re-entered.
        self.em
            .store32_absolute(self.warmup_counter, self.target.counter_address);

        // 10) Reload the last-set variable into the result register.
        if let Some(variable) = exit.last_set_variable {
            self.em
                .load_slot(StackSlot::for_variable(variable), RESULT_GPR);
        }

        // 11) The frame now belongs to the baseline tier.
        self.em
            .store_imm_slot(self.target.code_block_ptr, StackSlot::CODE_BLOCK);

        // 12) Find the machine offset for this bytecode and jump.
        let machine_offset = self.target.map.machine_offset(exit.bytecode_offset)?;
        let jump_target = self.target.code_start + u64::from(machine_offset);
        self.em.move_imm(jump_target, TARGET_GPR);
        self.em.jump_reg(TARGET_GPR);

        Ok(())
    }

    fn apply_recovery(&mut self, exit: &OsrExitRecord) -> Option<Gpr> {
        match exit.recovery {
            Some(RecoveryAction::UndoSpeculativeAdd { src, dest }) => {
                self.em.sub32_gpr(src, dest);
                self.em.or_gpr(Gpr::TagNumber, dest);
                Some(dest)
            }
            Some(RecoveryAction::UndoBooleanGuard { dest }) => {
                self.em.xor_imm32(refract_core::value::FALSE as u32, dest);
                None
            }
            None => None,
        }
    }

    /// Displaced values fit the register file: lift them all, then store
    /// them all. Otherwise stage every one through the scratch buffer, which
    /// handles arbitrary permutations of home slots.
    fn resolve_displaced(
        &mut self,
        exit: &OsrExitRecord,
        profile: &ExitProfile,
        scratch_index: &mut usize,
    ) {
        if profile.displaced_count <= NUM_GPRS {
            let mut reg = 0;
            for descriptor in &exit.variables {
                if let ValueDescriptor::Displaced { source_slot } = descriptor {
                    self.em.load_slot(*source_slot, Gpr::from_index(reg));
                    reg += 1;
                }
            }
            let mut reg = 0;
            for (index, descriptor) in exit.variables.iter().enumerate() {
                if let ValueDescriptor::Displaced { .. } = descriptor {
                    self.em
                        .store_slot(Gpr::from_index(reg), StackSlot::for_variable(index as u32));
                    reg += 1;
                }
            }
        } else {
            for descriptor in &exit.variables {
                if let ValueDescriptor::Displaced { source_slot } = descriptor {
                    self.em.load_slot(*source_slot, RESULT_GPR);
                    self.em.store_scratch(RESULT_GPR, *scratch_index);
                    *scratch_index += 1;
                }
            }
            let mut read_index = profile.poisoned_count;
            for (index, descriptor) in exit.variables.iter().enumerate() {
                if let ValueDescriptor::Displaced { .. } = descriptor {
                    self.em.load_scratch(read_index, RESULT_GPR);
                    read_index += 1;
                    self.em
                        .store_slot(RESULT_GPR, StackSlot::for_variable(index as u32));
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
