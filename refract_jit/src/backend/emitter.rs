//! The abstract emission surface.
//!
//! The enclosing compilation owns a macro-assembler; the engine sees it only
//! through this trait. Emission is append-only: every call appends machine
//! operations at the current position, labels name positions, and jumps are
//! patchable handles that the engine links to labels it discovers later.
//! Callers discard partially emitted output on abort via their own rewind
//! primitive, so the trait has no failure channel.

use super::registers::{Fpr, Gpr};
use crate::frame::StackSlot;

/// A position in the emitted code. Opaque; created unbound and bound at most
/// once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// A patchable forward jump. Opaque; linked to a label at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Jump(pub u32);

/// Append-only machine-code emission.
///
/// Register-to-register conversions assume the reserved registers hold their
/// process-wide constants (`Gpr::TagNumber`, `Gpr::TagMask`); the engine is
/// responsible for restoring `TagMask` if it borrows it.
pub trait Emitter {
    // =========================================================================
    // Moves
    // =========================================================================

    /// `dst = src` (64-bit).
    fn move_gpr(&mut self, src: Gpr, dst: Gpr);

    /// `dst = imm`.
    fn move_imm(&mut self, imm: u64, dst: Gpr);

    /// `dst = src` (double).
    fn move_fpr(&mut self, src: Fpr, dst: Fpr);

    /// Exchange two GPRs.
    fn swap_gpr(&mut self, a: Gpr, b: Gpr);

    /// Raw bit copy FPR → GPR (no representation change).
    fn fpr_to_gpr_bits(&mut self, src: Fpr, dst: Gpr);

    /// Raw bit copy GPR → FPR (no representation change).
    fn gpr_to_fpr_bits(&mut self, src: Gpr, dst: Fpr);

    // =========================================================================
    // Frame and scratch-buffer accesses
    // =========================================================================

    /// Load a full 64-bit value from a frame slot.
    fn load_slot(&mut self, slot: StackSlot, dst: Gpr);

    /// Load the low 32 bits of a frame slot, zero-extended.
    fn load_slot32(&mut self, slot: StackSlot, dst: Gpr);

    /// Store a GPR to a frame slot.
    fn store_slot(&mut self, src: Gpr, slot: StackSlot);

    /// Store an immediate to a frame slot.
    fn store_imm_slot(&mut self, imm: u64, slot: StackSlot);

    /// Load a cell of the borrowed scratch buffer.
    fn load_scratch(&mut self, index: usize, dst: Gpr);

    /// Store a GPR to a cell of the borrowed scratch buffer.
    fn store_scratch(&mut self, src: Gpr, index: usize);

    /// Store a 32-bit immediate to an absolute address (the baseline tier's
    /// reoptimisation counter).
    fn store32_absolute(&mut self, imm: u32, address: u64);

    // =========================================================================
    // Arithmetic and representation primitives
    // =========================================================================

    /// `dst |= src` (64-bit). With `src = Gpr::TagNumber` this boxes an
    /// int32 in place.
    fn or_gpr(&mut self, src: Gpr, dst: Gpr);

    /// `dst -= src` (32-bit). Used by the speculative-add recovery.
    fn sub32_gpr(&mut self, src: Gpr, dst: Gpr);

    /// `dst ^= imm` (32-bit immediate, 64-bit register).
    fn xor_imm32(&mut self, imm: u32, dst: Gpr);

    /// Zero-extend the low 32 bits of `dst` over the full register.
    fn zero_extend32(&mut self, dst: Gpr);

    /// Convert an int32 payload in `src` to a double in `dst`.
    fn int32_to_double(&mut self, src: Gpr, dst: Fpr);

    /// Box the double in `src` into `dst` (raw bits minus the number bias).
    fn box_double(&mut self, src: Fpr, dst: Gpr);

    /// Unbox the biased double in `src` into `dst` (add the bias back,
    /// reinterpret).
    fn unbox_double(&mut self, src: Gpr, dst: Fpr);

    // =========================================================================
    // Control flow
    // =========================================================================

    /// Branch taken iff `gpr` holds a boxed int32.
    fn branch_if_int(&mut self, gpr: Gpr) -> Jump;

    /// Truncate the double in `src` to an int32 in `dst`, using `scratch`
    /// for the exactness test. Branch taken iff the double was *not* exactly
    /// representable; on fall-through `dst` holds the raw int32.
    fn try_truncate_double(&mut self, src: Fpr, dst: Gpr, scratch: Fpr) -> Jump;

    /// Unconditional patchable jump.
    fn jump(&mut self) -> Jump;

    /// Jump to an already-known label.
    fn jump_to(&mut self, target: Label);

    /// Indirect jump through a GPR.
    fn jump_reg(&mut self, target: Gpr);

    /// Create a fresh, unbound label.
    fn new_label(&mut self) -> Label;

    /// Bind a label at the current position.
    fn bind(&mut self, label: Label);

    /// Link a pending jump to a label.
    fn link(&mut self, jump: Jump, label: Label);

    /// Convenience: a label bound at the current position.
    fn here(&mut self) -> Label {
        let label = self.new_label();
        self.bind(label);
        label
    }
}
