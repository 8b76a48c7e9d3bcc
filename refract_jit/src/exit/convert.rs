//! Representation-conversion emitters.
//!
//! One emitter per source→destination shape. The contract is uniform: equal
//! representations emit nothing; everything else emits the minimal sequence
//! that converts in place or while moving. Conversions are total on
//! well-formed input; there is no failure path.
//!
//! GPR-to-GPR conversions are applied at the destination end of a move,
//! except boxing an int32, which is applied at the source: boxing is an OR
//! over a register that is dead after the move, so doing it early turns
//! move-then-box into box-then-move and lets an already-boxed source skip a
//! downstream conversion entirely.

use refract_core::Value;

use super::descriptor::ValueTag;
use crate::backend::emitter::Emitter;
use crate::backend::registers::{AnyReg, Fpr, Gpr};
use crate::frame::StackSlot;

/// Convert a GPR's representation in place.
pub fn emit_convert_in_place<E: Emitter>(em: &mut E, gpr: Gpr, src: ValueTag, dst: ValueTag) {
    if !src.needs_conversion(dst) {
        return;
    }
    if src == ValueTag::Int32 {
        em.or_gpr(Gpr::TagNumber, gpr);
    } else {
        debug_assert_eq!(dst, ValueTag::Int32);
        em.zero_extend32(gpr);
    }
}

/// Box the double in `src` into `dst`.
///
/// With a scratch FPR available, first attempt to narrow to an int32 so the
/// baseline tier sees the cheaper integer form; fall back to the biased
/// double reinterpretation. Without scratch, bias unconditionally.
pub fn emit_double_to_boxed<E: Emitter>(em: &mut E, src: Fpr, dst: Gpr, scratch: Option<Fpr>) {
    let mut done = None;
    if let Some(scratch) = scratch {
        let not_int = em.try_truncate_double(src, dst, scratch);
        em.or_gpr(Gpr::TagNumber, dst);
        done = Some(em.jump());
        let fallback = em.here();
        em.link(not_int, fallback);
    }
    em.box_double(src, dst);
    if let Some(done) = done {
        let after = em.here();
        em.link(done, after);
    }
}

/// Unbox the value in `src` into the FPR `dst`, branching on its tag:
/// integers convert, doubles un-bias.
pub fn emit_boxed_to_double<E: Emitter>(em: &mut E, src: Gpr, dst: Fpr) {
    let is_int = em.branch_if_int(src);
    em.unbox_double(src, dst);
    let done = em.jump();
    let int_path = em.here();
    em.link(is_int, int_path);
    em.int32_to_double(src, dst);
    let after = em.here();
    em.link(done, after);
}

/// Move a value between registers of any banks, converting `src_tag` to
/// `dst_tag` in flight.
pub fn emit_move<E: Emitter>(
    em: &mut E,
    src: AnyReg,
    dst: AnyReg,
    src_tag: ValueTag,
    dst_tag: ValueTag,
    scratch_fpr: Option<Fpr>,
) {
    match (src, dst) {
        (AnyReg::Fpr(a), AnyReg::Fpr(b)) => {
            em.move_fpr(a, b);
        }
        (AnyReg::Fpr(a), AnyReg::Gpr(b)) => {
            if dst_tag == ValueTag::BoxedDouble {
                em.box_double(a, b);
            } else {
                emit_double_to_boxed(em, a, b, scratch_fpr);
            }
        }
        (AnyReg::Gpr(a), AnyReg::Fpr(b)) => {
            if src_tag == ValueTag::BoxedDouble {
                em.unbox_double(a, b);
            } else {
                emit_boxed_to_double(em, a, b);
            }
        }
        (AnyReg::Gpr(a), AnyReg::Gpr(b)) => {
            if !src_tag.needs_conversion(dst_tag) {
                em.move_gpr(a, b);
            } else if src_tag == ValueTag::Int32 {
                // Box at the source; `a` is dead after this move.
                em.or_gpr(Gpr::TagNumber, a);
                em.move_gpr(a, b);
            } else {
                em.move_gpr(a, b);
                em.zero_extend32(b);
            }
        }
    }
}

/// Exchange two registers, then repair both representations.
///
/// After the exchange `a` holds what was in `b` (entering with `b_src_tag`,
/// leaving with `a_dst_tag`) and vice versa.
#[allow(clippy::too_many_arguments)]
pub fn emit_swap<E: Emitter>(
    em: &mut E,
    a: AnyReg,
    b: AnyReg,
    a_src_tag: ValueTag,
    a_dst_tag: ValueTag,
    b_src_tag: ValueTag,
    b_dst_tag: ValueTag,
    scratch_gpr: Gpr,
    scratch_fpr: Option<Fpr>,
) {
    match (a, b) {
        (AnyReg::Fpr(fa), AnyReg::Fpr(fb)) => match scratch_fpr {
            Some(scratch) => {
                em.move_fpr(fa, scratch);
                em.move_fpr(fb, fa);
                em.move_fpr(scratch, fb);
            }
            None => {
                em.fpr_to_gpr_bits(fa, scratch_gpr);
                em.move_fpr(fb, fa);
                em.gpr_to_fpr_bits(scratch_gpr, fb);
            }
        },
        (AnyReg::Fpr(fa), AnyReg::Gpr(gb)) => {
            em.move_gpr(gb, scratch_gpr);
            emit_double_to_boxed(em, fa, gb, scratch_fpr);
            emit_boxed_to_double(em, scratch_gpr, fa);
        }
        (AnyReg::Gpr(_), AnyReg::Fpr(_)) => {
            emit_swap(
                em, b, a, b_src_tag, b_dst_tag, a_src_tag, a_dst_tag, scratch_gpr, scratch_fpr,
            );
        }
        (AnyReg::Gpr(ga), AnyReg::Gpr(gb)) => {
            em.swap_gpr(ga, gb);
            if b_src_tag.needs_conversion(a_dst_tag) {
                emit_convert_in_place(em, ga, b_src_tag, a_dst_tag);
            }
            if a_src_tag.needs_conversion(b_dst_tag) {
                emit_convert_in_place(em, gb, a_src_tag, b_dst_tag);
            }
        }
    }
}

// =============================================================================
// Fills
// =============================================================================

/// Fill a raw int32 into a GPR from a constant or a home slot.
pub fn emit_fill_int32<E: Emitter>(
    em: &mut E,
    constant: Option<Value>,
    home: StackSlot,
    dst: Gpr,
) {
    match constant {
        Some(value) => {
            debug_assert!(value.is_int32());
            em.move_imm(value.as_int32() as u32 as u64, dst);
        }
        None => em.load_slot32(home, dst),
    }
}

/// Fill a boxed value into a GPR from a constant or a home slot.
pub fn emit_fill_boxed<E: Emitter>(
    em: &mut E,
    constant: Option<Value>,
    home: StackSlot,
    dst: Gpr,
) {
    match constant {
        Some(value) => em.move_imm(value.bits(), dst),
        None => em.load_slot(home, dst),
    }
}

/// Fill a raw double into an FPR from a numeric constant or a home slot,
/// converting through `temp`.
pub fn emit_fill_double<E: Emitter>(
    em: &mut E,
    constant: Option<Value>,
    home: StackSlot,
    dst: Fpr,
    temp: Gpr,
) {
    match constant {
        Some(value) => {
            debug_assert!(value.is_number());
            let raw = if value.is_int32() {
                f64::from(value.as_int32())
            } else {
                value.as_double()
            };
            em.move_imm(raw.to_bits(), temp);
            em.gpr_to_fpr_bits(temp, dst);
        }
        None => {
            em.load_slot(home, temp);
            emit_boxed_to_double(em, temp, dst);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stream::{Inst, InstStream};

    #[test]
    fn test_in_place_noop_on_equal_tags() {
        let mut em = InstStream::new();
        emit_convert_in_place(&mut em, Gpr::R0, ValueTag::Boxed, ValueTag::Boxed);
        emit_convert_in_place(&mut em, Gpr::R0, ValueTag::Cell, ValueTag::Boxed);
        assert!(em.is_empty());
    }

    #[test]
    fn test_in_place_boxing_and_unboxing() {
        let mut em = InstStream::new();
        emit_convert_in_place(&mut em, Gpr::R2, ValueTag::Int32, ValueTag::Boxed);
        assert_eq!(
            em.insts(),
            &[Inst::OrGpr {
                src: Gpr::TagNumber,
                dst: Gpr::R2
            }]
        );

        let mut em = InstStream::new();
        emit_convert_in_place(&mut em, Gpr::R2, ValueTag::Boxed, ValueTag::Int32);
        assert_eq!(em.insts(), &[Inst::ZeroExtend32 { dst: Gpr::R2 }]);
    }

    #[test]
    fn test_double_to_boxed_without_scratch_biases() {
        let mut em = InstStream::new();
        emit_double_to_boxed(&mut em, Fpr::F1, Gpr::R3, None);
        assert_eq!(
            em.insts(),
            &[Inst::BoxDouble {
                src: Fpr::F1,
                dst: Gpr::R3
            }]
        );
    }

    #[test]
    fn test_double_to_boxed_with_scratch_narrows_first() {
        let mut em = InstStream::new();
        emit_double_to_boxed(&mut em, Fpr::F1, Gpr::R3, Some(Fpr::F5));
        assert!(matches!(
            em.insts()[0],
            Inst::TryTruncateDouble {
                src: Fpr::F1,
                dst: Gpr::R3,
                scratch: Fpr::F5,
                ..
            }
        ));
        assert_eq!(em.count_matching(|i| matches!(i, Inst::OrGpr { .. })), 1);
        assert_eq!(em.count_matching(|i| matches!(i, Inst::BoxDouble { .. })), 1);
    }

    #[test]
    fn test_boxed_to_double_branches_on_tag() {
        let mut em = InstStream::new();
        emit_boxed_to_double(&mut em, Gpr::R0, Fpr::F0);
        assert_eq!(
            em.count_matching(|i| matches!(i, Inst::BranchIfInt { .. })),
            1
        );
        assert_eq!(
            em.count_matching(|i| matches!(i, Inst::UnboxDouble { .. })),
            1
        );
        assert_eq!(
            em.count_matching(|i| matches!(i, Inst::Int32ToDouble { .. })),
            1
        );
    }

    #[test]
    fn test_move_boxes_at_source() {
        let mut em = InstStream::new();
        emit_move(
            &mut em,
            AnyReg::Gpr(Gpr::R0),
            AnyReg::Gpr(Gpr::R1),
            ValueTag::Int32,
            ValueTag::Boxed,
            None,
        );
        assert_eq!(
            em.insts(),
            &[
                Inst::OrGpr {
                    src: Gpr::TagNumber,
                    dst: Gpr::R0
                },
                Inst::MoveGpr {
                    src: Gpr::R0,
                    dst: Gpr::R1
                },
            ]
        );
    }

    #[test]
    fn test_move_unboxes_at_destination() {
        let mut em = InstStream::new();
        emit_move(
            &mut em,
            AnyReg::Gpr(Gpr::R4),
            AnyReg::Gpr(Gpr::R5),
            ValueTag::Boxed,
            ValueTag::Int32,
            None,
        );
        assert_eq!(
            em.insts(),
            &[
                Inst::MoveGpr {
                    src: Gpr::R4,
                    dst: Gpr::R5
                },
                Inst::ZeroExtend32 { dst: Gpr::R5 },
            ]
        );
    }

    #[test]
    fn test_gpr_swap_repairs_both_sides() {
        let mut em = InstStream::new();
        emit_swap(
            &mut em,
            AnyReg::Gpr(Gpr::R0),
            AnyReg::Gpr(Gpr::R1),
            ValueTag::Int32,
            ValueTag::Boxed,
            ValueTag::Boxed,
            ValueTag::Boxed,
            Gpr::R7,
            None,
        );
        // r0 receives a boxed value and wants boxed; r1 receives the raw
        // int32 and wants it boxed.
        assert_eq!(
            em.insts(),
            &[
                Inst::SwapGpr {
                    a: Gpr::R0,
                    b: Gpr::R1
                },
                Inst::OrGpr {
                    src: Gpr::TagNumber,
                    dst: Gpr::R1
                },
            ]
        );
    }

    #[test]
    fn test_fpr_swap_uses_gpr_bits_without_scratch() {
        let mut em = InstStream::new();
        emit_swap(
            &mut em,
            AnyReg::Fpr(Fpr::F0),
            AnyReg::Fpr(Fpr::F1),
            ValueTag::Double,
            ValueTag::Double,
            ValueTag::Double,
            ValueTag::Double,
            Gpr::R6,
            None,
        );
        assert_eq!(
            em.insts(),
            &[
                Inst::FprToGprBits {
                    src: Fpr::F0,
                    dst: Gpr::R6
                },
                Inst::MoveFpr {
                    src: Fpr::F1,
                    dst: Fpr::F0
                },
                Inst::GprToFprBits {
                    src: Gpr::R6,
                    dst: Fpr::F1
                },
            ]
        );
    }

    #[test]
    fn test_fills() {
        let mut em = InstStream::new();
        emit_fill_int32(&mut em, Some(Value::int32(-1)), StackSlot(0), Gpr::R0);
        assert_eq!(
            em.insts(),
            &[Inst::MoveImm {
                imm: 0xFFFF_FFFF,
                dst: Gpr::R0
            }]
        );

        let mut em = InstStream::new();
        emit_fill_boxed(&mut em, None, StackSlot(4), Gpr::R1);
        assert_eq!(
            em.insts(),
            &[Inst::LoadSlot {
                slot: StackSlot(4),
                dst: Gpr::R1
            }]
        );

        let mut em = InstStream::new();
        emit_fill_double(&mut em, Some(Value::int32(3)), StackSlot(0), Fpr::F2, Gpr::R7);
        assert_eq!(
            em.insts(),
            &[
                Inst::MoveImm {
                    imm: 3.0_f64.to_bits(),
                    dst: Gpr::R7
                },
                Inst::GprToFprBits {
                    src: Gpr::R7,
                    dst: Fpr::F2
                },
            ]
        );
    }
}
