//! Register-to-register bridging.
//!
//! When both tiers are co-compiled, a failed speculation lands here with
//! values live in the speculative tier's registers and must leave with
//! values in the baseline entry's registers. The shuffler builds a directed
//! graph over the physical register file: an edge `u → v` means the value in
//! `u` at exit belongs in `v` at entry. Logical-id uniqueness makes every
//! node's in- and out-degree at most one, so the graph is a disjoint union
//! of simple chains and simple cycles.
//!
//! Emission order per exit:
//!
//! 1. recovery pre-pass (undo a pre-check mutation)
//! 2. pre-spill: values the entry expects in memory go to their home slots
//! 3. chains, tail first, so no register is clobbered before it is read
//! 4. cycles: in-place convert (length 1), swap (length 2), or stash one
//!    value in scratch and rotate the rest as a chain (length ≥ 3)
//! 5. fill: entry registers whose value was spilled or constant-folded
//! 6. restore the tag-mask register if it was borrowed, jump to the entry
//!
//! At no point between steps is any live logical value unrecoverable: the
//! pre-spill writes memory before registers move, and the chain-then-cycle
//! order reads every register before overwriting it.

use refract_core::value::{FALSE, TAG_MASK};

use super::convert::{
    emit_convert_in_place, emit_fill_boxed, emit_fill_double, emit_fill_int32, emit_move,
    emit_swap,
};
use super::descriptor::{RecoveryAction, ValueTag};
use super::scratch::ScratchSet;
use super::site::{EntrySite, ExitSite, RegisterMap};
use crate::backend::emitter::Emitter;
use crate::backend::registers::{AnyReg, Fpr, Gpr, NUM_REGS};
use crate::ir::{BridgeExitRecord, IrView};

// =============================================================================
// Permutation Graph
// =============================================================================

/// Per-register node of the permutation graph, linked by flat index.
#[derive(Debug, Clone, Copy, Default)]
struct ShuffleNode {
    /// Flat index of the register whose exit value lands here.
    prev: Option<u8>,
    /// This register's exit value is wanted in some entry register.
    has_from: bool,
    /// Some exit value is wanted in this register.
    has_to: bool,
    /// Already emitted.
    handled: bool,
}

impl ShuffleNode {
    /// Tail of a chain: receives a value, gives its own to nobody.
    #[inline]
    fn is_chain_tail(&self) -> bool {
        self.has_to && !self.has_from
    }

    /// Participates in the permutation at all.
    #[inline]
    fn in_graph(&self) -> bool {
        self.has_from || self.has_to
    }
}

/// Where a cycle's displaced value was stashed.
enum Stash {
    /// Second scratch FPR, raw double.
    Fpr(Fpr),
    /// Scratch GPR holding a bias-boxed double (the transient form).
    BoxedDouble(Gpr),
    /// Scratch GPR already converted to the destination representation.
    Gpr(Gpr),
}

// =============================================================================
// Shuffler
// =============================================================================

/// One exit's worth of bridging state. Built, driven, and discarded per exit.
pub struct Shuffler<'a, E: Emitter, I: IrView + ?Sized> {
    em: &'a mut E,
    ir: &'a I,
    exit: &'a ExitSite,
    entry: &'a EntrySite,
    nodes: [ShuffleNode; NUM_REGS],
    exit_map: RegisterMap,
    entry_map: RegisterMap,
    scratch: ScratchSet,
    scratch_gpr: Gpr,
}

impl<'a, E: Emitter, I: IrView + ?Sized> Shuffler<'a, E, I> {
    /// Link one bridge exit: bind the failed check here, reconcile state,
    /// and jump to the baseline entry.
    pub fn link_exit(em: &'a mut E, ir: &'a I, record: &'a BridgeExitRecord, entry: &'a EntrySite) {
        let here = em.here();
        em.link(record.check, here);

        let mut shuffler = Shuffler {
            exit_map: RegisterMap::of_site(&record.exit),
            entry_map: RegisterMap::of_site(&entry.regs),
            scratch: ScratchSet::discover(&record.exit, entry),
            scratch_gpr: Gpr::TagMask,
            nodes: [ShuffleNode::default(); NUM_REGS],
            exit: &record.exit,
            em,
            ir,
            entry,
        };

        shuffler.apply_recovery(record);
        shuffler.pre_spill();
        shuffler.resolve_chains();
        shuffler.resolve_cycles();
        shuffler.fill_missing();
        shuffler.finish();
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Undo a partial mutation the speculative code performed before its
    /// check. If the mutated register's exit descriptor claims a boxed form,
    /// rebox it so the descriptor is truthful again and the later passes
    /// emit no further conversion.
    fn apply_recovery(&mut self, record: &BridgeExitRecord) {
        let Some(action) = record.recovery else {
            return;
        };
        match action {
            RecoveryAction::UndoSpeculativeAdd { src, dest } => {
                self.em.sub32_gpr(src, dest);
                let tag = self.exit.gpr(dest).map(|b| b.tag);
                debug_assert!(tag.is_some(), "recovery names an unbound register");
                if tag != Some(ValueTag::Int32) {
                    self.em.or_gpr(Gpr::TagNumber, dest);
                }
            }
            RecoveryAction::UndoBooleanGuard { dest } => {
                self.em.xor_imm32(FALSE as u32, dest);
            }
        }
    }

    // =========================================================================
    // Pre-spill
    // =========================================================================

    /// Spill every exit value whose entry descriptor wants it in memory,
    /// boxing as needed, and wire up the permutation graph along the way.
    /// Exit values already spilled are skipped; exit registers whose value
    /// the entry wants nowhere become scratch candidates.
    fn pre_spill(&mut self) {
        for gpr in Gpr::BANK {
            let Some(binding) = self.exit.gpr(gpr) else {
                continue;
            };
            if self.wire_edge(AnyReg::Gpr(gpr), binding.id) {
                continue;
            }
            if binding.spilled {
                continue;
            }
            if binding.tag == ValueTag::Int32 {
                self.em.or_gpr(Gpr::TagNumber, gpr);
            }
            self.em.store_slot(gpr, self.ir.home_slot(binding.id));
        }

        // The FPR spills below and the cycle resolution both need a GPR
        // temporary; borrow the tag-mask register if discovery found none.
        self.scratch_gpr = self.scratch.ensure_gpr();

        for fpr in Fpr::BANK {
            let Some(binding) = self.exit.fpr(fpr) else {
                continue;
            };
            if self.wire_edge(AnyReg::Fpr(fpr), binding.id) {
                continue;
            }
            if binding.spilled {
                continue;
            }
            self.em.box_double(fpr, self.scratch_gpr);
            self.em
                .store_slot(self.scratch_gpr, self.ir.home_slot(binding.id));
        }
    }

    /// Wire the graph edge for one exit register. Returns `true` when the
    /// spill should be skipped because the entry keeps the value purely in a
    /// register.
    fn wire_edge(&mut self, reg: AnyReg, id: super::site::LogicalId) -> bool {
        let flat = reg.flat_index();
        match self.entry_map.find(id) {
            Some(dst) => {
                self.nodes[flat].has_from = true;
                let dst_flat = dst.flat_index();
                self.nodes[dst_flat].prev = Some(flat as u8);
                self.nodes[dst_flat].has_to = true;
                // Spill anyway when the entry also expects a memory copy.
                !self.entry.regs.reg(dst).map(|b| b.spilled).unwrap_or(false)
            }
            None => {
                // Nobody wants this register's value in a register; once
                // spilled it is free for scratch duty.
                if self.entry.regs.reg(reg).is_none() {
                    match reg {
                        AnyReg::Gpr(g) => self.scratch.offer_gpr(g),
                        AnyReg::Fpr(f) => self.scratch.offer_fpr(f),
                    }
                }
                false
            }
        }
    }

    // =========================================================================
    // Chains
    // =========================================================================

    /// Resolve every chain, walking from the tail toward the head and
    /// emitting moves in reverse order so each register is read before it is
    /// overwritten. A finished chain's head register is dead and joins the
    /// scratch set.
    fn resolve_chains(&mut self) {
        for flat in 0..NUM_REGS {
            if !self.nodes[flat].is_chain_tail() || self.nodes[flat].handled {
                continue;
            }
            let mut cur = flat;
            loop {
                self.nodes[cur].handled = true;
                match self.nodes[cur].prev {
                    Some(prev) => {
                        let prev = prev as usize;
                        self.emit_edge(prev, cur);
                        cur = prev;
                    }
                    None => break,
                }
            }
            // `cur` is the head: read above, never written.
            if let AnyReg::Fpr(f) = AnyReg::from_flat_index(cur) {
                self.scratch.offer_fpr(f);
            }
        }
    }

    // =========================================================================
    // Cycles
    // =========================================================================

    /// Resolve every remaining component; by construction they are cycles.
    fn resolve_cycles(&mut self) {
        for flat in 0..NUM_REGS {
            if self.nodes[flat].handled || !self.nodes[flat].in_graph() {
                continue;
            }
            self.resolve_cycle(flat);
        }
    }

    fn resolve_cycle(&mut self, start: usize) {
        // Walk the cycle once for its length and handled marks.
        let mut length = 0;
        let mut cur = start;
        loop {
            length += 1;
            self.nodes[cur].handled = true;
            cur = self.nodes[cur].prev.expect("unhandled node must cycle") as usize;
            if cur == start {
                break;
            }
        }
        // The successor of `start`: the one node fed by it.
        let next = (0..NUM_REGS)
            .find(|&flat| self.nodes[flat].prev == Some(start as u8))
            .expect("cycle node has a successor");

        match length {
            1 => {
                // Self-edge: representation change only.
                if let AnyReg::Gpr(gpr) = AnyReg::from_flat_index(start) {
                    let src_tag = self.prev_tag(start);
                    let dst_tag = self.next_tag(start);
                    emit_convert_in_place(self.em, gpr, src_tag, dst_tag);
                }
            }
            2 => {
                let other = self.nodes[start].prev.expect("cycle") as usize;
                let a_src = self.prev_tag(start);
                let a_dst = self.next_tag(start);
                let b_src = self.prev_tag(other);
                let b_dst = self.next_tag(other);
                let scratch_gpr = self.scratch_gpr;
                let scratch_fpr = self.scratch.fpr1();
                emit_swap(
                    self.em,
                    AnyReg::from_flat_index(start),
                    AnyReg::from_flat_index(other),
                    a_src,
                    a_dst,
                    b_src,
                    b_dst,
                    scratch_gpr,
                    scratch_fpr,
                );
            }
            _ => self.rotate_long_cycle(start, next),
        }
    }

    /// Break a cycle of length ≥ 3: stash `start`'s value, rotate the other
    /// `L - 1` registers as a chain, then write the stash into `next`.
    fn rotate_long_cycle(&mut self, start: usize, next: usize) {
        let start_reg = AnyReg::from_flat_index(start);
        let next_reg = AnyReg::from_flat_index(next);

        let stash = match (start_reg, next_reg) {
            (AnyReg::Fpr(src), AnyReg::Fpr(_)) => match self.scratch.fpr2() {
                // A spare FPR keeps the value raw.
                Some(spare) => {
                    self.em.move_fpr(src, spare);
                    Stash::Fpr(spare)
                }
                // Otherwise the double lives in the scratch GPR in its
                // transient biased form; the bias round-trip brackets the
                // GPR residence.
                None => {
                    self.em.box_double(src, self.scratch_gpr);
                    Stash::BoxedDouble(self.scratch_gpr)
                }
            },
            _ => {
                let src_tag = self.prev_tag(start);
                let dst_tag = self.next_tag(next);
                let scratch_gpr = self.scratch_gpr;
                let scratch_fpr = self.scratch.fpr1();
                emit_move(
                    self.em,
                    start_reg,
                    AnyReg::Gpr(scratch_gpr),
                    src_tag,
                    dst_tag,
                    scratch_fpr,
                );
                Stash::Gpr(scratch_gpr)
            }
        };

        let mut cur = start;
        while self.nodes[cur].prev != Some(start as u8) {
            let prev = self.nodes[cur].prev.expect("cycle") as usize;
            self.emit_edge(prev, cur);
            cur = prev;
        }

        match stash {
            Stash::Fpr(spare) => {
                let dst = next_reg.as_fpr().expect("stash chosen for FPR cycle");
                self.em.move_fpr(spare, dst);
            }
            Stash::BoxedDouble(gpr) => {
                let dst = next_reg.as_fpr().expect("stash chosen for FPR cycle");
                self.em.unbox_double(gpr, dst);
            }
            Stash::Gpr(gpr) => {
                let tag = self.next_tag(next);
                let scratch_fpr = self.scratch.fpr1();
                emit_move(self.em, AnyReg::Gpr(gpr), next_reg, tag, tag, scratch_fpr);
            }
        }
    }

    // =========================================================================
    // Fill
    // =========================================================================

    /// Materialise entry registers whose value did not arrive through the
    /// shuffle: spilled at exit, constant-folded, or simply absent from the
    /// exit's register file. Doubles first, then integers and boxed forms.
    fn fill_missing(&mut self) {
        for fpr in Fpr::BANK {
            let Some(binding) = self.entry.regs.fpr(fpr) else {
                continue;
            };
            if binding.spilled || self.arrived_by_shuffle(binding.id) {
                continue;
            }
            let constant = self.ir.constant_value(binding.id);
            let home = self.ir.home_slot(binding.id);
            let temp = self.scratch_gpr;
            emit_fill_double(self.em, constant, home, fpr, temp);
        }

        for gpr in Gpr::BANK {
            let Some(binding) = self.entry.regs.gpr(gpr) else {
                continue;
            };
            if binding.spilled || self.arrived_by_shuffle(binding.id) {
                continue;
            }
            let constant = self.ir.constant_value(binding.id);
            let home = self.ir.home_slot(binding.id);
            if binding.tag == ValueTag::Int32 {
                emit_fill_int32(self.em, constant, home, gpr);
            } else {
                emit_fill_boxed(self.em, constant, home, gpr);
            }
        }
    }

    /// Whether the value reached its entry register through the register
    /// shuffle rather than memory.
    fn arrived_by_shuffle(&self, id: super::site::LogicalId) -> bool {
        match self.exit_map.find(id) {
            Some(src) => !self.exit.reg(src).map(|b| b.spilled).unwrap_or(false),
            None => false,
        }
    }

    // =========================================================================
    // Finish
    // =========================================================================

    fn finish(&mut self) {
        if self.scratch.must_restore_tag_mask() {
            self.em.move_imm(TAG_MASK, Gpr::TagMask);
        }
        self.em.jump_to(self.entry.label);
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn emit_edge(&mut self, from: usize, to: usize) {
        let src_tag = self.prev_tag(from);
        let dst_tag = self.next_tag(to);
        let scratch_fpr = self.scratch.fpr1();
        emit_move(
            self.em,
            AnyReg::from_flat_index(from),
            AnyReg::from_flat_index(to),
            src_tag,
            dst_tag,
            scratch_fpr,
        );
    }

    /// Exit-side representation of the value in a register.
    fn prev_tag(&self, flat: usize) -> ValueTag {
        self.exit
            .reg(AnyReg::from_flat_index(flat))
            .map(|b| b.tag)
            .expect("graph edge from unbound register")
    }

    /// Entry-side representation expected in a register.
    fn next_tag(&self, flat: usize) -> ValueTag {
        self.entry
            .regs
            .reg(AnyReg::from_flat_index(flat))
            .map(|b| b.tag)
            .expect("graph edge into unbound register")
    }
}

// =============================================================================
// Tests
// =============================================================================
