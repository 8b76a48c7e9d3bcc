//! Scratch-register discovery.
//!
//! The shuffler needs temporaries: one GPR (double boxing through the
//! integer bank, cycle staging) and up to two FPRs (the exactness test in
//! double narrowing, and FPR-to-FPR cycle staging). A register qualifies as
//! scratch when no live value claims it on either side of the transition.
//!
//! Discovery runs once per exit, before any shuffling. Registers that hold a
//! live exit value nobody wants in a register become scratch as soon as the
//! pre-spill pass has dumped them; a completed chain's head register (read,
//! never written) is offered the same way during chain emission. If no GPR
//! qualifies, the tag-mask register is borrowed and the caller must restore
//! its constant before jumping to the entry.

use super::site::{EntrySite, ExitSite};
use crate::backend::registers::{Fpr, Gpr};

/// The temporaries available while bridging one exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScratchSet {
    gpr: Option<Gpr>,
    fpr1: Option<Fpr>,
    fpr2: Option<Fpr>,
    borrowed_tag_mask: bool,
}

impl ScratchSet {
    /// Classify the register file and collect every register free on both
    /// sides.
    pub fn discover(exit: &ExitSite, entry: &EntrySite) -> Self {
        let mut scratch = ScratchSet::default();

        for gpr in Gpr::BANK {
            if exit.gpr(gpr).is_none() && entry.regs.gpr(gpr).is_none() {
                scratch.gpr = Some(gpr);
            }
        }

        for fpr in Fpr::BANK {
            if exit.fpr(fpr).is_none() && entry.regs.fpr(fpr).is_none() {
                scratch.offer_fpr(fpr);
            }
        }

        scratch
    }

    /// Offer a GPR that has just become dead.
    #[inline]
    pub fn offer_gpr(&mut self, gpr: Gpr) {
        if !self.borrowed_tag_mask {
            self.gpr = Some(gpr);
        }
    }

    /// Offer an FPR that has just become dead. Keeps at most two, distinct.
    #[inline]
    pub fn offer_fpr(&mut self, fpr: Fpr) {
        match self.fpr1 {
            None => self.fpr1 = Some(fpr),
            Some(first) if first != fpr && self.fpr2.is_none() => self.fpr2 = Some(fpr),
            _ => {}
        }
    }

    /// The scratch GPR, borrowing the tag-mask register if discovery found
    /// none. Call [`ScratchSet::must_restore_tag_mask`] after emission to see
    /// whether the borrow happened.
    #[inline]
    pub fn ensure_gpr(&mut self) -> Gpr {
        match self.gpr {
            Some(gpr) => gpr,
            None => {
                self.borrowed_tag_mask = true;
                self.gpr = Some(Gpr::TagMask);
                Gpr::TagMask
            }
        }
    }

    /// The scratch GPR, if one has been established.
    #[inline]
    pub fn gpr(&self) -> Option<Gpr> {
        self.gpr
    }

    /// First scratch FPR, if any.
    #[inline]
    pub fn fpr1(&self) -> Option<Fpr> {
        self.fpr1
    }

    /// Second scratch FPR, if any. Consulted only for FPR-to-FPR cycles.
    #[inline]
    pub fn fpr2(&self) -> Option<Fpr> {
        self.fpr2
    }

    /// Whether the tag-mask register was pressed into service and its
    /// constant must be re-materialised before the final jump.
    #[inline]
    pub fn must_restore_tag_mask(&self) -> bool {
        self.borrowed_tag_mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::emitter::Label;
    use crate::exit::descriptor::ValueTag;
    use crate::exit::site::{Binding, LogicalId};

    fn entry_with(f: impl FnOnce(&mut ExitSite)) -> EntrySite {
        let mut entry = EntrySite::new(Label(0));
        f(&mut entry.regs);
        entry
    }

    #[test]
    fn test_discover_free_on_both() {
        let mut exit = ExitSite::new();
        exit.set_gpr(Gpr::R0, Binding::new(LogicalId(1), ValueTag::Boxed));
        let entry = entry_with(|regs| {
            regs.set_gpr(Gpr::R1, Binding::new(LogicalId(1), ValueTag::Boxed));
        });

        let scratch = ScratchSet::discover(&exit, &entry);
        // r0 is live at exit, r1 live at entry; any of r2..r7 qualifies and
        // the last one scanned wins.
        assert_eq!(scratch.gpr(), Some(Gpr::R7));
        assert_eq!(scratch.fpr1(), Some(Fpr::F0));
        assert_eq!(scratch.fpr2(), Some(Fpr::F1));
        assert!(!scratch.must_restore_tag_mask());
    }

    #[test]
    fn test_live_on_entry_is_unavailable() {
        let mut exit = ExitSite::new();
        let mut entry = EntrySite::new(Label(0));
        for (i, gpr) in Gpr::BANK.into_iter().enumerate() {
            exit.set_gpr(gpr, Binding::new(LogicalId(i as u32), ValueTag::Boxed));
            entry
                .regs
                .set_gpr(gpr, Binding::new(LogicalId(i as u32), ValueTag::Boxed));
        }

        let scratch = ScratchSet::discover(&exit, &entry);
        assert_eq!(scratch.gpr(), None);
    }

    #[test]
    fn test_tag_mask_borrow() {
        let mut scratch = ScratchSet::default();
        assert_eq!(scratch.ensure_gpr(), Gpr::TagMask);
        assert!(scratch.must_restore_tag_mask());
        // A later offer must not displace the borrow bookkeeping.
        scratch.offer_gpr(Gpr::R3);
        assert_eq!(scratch.gpr(), Some(Gpr::TagMask));
    }

    #[test]
    fn test_fpr_offers_stay_distinct() {
        let mut scratch = ScratchSet::default();
        scratch.offer_fpr(Fpr::F4);
        scratch.offer_fpr(Fpr::F4);
        assert_eq!(scratch.fpr1(), Some(Fpr::F4));
        assert_eq!(scratch.fpr2(), None);
        scratch.offer_fpr(Fpr::F2);
        assert_eq!(scratch.fpr2(), Some(Fpr::F2));
    }
}
