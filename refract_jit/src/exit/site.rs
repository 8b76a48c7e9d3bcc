//! Register-state snapshots at exits and entries.
//!
//! A site records, for every allocatable physical register, which logical
//! value it holds and in what representation. The speculative compiler takes
//! one snapshot per speculation check; the baseline compiler takes one per
//! matching entry. The shuffler consumes one of each.

use refract_core::{ReconcileError, ReconcileResult};

use super::descriptor::ValueTag;
use crate::backend::emitter::Label;
use crate::backend::registers::{AnyReg, Fpr, Gpr, NUM_FPRS, NUM_GPRS, NUM_REGS};

// =============================================================================
// Logical Id
// =============================================================================

/// Stable identifier for a source variable or SSA value across both tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalId(pub u32);

impl std::fmt::Display for LogicalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// =============================================================================
// Register Binding
// =============================================================================

/// What one physical register holds at a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// The logical value in the register.
    pub id: LogicalId,
    /// Its representation.
    pub tag: ValueTag,
    /// Whether an up-to-date copy also sits in the value's home slot.
    pub spilled: bool,
}

impl Binding {
    /// A live, unspilled binding.
    #[inline]
    pub const fn new(id: LogicalId, tag: ValueTag) -> Self {
        Self {
            id,
            tag,
            spilled: false,
        }
    }

    /// A binding whose home slot also holds the value.
    #[inline]
    pub const fn spilled(id: LogicalId, tag: ValueTag) -> Self {
        Self {
            id,
            tag,
            spilled: true,
        }
    }
}

// =============================================================================
// Exit / Entry Sites
// =============================================================================

/// Snapshot of the physical register file at a speculation exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitSite {
    gprs: [Option<Binding>; NUM_GPRS],
    fprs: [Option<Binding>; NUM_FPRS],
}

impl ExitSite {
    /// An empty snapshot (all registers unused).
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what a GPR holds.
    pub fn set_gpr(&mut self, gpr: Gpr, binding: Binding) -> &mut Self {
        self.gprs[gpr.index()] = Some(binding);
        self
    }

    /// Record what an FPR holds. FPR residents are always raw doubles.
    pub fn set_fpr(&mut self, fpr: Fpr, binding: Binding) -> &mut Self {
        self.fprs[fpr.index()] = Some(binding);
        self
    }

    /// The binding of a GPR, if any.
    #[inline]
    pub fn gpr(&self, gpr: Gpr) -> Option<Binding> {
        self.gprs[gpr.index()]
    }

    /// The binding of an FPR, if any.
    #[inline]
    pub fn fpr(&self, fpr: Fpr) -> Option<Binding> {
        self.fprs[fpr.index()]
    }

    /// The binding of a register in either bank.
    #[inline]
    pub fn reg(&self, reg: AnyReg) -> Option<Binding> {
        match reg {
            AnyReg::Gpr(g) => self.gpr(g),
            AnyReg::Fpr(f) => self.fpr(f),
        }
    }

    /// Iterate live bindings with their registers.
    pub fn iter(&self) -> impl Iterator<Item = (AnyReg, Binding)> + '_ {
        let gprs = Gpr::BANK
            .into_iter()
            .filter_map(|g| self.gpr(g).map(|b| (AnyReg::Gpr(g), b)));
        let fprs = Fpr::BANK
            .into_iter()
            .filter_map(|f| self.fpr(f).map(|b| (AnyReg::Fpr(f), b)));
        gprs.chain(fprs)
    }

    /// Check the site invariants: logical ids are unique across the whole
    /// register map, FPR residents are doubles, and no descriptor carries the
    /// transient `BoxedDouble` tag.
    pub fn validate(&self) -> ReconcileResult<()> {
        let mut seen: [Option<LogicalId>; NUM_REGS] = [None; NUM_REGS];
        let mut count = 0;
        for (reg, binding) in self.iter() {
            if seen[..count].contains(&Some(binding.id)) {
                return Err(ReconcileError::inconsistent(format!(
                    "{} bound to more than one register",
                    binding.id
                )));
            }
            seen[count] = Some(binding.id);
            count += 1;

            match reg {
                AnyReg::Fpr(_) if binding.tag != ValueTag::Double => {
                    return Err(ReconcileError::inconsistent(format!(
                        "{} held in an FPR with tag {:?}",
                        binding.id, binding.tag
                    )));
                }
                AnyReg::Gpr(_) if binding.tag == ValueTag::Double => {
                    return Err(ReconcileError::inconsistent(format!(
                        "{} held in a GPR with the FPR-only Double tag",
                        binding.id
                    )));
                }
                _ if binding.tag == ValueTag::BoxedDouble => {
                    return Err(ReconcileError::inconsistent(format!(
                        "{} described with the transient BoxedDouble tag",
                        binding.id
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Snapshot of the register file at a baseline re-entry point, plus the
/// machine-code label of the entry itself.
#[derive(Debug, Clone)]
pub struct EntrySite {
    /// Expected register contents on entry.
    pub regs: ExitSite,
    /// Where baseline execution resumes.
    pub label: Label,
}

impl EntrySite {
    /// Create an entry with an empty register expectation.
    pub fn new(label: Label) -> Self {
        Self {
            regs: ExitSite::new(),
            label,
        }
    }
}

// =============================================================================
// Register Map
// =============================================================================

/// Fixed-capacity association from logical ids to registers.
///
/// Capacity equals the physical register count, so a linear scan over at
/// most fourteen entries replaces hashing. Rebuilt per exit, reused across
/// exits via `clear`.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    entries: [(LogicalId, AnyReg); NUM_REGS],
    occupancy: usize,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            entries: [(LogicalId(0), AnyReg::Gpr(Gpr::R0)); NUM_REGS],
            occupancy: 0,
        }
    }
}

impl RegisterMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the reverse map of a site.
    pub fn of_site(site: &ExitSite) -> Self {
        let mut map = Self::new();
        for (reg, binding) in site.iter() {
            map.set(binding.id, reg);
        }
        map
    }

    /// Associate an id with a register. The id must not already be present.
    #[inline]
    pub fn set(&mut self, id: LogicalId, reg: AnyReg) {
        debug_assert!(self.find(id).is_none(), "{id} inserted twice");
        self.entries[self.occupancy] = (id, reg);
        self.occupancy += 1;
    }

    /// Look up the register holding an id.
    #[inline]
    pub fn find(&self, id: LogicalId) -> Option<AnyReg> {
        self.entries[..self.occupancy]
            .iter()
            .rev()
            .find(|(key, _)| *key == id)
            .map(|(_, reg)| *reg)
    }

    /// Forget all associations.
    #[inline]
    pub fn clear(&mut self) {
        self.occupancy = 0;
    }

    /// Number of associations.
    #[inline]
    pub fn len(&self) -> usize {
        self.occupancy
    }

    /// Whether the map is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
