//! Top-level exit linking.
//!
//! The driver walks every exit of one compiled function, validates the
//! descriptor tables up front, and dispatches each exit to the shuffler
//! (bridging) or the OSR emitter. Emission follows registration order:
//! the speculative body already references these labels, so reordering is
//! not permitted.
//!
//! Validation is all-or-nothing. A malformed descriptor table aborts the
//! compilation before anything reaches the emitter; the runtime then keeps
//! running the baseline tier.

use rustc_hash::FxHashMap;
use tracing::debug;

use refract_core::{ReconcileError, ReconcileResult};

use super::descriptor::{ValueDescriptor, ValueTag};
use super::osr::{OsrExitEmitter, OsrTarget, ScratchReservoir};
use super::shuffle::Shuffler;
use super::site::LogicalId;
use crate::backend::emitter::Emitter;
use crate::backend::registers::{NUM_FPRS, NUM_GPRS};
use crate::frame::StackSlot;
use crate::ir::{IrView, OsrExitRecord};

// =============================================================================
// Configuration
// =============================================================================

/// Engine tunables, owned by the enclosing compilation session.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Value written into the baseline tier's reoptimisation counter on OSR
    /// exit; large enough that the just-failed code is not immediately
    /// re-entered.
    pub warmup_counter: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            warmup_counter: 1000,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Tally of linked exits, per driver (and therefore per compilation task).
#[derive(Debug, Default, Clone)]
pub struct ExitStats {
    /// OSR exits linked.
    pub osr_exits: u64,
    /// Bridge exits linked.
    pub bridge_exits: u64,
}

impl ExitStats {
    /// Total exits linked.
    pub fn total(&self) -> u64 {
        self.osr_exits + self.bridge_exits
    }
}

// =============================================================================
// Exit Driver
// =============================================================================

/// Links all exits of one compiled function.
#[derive(Debug, Default)]
pub struct ExitDriver {
    config: ReconcileConfig,
    stats: ExitStats,
}

impl ExitDriver {
    /// Create a driver with the given configuration.
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            stats: ExitStats::default(),
        }
    }

    /// Counts of exits linked so far.
    pub fn stats(&self) -> &ExitStats {
        &self.stats
    }

    /// Link every exit the IR recorded. Bridging is used when the IR carries
    /// baseline entries; otherwise every exit goes through the OSR path
    /// against `target`.
    pub fn emit_all_exits<E: Emitter>(
        &mut self,
        em: &mut E,
        ir: &impl IrView,
        target: &OsrTarget,
        reservoir: &ScratchReservoir,
    ) -> ReconcileResult<()> {
        if ir.entries().is_empty() {
            self.link_osr_exits(em, ir, target, reservoir)
        } else {
            self.link_bridge_exits(em, ir)
        }
    }

    /// Link all OSR exits in registration order.
    pub fn link_osr_exits<E: Emitter>(
        &mut self,
        em: &mut E,
        ir: &impl IrView,
        target: &OsrTarget,
        reservoir: &ScratchReservoir,
    ) -> ReconcileResult<()> {
        for exit in ir.osr_exits() {
            validate_osr_exit(exit, target)?;
        }

        let mut emitter = OsrExitEmitter::new(em, target, reservoir, self.config.warmup_counter);
        for exit in ir.osr_exits() {
            debug!(
                site = %exit.site_id,
                bytecode_offset = exit.bytecode_offset,
                variables = exit.variables.len(),
                "linking OSR exit"
            );
            emitter.emit_exit(exit)?;
            self.stats.osr_exits += 1;
        }
        Ok(())
    }

    /// Link all bridge exits in registration order, pairing each with its
    /// entry by speculation-site id. Several exits may share one entry.
    pub fn link_bridge_exits<E: Emitter>(
        &mut self,
        em: &mut E,
        ir: &impl IrView,
    ) -> ReconcileResult<()> {
        let mut entries: FxHashMap<LogicalId, usize> = FxHashMap::default();
        for (index, entry) in ir.entries().iter().enumerate() {
            entry.entry.regs.validate()?;
            if entries.insert(entry.site_id, index).is_some() {
                return Err(ReconcileError::inconsistent(format!(
                    "two baseline entries for speculation site {}",
                    entry.site_id
                )));
            }
        }
        for exit in ir.bridge_exits() {
            exit.exit.validate()?;
            if !entries.contains_key(&exit.site_id) {
                return Err(ReconcileError::inconsistent(format!(
                    "no baseline entry for speculation site {}",
                    exit.site_id
                )));
            }
        }

        for exit in ir.bridge_exits() {
            let entry = &ir.entries()[entries[&exit.site_id]];
            debug!(site = %exit.site_id, "linking bridge exit");
            Shuffler::link_exit(em, ir, exit, &entry.entry);
            self.stats.bridge_exits += 1;
        }
        Ok(())
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Reject malformed OSR descriptor tables before anything is emitted.
fn validate_osr_exit(exit: &OsrExitRecord, target: &OsrTarget) -> ReconcileResult<()> {
    target.map().machine_offset(exit.bytecode_offset)?;

    let mut gpr_claims: [Option<u32>; NUM_GPRS] = [None; NUM_GPRS];
    let mut fpr_claims: [Option<u32>; NUM_FPRS] = [None; NUM_FPRS];

    for (index, descriptor) in exit.variables.iter().enumerate() {
        let index = index as u32;
        match descriptor {
            ValueDescriptor::InGpr { gpr, tag } => {
                if *tag == ValueTag::Double || *tag == ValueTag::BoxedDouble {
                    return Err(ReconcileError::inconsistent(format!(
                        "variable {index} in {gpr} with tag {tag:?}"
                    )));
                }
                claim(&mut gpr_claims[gpr.index()], index, |other| {
                    format!("{gpr} claimed by variables {other} and {index}")
                })?;
            }
            ValueDescriptor::InFpr { fpr } => {
                claim(&mut fpr_claims[fpr.index()], index, |other| {
                    format!("{fpr} claimed by variables {other} and {index}")
                })?;
            }
            ValueDescriptor::Spilled { slot, .. } => {
                if *slot != StackSlot::for_variable(index) {
                    return Err(ReconcileError::inconsistent(format!(
                        "variable {index} spilled to foreign slot {slot}; expected a \
                         displaced descriptor"
                    )));
                }
            }
            ValueDescriptor::Displaced { .. }
            | ValueDescriptor::Constant { .. }
            | ValueDescriptor::Dead => {}
        }
    }
    Ok(())
}

fn claim(
    slot: &mut Option<u32>,
    index: u32,
    message: impl FnOnce(u32) -> String,
) -> ReconcileResult<()> {
    match slot {
        Some(other) => Err(ReconcileError::inconsistent(message(*other))),
        None => {
            *slot = Some(index);
            Ok(())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
