//! Read-only views of the speculation sites recorded by the IR phase.
//!
//! The graph IR and the two register allocators produce, for every
//! speculation check, the descriptors the engine needs: the check's patchable
//! jump, the register snapshot (bridging) or per-variable recovery table
//! (OSR), and an optional pre-check mutation to undo. The engine only ever
//! borrows these tables; [`IrView`] is the seam that keeps it independent of
//! the IR's internals.

use refract_core::Value;

use crate::backend::emitter::Jump;
use crate::exit::descriptor::{RecoveryAction, ValueDescriptor};
use crate::exit::site::{EntrySite, ExitSite, LogicalId};
use crate::frame::StackSlot;

// =============================================================================
// Exit Records
// =============================================================================

/// One OSR exit: speculation failed and execution resumes in baseline code
/// that was compiled separately, so all state goes through memory.
#[derive(Debug, Clone)]
pub struct OsrExitRecord {
    /// The speculation site that failed.
    pub site_id: LogicalId,
    /// Bytecode offset to resume at.
    pub bytecode_offset: u32,
    /// The speculative body's failed-check jump, to be linked here.
    pub check: Jump,
    /// Recovery descriptor per variable; index is the home-slot index.
    pub variables: Vec<ValueDescriptor>,
    /// Pre-check mutation to undo, if any.
    pub recovery: Option<RecoveryAction>,
    /// Variable most recently written by the bytecode, reloaded into the
    /// result register for the baseline tier.
    pub last_set_variable: Option<u32>,
}

/// One bridge exit: speculation failed and execution resumes in co-compiled
/// baseline code with its own register allocation.
#[derive(Debug, Clone)]
pub struct BridgeExitRecord {
    /// The speculation site this exit belongs to; pairs it with an entry.
    pub site_id: LogicalId,
    /// The speculative body's failed-check jump, to be linked here.
    pub check: Jump,
    /// Register snapshot on the speculative side.
    pub exit: ExitSite,
    /// Pre-check mutation to undo, if any.
    pub recovery: Option<RecoveryAction>,
}

/// One baseline re-entry point for the bridging variant.
#[derive(Debug, Clone)]
pub struct BridgeEntryRecord {
    /// The speculation site this entry serves. Several exits may share it.
    pub site_id: LogicalId,
    /// Register expectation and machine-code label of the entry.
    pub entry: EntrySite,
}

// =============================================================================
// IR View
// =============================================================================

/// Read-only access to one compiled function's speculation descriptors.
pub trait IrView {
    /// OSR exits, in registration order.
    fn osr_exits(&self) -> &[OsrExitRecord];

    /// Bridge exits, in registration order.
    fn bridge_exits(&self) -> &[BridgeExitRecord];

    /// Baseline entries, in registration order. Empty for OSR-only
    /// compilations.
    fn entries(&self) -> &[BridgeEntryRecord];

    /// The compile-time constant a logical value folded to, if it did.
    fn constant_value(&self, id: LogicalId) -> Option<Value>;

    /// The home slot of a logical value.
    fn home_slot(&self, id: LogicalId) -> StackSlot;
}

// =============================================================================
// Exit Table
// =============================================================================

/// A concrete [`IrView`] backed by plain vectors.
///
/// The production IR implements [`IrView`] over its own node tables; this
/// form is what tests and benches build by hand.
#[derive(Debug, Default)]
pub struct ExitTable {
    /// OSR exits in registration order.
    pub osr_exits: Vec<OsrExitRecord>,
    /// Bridge exits in registration order.
    pub bridge_exits: Vec<BridgeExitRecord>,
    /// Baseline entries in registration order.
    pub entries: Vec<BridgeEntryRecord>,
    /// Constant-folded values by logical id.
    pub constants: Vec<(LogicalId, Value)>,
}

impl ExitTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a constant-folded value.
    pub fn set_constant(&mut self, id: LogicalId, value: Value) {
        self.constants.push((id, value));
    }
}

impl IrView for ExitTable {
    fn osr_exits(&self) -> &[OsrExitRecord] {
        &self.osr_exits
    }

    fn bridge_exits(&self) -> &[BridgeExitRecord] {
        &self.bridge_exits
    }

    fn entries(&self) -> &[BridgeEntryRecord] {
        &self.entries
    }

    fn constant_value(&self, id: LogicalId) -> Option<Value> {
        self.constants
            .iter()
            .find(|(key, _)| *key == id)
            .map(|(_, value)| *value)
    }

    fn home_slot(&self, id: LogicalId) -> StackSlot {
        StackSlot::for_variable(id.0)
    }
}
