//! Speculation-exit reconciliation.
//!
//! Everything between "a typed assumption just failed" and "baseline code is
//! running with equivalent state":
//! - Per-value recovery descriptors and pre-check undo actions
//! - Register-state snapshots on both sides of a transition
//! - Scratch discovery, representation conversion, and the register shuffler
//! - The OSR back end that rebuilds the canonical frame in memory
//! - The driver that walks a function's exits in registration order

pub mod convert;
pub mod descriptor;
pub mod driver;
pub mod osr;
pub mod scratch;
pub mod shuffle;
pub mod site;

pub use descriptor::{RecoveryAction, ValueDescriptor, ValueTag};
pub use driver::{ExitDriver, ExitStats, ReconcileConfig};
pub use osr::{OsrExitEmitter, OsrTarget, ScratchReservoir};
pub use scratch::ScratchSet;
pub use shuffle::Shuffler;
pub use site::{Binding, EntrySite, ExitSite, LogicalId, RegisterMap};
