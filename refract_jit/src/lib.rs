//! Tier-transition engine for the Refract JIT.
//!
//! Refract compiles the same bytecode twice: a speculative tier that assumes
//! concrete value representations (unboxed int32s in GPRs, raw doubles in
//! FPRs) and a baseline tier that handles any value. When a speculative
//! assumption fails at runtime, this crate emits the glue that rebuilds the
//! baseline tier's expected state and jumps there:
//!
//! - **OSR exits** dump every live value into the canonical call-frame layout
//!   and jump into baseline code at the failing bytecode offset.
//! - **Bridge exits** shuffle values register-to-register into the matching
//!   baseline entry's allocation, converting representations in flight.
//!
//! The crate is a pure code emitter: it drives an abstract [`backend::Emitter`]
//! and holds no state across exits beyond per-call scratch buffers.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod codemap;
pub mod exit;
pub mod frame;
pub mod ir;
