//! Abstract machine surface consumed by the engine.
//!
//! The engine never encodes instructions itself; it drives an [`Emitter`]
//! owned by the enclosing compilation. This module provides:
//! - `registers`: the allocatable GPR/FPR banks and reserved registers
//! - `emitter`: the append-only emission trait with label/jump handles
//! - `stream`: a recording emitter used for inspection and testing

pub mod emitter;
pub mod registers;
pub mod stream;

pub use emitter::{Emitter, Jump, Label};
pub use registers::{AnyReg, Fpr, FprSet, Gpr, GprSet};
pub use stream::{Inst, InstStream};
