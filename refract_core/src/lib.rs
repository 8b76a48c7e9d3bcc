//! # Refract Core
//!
//! Core types shared between the Refract execution tiers:
//!
//! - **Value System**: the uniform 64-bit boxed representation that baseline
//!   code expects for every dynamic value
//! - **Error Handling**: result types and the compilation-abort error taxonomy

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod error;
pub mod value;

pub use error::{ReconcileError, ReconcileResult};
pub use value::Value;

/// Refract runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
