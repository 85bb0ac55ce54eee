//! The Frontend / Importer (spec.md 4.4): turns a raw bytecode stream plus
//! its exception table into a fully populated [`crate::ir::MethodBody`] in
//! SSA form. The six pipeline stages are split across one module each;
//! [`import::import`] is the entry point that drives all six in order.

pub mod bytecode;
pub mod error;
pub mod import;
pub mod leaders;
pub mod varflags;

pub use bytecode::{ExceptionRegion, OpCode, RawInstruction, RawOperand};
pub use error::ImportError;
pub use import::{import, ImportOptions};
