#![forbid(unsafe_code)]

//! Backend IR for the rain compiler: an LLVM-shaped SSA module with a
//! builder, a target data layout, an interpreter used for compile-time
//! evaluation, a text emitter and a small optimizer.

mod arith;
pub mod builder;
pub mod error;
pub mod interp;
pub mod layout;
pub mod module;
pub mod opt;
mod print;
pub mod types;
pub mod value;
pub mod verify;

pub use builder::{Builder, Cursor};
pub use error::IrError;
pub use interp::{HostFunctions, Interpreter, InterpreterLimits, RtValue, Trap};
pub use layout::{DataLayout, Endian};
pub use module::*;
pub use opt::{OptStats, optimize_function, optimize_module};
pub use types::{StructDef, StructId, Type};
pub use value::*;
pub use verify::verify_module;
