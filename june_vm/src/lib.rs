// Prevent accidental debug output in library code.
#![deny(clippy::print_stderr)]

//! june_vm — bytecode virtual machine for the June scripting language.
//!
//! This crate implements the execution engine only: the bytecode format and
//! codec, the variable/value model, the scoped environment, the instruction
//! dispatcher, the module loader, and the pooled allocator. Producing
//! bytecode from June source text (lexing, parsing, compiling) is out of
//! scope here; a front end constructs a [`state::State`], pushes a loaded
//! [`source_file::SrcFile`], and calls [`vm::exec::exec`].

pub mod bytecode;
pub mod dylib;
pub mod loader;
pub mod pool;
pub mod source_file;
pub mod state;
pub mod vm;

pub use bytecode::Bytecode;
pub use source_file::SrcFile;
pub use state::State;
pub use vm::error::{ErrorKind, SpannedVmError, VmError};
pub use vm::instr::{Op, Operation};
pub use vm::value::{Value, ValueType};
