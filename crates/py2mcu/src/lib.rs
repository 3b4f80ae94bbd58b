//! Compile annotated Python to C for microcontrollers.
//!
//! A source file is parsed, its embedded C blocks and tagged constants are
//! collected, every name and type is resolved, each function gets a memory
//! strategy, and finally one C translation unit is printed per target.
//!
//! ## Usage
//!
//! ```ignore
//! use py2mcu::{Compiler, CompileOptions, OptLevel};
//!
//! let source = "def setup() -> None:\n    pass\n\ndef loop() -> None:\n    pass\n";
//! let c_code = py2mcu::compile(source, "stm32f4", 2)?;
//!
//! let compiler = Compiler::with_options(
//!     CompileOptions::new("target_esp32").with_opt_level(OptLevel::O0),
//! )?;
//! let c_code = compiler.compile_string(source)?;
//! ```
//!
//! ## Targets
//!
//! `pc`, `stm32f4`, `esp32` and `rp2040`, matched case-insensitively with an
//! optional `target_` prefix. The `pc` target runs on the host and calls the
//! simulation hooks once per loop iteration.
//!
//! ## Features
//!
//! - `std` (default): [`Compiler::compile_file`] and stderr tracing.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

mod compiler;
mod options;
mod trace;

pub use compiler::{compile, compile_for_targets, Compiler, TranslationUnit};
pub use options::{CompileOptions, OptLevel};
pub use trace::Tracer;

pub use py2mcu_ast::{CompileError, CompileResult, ErrorKind, Span};
pub use py2mcu_codegen::{normalize_target, TargetDescriptor, TARGETS};
