//! C code generation for py2mcu.
//!
//! ## Modules
//!
//! - [`c`] - the generator proper
//! - [`target`] - supported targets and their headers and entry points
//! - [`runtime`] - the memory and float-formatting runtime written into units that need it
//!
//! ## Mangling
//!
//! User names pass through [`py2mcu_ast::mangle::c_identifier`]; list
//! length companions use [`py2mcu_ast::mangle::length_name`].

#![no_std]
#![forbid(unsafe_code)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
pub mod c;
#[cfg(feature = "alloc")]
mod print;
#[cfg(feature = "alloc")]
pub mod runtime;
#[cfg(feature = "alloc")]
pub mod target;

#[cfg(feature = "alloc")]
pub use c::{compile_to_c, compile_to_c_with_options, CCodegen, CCodegenOptions, TypedModule};
#[cfg(feature = "alloc")]
pub use target::{lookup_target, normalize_target, TargetDescriptor, TARGETS};
