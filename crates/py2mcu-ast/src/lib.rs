//! Syntax tree and analysis passes for py2mcu.
//!
//! The parser produces a [`Module`]; the passes in this crate then extract
//! embedded C blocks ([`embedded`]), promote tagged constants to macros
//! ([`macros`]), resolve names and types ([`resolve`]) and choose a memory
//! strategy for every function ([`strategy`]).
//!
//! # Identifier Naming Conventions
//!
//! Names containing a double underscore are reserved for generated C
//! companions (`buf__len`, `ret__value`); see [`mangle`].

#![no_std]
#![forbid(unsafe_code)]

#[cfg(feature = "alloc")]
extern crate alloc;

mod span;

#[cfg(feature = "alloc")]
mod ast;
#[cfg(feature = "alloc")]
mod error;
#[cfg(feature = "alloc")]
mod ops;

#[cfg(feature = "alloc")]
pub mod embedded;
#[cfg(feature = "alloc")]
pub mod fold;
#[cfg(feature = "alloc")]
pub mod infer;
#[cfg(feature = "alloc")]
pub mod macros;
#[cfg(feature = "alloc")]
pub mod mangle;
#[cfg(feature = "alloc")]
pub mod resolve;
#[cfg(feature = "alloc")]
pub mod scope;
#[cfg(feature = "alloc")]
pub mod strategy;
#[cfg(feature = "alloc")]
pub mod types;

pub use span::Span;

#[cfg(feature = "alloc")]
pub use ast::*;
#[cfg(feature = "alloc")]
pub use error::{CompileError, CompileResult, ErrorKind};
#[cfg(feature = "alloc")]
pub use ops::*;
#[cfg(feature = "alloc")]
pub use types::{ArrayLength, TypeDescriptor};
