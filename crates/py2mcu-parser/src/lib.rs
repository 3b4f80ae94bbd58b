//! Parser for the py2mcu source language.
//!
//! The source language is the Python grammar; this crate accepts all of it
//! that later passes need to see, including constructs they reject, and
//! produces a [`py2mcu_ast::Module`]. Docstrings are lifted out of module,
//! function and class bodies with both their value and their raw text.

#![no_std]
#![forbid(unsafe_code)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
mod lines;
#[cfg(feature = "alloc")]
mod parser;

#[cfg(feature = "alloc")]
pub use parser::*;
