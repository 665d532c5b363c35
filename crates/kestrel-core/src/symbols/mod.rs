//! # Symbols
//!
//! Locating the runtime symbol and line tables inside an executable image.
//! The tables themselves are decoded elsewhere; this module only finds their
//! bytes and the `.text` start they are relative to.
//!
//! Parsing goes through the [`object`] crate, so ELF, PE and Mach-O images
//! are all accepted.

pub mod locator;

pub use locator::{locate_tables, locate_tables_in, SymbolTables};
