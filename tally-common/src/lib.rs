//! Common utilities shared by the tally crates.

#![warn(missing_docs)]

#[macro_use]
mod macros;

pub mod time;
