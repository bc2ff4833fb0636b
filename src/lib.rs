//! A decompiler for SourcePawn SMX bytecode: parses the compiled-script
//! container, rebuilds a control-flow graph per function, lifts pcode into a
//! typed intermediate language, and recovers structured source-like control
//! flow from it.
//!
//! The pipeline is [`cfg::build`] -> [`lifter::lift`] -> [`typer::Typer`] ->
//! [`fixer::Fixer`] -> [`structurizer::structurize`], orchestrated per
//! function by [`driver::decompile_function`].

pub mod cell;
pub mod cfg;
pub mod config;
pub mod driver;
pub mod error;
pub mod fixer;
pub mod il;
pub mod lifter;
pub mod pcode;
pub mod smx;
pub mod statement;
pub mod structurizer;
pub mod typer;
pub mod writer;
