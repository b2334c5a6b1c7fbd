//! Midend of a P4-like packet-processing language compiler.
//!
//! The centerpiece is the [`inline`] module: it replaces invocations of
//! instantiated sub-blocks (controls and parsers) with their bodies, renaming
//! everything the callee declares so that fully qualified names stay unique
//! in the enclosing scope. The [`bfrt`] module generates the runtime table
//! schema consumed by the control plane; it operates on the same invariants
//! the inliner maintains.
//!
//! Parsing, type checking, and reference resolution live upstream. This crate
//! consumes their results through [`refs::ReferenceMap`] and
//! [`ir::TypeMap`] and never re-derives them.

pub mod bfrt;
pub mod error;
pub mod inline;
pub mod ir;
pub mod position;
pub mod refs;
