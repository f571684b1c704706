//! `mil`: an optimising compiler back-end for MIL, a monadic,
//! call-oriented intermediate representation, targeting an LLVM-shaped
//! output.
//!
//! A parser or elaborator builds a [`types::defn::Program`] through the
//! constructors in [`builder`]; [`pipeline::compile`] then runs the
//! optimisation and lowering passes to produce an [`llvm::Program`], or
//! reports the first [`diag::Failure`] encountered.
//!
//! # Layout
//!
//! - [`types`] — the data model: types ([`types::ty`]), atoms and
//!   temporaries ([`types::atom`]), tails and code sequences
//!   ([`types::tail`]), definitions and the program arena
//!   ([`types::defn`]), and representation queries ([`types::sizeof`]).
//! - [`ctx`] — the per-compilation fresh-name/type-store context.
//! - [`unify`] and [`infer`] — unification and the inference services
//!   the optimiser and specialiser build on.
//! - [`opt`] — the shape-rewriting optimisation passes: inlining,
//!   known-constructor specialisation, static hoisting, unused-argument
//!   elimination, fact propagation/case shorting, and dedup.
//! - [`specialize`] — monomorphising specialisation of polymorphic
//!   closures.
//! - [`rep`] — representation transformation (wide-scalar splitting).
//! - [`llvm`] — the external LLVM value/type model lowering targets.
//! - [`lower`] — the LLVM lowering pass itself.
//! - [`pipeline`] — the pass schedule and the compile entry point.
//! - [`builder`] — constructors for IR nodes, consumed by a parser.
//! - [`options`] — tunable heuristic knobs.
//! - [`diag`] — the error model and diagnostic sink.
//! - [`symbol`] — interning and typed index arenas.

pub mod builder;
pub mod ctx;
pub mod diag;
pub mod infer;
pub mod llvm;
pub mod lower;
pub mod opt;
pub mod options;
pub mod pipeline;
pub mod rep;
pub mod specialize;
pub mod symbol;
pub mod types;
pub mod unify;
