//! Tunable heuristic knobs. The source's inline budget is not quantified
//! (Design Notes Open Questions); this module gives it a concrete,
//! overridable default.

use bitflags::bitflags;

bitflags! {
  /// Which of the shape passes `pipeline::run_shape_passes` runs on a
  /// given fixpoint round. All set by default; a driver disables a bit
  /// to isolate a single pass's effect (e.g. when testing one
  /// optimisation in isolation from the others).
  #[derive(Clone, Copy, Debug, PartialEq, Eq)]
  pub struct Passes: u32 {
    /// Prefix/suffix inlining.
    const INLINE = 1 << 0;
    /// Known-constructor specialisation.
    const KNOWN_CONS = 1 << 1;
    /// Fact propagation and case shorting.
    const FLOW = 1 << 2;
    /// Unused-argument elimination.
    const UNUSED_ARGS = 1 << 3;
    /// Dedup of structurally identical definitions.
    const DEDUP = 1 << 4;
    /// Static-allocator hoisting.
    const HOIST = 1 << 5;
  }
}

/// Heuristic thresholds consulted by the optimisation passes.
#[derive(Clone, Copy, Debug)]
pub struct Options {
  /// Prefix/suffix inlining budget: a callee body with at most this many
  /// `Code`/`Tail` nodes is eligible for inlining regardless of use
  /// count.
  pub inline_size_budget: u32,
  /// A callee used exactly once is always eligible for inlining,
  /// independent of `inline_size_budget`.
  pub inline_single_use: bool,
  /// Safety bound on `{inline, flow, unused_args, dedup, hoist}`
  /// fixpoint iterations; exceeding it is logged at `warn` and
  /// the loop stops rather than diverging.
  pub max_fixpoint_iters: u32,
  /// The target's word width in bits, consulted by representation
  /// transformation (`rep::run`) to decide which scalar types need
  /// splitting into a representation vector.
  pub word_bits: u32,
  /// Which shape passes `pipeline::run_shape_passes` runs each round.
  pub passes: Passes,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      inline_size_budget: 16,
      inline_single_use: true,
      max_fixpoint_iters: 64,
      word_bits: 64,
      passes: Passes::all(),
    }
  }
}
