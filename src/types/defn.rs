//! Definitions: Blocks, ClosureDefns, TopLevels and Externals, plus the
//! [`Program`] arena that owns them.

use std::cell::RefCell;
use crate::diag::FileSpan;
use crate::mk_idx;
use crate::symbol::{IdxVec, Symbol};
use crate::types::atom::TempId;
use crate::types::tail::{Code, Tail};
use crate::types::ty::{AllocType, Ty};

mk_idx! {
  /// A definition's identity: stable across passes (definitions are
  /// mutated in place and never physically deleted).
  pub struct DefId;
}

/// What kind of external symbol an `External` definition names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExternalKind {
  /// A callable external procedure (e.g. the `alloc` symbol).
  Proc,
  /// An external data value.
  Value,
}

/// The four definition variants a program is built from.
#[derive(Debug)]
pub enum Defn {
  /// A parameterised code sequence, callable by `BlockCall`.
  Block {
    /// Formal parameters, in declaration order.
    params: Vec<TempId>,
    /// The body.
    code: Code,
  },
  /// A closure: `params` are captured (stored) at allocation time,
  /// `args` are supplied when the closure is entered, and `tail` is the
  /// code run on entry. `derived` holds specialised copies spawned by
  /// known-constructor specialisation, sharing no ownership with
  /// the original.
  ClosureDefn {
    /// Captured/stored parameters.
    params: Vec<TempId>,
    /// Invocation arguments.
    args: Vec<TempId>,
    /// The tail run when entered.
    tail: Tail,
    /// The declared allocator type (stored component types + result).
    alloc_ty: AllocType,
    /// Specialised copies derived from this original, keyed informally
    /// by their known-constructor pattern (see `opt::known_cons`).
    derived: RefCell<Vec<DefId>>,
  },
  /// A module-scope binding computed once at program initialisation.
  /// `lhs` names each value bound by (possibly multi-valued) `tail`.
  TopLevel {
    /// The initialising tail.
    tail: Tail,
    /// The name(s) this top-level binds, positionally matching the
    /// atoms `tail` returns.
    lhs: Vec<Symbol>,
  },
  /// An externally supplied symbol (e.g. the `alloc` allocator entry
  /// point), opaque to the optimiser.
  External {
    /// The external symbol's name.
    name: Symbol,
    /// Its declared type.
    ty: Ty,
    /// Whether it denotes a callable procedure or a value.
    kind: ExternalKind,
  },
}

impl Defn {
  /// The formal parameter list `usedArgs` analysis tracks and
  /// `BlockCall`/`ClosAlloc` argument lists are filtered against: a
  /// Block's params (matching `BlockCall`'s argument list one-to-one),
  /// or a ClosureDefn's *stored* (captured) params (matching
  /// `ClosAlloc`'s argument list one-to-one — see `Tail::used_vars`,
  /// which filters both forms through the same bitmap keyed by callee
  /// `DefId`). A ClosureDefn's invocation `args` are supplied
  /// dynamically by `Enter`, which is never filtered by this analysis,
  /// and so play no part here.
  #[must_use] pub fn call_params(&self) -> Option<&[TempId]> {
    match self {
      Defn::Block { params, .. } => Some(params),
      Defn::ClosureDefn { params, .. } => Some(params),
      Defn::TopLevel { .. } | Defn::External { .. } => None,
    }
  }

  /// The body code/tail, as a [`Code`] for Blocks (wrapping a `Tail`
  /// trivially for the other forms so callers have one entry point for
  /// dependency/used-var analysis).
  #[must_use] pub fn body_tail(&self) -> Option<&Tail> {
    match self {
      Defn::ClosureDefn { tail, .. } | Defn::TopLevel { tail, .. } => Some(tail),
      Defn::Block { .. } | Defn::External { .. } => None,
    }
  }
}

/// One entry in the [`Program`]'s definition arena: the definition
/// itself plus its (optional) declared name and source span, threaded
/// through from the builder interface but never interpreted by the
/// core.
#[derive(Debug)]
pub struct DefnEntry {
  /// The declared name, if any (anonymous Blocks spawned by the
  /// optimiser have none).
  pub name: Option<Symbol>,
  /// Source span, for diagnostics only.
  pub span: Option<FileSpan>,
  /// The definition payload.
  pub defn: Defn,
}

/// A declared entry point: a name, its definition, and its required
/// monomorphic type.
#[derive(Clone, Debug)]
pub struct EntryPoint {
  /// The entry point's declared name.
  pub name: Symbol,
  /// The definition to specialise from.
  pub def: DefId,
  /// The monomorphic type callers must present.
  pub ty: Ty,
}

/// The definition graph: an arena of [`DefnEntry`] keyed by [`DefId`],
/// plus the bookkeeping the pass schedule needs (entry points, and the
/// live-definition list exported for emission). Definitions refer to
/// each other by `DefId`, never by owning handle (Design Notes: "edges
/// carry indices, not owning handles").
#[derive(Debug, Default)]
pub struct Program {
  /// All definitions ever created in this compilation.
  pub defs: IdxVec<DefId, DefnEntry>,
  /// Every temp's metadata (name, mutable type), indexed by `TempId`.
  /// Kept alongside the definition arena rather than on `Ctx` since it
  /// grows with the IR itself, not with compiler-global bookkeeping.
  pub temps: IdxVec<TempId, crate::types::atom::Temp>,
  /// The compilation's entry points.
  pub entry_points: Vec<EntryPoint>,
}

impl Program {
  /// An empty program.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Add a definition, returning its fresh id.
  pub fn add(&mut self, name: Option<Symbol>, span: Option<FileSpan>, defn: Defn) -> DefId {
    self.defs.push(DefnEntry { name, span, defn })
  }

  /// Mint a fresh temp, registering its metadata and returning its id.
  pub fn new_temp(&mut self, ctx: &mut crate::ctx::Ctx, name: Symbol, ty: Ty) -> TempId {
    let id = ctx.fresh_temp();
    let pushed = self.temps.push(crate::types::atom::Temp::new(id, name, ty));
    debug_assert_eq!(id, pushed, "Ctx and Program temp counters drifted out of sync");
    id
  }

  /// Definitions reachable from the entry points by following
  /// `dependencies()` edges, in a leaves-first (post-order)
  /// topological order, as required by dedup and by
  /// `InitVarMap`.
  #[must_use] pub fn reachable_topo(&self) -> Vec<DefId> {
    let mut visited = vec![false; self.defs.len()];
    let mut order = Vec::new();
    let mut stack: Vec<DefId> = self.entry_points.iter().map(|e| e.def).collect();
    // Iterative post-order DFS: first pass marks pre-visit, second emits.
    let mut pending: Vec<(DefId, bool)> = stack.drain(..).map(|d| (d, false)).collect();
    while let Some((d, expanded)) = pending.pop() {
      let idx = d.0 as usize;
      if expanded {
        order.push(d);
        continue;
      }
      if visited[idx] { continue; }
      visited[idx] = true;
      pending.push((d, true));
      let mut deps = Vec::new();
      match &self.defs[d].defn {
        Defn::Block { code, .. } => code.dependencies(&mut deps),
        Defn::ClosureDefn { tail, .. } | Defn::TopLevel { tail, .. } => tail.dependencies(&mut deps),
        Defn::External { .. } => {}
      }
      for dep in deps {
        if !visited[dep.0 as usize] { pending.push((dep, false)); }
      }
    }
    order
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::types::atom::{Atom, Literal};

  #[test]
  fn topo_order_places_callees_before_callers() {
    let mut p = Program::new();
    let leaf = p.add(None, None, Defn::Block { params: vec![], code: Code::Done(Tail::Return(vec![Atom::Lit(Literal::Bool(true))])) });
    let caller = p.add(None, None, Defn::Block { params: vec![], code: Code::Done(Tail::BlockCall(leaf, vec![])) });
    p.entry_points.push(EntryPoint { name: intern("main"), def: caller, ty: ty_unit() });
    let order = p.reachable_topo();
    let leaf_pos = order.iter().position(|&d| d == leaf).unwrap();
    let caller_pos = order.iter().position(|&d| d == caller).unwrap();
    assert!(leaf_pos < caller_pos);
  }

  fn ty_unit() -> Ty {
    use std::rc::Rc;
    use crate::types::ty::{TyKind, TLit};
    Rc::new(TyKind::Lit(TLit::Nat(0)))
  }
}
