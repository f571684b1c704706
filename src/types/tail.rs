//! Tails, Code sequences, and their alpha-equivalence/summary machinery.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use bit_set::BitSet;
use hashbrown::HashMap;
use crate::opt::unused_args::UsedArgs;
use crate::types::atom::{Atom, Ctor, TempId};
use crate::types::defn::DefId;

/// A primitive operation. Kept as a flat enum rather than a
/// string-keyed `PrimOp` table since MIL's primitives are a closed,
/// small set fixed by the back-end (arithmetic, comparison, bitwise).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimOp {
  Add, Sub, Mul, Quot, Rem,
  BitAnd, BitOr, BitXor, BitNot, Shl, Shr,
  Eq, Ne, Lt, Le,
  Not, And, Or,
}

impl PrimOp {
  /// Primitives in MIL are all pure arithmetic/logic; none perform I/O
  /// or may trap observably for the purposes of the optimiser (a
  /// hardware trap on e.g. division by zero is a target-level concern
  /// handled at lowering, not by the optimiser's purity model).
  #[must_use] pub fn is_pure(self) -> bool { true }
}

/// The seven tail forms.
#[derive(Clone, Debug)]
pub enum Tail {
  /// Yield these atoms as the result of the enclosing Code.
  Return(Vec<Atom>),
  /// Apply the closure atom to arguments.
  Enter(Atom, Vec<Atom>),
  /// Jump/call to a Block definition with arguments.
  BlockCall(DefId, Vec<Atom>),
  /// Invoke a primitive.
  PrimCall(PrimOp, Vec<Atom>),
  /// Project field `index` of constructor `ctor` out of `atom`.
  Sel(Ctor, u32, Atom),
  /// Allocate a data value for constructor `ctor`.
  DataAlloc(Ctor, Vec<Atom>),
  /// Allocate a closure for ClosureDefn `k`, capturing the given atoms
  /// as its stored parameters.
  ClosAlloc(DefId, Vec<Atom>),
}

impl Tail {
  /// Allocator forms are pure, repeatable and side-effect free; a
  /// `Sel` is likewise pure (just pointer arithmetic plus a load that is
  /// safe given the invariant that its scrutinee really is `ctor`).
  /// `PrimCall` purity is delegated to [`PrimOp::is_pure`].
  #[must_use] pub fn is_repeatable(&self) -> bool {
    matches!(self, Tail::DataAlloc(..) | Tail::ClosAlloc(..) | Tail::Sel(..))
      || matches!(self, Tail::PrimCall(op, _) if op.is_pure())
  }

  /// The atoms this tail reads (not counting anything introduced below
  /// it — that is the job of `Code::free_vars`).
  #[must_use] pub fn atoms(&self) -> &[Atom] {
    match self {
      Tail::Return(a) | Tail::Enter(_, a) | Tail::BlockCall(_, a)
        | Tail::PrimCall(_, a) | Tail::DataAlloc(_, a) | Tail::ClosAlloc(_, a) => a,
      Tail::Sel(_, _, a) => std::slice::from_ref(a),
    }
  }

  /// The definitions this tail mentions (for `dependencies(ds)`):
  /// the callee of a BlockCall/ClosAlloc, plus any Global atom read.
  pub fn dependencies(&self, out: &mut Vec<DefId>) {
    match self {
      Tail::BlockCall(d, _) | Tail::ClosAlloc(d, _) => out.push(*d),
      Tail::Enter(f, args) => { collect_globals(f, out); args.iter().for_each(|a| collect_globals(a, out)); }
      _ => {}
    }
    for a in self.atoms() { collect_globals(a, out); }
  }

  /// Free temps read by this tail, filtered for BlockCall/ClosAlloc by
  /// the callee's `usedArgs` bitmap, when available.
  pub fn used_vars(&self, used_args: Option<&UsedArgs>, out: &mut Vec<TempId>) {
    match self {
      Tail::BlockCall(d, args) | Tail::ClosAlloc(d, args) => {
        match used_args.and_then(|u| u.get(*d)) {
          Some(bitmap) => for (i, a) in args.iter().enumerate() {
            if bitmap.contains(i) { if let Some(t) = a.as_temp() { out.push(t); } }
          },
          None => for a in args { if let Some(t) = a.as_temp() { out.push(t); } },
        }
      }
      _ => for a in self.atoms() { if let Some(t) = a.as_temp() { out.push(t); } },
    }
  }

  fn feed_summary(&self, env: &mut SummaryEnv) {
    match self {
      Tail::Return(a) => { env.tag(0); env.atoms(a); }
      Tail::Enter(f, a) => { env.tag(1); env.atom(f); env.atoms(a); }
      Tail::BlockCall(d, a) => { env.tag(2); env.def(*d); env.atoms(a); }
      Tail::PrimCall(op, a) => { env.tag(3); op.hash(&mut env.hasher); env.atoms(a); }
      Tail::Sel(c, i, a) => { env.tag(4); c.hash(&mut env.hasher); i.hash(&mut env.hasher); env.atom(a); }
      Tail::DataAlloc(c, a) => { env.tag(5); c.hash(&mut env.hasher); env.atoms(a); }
      Tail::ClosAlloc(d, a) => { env.tag(6); env.def(*d); env.atoms(a); }
    }
  }

  /// Alpha-equivalence at the Tail level: same form, pointwise atom
  /// comparison where a Temp compares equal to a Temp iff either both
  /// resolve to the same positional index in their environments, or
  /// neither is bound (and the atoms are then compared by identity).
  #[must_use] pub fn alpha_eq(&self, env1: &AlphaEnv, other: &Tail, env2: &AlphaEnv) -> bool {
    match (self, other) {
      (Tail::Return(a), Tail::Return(b)) => alpha_atoms(a, env1, b, env2),
      (Tail::Enter(f1, a1), Tail::Enter(f2, a2)) =>
        alpha_atom(f1, env1, f2, env2) && alpha_atoms(a1, env1, a2, env2),
      (Tail::BlockCall(d1, a1), Tail::BlockCall(d2, a2)) =>
        d1 == d2 && alpha_atoms(a1, env1, a2, env2),
      (Tail::PrimCall(op1, a1), Tail::PrimCall(op2, a2)) =>
        op1 == op2 && alpha_atoms(a1, env1, a2, env2),
      (Tail::Sel(c1, i1, a1), Tail::Sel(c2, i2, a2)) =>
        c1 == c2 && i1 == i2 && alpha_atom(a1, env1, a2, env2),
      (Tail::DataAlloc(c1, a1), Tail::DataAlloc(c2, a2)) =>
        c1 == c2 && alpha_atoms(a1, env1, a2, env2),
      (Tail::ClosAlloc(d1, a1), Tail::ClosAlloc(d2, a2)) =>
        d1 == d2 && alpha_atoms(a1, env1, a2, env2),
      _ => false,
    }
  }
}

fn collect_globals(a: &Atom, out: &mut Vec<DefId>) {
  if let Atom::Global(d) = a { out.push(*d); }
}

/// An ordered list assigning positions to bound temps, used for alpha
/// equivalence: a Temp's position is its index in this list, if
/// present.
#[derive(Clone, Debug, Default)]
pub struct AlphaEnv(Vec<TempId>);

impl AlphaEnv {
  /// An empty environment.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Extend the environment with freshly bound temps, in order.
  #[must_use] pub fn extend(&self, vs: &[TempId]) -> Self {
    let mut v = self.0.clone();
    v.extend_from_slice(vs);
    Self(v)
  }

  /// The position of a temp, if it is bound in this environment.
  #[must_use] pub fn position(&self, t: TempId) -> Option<usize> { self.0.iter().position(|&x| x == t) }
}

fn alpha_atom(a: &Atom, env1: &AlphaEnv, b: &Atom, env2: &AlphaEnv) -> bool {
  match (a, b) {
    (Atom::Temp(t1), Atom::Temp(t2)) => match (env1.position(*t1), env2.position(*t2)) {
      (Some(p1), Some(p2)) => p1 == p2,
      (None, None) => t1 == t2,
      _ => false,
    },
    (Atom::Global(d1), Atom::Global(d2)) => d1 == d2,
    (Atom::ConstData(c1), Atom::ConstData(c2)) => c1 == c2,
    (Atom::Lit(l1), Atom::Lit(l2)) => l1 == l2,
    _ => false,
  }
}

fn alpha_atoms(a: &[Atom], env1: &AlphaEnv, b: &[Atom], env2: &AlphaEnv) -> bool {
  a.len() == b.len() && a.iter().zip(b).all(|(x, y)| alpha_atom(x, env1, y, env2))
}

struct SummaryEnv {
  bound: HashMap<TempId, u32>,
  next: u32,
  hasher: DefaultHasher,
}

impl SummaryEnv {
  fn new() -> Self { Self { bound: HashMap::new(), next: 0, hasher: DefaultHasher::new() } }
  fn tag(&mut self, t: u8) { t.hash(&mut self.hasher); }
  fn bind(&mut self, vs: &[TempId]) {
    for &v in vs {
      let id = self.next;
      self.next += 1;
      self.bound.insert(v, id);
    }
  }
  fn atom(&mut self, a: &Atom) {
    match a {
      Atom::Temp(t) => match self.bound.get(t) {
        Some(&p) => { 0u8.hash(&mut self.hasher); p.hash(&mut self.hasher); }
        None => { 1u8.hash(&mut self.hasher); t.0.hash(&mut self.hasher); }
      },
      Atom::Global(d) => { 2u8.hash(&mut self.hasher); d.0.hash(&mut self.hasher); }
      Atom::ConstData(c) => { 3u8.hash(&mut self.hasher); c.hash(&mut self.hasher); }
      Atom::Lit(l) => { 4u8.hash(&mut self.hasher); l.hash(&mut self.hasher); }
    }
  }
  fn atoms(&mut self, a: &[Atom]) { for x in a { self.atom(x); } }
  fn def(&mut self, d: DefId) { d.0.hash(&mut self.hasher); }
}

/// A code sequence: `Bind`, `Done`, `Case`, or `If`. Each has a
/// statically known result arity inherited from its final Tail.
#[derive(Clone, Debug)]
pub enum Code {
  /// `vs := tail; rest`.
  Bind(Vec<TempId>, Tail, Box<Code>),
  /// A terminal tail with no continuation.
  Done(Tail),
  /// Dispatch on the constructor of `scrutinee`.
  /// Alternatives are tried in their lexical (declaration) order.
  Case(Atom, Vec<(Ctor, Code)>, Option<Box<Code>>),
  /// A two-way branch on a boolean atom.
  If(Atom, Box<Code>, Box<Code>),
}

impl Code {
  /// The final tail reached by following `Bind` chains and (for
  /// `Case`/`If`) recursing into whichever branch; returns `None` if all
  /// branches disagree (only possible for a value produced with no
  /// shared tail shape, which cannot happen for well-typed code, but the
  /// optimiser is defensive here rather than panicking).
  #[must_use] pub fn final_tail(&self) -> Option<&Tail> {
    match self {
      Code::Done(t) => Some(t),
      Code::Bind(_, _, rest) => rest.final_tail(),
      Code::Case(_, alts, default) => {
        if let Some((_, c)) = alts.first() { c.final_tail() } else { default.as_deref()?.final_tail() }
      }
      Code::If(_, t, _) => t.final_tail(),
    }
  }

  /// Free temps used anywhere in this code, i.e. read but not locally
  /// bound (`usedVars`). Wildcards are never included since they
  /// are never legally read.
  #[must_use] pub fn free_vars(&self, used_args: Option<&UsedArgs>) -> Vec<TempId> {
    let mut out = Vec::new();
    self.free_vars_into(used_args, &mut out);
    out
  }

  fn free_vars_into(&self, used_args: Option<&UsedArgs>, out: &mut Vec<TempId>) {
    match self {
      Code::Done(t) => t.used_vars(used_args, out),
      Code::Bind(vs, t, rest) => {
        t.used_vars(used_args, out);
        let mut tail_vars = Vec::new();
        rest.free_vars_into(used_args, &mut tail_vars);
        out.extend(tail_vars.into_iter().filter(|v| !vs.contains(v)));
      }
      Code::Case(a, alts, default) => {
        if let Some(t) = a.as_temp() { out.push(t); }
        for (_, c) in alts { c.free_vars_into(used_args, out); }
        if let Some(d) = default { d.free_vars_into(used_args, out); }
      }
      Code::If(a, t, f) => {
        if let Some(tv) = a.as_temp() { out.push(tv); }
        t.free_vars_into(used_args, out);
        f.free_vars_into(used_args, out);
      }
    }
  }

  /// Definitions mentioned anywhere in this code.
  pub fn dependencies(&self, out: &mut Vec<DefId>) {
    match self {
      Code::Done(t) => t.dependencies(out),
      Code::Bind(_, t, rest) => { t.dependencies(out); rest.dependencies(out); }
      Code::Case(_, alts, default) => {
        for (_, c) in alts { c.dependencies(out); }
        if let Some(d) = default { d.dependencies(out); }
      }
      Code::If(_, t, f) => { t.dependencies(out); f.dependencies(out); }
    }
  }

  /// Live-variable back-flow from the successor set `live_out`:
  /// the set of temps live immediately before this code runs.
  #[must_use] pub fn liveness(&self, live_out: &[TempId]) -> Vec<TempId> {
    match self {
      Code::Done(t) => {
        let mut v = live_out.to_vec();
        t.used_vars(None, &mut v);
        v.sort_unstable_by_key(|t| t.0);
        v.dedup();
        v
      }
      Code::Bind(vs, t, rest) => {
        let rest_live = rest.liveness(live_out);
        let mut v: Vec<TempId> = rest_live.into_iter().filter(|x| !vs.contains(x)).collect();
        t.used_vars(None, &mut v);
        v.sort_unstable_by_key(|t| t.0);
        v.dedup();
        v
      }
      Code::Case(a, alts, default) => {
        let mut v = Vec::new();
        for (_, c) in alts { v.extend(c.liveness(live_out)); }
        if let Some(d) = default { v.extend(d.liveness(live_out)); }
        if let Some(t) = a.as_temp() { v.push(t); }
        v.sort_unstable_by_key(|t| t.0);
        v.dedup();
        v
      }
      Code::If(a, t, f) => {
        let mut v = t.liveness(live_out);
        v.extend(f.liveness(live_out));
        if let Some(tv) = a.as_temp() { v.push(tv); }
        v.sort_unstable_by_key(|t| t.0);
        v.dedup();
        v
      }
    }
  }

  /// An alpha-stable hash: `summary(alphaRename(c)) == summary(c)`, and
  /// `alphaEquiv(c, c') ⇒ summary(c) == summary(c')`.
  #[must_use] pub fn summary(&self) -> u64 {
    let mut env = SummaryEnv::new();
    self.feed_summary(&mut env);
    env.hasher.finish()
  }

  fn feed_summary(&self, env: &mut SummaryEnv) {
    match self {
      Code::Done(t) => { env.tag(0); t.feed_summary(env); }
      Code::Bind(vs, t, rest) => {
        env.tag(1);
        env.bind(vs);
        t.feed_summary(env);
        rest.feed_summary(env);
      }
      Code::Case(a, alts, default) => {
        env.tag(2);
        env.atom(a);
        alts.len().hash(&mut env.hasher);
        for (c, code) in alts { c.hash(&mut env.hasher); code.feed_summary(env); }
        match default { Some(d) => { true.hash(&mut env.hasher); d.feed_summary(env); } None => false.hash(&mut env.hasher) }
      }
      Code::If(a, t, f) => { env.tag(3); env.atom(a); t.feed_summary(env); f.feed_summary(env); }
    }
  }

  /// Alpha-equivalence between two Code trees, extending the given
  /// environments as binders are entered.
  #[must_use] pub fn alpha_eq(&self, env1: &AlphaEnv, other: &Code, env2: &AlphaEnv) -> bool {
    match (self, other) {
      (Code::Done(t1), Code::Done(t2)) => t1.alpha_eq(env1, t2, env2),
      (Code::Bind(vs1, t1, r1), Code::Bind(vs2, t2, r2)) => {
        if vs1.len() != vs2.len() || !t1.alpha_eq(env1, t2, env2) { return false; }
        let e1 = env1.extend(vs1);
        let e2 = env2.extend(vs2);
        r1.alpha_eq(&e1, r2, &e2)
      }
      (Code::Case(a1, alts1, d1), Code::Case(a2, alts2, d2)) => {
        if !alpha_atom(a1, env1, a2, env2) || alts1.len() != alts2.len() { return false; }
        if !alts1.iter().zip(alts2).all(|((c1, b1), (c2, b2))| c1 == c2 && b1.alpha_eq(env1, b2, env2)) {
          return false;
        }
        match (d1, d2) {
          (Some(x), Some(y)) => x.alpha_eq(env1, y, env2),
          (None, None) => true,
          _ => false,
        }
      }
      (Code::If(a1, t1, f1), Code::If(a2, t2, f2)) =>
        alpha_atom(a1, env1, a2, env2) && t1.alpha_eq(env1, t2, env2) && f1.alpha_eq(env1, f2, env2),
      _ => false,
    }
  }
}

/// Render a small bit-vector as a used-args description for debug
/// logging (used only by the optimiser's trace output).
#[must_use] pub fn used_args_debug(b: &BitSet) -> String {
  format!("{b:?}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::Idx;

  fn t(n: u32) -> TempId { TempId::from_usize(n as usize) }

  #[test]
  fn alpha_rename_preserves_summary() {
    // x := return []; done (return [x])   vs.   y := return []; done (return [y])
    let c1 = Code::Bind(vec![t(0)], Tail::Return(vec![]), Box::new(Code::Done(Tail::Return(vec![Atom::Temp(t(0))]))));
    let c2 = Code::Bind(vec![t(1)], Tail::Return(vec![]), Box::new(Code::Done(Tail::Return(vec![Atom::Temp(t(1))]))));
    assert_eq!(c1.summary(), c2.summary());
    assert!(c1.alpha_eq(&AlphaEnv::new(), &c2, &AlphaEnv::new()));
  }

  #[test]
  fn distinguishes_different_shapes() {
    let c1 = Code::Done(Tail::Return(vec![Atom::Lit(literal_int(1))]));
    let c2 = Code::Done(Tail::Return(vec![Atom::Lit(literal_int(2))]));
    assert_ne!(c1.summary(), c2.summary());
  }

  fn literal_int(n: i64) -> crate::types::atom::Literal {
    crate::types::atom::Literal::Int(num::BigInt::from(n))
  }
}
