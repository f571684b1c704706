//! Prefix and suffix inlining.

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use crate::ctx::Ctx;
use crate::options::Options;
use crate::types::atom::{Atom, TempId};
use crate::types::defn::{DefId, Defn, Program};
use crate::types::tail::{Code, Tail};

pub(crate) fn rename_atom(a: &Atom, subst: &HashMap<TempId, Atom>) -> Atom {
  match a {
    Atom::Temp(t) => subst.get(t).cloned().unwrap_or_else(|| a.clone()),
    _ => a.clone(),
  }
}

pub(crate) fn rename_tail(t: &Tail, subst: &HashMap<TempId, Atom>) -> Tail {
  match t {
    Tail::Return(a) => Tail::Return(a.iter().map(|x| rename_atom(x, subst)).collect()),
    Tail::Enter(f, a) => Tail::Enter(rename_atom(f, subst), a.iter().map(|x| rename_atom(x, subst)).collect()),
    Tail::BlockCall(d, a) => Tail::BlockCall(*d, a.iter().map(|x| rename_atom(x, subst)).collect()),
    Tail::PrimCall(op, a) => Tail::PrimCall(*op, a.iter().map(|x| rename_atom(x, subst)).collect()),
    Tail::Sel(c, i, a) => Tail::Sel(*c, *i, rename_atom(a, subst)),
    Tail::DataAlloc(c, a) => Tail::DataAlloc(*c, a.iter().map(|x| rename_atom(x, subst)).collect()),
    Tail::ClosAlloc(d, a) => Tail::ClosAlloc(*d, a.iter().map(|x| rename_atom(x, subst)).collect()),
  }
}

pub(crate) fn fresh_rename(
  prog: &mut Program,
  ctx: &mut Ctx,
  vs: &[TempId],
  subst: &HashMap<TempId, Atom>,
) -> (Vec<TempId>, HashMap<TempId, Atom>) {
  let mut subst2 = subst.clone();
  let mut fresh = Vec::with_capacity(vs.len());
  for &v in vs {
    let ty = prog.temps[v].ty();
    let name = prog.temps[v].name;
    let nv = prog.new_temp(ctx, name, ty);
    subst2.insert(v, Atom::Temp(nv));
    fresh.push(nv);
  }
  (fresh, subst2)
}

/// Substitute a renamed copy of `body` (the callee's code) as the
/// right-hand side of a `Bind vs := ...; rest` that originally called
/// it, binding `vs` to whatever `body`'s final tail returns, and
/// splicing `rest` after every leaf.
fn splice_prefix(
  prog: &mut Program,
  ctx: &mut Ctx,
  body: &Code,
  subst: &HashMap<TempId, Atom>,
  vs: &[TempId],
  rest: &Code,
) -> Code {
  match body {
    Code::Done(t) => Code::Bind(vs.to_vec(), rename_tail(t, subst), Box::new(rest.clone())),
    Code::Bind(bvs, t, brest) => {
      let (fresh_vs, subst2) = fresh_rename(prog, ctx, bvs, subst);
      let t2 = rename_tail(t, subst);
      let inner = splice_prefix(prog, ctx, brest, &subst2, vs, rest);
      Code::Bind(fresh_vs, t2, Box::new(inner))
    }
    Code::Case(a, alts, default) => {
      let a2 = rename_atom(a, subst);
      let alts2 = alts.iter()
        .map(|(c, b)| (*c, splice_prefix(prog, ctx, b, subst, vs, rest)))
        .collect();
      let default2 = default.as_ref().map(|d| Box::new(splice_prefix(prog, ctx, d, subst, vs, rest)));
      Code::Case(a2, alts2, default2)
    }
    Code::If(a, t, f) => {
      let a2 = rename_atom(a, subst);
      let t2 = splice_prefix(prog, ctx, t, subst, vs, rest);
      let f2 = splice_prefix(prog, ctx, f, subst, vs, rest);
      Code::If(a2, Box::new(t2), Box::new(f2))
    }
  }
}

/// A renamed copy of a whole callee body for suffix (tail-position)
/// inlining: no continuation is spliced in, since the callee's own
/// return *is* the enclosing tail position.
pub(crate) fn rename_copy(prog: &mut Program, ctx: &mut Ctx, body: &Code, subst: &HashMap<TempId, Atom>) -> Code {
  match body {
    Code::Done(t) => Code::Done(rename_tail(t, subst)),
    Code::Bind(vs, t, rest) => {
      let (fresh_vs, subst2) = fresh_rename(prog, ctx, vs, subst);
      let t2 = rename_tail(t, subst);
      Code::Bind(fresh_vs, t2, Box::new(rename_copy(prog, ctx, rest, &subst2)))
    }
    Code::Case(a, alts, default) => {
      let a2 = rename_atom(a, subst);
      let alts2 = alts.iter().map(|(c, b)| (*c, rename_copy(prog, ctx, b, subst))).collect();
      let default2 = default.as_ref().map(|d| Box::new(rename_copy(prog, ctx, d, subst)));
      Code::Case(a2, alts2, default2)
    }
    Code::If(a, t, f) => Code::If(
      rename_atom(a, subst),
      Box::new(rename_copy(prog, ctx, t, subst)),
      Box::new(rename_copy(prog, ctx, f, subst)),
    ),
  }
}

fn code_size(c: &Code) -> u32 {
  match c {
    Code::Done(_) => 1,
    Code::Bind(_, _, rest) => 1 + code_size(rest),
    Code::Case(_, alts, default) =>
      1 + alts.iter().map(|(_, b)| code_size(b)).sum::<u32>()
        + default.as_ref().map_or(0, |d| code_size(d)),
    Code::If(_, t, f) => 1 + code_size(t) + code_size(f),
  }
}

/// The `guarded` predicate: whether there is a path from `start`'s
/// own body back to `start` via tail-position `BlockCall`s, i.e. whether
/// `start` is (possibly indirectly) recursive. Non-recursive blocks are
/// the only ones eligible for inlining.
#[must_use] pub fn guarded(prog: &Program, start: DefId) -> bool {
  fn tail_targets(t: &Tail, out: &mut Vec<DefId>) {
    if let Tail::BlockCall(d, _) = t { out.push(*d); }
  }
  fn code_tail_targets(c: &Code, out: &mut Vec<DefId>) {
    match c {
      Code::Done(t) => tail_targets(t, out),
      Code::Bind(_, _, rest) => code_tail_targets(rest, out),
      Code::Case(_, alts, default) => {
        for (_, b) in alts { code_tail_targets(b, out); }
        if let Some(d) = default { code_tail_targets(d, out); }
      }
      Code::If(_, t, f) => { code_tail_targets(t, out); code_tail_targets(f, out); }
    }
  }
  let mut visited = HashSet::new();
  let mut stack = vec![start];
  visited.insert(start);
  while let Some(d) = stack.pop() {
    if let Defn::Block { code, .. } = &prog.defs[d].defn {
      let mut targets = Vec::new();
      code_tail_targets(code, &mut targets);
      for t in targets {
        if t == start { return true; }
        if visited.insert(t) { stack.push(t); }
      }
    }
  }
  false
}

/// Whether `callee`'s body is small enough, or single-use enough, to
/// inline.
#[must_use] pub fn within_budget(prog: &Program, callee: DefId, use_count: u32, opts: &Options) -> bool {
  if opts.inline_single_use && use_count <= 1 { return true; }
  if let Defn::Block { code, .. } = &prog.defs[callee].defn {
    code_size(code) <= opts.inline_size_budget
  } else {
    false
  }
}

/// Count, for every `DefId`, how many `BlockCall` sites in the program
/// target it (used by the single-use heuristic).
#[must_use] pub fn use_counts(prog: &Program) -> HashMap<DefId, u32> {
  let mut counts: HashMap<DefId, u32> = HashMap::new();
  fn walk(c: &Code, counts: &mut HashMap<DefId, u32>) {
    let mut deps = Vec::new();
    c.dependencies(&mut deps);
    for (d, n) in deps.into_iter().counts() {
      *counts.entry(d).or_insert(0) += n as u32;
    }
  }
  for (_, entry) in prog.defs.iter() {
    if let Defn::Block { code, .. } = &entry.defn { walk(code, counts); }
  }
  counts
}

/// Attempt prefix inlining at every `Bind(vs, BlockCall(b, args), rest)`
/// within `code`, in place. Returns whether anything changed.
pub fn prefix_inline_code(
  prog: &mut Program,
  ctx: &mut Ctx,
  code: &mut Code,
  counts: &HashMap<DefId, u32>,
  opts: &Options,
) -> bool {
  let mut changed = false;
  match code {
    Code::Bind(vs, tail, rest) => {
      changed |= prefix_inline_code(prog, ctx, rest, counts, opts);
      if let Tail::BlockCall(b, args) = tail {
        let b = *b;
        let eligible = matches!(&prog.defs[b].defn, Defn::Block { .. })
          && !guarded(prog, b)
          && within_budget(prog, b, *counts.get(&b).unwrap_or(&0), opts);
        if eligible {
          if let Defn::Block { params, code: body } = &prog.defs[b].defn {
            let mut subst = HashMap::new();
            for (p, a) in params.iter().zip(args.iter()) {
              subst.insert(*p, a.clone());
            }
            let body = body.clone();
            let vs_owned = vs.clone();
            let rest_owned = (**rest).clone();
            let spliced = splice_prefix(prog, ctx, &body, &subst, &vs_owned, &rest_owned);
            log::trace!("prefix-inlined block {b:?} ({} nodes)", code_size(&body));
            *code = spliced;
            return true;
          }
        }
      }
    }
    Code::Done(_) => {}
    Code::Case(_, alts, default) => {
      for (_, b) in alts.iter_mut() { changed |= prefix_inline_code(prog, ctx, b, counts, opts); }
      if let Some(d) = default { changed |= prefix_inline_code(prog, ctx, d, counts, opts); }
    }
    Code::If(_, t, f) => {
      changed |= prefix_inline_code(prog, ctx, t, counts, opts);
      changed |= prefix_inline_code(prog, ctx, f, counts, opts);
    }
  }
  changed
}

/// Attempt suffix (tail-position) inlining: a `Done(BlockCall(b, args))`
/// at the end of a code path is replaced with a renamed copy of `b`'s
/// body, under the same eligibility rule as prefix inlining.
pub fn suffix_inline_code(
  prog: &mut Program,
  ctx: &mut Ctx,
  code: &mut Code,
  counts: &HashMap<DefId, u32>,
  opts: &Options,
) -> bool {
  match code {
    Code::Done(Tail::BlockCall(b, args)) => {
      let b = *b;
      let eligible = matches!(&prog.defs[b].defn, Defn::Block { .. })
        && !guarded(prog, b)
        && within_budget(prog, b, *counts.get(&b).unwrap_or(&0), opts);
      if eligible {
        if let Defn::Block { params, code: body } = &prog.defs[b].defn {
          let mut subst = HashMap::new();
          for (p, a) in params.iter().zip(args.iter()) { subst.insert(*p, a.clone()); }
          let body = body.clone();
          let copy = rename_copy(prog, ctx, &body, &subst);
          log::trace!("suffix-inlined block {b:?}");
          *code = copy;
          return true;
        }
      }
      false
    }
    Code::Done(_) => false,
    Code::Bind(_, _, rest) => suffix_inline_code(prog, ctx, rest, counts, opts),
    Code::Case(_, alts, default) => {
      let mut changed = false;
      for (_, b) in alts.iter_mut() { changed |= suffix_inline_code(prog, ctx, b, counts, opts); }
      if let Some(d) = default { changed |= suffix_inline_code(prog, ctx, d, counts, opts); }
      changed
    }
    Code::If(_, t, f) => {
      let mut changed = suffix_inline_code(prog, ctx, t, counts, opts);
      changed |= suffix_inline_code(prog, ctx, f, counts, opts);
      changed
    }
  }
}

/// Run both inlining flavours across every reachable Block in `prog`
/// once. Returns whether anything changed, for the fixpoint driver.
pub fn run(prog: &mut Program, ctx: &mut Ctx, opts: &Options) -> bool {
  let order = prog.reachable_topo();
  let mut changed = false;
  for d in order {
    if !matches!(&prog.defs[d].defn, Defn::Block { .. }) { continue; }
    let counts = use_counts(prog);
    let mut code = match &prog.defs[d].defn {
      Defn::Block { code, .. } => code.clone(),
      _ => unreachable!(),
    };
    changed |= prefix_inline_code(prog, ctx, &mut code, &counts, opts);
    changed |= suffix_inline_code(prog, ctx, &mut code, &counts, opts);
    if let Defn::Block { code: slot, .. } = &mut prog.defs[d].defn { *slot = code; }
  }
  changed
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::types::atom::Literal;
  use crate::types::defn::EntryPoint;
  use crate::types::ty::{TLit, TyKind};
  use std::rc::Rc;

  fn unit_ty() -> crate::types::ty::Ty { Rc::new(TyKind::Lit(TLit::Nat(0))) }

  #[test]
  fn known_cons_inline_scenario() {
    // k[x] = f @ x  (a single-param block); BlockCall(k, [42]) used as a
    // Bind RHS should splice to `v := f(42); rest`.
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let f = prog.add(None, None, Defn::External { name: intern("f"), ty: unit_ty(), kind: crate::types::defn::ExternalKind::Proc });
    let x = prog.new_temp(&mut ctx, intern("x"), unit_ty());
    let k = prog.add(None, None, Defn::Block {
      params: vec![x],
      code: Code::Done(Tail::BlockCall(f, vec![Atom::Temp(x)])),
    });
    let v = prog.new_temp(&mut ctx, intern("v"), unit_ty());
    let forty_two = Atom::Lit(Literal::Int(num::BigInt::from(42)));
    let mut main_code = Code::Bind(
      vec![v],
      Tail::BlockCall(k, vec![forty_two.clone()]),
      Box::new(Code::Done(Tail::Return(vec![Atom::Temp(v)]))),
    );
    let main = prog.add(None, None, Defn::Block { params: vec![], code: Code::Done(Tail::Return(vec![])) });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let counts = use_counts(&prog);
    let opts = Options::default();
    let changed = prefix_inline_code(&mut prog, &mut ctx, &mut main_code, &counts, &opts);
    assert!(changed);
    // After inlining, the tail mentions `f` directly with the literal 42.
    if let Code::Bind(_, Tail::BlockCall(callee, args), _) = &main_code {
      assert_eq!(*callee, f);
      match &args[0] {
        Atom::Lit(Literal::Int(n)) => assert_eq!(*n, num::BigInt::from(42)),
        _ => panic!("expected literal arg"),
      }
    } else {
      panic!("expected a Bind wrapping the inlined tail, got {main_code:?}");
    }
  }

  #[test]
  fn guarded_detects_self_recursion() {
    let mut prog = Program::new();
    let b = prog.add(None, None, Defn::Block { params: vec![], code: Code::Done(Tail::Return(vec![])) });
    if let Defn::Block { code, .. } = &mut prog.defs[b].defn {
      *code = Code::Done(Tail::BlockCall(b, vec![]));
    }
    assert!(guarded(&prog, b));
  }
}
