//! Dedup / alpha-coalescing: definitions are grouped by summary,
//! and alpha-equivalent Blocks/TopLevels within a bucket are merged —
//! the first retained, later ones rewritten to forward to it.
//! ClosureDefns with equal bodies are merged by redirecting every
//! ClosAlloc site that names the duplicate.

use hashbrown::HashMap;
use crate::types::atom::{Atom, TempId};
use crate::types::defn::{DefId, Defn, Program};
use crate::types::tail::{AlphaEnv, Code, Tail};

fn block_alpha_eq(pd: &[TempId], cd: &Code, pr: &[TempId], cr: &Code) -> bool {
  if pd.len() != pr.len() { return false; }
  let ed = AlphaEnv::new().extend(pd);
  let er = AlphaEnv::new().extend(pr);
  cd.alpha_eq(&ed, cr, &er)
}

fn closure_alpha_eq(pd: &[TempId], ad: &[TempId], td: &Tail, pr: &[TempId], ar: &[TempId], tr: &Tail) -> bool {
  if pd.len() != pr.len() || ad.len() != ar.len() { return false; }
  let ed = AlphaEnv::new().extend(pd).extend(ad);
  let er = AlphaEnv::new().extend(pr).extend(ar);
  td.alpha_eq(&ed, tr, &er)
}

/// Bucket a set of definitions by a coarse hash, then verify each
/// candidate merge with the precise (and slower) alpha-equality check;
/// `eq` compares candidate `d` against the already-retained `r`.
fn find_redirects<K: std::hash::Hash + Eq>(
  ids: &[DefId],
  key: impl Fn(DefId) -> Option<K>,
  eq: impl Fn(DefId, DefId) -> bool,
) -> HashMap<DefId, DefId> {
  let mut buckets: HashMap<K, Vec<DefId>> = HashMap::new();
  for &d in ids {
    if let Some(k) = key(d) { buckets.entry(k).or_default().push(d); }
  }
  let mut redirects = HashMap::new();
  for (_, bucket) in buckets {
    if bucket.len() < 2 { continue; }
    let mut retained: Vec<DefId> = Vec::new();
    for d in bucket {
      match retained.iter().find(|&&r| eq(d, r)) {
        Some(&r) => { redirects.insert(d, r); }
        None => retained.push(d),
      }
    }
  }
  redirects
}

fn redirect_closures_in_code(code: &mut Code, redirect: &HashMap<DefId, DefId>) {
  match code {
    Code::Done(tail) => redirect_closures_in_tail(tail, redirect),
    Code::Bind(_, tail, rest) => {
      redirect_closures_in_tail(tail, redirect);
      redirect_closures_in_code(rest, redirect);
    }
    Code::Case(_, alts, default) => {
      for (_, b) in alts.iter_mut() { redirect_closures_in_code(b, redirect); }
      if let Some(d) = default { redirect_closures_in_code(d, redirect); }
    }
    Code::If(_, t, f) => {
      redirect_closures_in_code(t, redirect);
      redirect_closures_in_code(f, redirect);
    }
  }
}

fn redirect_closures_in_tail(tail: &mut Tail, redirect: &HashMap<DefId, DefId>) {
  if let Tail::ClosAlloc(d, _) = tail {
    if let Some(&r) = redirect.get(d) { *d = r; }
  }
}

/// Run one dedup pass over every reachable definition.
pub fn run(prog: &mut Program) -> bool {
  let order = prog.reachable_topo();
  let mut changed = false;

  let block_ids: Vec<DefId> = order.iter().copied()
    .filter(|&d| matches!(&prog.defs[d].defn, Defn::Block { .. }))
    .collect();
  let block_key = |d: DefId| match &prog.defs[d].defn { Defn::Block { code, .. } => Some(code.summary()), _ => None };
  let block_eq = |d: DefId, r: DefId| match (&prog.defs[d].defn, &prog.defs[r].defn) {
    (Defn::Block { params: pd, code: cd }, Defn::Block { params: pr, code: cr }) => block_alpha_eq(pd, cd, pr, cr),
    _ => false,
  };
  let block_redirects = find_redirects(&block_ids, block_key, block_eq);

  let toplevel_ids: Vec<DefId> = order.iter().copied()
    .filter(|&d| matches!(&prog.defs[d].defn, Defn::TopLevel { .. }))
    .collect();
  let toplevel_key = |d: DefId| match &prog.defs[d].defn {
    Defn::TopLevel { tail, .. } => Some(Code::Done(tail.clone()).summary()),
    _ => None,
  };
  let toplevel_eq = |d: DefId, r: DefId| match (&prog.defs[d].defn, &prog.defs[r].defn) {
    (Defn::TopLevel { tail: td, .. }, Defn::TopLevel { tail: tr, .. }) =>
      td.alpha_eq(&AlphaEnv::new(), tr, &AlphaEnv::new()),
    _ => false,
  };
  let toplevel_redirects = find_redirects(&toplevel_ids, toplevel_key, toplevel_eq);

  let closure_ids: Vec<DefId> = order.iter().copied()
    .filter(|&d| matches!(&prog.defs[d].defn, Defn::ClosureDefn { .. }))
    .collect();
  let closure_key = |d: DefId| match &prog.defs[d].defn {
    Defn::ClosureDefn { tail, .. } => Some(Code::Done(tail.clone()).summary()),
    _ => None,
  };
  let closure_eq = |d: DefId, r: DefId| match (&prog.defs[d].defn, &prog.defs[r].defn) {
    (Defn::ClosureDefn { params: pd, args: ad, tail: td, .. }, Defn::ClosureDefn { params: pr, args: ar, tail: tr, .. }) =>
      closure_alpha_eq(pd, ad, td, pr, ar, tr),
    _ => false,
  };
  let closure_redirects = find_redirects(&closure_ids, closure_key, closure_eq);

  for (&d, &r) in &block_redirects {
    if let Defn::Block { params, code } = &mut prog.defs[d].defn {
      let args: Vec<Atom> = params.iter().map(|&t| Atom::Temp(t)).collect();
      *code = Code::Done(Tail::BlockCall(r, args));
      changed = true;
    }
  }
  for (&d, &r) in &toplevel_redirects {
    if let Defn::TopLevel { tail, .. } = &mut prog.defs[d].defn {
      *tail = Tail::Return(vec![Atom::Global(r)]);
      changed = true;
    }
  }
  if !closure_redirects.is_empty() {
    changed = true;
    for &d in &order {
      match &mut prog.defs[d].defn {
        Defn::Block { code, .. } => redirect_closures_in_code(code, &closure_redirects),
        Defn::ClosureDefn { tail, .. } | Defn::TopLevel { tail, .. } => redirect_closures_in_tail(tail, &closure_redirects),
        Defn::External { .. } => {}
      }
    }
  }

  changed
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ctx::Ctx;
  use crate::symbol::intern;
  use crate::types::atom::Literal;
  use crate::types::defn::EntryPoint;
  use crate::types::ty::{TLit, TyKind};
  use std::rc::Rc;

  fn unit_ty() -> crate::types::ty::Ty { Rc::new(TyKind::Lit(TLit::Nat(0))) }

  #[test]
  fn merges_alpha_equivalent_blocks() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let x1 = prog.new_temp(&mut ctx, intern("x"), unit_ty());
    let b1 = prog.add(None, None, Defn::Block { params: vec![x1], code: Code::Done(Tail::Return(vec![Atom::Temp(x1)])) });
    let x2 = prog.new_temp(&mut ctx, intern("y"), unit_ty());
    let b2 = prog.add(None, None, Defn::Block { params: vec![x2], code: Code::Done(Tail::Return(vec![Atom::Temp(x2)])) });

    let v = prog.new_temp(&mut ctx, intern("v"), unit_ty());
    let main_code = Code::Bind(
      vec![v],
      Tail::BlockCall(b1, vec![Atom::Lit(Literal::Int(num::BigInt::from(1)))]),
      Box::new(Code::Done(Tail::BlockCall(b2, vec![Atom::Temp(v)]))),
    );
    let main = prog.add(None, None, Defn::Block { params: vec![], code: main_code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let changed = run(&mut prog);
    assert!(changed);
    match &prog.defs[b2].defn {
      Defn::Block { code: Code::Done(Tail::BlockCall(target, _)), .. } => assert_eq!(*target, b1),
      other => panic!("expected b2 to forward to b1, got {other:?}"),
    }
  }

  #[test]
  fn leaves_distinct_blocks_alone() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let x1 = prog.new_temp(&mut ctx, intern("x"), unit_ty());
    let b1 = prog.add(None, None, Defn::Block { params: vec![x1], code: Code::Done(Tail::Return(vec![Atom::Temp(x1)])) });
    let b2 = prog.add(None, None, Defn::Block { params: vec![], code: Code::Done(Tail::Return(vec![])) });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: b1, ty: unit_ty() });
    prog.entry_points.push(EntryPoint { name: intern("aux"), def: b2, ty: unit_ty() });

    let changed = run(&mut prog);
    assert!(!changed);
  }
}
