//! Known-constructor specialisation: when a call site's argument
//! is known, via a local fact, to be a particular `DataAlloc`, a
//! specialised callee is derived whose parameters are the remaining
//! unknown arguments plus the fields of the eliminated allocator.

use hashbrown::HashMap;
use crate::ctx::Ctx;
use crate::opt::facts::Facts;
use crate::types::atom::{Atom, Ctor, TempId};
use crate::types::defn::{DefId, Defn, Program};
use crate::types::tail::{Code, Tail};

/// The known-constructor pattern for one call site: `Some(ctor)` at a
/// position whose argument is a known `DataAlloc`, `None` where the
/// argument is not statically known.
type Pattern = Vec<Option<Ctor>>;

/// Caches derived definitions by `(original, pattern)` so repeated
/// requests for the same specialisation share one callee.
#[derive(Default)]
pub struct DerivedCache(HashMap<(DefId, Pattern), DefId>);

impl DerivedCache {
  #[must_use] pub fn new() -> Self { Self::default() }
}

/// Inspect a call's arguments against the current facts, returning the
/// per-position pattern and the expanded argument list (known positions
/// replaced by their allocator's field atoms) — or `None` if nothing is
/// known, in which case specialisation is declined.
fn analyse_call(args: &[Atom], facts: &Facts) -> Option<(Pattern, Vec<Atom>)> {
  let mut pattern = Vec::with_capacity(args.len());
  let mut new_args = Vec::new();
  let mut any_known = false;
  for a in args {
    match a.as_temp().and_then(|t| facts.get(t)) {
      Some(Tail::DataAlloc(ctor, fields)) => {
        pattern.push(Some(*ctor));
        new_args.extend(fields.iter().cloned());
        any_known = true;
      }
      _ => {
        pattern.push(None);
        new_args.push(a.clone());
      }
    }
  }
  if any_known { Some((pattern, new_args)) } else { None }
}

/// Split `params` against `pattern`, producing the derived parameter
/// list (unknown positions kept, known positions replaced by fresh
/// field temps) plus the `Bind` prefix that reconstructs each
/// eliminated atom from those fresh fields.
fn specialise_params(
  prog: &mut Program,
  ctx: &mut Ctx,
  params: &[TempId],
  pattern: &Pattern,
) -> (Vec<TempId>, Vec<(TempId, Tail)>) {
  let mut new_params = Vec::new();
  let mut prefix = Vec::new();
  for (&p, slot) in params.iter().zip(pattern.iter()) {
    match slot {
      None => new_params.push(p),
      Some(ctor) => {
        let name = prog.temps[p].name;
        let ty = prog.temps[p].ty();
        let mut field_atoms = Vec::with_capacity(ctor.arity as usize);
        for _ in 0..ctor.arity {
          let field = prog.new_temp(ctx, name, ty.clone());
          new_params.push(field);
          field_atoms.push(Atom::Temp(field));
        }
        prefix.push((p, Tail::DataAlloc(*ctor, field_atoms)));
      }
    }
  }
  (new_params, prefix)
}

fn wrap_prefix(prefix: Vec<(TempId, Tail)>, code: Code) -> Code {
  prefix.into_iter().rev().fold(code, |rest, (v, tail)| Code::Bind(vec![v], tail, Box::new(rest)))
}

/// Derive (or fetch the cached) specialised callee for `original` under
/// `pattern`. `original` must be a `Block` or `ClosureDefn`; any other
/// kind has no parameters to specialise and is never looked up here.
fn derive(
  prog: &mut Program,
  ctx: &mut Ctx,
  cache: &mut DerivedCache,
  original: DefId,
  pattern: &Pattern,
) -> DefId {
  if let Some(&cached) = cache.0.get(&(original, pattern.clone())) {
    return cached;
  }
  let derived = match &prog.defs[original].defn {
    Defn::Block { params, code } => {
      let params = params.clone();
      let code = code.clone();
      let (new_params, prefix) = specialise_params(prog, ctx, &params, pattern);
      let new_code = wrap_prefix(prefix, code);
      prog.add(None, None, Defn::Block { params: new_params, code: new_code })
    }
    Defn::ClosureDefn { params, args, tail, alloc_ty, .. } => {
      let params = params.clone();
      let args = args.clone();
      let tail = tail.clone();
      let alloc_ty = alloc_ty.clone();
      let (new_params, prefix) = specialise_params(prog, ctx, &params, pattern);
      // The reconstruction prefix needs a `Code`, which a `ClosureDefn`
      // cannot host directly (its `tail` is a bare `Tail`); spill it
      // into a fresh `Block` that both the stored fields and the
      // invocation args flow into.
      let block_params: Vec<TempId> = new_params.iter().copied().chain(args.iter().copied()).collect();
      let block_code = wrap_prefix(prefix, Code::Done(tail));
      let block = prog.add(None, None, Defn::Block { params: block_params, code: block_code });
      let forward_args: Vec<Atom> = new_params.iter().chain(args.iter()).map(|&t| Atom::Temp(t)).collect();
      prog.add(None, None, Defn::ClosureDefn {
        params: new_params,
        args,
        tail: Tail::BlockCall(block, forward_args),
        alloc_ty,
        derived: std::cell::RefCell::new(Vec::new()),
      })
    }
    _ => unreachable!("derive called on a definition with no parameter list"),
  };
  if let Defn::ClosureDefn { derived: list, .. } = &prog.defs[original].defn {
    list.borrow_mut().push(derived);
  }
  cache.0.insert((original, pattern.clone()), derived);
  derived
}

/// Try to specialise a single call tail (`BlockCall` or `ClosAlloc`)
/// under the given facts, returning the rewritten tail if anything was
/// known, `None` if the tail has no callee parameters or nothing about
/// its arguments is known (declined).
fn try_specialise(
  prog: &mut Program,
  ctx: &mut Ctx,
  cache: &mut DerivedCache,
  tail: &Tail,
  facts: &Facts,
) -> Option<Tail> {
  let (callee, args) = match tail {
    Tail::BlockCall(d, a) => (*d, a),
    Tail::ClosAlloc(d, a) => (*d, a),
    _ => return None,
  };
  if !matches!(&prog.defs[callee].defn, Defn::Block { .. } | Defn::ClosureDefn { .. }) {
    return None;
  }
  let (pattern, new_args) = analyse_call(args, facts)?;
  let derived = derive(prog, ctx, cache, callee, &pattern);
  Some(match tail {
    Tail::BlockCall(..) => Tail::BlockCall(derived, new_args),
    Tail::ClosAlloc(..) => Tail::ClosAlloc(derived, new_args),
    _ => unreachable!(),
  })
}

fn specialise_code(
  prog: &mut Program,
  ctx: &mut Ctx,
  cache: &mut DerivedCache,
  code: &mut Code,
  facts: &Facts,
) -> bool {
  match code {
    Code::Done(tail) => {
      if let Some(rewritten) = try_specialise(prog, ctx, cache, tail, facts) {
        *tail = rewritten;
        true
      } else {
        false
      }
    }
    Code::Bind(vs, tail, rest) => {
      let mut changed = false;
      if let Some(rewritten) = try_specialise(prog, ctx, cache, tail, facts) {
        *tail = rewritten;
        changed = true;
      }
      let next_facts = if vs.len() == 1 { facts.bind(vs[0], tail) } else { facts.clone() };
      changed |= specialise_code(prog, ctx, cache, rest, &next_facts);
      changed
    }
    Code::Case(_, alts, default) => {
      let mut changed = false;
      for (_, b) in alts.iter_mut() { changed |= specialise_code(prog, ctx, cache, b, facts); }
      if let Some(d) = default { changed |= specialise_code(prog, ctx, cache, d, facts); }
      changed
    }
    Code::If(_, t, f) => {
      let mut changed = specialise_code(prog, ctx, cache, t, facts);
      changed |= specialise_code(prog, ctx, cache, f, facts);
      changed
    }
  }
}

/// Run known-constructor specialisation once over every reachable
/// `Block`'s body. `TopLevel`/`ClosureDefn` bodies are single tails with
/// no nested call sites to rewrite in place, so they are left for the
/// callers that reference them.
pub fn run(prog: &mut Program, ctx: &mut Ctx, cache: &mut DerivedCache) -> bool {
  let order = prog.reachable_topo();
  let mut changed = false;
  for d in order {
    let mut code = match &prog.defs[d].defn {
      Defn::Block { code, .. } => code.clone(),
      _ => continue,
    };
    changed |= specialise_code(prog, ctx, cache, &mut code, &Facts::default());
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
  use crate::types::ty::{TLit, TyKind, TyconId};
  use crate::symbol::Idx;
  use std::rc::Rc;

  fn unit_ty() -> crate::types::ty::Ty { Rc::new(TyKind::Lit(TLit::Nat(0))) }

  #[test]
  fn specialises_call_with_known_constructor() {
    // k[p] = Sel(Cons, 0, p)   -- a block that only reads field 0 of p
    // main: h := DataAlloc(Cons, [x]); done (k(h))
    // After specialisation, k's call site should target a derived block
    // taking the field directly, with no DataAlloc left to reconstruct
    // it from (the original allocation is elided at the call site).
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let cons = Ctor { tycon: TyconId::from_usize(0), tag: 0, arity: 1 };

    let p = prog.new_temp(&mut ctx, intern("p"), unit_ty());
    let k = prog.add(None, None, Defn::Block {
      params: vec![p],
      code: Code::Done(Tail::Sel(cons, 0, Atom::Temp(p))),
    });

    let h = prog.new_temp(&mut ctx, intern("h"), unit_ty());
    let main_code = Code::Bind(
      vec![h],
      Tail::DataAlloc(cons, vec![Atom::Lit(Literal::Bool(true))]),
      Box::new(Code::Done(Tail::BlockCall(k, vec![Atom::Temp(h)]))),
    );
    let main = prog.add(None, None, Defn::Block { params: vec![], code: main_code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let mut cache = DerivedCache::new();
    let changed = run(&mut prog, &mut ctx, &mut cache);
    assert!(changed);

    let rewritten = match &prog.defs[main].defn { Defn::Block { code, .. } => code.clone(), _ => panic!() };
    if let Code::Bind(_, _, rest) = &rewritten {
      if let Code::Done(Tail::BlockCall(callee, args)) = &**rest {
        assert_ne!(*callee, k, "should target the derived, not the original, block");
        assert_eq!(args.len(), 1);
        match &args[0] {
          Atom::Lit(Literal::Bool(b)) => assert!(*b),
          other => panic!("expected the field atom to be forwarded directly, got {other:?}"),
        }
      } else {
        panic!("expected the tail BlockCall to survive, got {rest:?}");
      }
    } else {
      panic!("expected the Bind(h := DataAlloc ...) prefix to be unchanged, got {rewritten:?}");
    }
  }

  #[test]
  fn declines_when_nothing_is_known() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let p = prog.new_temp(&mut ctx, intern("p"), unit_ty());
    let k = prog.add(None, None, Defn::Block { params: vec![p], code: Code::Done(Tail::Return(vec![Atom::Temp(p)])) });
    let q = prog.new_temp(&mut ctx, intern("q"), unit_ty());
    let main = prog.add(None, None, Defn::Block {
      params: vec![q],
      code: Code::Done(Tail::BlockCall(k, vec![Atom::Temp(q)])),
    });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let mut cache = DerivedCache::new();
    let changed = run(&mut prog, &mut ctx, &mut cache);
    assert!(!changed);
  }
}
