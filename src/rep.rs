//! Representation transformation: split a wide scalar `Bit n`
//! value, where `n` exceeds the target's word width, into a flat vector
//! of word-sized temps. The split propagates through the two places a
//! single logical value crosses a structural boundary — a declared
//! `Block`/`ClosureDefn` parameter and a `Sel` projecting a field out of
//! a tuple — together with every call site that must supply the
//! expanded atom list in lockstep, following the same "rewrite the
//! definition and every matching call site together" discipline as
//! `opt::unused_args`'s `filter_params`/`filter_args`.
//!
//! Scope: only a *leaf* `Bit n` type is ever split; a tuple's own
//! component types are inspected (via their spine, since `Tuple` is
//! structural) to size a `Sel`, but a tuple-*typed* parameter is never
//! itself decomposed into its fields — that would be scalar replacement
//! of aggregates, a different and considerably larger transformation
//! than this crate's testable properties ask for. A closure's *invocation*
//! arguments (`args`, entered dynamically via `Enter`) are left
//! unsplit: `Enter`'s callee is a runtime value, not a static `DefId`,
//! so unlike `BlockCall`/`ClosAlloc` there is no single call-site-local
//! place to look up the matching expansion. Any other position a split
//! value might flow through — a `PrimCall`/`DataAlloc` operand, a
//! `Return` atom, a `Case`/`If` scrutinee, or an `Enter` argument — is
//! rejected with a `Failure` rather than silently emitting code that
//! reads a temp this pass removed; see `DESIGN.md`.

use std::rc::Rc;
use hashbrown::HashMap;
use if_chain::if_chain;
use num::BigInt;
use crate::ctx::Ctx;
use crate::diag::{Failure, FailureKind, Result};
use crate::types::atom::{Atom, Ctor, Literal, TempId};
use crate::types::defn::{DefId, Defn, Program};
use crate::types::tail::{Code, Tail};
use crate::types::ty::{apply, deref_root, spine, TLit, Ty, TyKind, TyconData};
use crate::types::sizeof::{nat_arg, well_known_name};

/// Records, for each original temp this pass decided to split, the
/// fresh temps (lo to hi) that replace it.
#[derive(Default)]
pub struct RepEnv {
  splits: HashMap<TempId, Vec<TempId>>,
}

impl RepEnv {
  /// A fresh, empty environment.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// The replacement temps for `t`, if it was split.
  #[must_use] pub fn parts(&self, t: TempId) -> Option<&[TempId]> {
    self.splits.get(&t).map(Vec::as_slice)
  }

  fn insert(&mut self, t: TempId, parts: Vec<TempId>) { self.splits.insert(t, parts); }

  /// Whether any temp was split (an all-types-fit-in-one-word program
  /// leaves this empty, and `run` is then a no-op).
  #[must_use] pub fn is_empty(&self) -> bool { self.splits.is_empty() }
}

/// A type's representation vector: `None` means "represented as
/// itself", `Some(parts)` a flat, lo-to-hi list of word-sized `Bit`
/// types a single value of `ty` must be split into on a target whose
/// word width is `word_bits`.
#[must_use] pub fn rep_calc(ty: &Ty, word_bits: u32) -> Option<Vec<Ty>> {
  let root = deref_root(ty);
  let (head, args) = spine(&root);
  if well_known_name(&head) != Some("Bit") { return None; }
  let TyKind::Con(tc) = &*head else { return None };
  let n = u32::try_from(args.first().and_then(nat_arg)?).ok()?;
  if n <= word_bits { return None; }
  let count = n.div_ceil(word_bits);
  let tc = tc.clone();
  let mut out = Vec::with_capacity(count as usize);
  for i in 0..count {
    let w = if i + 1 == count { n - word_bits * i } else { word_bits };
    out.push(apply(Rc::new(TyKind::Con(tc.clone())), [Rc::new(TyKind::Lit(TLit::Nat(u64::from(w))))]));
  }
  Some(out)
}

fn split_literal(v: &BigInt, word_bits: u32, n: usize) -> Vec<Literal> {
  let modulus = BigInt::from(1u32) << (word_bits as usize);
  let mut rest = v.clone();
  let mut parts = Vec::with_capacity(n);
  for _ in 0..n {
    parts.push(Literal::Int(&rest % &modulus));
    rest >>= word_bits as usize;
  }
  parts
}

fn unsupported(msg: &str) -> Failure {
  Failure::new(FailureKind::Internal(format!("rep-transform: {msg}")))
}

fn check_not_split(atom: &Atom, env: &RepEnv) -> Result<()> {
  if let Atom::Temp(t) = atom {
    if env.parts(*t).is_some() {
      return Err(unsupported(
        "a parameter whose type splits is used in a position this pass does not rewrite",
      ));
    }
  }
  Ok(())
}

fn check_atoms_not_split(atoms: &[Atom], env: &RepEnv) -> Result<()> {
  atoms.iter().try_for_each(|a| check_not_split(a, env))
}

fn expand_atom(env: &RepEnv, word_bits: u32, atom: &Atom, n: usize) -> Result<Vec<Atom>> {
  match atom {
    Atom::Temp(t) => match env.parts(*t) {
      Some(parts) if parts.len() == n => Ok(parts.iter().map(|&p| Atom::Temp(p)).collect()),
      _ => Err(unsupported(
        "a value was forwarded into a split parameter position without itself being a recognised split temp",
      )),
    },
    Atom::Lit(Literal::Int(v)) => Ok(split_literal(v, word_bits, n).into_iter().map(Atom::Lit).collect()),
    _ => Err(unsupported("cannot split this atom kind into a multi-word representation")),
  }
}

/// Rewrite a `BlockCall`/`ClosAlloc` argument list to match `callee`'s
/// (already-decided) parameter splits, erroring if an argument that
/// must split is not itself recognised as split.
fn expand_call_args(
  env: &RepEnv,
  orig_params: &HashMap<DefId, Vec<TempId>>,
  word_bits: u32,
  callee: DefId,
  args: &[Atom],
) -> Result<Vec<Atom>> {
  let Some(params) = orig_params.get(&callee) else {
    check_atoms_not_split(args, env)?;
    return Ok(args.to_vec());
  };
  if params.len() != args.len() {
    return Err(unsupported("call arity does not match the callee's original parameter count"));
  }
  let mut out = Vec::with_capacity(args.len());
  for (&p, a) in params.iter().zip(args) {
    match env.parts(p) {
      None => { check_not_split(a, env)?; out.push(a.clone()); }
      Some(parts) => out.extend(expand_atom(env, word_bits, a, parts.len())?),
    }
  }
  Ok(out)
}

fn rewrite_tail(
  env: &RepEnv,
  orig_params: &HashMap<DefId, Vec<TempId>>,
  word_bits: u32,
  tail: &Tail,
) -> Result<Tail> {
  match tail {
    Tail::BlockCall(d, args) => Ok(Tail::BlockCall(*d, expand_call_args(env, orig_params, word_bits, *d, args)?)),
    Tail::ClosAlloc(d, args) => Ok(Tail::ClosAlloc(*d, expand_call_args(env, orig_params, word_bits, *d, args)?)),
    Tail::Return(a) => { check_atoms_not_split(a, env)?; Ok(Tail::Return(a.clone())) }
    Tail::Enter(f, a) => { check_not_split(f, env)?; check_atoms_not_split(a, env)?; Ok(Tail::Enter(f.clone(), a.clone())) }
    Tail::PrimCall(op, a) => { check_atoms_not_split(a, env)?; Ok(Tail::PrimCall(*op, a.clone())) }
    Tail::DataAlloc(c, a) => { check_atoms_not_split(a, env)?; Ok(Tail::DataAlloc(*c, a.clone())) }
    Tail::Sel(c, i, a) => { check_not_split(a, env)?; Ok(Tail::Sel(*c, *i, a.clone())) }
  }
}

/// If `tail` is a `Sel` into a tuple whose projected field splits,
/// build the chain of fresh-temp `Sel`s that replace the single
/// `Bind([bound], tail, _)`, registering `bound`'s split in `env`.
/// Returns `None` when `tail` is not a splittable tuple `Sel` (the
/// caller falls through to `rewrite_tail`).
fn try_split_sel(
  prog: &mut Program,
  ctx: &mut Ctx,
  env: &mut RepEnv,
  word_bits: u32,
  tail: &Tail,
  bound: TempId,
) -> Result<Option<Vec<(TempId, Tail)>>> {
  let Tail::Sel(ctor, idx, atom) = tail else { return Ok(None) };
  if !matches!(&**ctx.types.tycon(ctor.tycon), TyconData::Tuple(_)) { return Ok(None) }
  let Atom::Temp(scrut) = atom else { return Ok(None) };
  let scrut_ty = prog.temps[*scrut].ty();
  let (_, comp_tys) = spine(&deref_root(&scrut_ty));
  let idx = *idx as usize;
  let target = comp_tys.get(idx).ok_or_else(|| unsupported("Sel index out of range for its tuple type"))?;
  let Some(parts) = rep_calc(target, word_bits) else { return Ok(None) };

  let widths: Vec<u32> = comp_tys.iter()
    .map(|c| rep_calc(c, word_bits).map_or(1, |p| p.len() as u32))
    .collect();
  let base: u32 = widths[..idx].iter().sum();
  let new_arity: u32 = widths.iter().sum();
  let new_ctor = Ctor { tycon: ctor.tycon, tag: ctor.tag, arity: new_arity };

  let name = prog.temps[bound].name;
  let mut chain = Vec::with_capacity(parts.len());
  let mut fresh = Vec::with_capacity(parts.len());
  for (k, part_ty) in parts.into_iter().enumerate() {
    let nt = prog.new_temp(ctx, name, part_ty);
    chain.push((nt, Tail::Sel(new_ctor, base + k as u32, atom.clone())));
    fresh.push(nt);
  }
  env.insert(bound, fresh);
  Ok(Some(chain))
}

fn splice_chain(chain: Vec<(TempId, Tail)>, rest: Code) -> Code {
  chain.into_iter().rev().fold(rest, |acc, (t, tail)| Code::Bind(vec![t], tail, Box::new(acc)))
}

fn rewrite_code(
  prog: &mut Program,
  ctx: &mut Ctx,
  env: &mut RepEnv,
  orig_params: &HashMap<DefId, Vec<TempId>>,
  word_bits: u32,
  code: &Code,
) -> Result<Code> {
  match code {
    Code::Done(tail) => Ok(Code::Done(rewrite_tail(env, orig_params, word_bits, tail)?)),
    Code::Bind(vs, tail, rest) => {
      if vs.len() == 1 {
        if let Some(chain) = try_split_sel(prog, ctx, env, word_bits, tail, vs[0])? {
          let rest_code = rewrite_code(prog, ctx, env, orig_params, word_bits, rest)?;
          return Ok(splice_chain(chain, rest_code));
        }
      }
      let new_tail = rewrite_tail(env, orig_params, word_bits, tail)?;
      let new_rest = rewrite_code(prog, ctx, env, orig_params, word_bits, rest)?;
      Ok(Code::Bind(vs.clone(), new_tail, Box::new(new_rest)))
    }
    Code::Case(scrut, alts, default) => {
      check_not_split(scrut, env)?;
      let new_alts = alts.iter()
        .map(|(c, b)| Ok((*c, rewrite_code(prog, ctx, env, orig_params, word_bits, b)?)))
        .collect::<Result<Vec<_>>>()?;
      let new_default = default.as_ref()
        .map(|d| rewrite_code(prog, ctx, env, orig_params, word_bits, d))
        .transpose()?
        .map(Box::new);
      Ok(Code::Case(scrut.clone(), new_alts, new_default))
    }
    Code::If(scrut, t, f) => {
      check_not_split(scrut, env)?;
      let nt = rewrite_code(prog, ctx, env, orig_params, word_bits, t)?;
      let nf = rewrite_code(prog, ctx, env, orig_params, word_bits, f)?;
      Ok(Code::If(scrut.clone(), Box::new(nt), Box::new(nf)))
    }
  }
}

fn expand_param_list(params: &[TempId], env: &RepEnv) -> Vec<TempId> {
  params.iter()
    .flat_map(|&p| env.parts(p).map_or_else(|| vec![p], |parts| parts.to_vec()))
    .collect()
}

fn expand_stored_types(prog: &Program, stored: &[Ty], params: &[TempId], env: &RepEnv) -> Vec<Ty> {
  stored.iter().zip(params.iter())
    .flat_map(|(ty, &p)| match env.parts(p) {
      Some(fresh) => fresh.iter().map(|&t| prog.temps[t].ty()).collect::<Vec<_>>(),
      None => vec![ty.clone()],
    })
    .collect()
}

/// Run representation transformation over the whole program for a
/// target of the given word width. Returns whether anything changed
/// (i.e. whether any reachable parameter needed splitting).
pub fn run(prog: &mut Program, ctx: &mut Ctx, env: &mut RepEnv, word_bits: u32) -> Result<bool> {
  let order = prog.reachable_topo();
  let mut orig_params: HashMap<DefId, Vec<TempId>> = HashMap::new();

  for &d in &order {
    let params: Vec<TempId> = match &prog.defs[d].defn {
      Defn::Block { params, .. } | Defn::ClosureDefn { params, .. } => params.clone(),
      Defn::TopLevel { .. } | Defn::External { .. } => continue,
    };
    for &p in &params {
      if_chain! {
        if env.parts(p).is_none();
        if let Some(parts) = rep_calc(&prog.temps[p].ty(), word_bits);
        then {
          let name = prog.temps[p].name;
          let fresh: Vec<TempId> = parts.into_iter().map(|t| prog.new_temp(ctx, name, t)).collect();
          env.insert(p, fresh);
        }
      }
    }
    orig_params.insert(d, params);
  }

  if env.is_empty() { return Ok(false); }

  for &d in &order {
    match &prog.defs[d].defn {
      Defn::Block { params, code } => {
        let params = params.clone();
        let code = code.clone();
        let new_params = expand_param_list(&params, env);
        let new_code = rewrite_code(prog, ctx, env, &orig_params, word_bits, &code)?;
        if let Defn::Block { params: ps, code: c } = &mut prog.defs[d].defn { *ps = new_params; *c = new_code; }
      }
      Defn::ClosureDefn { params, tail, alloc_ty, .. } => {
        let params = params.clone();
        let tail = tail.clone();
        let new_params = expand_param_list(&params, env);
        let new_tail = rewrite_tail(env, &orig_params, word_bits, &tail)?;
        let new_stored = expand_stored_types(prog, &alloc_ty.stored, &params, env);
        if let Defn::ClosureDefn { params: ps, tail: t, alloc_ty: at, .. } = &mut prog.defs[d].defn {
          *ps = new_params;
          *t = new_tail;
          at.stored = new_stored;
        }
      }
      Defn::TopLevel { .. } | Defn::External { .. } => {}
    }
  }
  Ok(true)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::types::defn::EntryPoint;
  use crate::types::ty::TyconData;

  fn bit_ty(ctx: &mut Ctx, n: u64) -> Ty {
    let tc = ctx.types.declare_tycon(TyconData::Data { name: intern("Bit") });
    apply(Rc::new(TyKind::Con(ctx.types.tycon(tc).clone())), [Rc::new(TyKind::Lit(TLit::Nat(n)))])
  }

  fn unit_ty() -> Ty { Rc::new(TyKind::Lit(TLit::Nat(0))) }

  #[test]
  fn rep_calc_splits_wide_bit_into_stable_lo_hi_words() {
    let mut ctx = Ctx::new();
    let ty = bit_ty(&mut ctx, 64);
    let parts = rep_calc(&ty, 32).expect("64 bits over a 32-bit word splits");
    assert_eq!(parts.len(), 2);
    for p in &parts {
      assert_eq!(crate::types::sizeof::bit_size(p), Some(32));
    }
  }

  #[test]
  fn rep_calc_leaves_narrow_types_alone() {
    let mut ctx = Ctx::new();
    let ty = bit_ty(&mut ctx, 16);
    assert!(rep_calc(&ty, 32).is_none());
  }

  #[test]
  fn wide_parameter_splits_and_call_site_follows() {
    // callee[x: Bit64] = return [true]; caller[] = callee(4294967301)
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let bit64 = bit_ty(&mut ctx, 64);
    let x = prog.new_temp(&mut ctx, intern("x"), bit64);
    let callee = prog.add(None, None, Defn::Block {
      params: vec![x],
      code: Code::Done(Tail::Return(vec![Atom::Lit(Literal::Bool(true))])),
    });
    let lit = BigInt::from(4_294_967_301u64); // (1 << 32) + 5
    let caller = prog.add(None, None, Defn::Block {
      params: vec![],
      code: Code::Done(Tail::BlockCall(callee, vec![Atom::Lit(Literal::Int(lit))])),
    });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: caller, ty: unit_ty() });

    let mut env = RepEnv::new();
    let changed = run(&mut prog, &mut ctx, &mut env, 32).unwrap();
    assert!(changed);

    let params = match &prog.defs[callee].defn { Defn::Block { params, .. } => params.clone(), _ => panic!() };
    assert_eq!(params.len(), 2);
    assert_eq!(crate::types::sizeof::bit_size(&prog.temps[params[0]].ty()), Some(32));
    assert_eq!(crate::types::sizeof::bit_size(&prog.temps[params[1]].ty()), Some(32));

    let code = match &prog.defs[caller].defn { Defn::Block { code, .. } => code.clone(), _ => panic!() };
    if let Code::Done(Tail::BlockCall(_, args)) = &code {
      assert_eq!(args.len(), 2);
      assert!(matches!(&args[0], Atom::Lit(Literal::Int(n)) if *n == BigInt::from(5)));
      assert!(matches!(&args[1], Atom::Lit(Literal::Int(n)) if *n == BigInt::from(1)));
    } else {
      panic!("expected a BlockCall tail");
    }
  }

  #[test]
  fn sel_into_tuple_field_splits_into_two_loads() {
    // outer[tup: (Bit8, Bit64)] = y := Sel(tup, 1); done (use64(y))
    // use64[q: Bit64] = return [true]
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let bit8 = bit_ty(&mut ctx, 8);
    let bit64 = bit_ty(&mut ctx, 64);
    let tup_tc = ctx.types.declare_tycon(TyconData::Tuple(2));
    let tup_ty = apply(Rc::new(TyKind::Con(ctx.types.tycon(tup_tc).clone())), [bit8, bit64.clone()]);
    let tuple_ctor = Ctor { tycon: tup_tc, tag: 0, arity: 2 };

    let q = prog.new_temp(&mut ctx, intern("q"), bit64.clone());
    let use64 = prog.add(None, None, Defn::Block {
      params: vec![q],
      code: Code::Done(Tail::Return(vec![Atom::Lit(Literal::Bool(true))])),
    });

    let tup = prog.new_temp(&mut ctx, intern("tup"), tup_ty);
    let y = prog.new_temp(&mut ctx, intern("y"), bit64);
    let outer = prog.add(None, None, Defn::Block {
      params: vec![tup],
      code: Code::Bind(
        vec![y],
        Tail::Sel(tuple_ctor, 1, Atom::Temp(tup)),
        Box::new(Code::Done(Tail::BlockCall(use64, vec![Atom::Temp(y)]))),
      ),
    });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: outer, ty: unit_ty() });

    let mut env = RepEnv::new();
    let changed = run(&mut prog, &mut ctx, &mut env, 32).unwrap();
    assert!(changed);

    let code = match &prog.defs[outer].defn { Defn::Block { code, .. } => code.clone(), _ => panic!() };
    let Code::Bind(vs0, Tail::Sel(c0, i0, _), rest0) = &code else { panic!("expected first Sel") };
    assert_eq!(vs0.len(), 1);
    assert_eq!(*i0, 1);
    assert_eq!(c0.arity, 3); // Bit8 (1 slot) + Bit64 (2 slots)
    let Code::Bind(vs1, Tail::Sel(c1, i1, _), rest1) = &**rest0 else { panic!("expected second Sel") };
    assert_eq!(vs1.len(), 1);
    assert_eq!(*i1, 2);
    assert_eq!(c1.arity, 3);
    if let Code::Done(Tail::BlockCall(_, args)) = &**rest1 {
      assert_eq!(args.len(), 2);
    } else {
      panic!("expected the BlockCall to receive both split halves");
    }
  }
}
