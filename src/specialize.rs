//! Monomorphisation: driven by the program's entry points, walk
//! call sites and instantiate each polymorphic `ClosureDefn` at the
//! concrete types its arguments demand, emitting one fresh monomorphic
//! copy per distinct instantiation.
//!
//! Instance memoisation uses a cache keyed by `(source, substitution)`,
//! consulted before building a fresh copy, rather than re-deriving an
//! instance on every call site.

use hashbrown::HashMap;
use std::rc::Rc;
use crate::ctx::Ctx;
use crate::diag::{Diagnostic, Result};
use crate::infer::{check_entry_point, skeleton_unify_call};
use crate::opt::inline::rename_tail;
use crate::types::atom::Atom;
use crate::types::defn::{DefId, Defn, EntryPoint, Program};
use crate::types::ty::{AllocType, Kind, Scheme, Ty};

/// A call site's instantiation, identified by the canonical pointer of
/// each solved type argument so structurally-equal instantiations
/// coalesce (the same discipline [`crate::types::ty::TypeSet::canon`]
/// uses for dedup).
type InstKey = (DefId, Vec<usize>);

/// Memoises specialised copies by `(original, instantiated-type)`.
#[derive(Default)]
pub struct Specialiser {
  cache: HashMap<InstKey, DefId>,
}

impl Specialiser {
  /// A fresh, empty specialiser.
  #[must_use] pub fn new() -> Self { Self::default() }

  fn key(&self, ctx: &mut Ctx, original: DefId, solved: &[Ty]) -> InstKey {
    let ptrs = solved.iter().map(|t| Rc::as_ptr(&ctx.types.canon(t)) as usize).collect();
    (original, ptrs)
  }
}

/// The declared scheme for a definition's callable type, if it has one
/// worth specialising over.
fn declared_scheme(prog: &Program, d: DefId) -> Option<Scheme> {
  match &prog.defs[d].defn {
    Defn::ClosureDefn { alloc_ty, .. } =>
      Some(Scheme { tvars: alloc_ty.tvars.clone(), body: alloc_ty.result.clone() }),
    Defn::Block { .. } | Defn::TopLevel { .. } | Defn::External { .. } => None,
  }
}

/// The type of an atom as seen from a call site: a temp's current type,
/// or a fresh unification variable for anything else (a literal or
/// global atom never itself pins down a quantified variable, so a
/// placeholder that unification is free to bind is exactly as
/// informative as its real type would be for this purpose).
fn atom_ty(prog: &Program, ctx: &mut Ctx, a: &Atom) -> Ty {
  match a {
    Atom::Temp(t) => prog.temps[*t].ty(),
    Atom::Global(_) | Atom::ConstData(_) | Atom::Lit(_) => ctx.fresh_tvar(Kind::Type),
  }
}

/// Instantiate `original` (a `ClosureDefn`) at the solved type
/// arguments, returning a fresh monomorphic copy's `DefId`. A
/// `ClosureDefn`'s tail has no internal binders of its own (those live
/// in `Code`, not `Tail`), so freshening its `params`/`args` and
/// substituting through the tail is a complete copy — but a complete
/// copy isn't yet a *monomorphic* one: every `Gen(i, _)` occurrence in
/// a stored/param/arg/result type is the quantified variable `solved[i]`
/// was solved for, so each such type is re-instantiated against
/// `solved` (via the same `Scheme::instantiate_with` the declared
/// scheme's own generic instantiation uses) rather than copied
/// verbatim, and the instance's `alloc_ty` sheds its `tvars` entirely.
fn instantiate_copy(prog: &mut Program, ctx: &mut Ctx, original: DefId, solved: &[Ty]) -> DefId {
  let (params, args, tail, alloc_ty) = match &prog.defs[original].defn {
    Defn::ClosureDefn { params, args, tail, alloc_ty, .. } =>
      (params.clone(), args.clone(), tail.clone(), alloc_ty.clone()),
    _ => unreachable!("declared_scheme only returns Some for ClosureDefn"),
  };
  let inst_ty = |t: &Ty| -> Ty {
    Scheme { tvars: alloc_ty.tvars.clone(), body: t.clone() }.instantiate_with(solved)
  };
  let mut subst = HashMap::new();
  let new_params: Vec<_> = params.iter().map(|&t| {
    let nt = prog.new_temp(ctx, prog.temps[t].name, inst_ty(&prog.temps[t].ty()));
    subst.insert(t, Atom::Temp(nt));
    nt
  }).collect();
  let new_args: Vec<_> = args.iter().map(|&t| {
    let nt = prog.new_temp(ctx, prog.temps[t].name, inst_ty(&prog.temps[t].ty()));
    subst.insert(t, Atom::Temp(nt));
    nt
  }).collect();
  let new_tail = rename_tail(&tail, &subst);
  let new_alloc_ty = AllocType {
    tvars: vec![],
    stored: alloc_ty.stored.iter().map(|t| inst_ty(t)).collect(),
    result: inst_ty(&alloc_ty.result),
  };
  prog.add(None, None, Defn::ClosureDefn {
    params: new_params,
    args: new_args,
    tail: new_tail,
    alloc_ty: new_alloc_ty,
    derived: std::cell::RefCell::new(Vec::new()),
  })
}

/// Specialise a single call site against a polymorphic `callee`: solve
/// the callee's quantified variables against the types of the atoms a
/// `ClosAlloc` captures (these populate the closure's `params`, the
/// stored/captured component list — the invocation `args` are supplied
/// later by `Enter` and play no part in a ClosAlloc call site), then
/// fetch or build the cached monomorphic instance. Returns `callee`
/// unchanged if it is not polymorphic.
pub fn specialise_callee(
  prog: &mut Program,
  ctx: &mut Ctx,
  spec: &mut Specialiser,
  callee: DefId,
  captured_args: &[Atom],
) -> Result<DefId> {
  let Some(scheme) = declared_scheme(prog, callee) else { return Ok(callee) };
  if !scheme.is_polymorphic() { return Ok(callee); }
  let callee_stored_tys: Vec<Ty> = match &prog.defs[callee].defn {
    Defn::ClosureDefn { params, .. } => params.iter().map(|&t| prog.temps[t].ty()).collect(),
    _ => unreachable!("declared_scheme only returns Some for ClosureDefn"),
  };
  let call_arg_tys: Vec<Ty> = captured_args.iter().map(|a| atom_ty(prog, ctx, a)).collect();
  let solved = skeleton_unify_call(&scheme, ctx, &call_arg_tys, &callee_stored_tys)?;
  let key = spec.key(ctx, callee, &solved);
  if let Some(&existing) = spec.cache.get(&key) {
    return Ok(existing);
  }
  let instance = instantiate_copy(prog, ctx, callee, &solved);
  spec.cache.insert(key, instance);
  Ok(instance)
}

/// Check every entry point's declared type is monomorphic, aborting on the
/// first violation.
pub fn check_entry_points(entry_points: &[EntryPoint], diag: &mut impl Diagnostic) -> Result<()> {
  for ep in entry_points {
    check_entry_point(ep, diag)?;
  }
  Ok(())
}

/// Confirm that after specialisation, no
/// definition reachable from an entry point carries a quantified type.
/// Returns the first offending definition found, if any.
#[must_use] pub fn find_residual_polymorphism(prog: &Program) -> Option<DefId> {
  prog.reachable_topo().into_iter().find(|&d| {
    matches!(&prog.defs[d].defn, Defn::ClosureDefn { alloc_ty, .. } if !alloc_ty.tvars.is_empty())
  })
}

/// Run monomorphisation over the whole program: every reachable Block's
/// `ClosAlloc` call sites against a polymorphic `ClosureDefn` are
/// rewritten to target a concrete instance. Blocks themselves carry no
/// quantifier in this IR (only a `ClosureDefn`'s `alloc_ty` does), so
/// `BlockCall` sites are never rewritten here.
pub fn run(prog: &mut Program, ctx: &mut Ctx, spec: &mut Specialiser) -> Result<bool> {
  let order = prog.reachable_topo();
  let mut changed = false;
  for d in order {
    let mut code = match &prog.defs[d].defn {
      Defn::Block { code, .. } => code.clone(),
      _ => continue,
    };
    changed |= specialise_code(prog, ctx, spec, &mut code)?;
    if let Defn::Block { code: slot, .. } = &mut prog.defs[d].defn { *slot = code; }
  }
  Ok(changed)
}

fn specialise_code(
  prog: &mut Program,
  ctx: &mut Ctx,
  spec: &mut Specialiser,
  code: &mut crate::types::tail::Code,
) -> Result<bool> {
  use crate::types::tail::Code;
  match code {
    Code::Done(tail) => specialise_tail(prog, ctx, spec, tail),
    Code::Bind(_, tail, rest) => {
      let a = specialise_tail(prog, ctx, spec, tail)?;
      let b = specialise_code(prog, ctx, spec, rest)?;
      Ok(a || b)
    }
    Code::Case(_, alts, default) => {
      let mut changed = false;
      for (_, b) in alts.iter_mut() { changed |= specialise_code(prog, ctx, spec, b)?; }
      if let Some(d) = default { changed |= specialise_code(prog, ctx, spec, d)?; }
      Ok(changed)
    }
    Code::If(_, t, f) => {
      let a = specialise_code(prog, ctx, spec, t)?;
      let b = specialise_code(prog, ctx, spec, f)?;
      Ok(a || b)
    }
  }
}

fn specialise_tail(
  prog: &mut Program,
  ctx: &mut Ctx,
  spec: &mut Specialiser,
  tail: &mut crate::types::tail::Tail,
) -> Result<bool> {
  use crate::types::tail::Tail;
  if let Tail::ClosAlloc(d, args) = tail {
    let new_d = specialise_callee(prog, ctx, spec, *d, args)?;
    if new_d != *d {
      *d = new_d;
      return Ok(true);
    }
  }
  Ok(false)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::types::ty::{apply, AllocType, TyKind, TyconData};
  use crate::types::tail::{Code, Tail};

  fn unit_ty() -> Ty { Rc::new(TyKind::Lit(crate::types::ty::TLit::Nat(0))) }

  #[test]
  fn monomorphic_closures_pass_through_unchanged() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let x = prog.new_temp(&mut ctx, intern("x"), unit_ty());
    let alloc_ty = AllocType { tvars: vec![], stored: vec![unit_ty()], result: unit_ty() };
    let k = prog.add(None, None, Defn::ClosureDefn {
      params: vec![x],
      args: vec![],
      tail: Tail::Return(vec![Atom::Temp(x)]),
      alloc_ty,
      derived: std::cell::RefCell::new(Vec::new()),
    });
    let lit = prog.new_temp(&mut ctx, intern("lit"), unit_ty());
    let code = Code::Done(Tail::ClosAlloc(k, vec![Atom::Temp(lit)]));
    let main = prog.add(None, None, Defn::Block { params: vec![lit], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let mut spec = Specialiser::new();
    let changed = run(&mut prog, &mut ctx, &mut spec).unwrap();
    assert!(!changed);
  }

  #[test]
  fn polymorphic_closure_instantiates_per_call_site() {
    // const<a>{x: a}[] = return x, called once capturing an Int and once
    // capturing a Bool.
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let int_tc = ctx.types.declare_tycon(TyconData::Data { name: intern("Int") });
    let int_ty: Ty = apply(Rc::new(TyKind::Con(ctx.types.tycon(int_tc).clone())), []);
    let bool_tc = ctx.types.declare_tycon(TyconData::Data { name: intern("Bool") });
    let bool_ty: Ty = apply(Rc::new(TyKind::Con(ctx.types.tycon(bool_tc).clone())), []);

    let gen0 = Rc::new(TyKind::Gen(0, Kind::Type));
    let x = prog.new_temp(&mut ctx, intern("x"), gen0.clone());
    let alloc_ty = AllocType { tvars: vec![Kind::Type], stored: vec![gen0.clone()], result: gen0 };
    let const_def = prog.add(None, None, Defn::ClosureDefn {
      params: vec![x],
      args: vec![],
      tail: Tail::Return(vec![Atom::Temp(x)]),
      alloc_ty,
      derived: std::cell::RefCell::new(Vec::new()),
    });

    let call_int = prog.new_temp(&mut ctx, intern("ci"), int_ty.clone());
    let call_bool = prog.new_temp(&mut ctx, intern("cb"), bool_ty.clone());
    let code = Code::Bind(
      vec![],
      Tail::ClosAlloc(const_def, vec![Atom::Temp(call_int)]),
      Box::new(Code::Done(Tail::ClosAlloc(const_def, vec![Atom::Temp(call_bool)]))),
    );
    let main = prog.add(None, None, Defn::Block { params: vec![call_int, call_bool], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let mut spec = Specialiser::new();
    let changed = run(&mut prog, &mut ctx, &mut spec).unwrap();
    assert!(changed);

    let code = match &prog.defs[main].defn { Defn::Block { code, .. } => code.clone(), _ => panic!() };
    if let Code::Bind(_, Tail::ClosAlloc(d1, _), rest) = &code {
      if let Code::Done(Tail::ClosAlloc(d2, _)) = &**rest {
        assert_ne!(d1, d2, "distinct instantiations get distinct instances");
        assert_ne!(*d1, const_def);
        assert_ne!(*d2, const_def);

        // Each instance must actually be monomorphic: no quantifier left
        // on its alloc_ty, and its stored/param types are the concrete
        // Int/Bool the call site solved for, not the original `Gen(0)`.
        let check_instance = |d: DefId, expected: &Ty| {
          match &prog.defs[d].defn {
            Defn::ClosureDefn { params, alloc_ty, .. } => {
              assert!(alloc_ty.tvars.is_empty(), "instance must shed its quantifier");
              assert_eq!(alloc_ty.stored.len(), 1);
              assert!(crate::unify::same(&alloc_ty.stored[0], expected));
              assert!(crate::unify::same(&alloc_ty.result, expected));
              assert_eq!(params.len(), 1);
              assert!(crate::unify::same(&prog.temps[params[0]].ty(), expected));
            }
            _ => panic!("expected a ClosureDefn instance"),
          }
        };
        check_instance(*d1, &int_ty);
        check_instance(*d2, &bool_ty);
      } else { panic!("expected a ClosAlloc tail"); }
    } else { panic!("expected a Bind with a ClosAlloc rhs"); }
  }

  #[test]
  fn compile_succeeds_on_a_polymorphic_closure() {
    // const<a>{x: a}[] = return x, entered with a literal Int argument
    // through an Enter — end-to-end through `pipeline::compile`, which
    // previously hit `FailureKind::Internal` via `find_residual_polymorphism`
    // because the specialised instance kept its quantifier.
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let int_tc = ctx.types.declare_tycon(TyconData::Data { name: intern("Int") });
    let int_ty: Ty = apply(Rc::new(TyKind::Con(ctx.types.tycon(int_tc).clone())), []);

    let gen0 = Rc::new(TyKind::Gen(0, Kind::Type));
    let x = prog.new_temp(&mut ctx, intern("x"), gen0.clone());
    let alloc_ty = AllocType { tvars: vec![Kind::Type], stored: vec![gen0.clone()], result: gen0 };
    let const_def = prog.add(Some(intern("const")), None, Defn::ClosureDefn {
      params: vec![x],
      args: vec![],
      tail: Tail::Return(vec![Atom::Temp(x)]),
      alloc_ty,
      derived: std::cell::RefCell::new(Vec::new()),
    });

    let call_int = prog.new_temp(&mut ctx, intern("ci"), int_ty.clone());
    let k = prog.new_temp(&mut ctx, intern("k"), unit_ty());
    let code = Code::Bind(
      vec![k],
      Tail::ClosAlloc(const_def, vec![Atom::Temp(call_int)]),
      Box::new(Code::Done(Tail::Enter(Atom::Temp(k), vec![]))),
    );
    let main = prog.add(Some(intern("main")), None, Defn::Block { params: vec![call_int], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let mut diag = crate::diag::CollectingDiagnostic::default();
    let module = crate::pipeline::compile(&mut prog, &mut ctx, &mut diag, &crate::options::Options::default());
    assert!(module.is_ok(), "expected compile() to succeed, got {:?}", module.err());
    assert!(find_residual_polymorphism(&prog).is_none());
  }

  #[test]
  fn repeated_call_at_same_type_reuses_the_instance() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let int_tc = ctx.types.declare_tycon(TyconData::Data { name: intern("Int") });
    let int_ty: Ty = Rc::new(TyKind::Con(ctx.types.tycon(int_tc).clone()));

    let gen0 = Rc::new(TyKind::Gen(0, Kind::Type));
    let x = prog.new_temp(&mut ctx, intern("x"), gen0.clone());
    let alloc_ty = AllocType { tvars: vec![Kind::Type], stored: vec![gen0.clone()], result: gen0 };
    let const_def = prog.add(None, None, Defn::ClosureDefn {
      params: vec![x],
      args: vec![],
      tail: Tail::Return(vec![Atom::Temp(x)]),
      alloc_ty,
      derived: std::cell::RefCell::new(Vec::new()),
    });

    let a = prog.new_temp(&mut ctx, intern("a"), int_ty.clone());
    let b = prog.new_temp(&mut ctx, intern("b"), int_ty);
    let mut spec = Specialiser::new();
    let i1 = specialise_callee(&mut prog, &mut ctx, &mut spec, const_def, &[Atom::Temp(a)]).unwrap();
    let i2 = specialise_callee(&mut prog, &mut ctx, &mut spec, const_def, &[Atom::Temp(b)]).unwrap();
    assert_eq!(i1, i2);
  }
}
