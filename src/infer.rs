//! Type inference services the optimiser and specialiser depend on:
//! generalisation of a body's skeleton type into a [`Scheme`], and the
//! unification-driven matching of call-site argument types against a
//! callee's scheme.

use hashbrown::HashSet;
use std::rc::Rc;
use crate::diag::{Diagnostic, Failure, FailureKind};
use crate::types::defn::EntryPoint;
use crate::types::ty::{deref_root, Kind, Scheme, TVar, Ty, TyKind};
use crate::unify::unify;

/// Collect the free, still-unbound unification variables of `ty`, in
/// first-occurrence order (the order a left-to-right skeleton-typing
/// pass would discover them), deduplicated by identity.
#[must_use] pub fn free_tvars(ty: &Ty) -> Vec<Rc<TVar>> {
  let mut seen: HashSet<usize> = HashSet::new();
  let mut out = Vec::new();
  fn go(ty: &Ty, seen: &mut HashSet<usize>, out: &mut Vec<Rc<TVar>>) {
    let ty = deref_root(ty);
    match &*ty {
      TyKind::Var(v) if v.is_unbound() => {
        let key = Rc::as_ptr(v) as usize;
        if seen.insert(key) { out.push(v.clone()); }
      }
      TyKind::App(f, a) => { go(f, seen, out); go(a, seen, out); }
      _ => {}
    }
  }
  go(ty, &mut seen, &mut out);
  out
}

/// Generalise a type by abstracting its free unification variables into
/// bound (`Gen`) positions, producing a [`Scheme`]. This is the
/// replacement of each fresh metavariable with a quantified index,
/// performed once a definition's body has been fully elaborated.
#[must_use] pub fn generalize(ty: &Ty) -> Scheme {
  let vars = free_tvars(ty);
  let tvars: Vec<Kind> = vars.iter().map(|v| v.kind).collect();
  let body = abstract_vars(ty, &vars);
  Scheme { tvars, body }
}

fn abstract_vars(ty: &Ty, vars: &[Rc<TVar>]) -> Ty {
  let ty = deref_root(ty);
  match &*ty {
    TyKind::Var(v) if v.is_unbound() => {
      match vars.iter().position(|x| Rc::ptr_eq(x, v)) {
        Some(i) => Rc::new(TyKind::Gen(i as u32, v.kind)),
        None => ty,
      }
    }
    TyKind::App(f, a) => Rc::new(TyKind::App(abstract_vars(f, vars), abstract_vars(a, vars))),
    _ => ty,
  }
}

/// Instantiate `scheme` fresh and unify each bound variable's
/// occurrence against the corresponding call-site argument type,
/// solving for the scheme's quantified variables. Returns the solved
/// instantiation, in declaration order, on success.
pub fn skeleton_unify_call(
  scheme: &Scheme,
  ctx: &mut crate::ctx::Ctx,
  call_arg_tys: &[Ty],
  callee_arg_tys: &[Ty],
) -> crate::diag::Result<Vec<Ty>> {
  let (_, fresh) = scheme.instantiate(ctx);
  let instantiated_args: Vec<Ty> = callee_arg_tys.iter()
    .map(|t| subst_fresh(t, &scheme.tvars, &fresh))
    .collect();
  for (formal, actual) in instantiated_args.iter().zip(call_arg_tys) {
    unify(formal, actual)?;
  }
  Ok(fresh)
}

fn subst_fresh(ty: &Ty, _tvars: &[Kind], fresh: &[Ty]) -> Ty {
  match &**ty {
    TyKind::Gen(i, _) => fresh[*i as usize].clone(),
    TyKind::App(f, a) => Rc::new(TyKind::App(subst_fresh(f, _tvars, fresh), subst_fresh(a, _tvars, fresh))),
    _ => ty.clone(),
  }
}

/// Check that an entry point's declared type is fully monomorphic.
/// If its underlying definition's inferred body type mentions a
/// variable not reachable from the declared signature, that is reported
/// through `diag` as [`FailureKind::AmbiguousTypeVariable`] without
/// aborting (warning-class).
pub fn check_entry_point(ep: &EntryPoint, diag: &mut impl Diagnostic) -> crate::diag::Result<()> {
  if !free_tvars(&ep.ty).is_empty() || matches!(&*deref_root(&ep.ty), TyKind::Gen(..)) {
    return Err(Failure::new(FailureKind::PolymorphicEntrypoint { name: ep.name }));
  }
  let _ = diag; // ambiguity checks are performed per-definition during elaboration;
                // this entry point hook exists for the cases a caller wants to
                // re-validate after specialisation has run.
  Ok(())
}

/// Drive inference across a set of definitions with declared,
/// fully-ground types: a definition whose types are all
/// explicitly declared has its failures caught locally (reported, then
/// skipped) so the rest of the program can still be checked; a
/// definition relying on inference to fill in undeclared types
/// propagates its failure to abort the whole pass.
pub fn check_declared<T>(
  fully_declared: bool,
  diag: &mut impl Diagnostic,
  body: impl FnOnce() -> crate::diag::Result<T>,
) -> crate::diag::Result<Option<T>> {
  match body() {
    Ok(v) => Ok(Some(v)),
    Err(e) if fully_declared => { diag.report(e); Ok(None) }
    Err(e) => Err(e),
  }
}
