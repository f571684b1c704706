//! Type equality, one-directional matching, and symmetric unification.

use hashbrown::HashMap;
use std::rc::Rc;
use crate::diag::{Failure, FailureKind};
use crate::types::ty::{
  bind_var, con_synonym, deref_root, expand_synonym as expand, kind_of, spine, TVarId, Ty, TyKind,
};

/// Structural equality under synonym expansion, with the level-based
/// tie-break rule: when both sides of an equality are
/// synonyms with unequal levels, the *lower*-level side is left
/// unexpanded while the higher-level side is expanded; equal levels
/// expand both sides simultaneously; a non-synonym paired with a
/// synonym always expands the synonym.
#[must_use] pub fn same(a: &Ty, b: &Ty) -> bool {
  let a = deref_root(a);
  let b = deref_root(b);
  let (ha, argsa) = spine(&a);
  let (hb, argsb) = spine(&b);
  let syn_a = con_synonym(&ha);
  let syn_b = con_synonym(&hb);
  match (syn_a, syn_b) {
    (Some((la, _)), Some((lb, _))) => {
      use std::cmp::Ordering;
      return match la.cmp(&lb) {
        Ordering::Greater => same(&expand(&ha, &argsa), &b),
        Ordering::Less => same(&a, &expand(&hb, &argsb)),
        Ordering::Equal => same(&expand(&ha, &argsa), &expand(&hb, &argsb)),
      };
    }
    (Some(_), None) => return same(&expand(&ha, &argsa), &b),
    (None, Some(_)) => return same(&a, &expand(&hb, &argsb)),
    (None, None) => {}
  }
  match (&*ha, &*hb) {
    (TyKind::Var(v1), TyKind::Var(v2)) =>
      argsa.is_empty() && argsb.is_empty() && Rc::ptr_eq(v1, v2),
    (TyKind::Gen(i1, k1), TyKind::Gen(i2, k2)) =>
      argsa.is_empty() && argsb.is_empty() && i1 == i2 && k1 == k2,
    // TLits compare by value only; no arguments are permitted on a
    // literal head.
    (TyKind::Lit(l1), TyKind::Lit(l2)) => argsa.is_empty() && argsb.is_empty() && l1 == l2,
    (TyKind::Con(c1), TyKind::Con(c2)) =>
      Rc::ptr_eq(c1, c2) && argsa.len() == argsb.len()
        && argsa.iter().zip(&argsb).all(|(x, y)| same(x, y)),
    _ => false,
  }
}

/// One-directional matching: attempts to bind variables that
/// occur in `pattern` so that `pattern` (after substitution) equals
/// `target`. Bindings are accumulated in `bindings` rather than mutating
/// shared `TVar` cells, so a caller that wants a consistent rollback
/// discipline can simply discard the map on failure; in practice
/// inference only ever matches against fresh, non-shared variables, so
/// a caller content with that restriction may also just apply the
/// bindings in place via [`crate::types::ty::bind_var`] on success.
/// Returns `false` on failure; `bindings` may still contain partial
/// entries in that case even on failure.
#[must_use] pub fn matches(pattern: &Ty, target: &Ty, bindings: &mut HashMap<TVarId, Ty>) -> bool {
  let pattern = deref_root(pattern);
  if let TyKind::Var(v) = &*pattern {
    if v.is_unbound() {
      if let Some(existing) = bindings.get(&v.id) {
        return same(existing, target);
      }
      bindings.insert(v.id, target.clone());
      return true;
    }
  }
  let target = deref_root(target);
  let (hp, argsp) = spine(&pattern);
  let (ht, argst) = spine(&target);
  if let Some(_syn) = con_synonym(&hp) {
    return matches(&expand(&hp, &argsp), &target, bindings);
  }
  if let Some(_syn) = con_synonym(&ht) {
    return matches(&pattern, &expand(&ht, &argst), bindings);
  }
  match (&*hp, &*ht) {
    (TyKind::Var(v1), TyKind::Var(v2)) if argsp.is_empty() && argst.is_empty() => Rc::ptr_eq(v1, v2),
    (TyKind::Gen(i1, k1), TyKind::Gen(i2, k2)) =>
      argsp.is_empty() && argst.is_empty() && i1 == i2 && k1 == k2,
    (TyKind::Lit(l1), TyKind::Lit(l2)) => argsp.is_empty() && argst.is_empty() && l1 == l2,
    (TyKind::Con(c1), TyKind::Con(c2)) =>
      Rc::ptr_eq(c1, c2) && argsp.len() == argst.len()
        && argsp.iter().zip(&argst).all(|(p, t)| matches(p, t, bindings)),
    _ => false,
  }
}

fn occurs(v: &crate::types::ty::TVar, ty: &Ty) -> bool {
  let ty = deref_root(ty);
  match &*ty {
    TyKind::Var(v2) => std::ptr::eq(v, &**v2),
    TyKind::App(f, a) => occurs(v, f) || occurs(v, a),
    TyKind::Gen(..) | TyKind::Con(_) | TyKind::Lit(_) => false,
  }
}

/// Symmetric unification. Fails with [`FailureKind::TypeMismatch`],
/// [`FailureKind::OccursCheck`], or [`FailureKind::KindMismatch`].
/// Idempotent: `unify(a,b)` followed by `unify(b,a)` is a no-op, since
/// the second call finds both sides already structurally identical (the
/// first call's bindings make them so).
pub fn unify(a: &Ty, b: &Ty) -> crate::diag::Result<()> {
  let a = deref_root(a);
  let b = deref_root(b);
  if let TyKind::Var(v) = &*a {
    if v.is_unbound() {
      if let TyKind::Var(v2) = &*b {
        if Rc::ptr_eq(v, v2) { return Ok(()); }
      }
      if occurs(v, &b) {
        return Err(Failure::new(FailureKind::OccursCheck { var: v.id, ty: b }));
      }
      if kind_of(&b) != v.kind {
        return Err(Failure::new(FailureKind::KindMismatch { expected: v.kind, actual: kind_of(&b) }));
      }
      bind_var(v, b);
      return Ok(());
    }
  }
  if let TyKind::Var(v) = &*b {
    if v.is_unbound() { return unify(&b, &a); }
  }
  let (ha, argsa) = spine(&a);
  let (hb, argsb) = spine(&b);
  let syn_a = con_synonym(&ha);
  let syn_b = con_synonym(&hb);
  match (syn_a, syn_b) {
    (Some((la, _)), Some((lb, _))) => {
      use std::cmp::Ordering;
      return match la.cmp(&lb) {
        Ordering::Greater => unify(&expand(&ha, &argsa), &b),
        Ordering::Less => unify(&a, &expand(&hb, &argsb)),
        Ordering::Equal => unify(&expand(&ha, &argsa), &expand(&hb, &argsb)),
      };
    }
    (Some(_), None) => return unify(&expand(&ha, &argsa), &b),
    (None, Some(_)) => return unify(&a, &expand(&hb, &argsb)),
    (None, None) => {}
  }
  match (&*ha, &*hb) {
    (TyKind::Gen(i1, k1), TyKind::Gen(i2, k2)) if argsa.is_empty() && argsb.is_empty() => {
      if i1 == i2 && k1 == k2 { Ok(()) } else { Err(mismatch(&a, &b)) }
    }
    (TyKind::Lit(l1), TyKind::Lit(l2)) if argsa.is_empty() && argsb.is_empty() => {
      if l1 == l2 { Ok(()) } else { Err(mismatch(&a, &b)) }
    }
    (TyKind::Con(c1), TyKind::Con(c2)) if Rc::ptr_eq(c1, c2) && argsa.len() == argsb.len() => {
      for (x, y) in argsa.iter().zip(&argsb) { unify(x, y)?; }
      Ok(())
    }
    _ => Err(mismatch(&a, &b)),
  }
}

fn mismatch(expected: &Ty, actual: &Ty) -> Failure {
  Failure::new(FailureKind::TypeMismatch { expected: expected.clone(), actual: actual.clone() })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ctx::Ctx;
  use crate::symbol::intern;
  use crate::types::ty::{apply, Kind, Scheme, TyconData};

  #[test]
  fn synonym_levels_resolve_to_same_representative() {
    // type Id a = a     (level 0)
    // type Wrap a = Id a (level 1)
    // same(Wrap Int, Int) is true (scenario 3).
    let mut ctx = Ctx::new();
    let int_tc = ctx.types.declare_tycon(TyconData::Data { name: intern("Int") });
    let int_ty: Ty = Rc::new(TyKind::Con(ctx.types.tycon(int_tc).clone()));

    let id_scheme = Scheme { tvars: vec![Kind::Type], body: Rc::new(TyKind::Gen(0, Kind::Type)) };
    let id_tc = ctx.types.declare_tycon(TyconData::Synonym { name: intern("Id"), level: 0, expansion: id_scheme });
    let id_con: Ty = Rc::new(TyKind::Con(ctx.types.tycon(id_tc).clone()));

    let wrap_scheme = Scheme { tvars: vec![Kind::Type], body: apply(id_con, [Rc::new(TyKind::Gen(0, Kind::Type))]) };
    let wrap_tc = ctx.types.declare_tycon(TyconData::Synonym { name: intern("Wrap"), level: 1, expansion: wrap_scheme });
    let wrap_con: Ty = Rc::new(TyKind::Con(ctx.types.tycon(wrap_tc).clone()));

    let wrap_int = apply(wrap_con, [int_ty.clone()]);
    assert!(same(&wrap_int, &int_ty));

    let ca = ctx.types.canon(&wrap_int);
    let cb = ctx.types.canon(&int_ty);
    assert!(Rc::ptr_eq(&ca, &cb));
  }

  #[test]
  fn unify_binds_and_is_idempotent() {
    let mut ctx = Ctx::new();
    let int_tc = ctx.types.declare_tycon(TyconData::Data { name: intern("Int") });
    let int_ty: Ty = Rc::new(TyKind::Con(ctx.types.tycon(int_tc).clone()));
    let v = ctx.fresh_tvar(Kind::Type);
    unify(&v, &int_ty).unwrap();
    unify(&int_ty, &v).unwrap();
    assert!(same(&v, &int_ty));
  }

  #[test]
  fn occurs_check_fails() {
    let mut ctx = Ctx::new();
    let list_tc = ctx.types.declare_tycon(TyconData::Data { name: intern("List") });
    let list_ty: Ty = Rc::new(TyKind::Con(ctx.types.tycon(list_tc).clone()));
    let v = ctx.fresh_tvar(Kind::Type);
    let list_v = apply(list_ty, [v.clone()]);
    assert!(unify(&v, &list_v).is_err());
  }

  #[test]
  fn mismatch_is_reported() {
    let mut ctx = Ctx::new();
    let int_tc = ctx.types.declare_tycon(TyconData::Data { name: intern("Int") });
    let bool_tc = ctx.types.declare_tycon(TyconData::Data { name: intern("Bool") });
    let int_ty: Ty = Rc::new(TyKind::Con(ctx.types.tycon(int_tc).clone()));
    let bool_ty: Ty = Rc::new(TyKind::Con(ctx.types.tycon(bool_tc).clone()));
    assert!(unify(&int_ty, &bool_ty).is_err());
  }
}
