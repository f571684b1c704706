//! Unused-argument elimination: for each Block/ClosureDefn, a
//! bitmap `usedArgs` and a count `numUsedArgs` are computed by iterating
//! to a fixpoint across the whole definition set, since a definition's
//! used-set depends on its callees' used-sets.

use bit_set::BitSet;
use hashbrown::HashMap;
use crate::symbol::Idx;
use crate::types::atom::TempId;
use crate::types::defn::{DefId, Defn, Program};
use crate::types::ty::AllocType;

/// The computed `usedArgs` bitmap for every analysed definition, keyed
/// by parameter position (0-indexed, matching the Block's/ClosureDefn's
/// `call_params()` order).
#[derive(Default, Debug)]
pub struct UsedArgs(HashMap<DefId, BitSet>);

impl UsedArgs {
  /// The bitmap for a definition, if it was part of the analysed set.
  #[must_use] pub fn get(&self, d: DefId) -> Option<&BitSet> { self.0.get(&d) }

  /// `numUsedArgs`: how many parameters of `d` are used.
  #[must_use] pub fn count(&self, d: DefId) -> Option<usize> { self.0.get(&d).map(BitSet::len) }
}

/// A parameter is used if it appears in the body's free-variable set
/// *and* is not a later duplicate of an earlier parameter in the same
/// list.
fn used_bitmap(params: &[TempId], free: &[TempId]) -> BitSet {
  let mut seen = hashbrown::HashSet::new();
  let mut bm = BitSet::with_capacity(params.len());
  for (i, p) in params.iter().enumerate() {
    if free.contains(p) && seen.insert(*p) {
      bm.insert(i);
    }
  }
  bm
}

/// Run the fixpoint analysis over every reachable definition in
/// `prog`.
#[must_use] pub fn analyse(prog: &Program, max_iters: u32) -> UsedArgs {
  let order = prog.reachable_topo();
  let mut used = UsedArgs::default();
  // Seed with "every parameter used" so the first pass has something to
  // filter against; a conservative over-approximation converges down.
  for &d in &order {
    if let Some(params) = prog.defs[d].defn.call_params() {
      let mut bm = BitSet::with_capacity(params.len());
      for i in 0..params.len() { bm.insert(i); }
      used.0.insert(d, bm);
    }
  }
  for _ in 0..max_iters {
    let mut changed = false;
    for &d in &order {
      let free = match &prog.defs[d].defn {
        Defn::Block { code, .. } => code.free_vars(Some(&used)),
        Defn::ClosureDefn { tail, .. } => {
          let mut v = Vec::new();
          tail.used_vars(Some(&used), &mut v);
          v
        }
        Defn::TopLevel { .. } | Defn::External { .. } => continue,
      };
      let params = prog.defs[d].defn.call_params().expect("checked above");
      let new_bm = used_bitmap(params, &free);
      let old_bm = used.0.get(&d);
      if old_bm != Some(&new_bm) {
        changed = true;
        used.0.insert(d, new_bm);
      }
    }
    if !changed {
      log::debug!("unused_args: reached fixpoint");
      return used;
    }
  }
  log::warn!("unused_args: did not reach fixpoint within {max_iters} iterations");
  used
}

/// After fixpoint, rewrite `def`'s parameter list (and, for a
/// ClosureDefn, its declared `AllocType`'s stored-component list) to
/// drop positions the bitmap marks unused. Returns the new parameter
/// list; callers are responsible for rewriting every caller's argument
/// list in lockstep (the pass driver does this across the whole
/// program).
pub fn filter_params(params: &mut Vec<TempId>, alloc_ty: Option<&mut AllocType>, bitmap: &BitSet) {
  let kept: Vec<TempId> = params.iter().enumerate()
    .filter(|(i, _)| bitmap.contains(*i))
    .map(|(_, &t)| t)
    .collect();
  if let Some(alloc_ty) = alloc_ty {
    let kept_stored: Vec<_> = alloc_ty.stored.iter().enumerate()
      .filter(|(i, _)| bitmap.contains(*i))
      .map(|(_, t)| t.clone())
      .collect();
    alloc_ty.stored = kept_stored;
  }
  *params = kept;
}

/// Rewrite a caller's argument list to match a callee's bitmap: the
/// other half of the lockstep rewrite `filter_params` performs on the
/// callee side.
pub fn filter_args<T: Clone>(args: &[T], bitmap: &BitSet) -> Vec<T> {
  args.iter().enumerate().filter(|(i, _)| bitmap.contains(*i)).map(|(_, a)| a.clone()).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::atom::Atom;
  use crate::types::defn::EntryPoint;
  use crate::types::tail::{Code, Tail};
  use crate::symbol::intern;
  use std::rc::Rc;

  fn t(n: u32) -> TempId { TempId::from_usize(n as usize) }

  #[test]
  fn drops_unused_and_duplicate_params() {
    // b[x,y,z] = f(x,z) -- y is unused; and a second x would dedupe away.
    let mut prog = Program::new();
    let f = prog.add(None, None, Defn::External {
      name: intern("f"), ty: crate::types::ty::apply(
        Rc::new(crate::types::ty::TyKind::Con(Rc::new(crate::types::ty::TyconData::Arrow))), []),
      kind: crate::types::defn::ExternalKind::Proc,
    });
    let params = vec![t(0), t(1), t(2)];
    let code = Code::Done(Tail::BlockCall(f, vec![Atom::Temp(t(0)), Atom::Temp(t(2))]));
    let b = prog.add(None, None, Defn::Block { params, code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: b, ty: Rc::new(crate::types::ty::TyKind::Lit(crate::types::ty::TLit::Nat(0))) });

    let used = analyse(&prog, 64);
    let bm = used.get(b).unwrap();
    assert!(bm.contains(0));
    assert!(!bm.contains(1));
    assert!(bm.contains(2));
    assert_eq!(used.count(b), Some(2));
  }
}
