//! The compilation context: owns the fresh-name counters and the shared
//! [`TypeSet`], explicitly re-initialisable so a process can run several
//! compilations in turn.

use crate::symbol::Idx;
use crate::types::atom::TempId;
use crate::types::ty::{Kind, TVar, TVarId, Ty, TyKind, TypeSet};
use std::rc::Rc;

/// Per-compilation mutable state threaded explicitly through every
/// constructor that needs a fresh name, instead of process-global
/// statics.
pub struct Ctx {
  next_temp: u32,
  next_def: u32,
  next_tvar: u32,
  /// The shared canonicalising type store.
  pub types: TypeSet,
}

impl Default for Ctx {
  fn default() -> Self { Self::new() }
}

impl Ctx {
  /// A freshly initialised context, with all counters at zero and an
  /// empty [`TypeSet`].
  #[must_use] pub fn new() -> Self {
    Self { next_temp: 0, next_def: 0, next_tvar: 0, types: TypeSet::new() }
  }

  /// Mint a fresh [`TempId`].
  pub fn fresh_temp(&mut self) -> TempId {
    let id = TempId::from_usize(self.next_temp as usize);
    self.next_temp += 1;
    id
  }

  /// Mint a fresh [`DefId`] placeholder count (the actual id is assigned
  /// by [`crate::types::defn::Program::add`]; this counter exists so
  /// passes that need to predict/reserve an id — e.g. when building a
  /// derived definition's body before inserting it — can do so without
  /// a chicken-and-egg borrow).
  pub fn fresh_def_hint(&mut self) -> u32 {
    let id = self.next_def;
    self.next_def += 1;
    id
  }

  /// Mint a fresh unification variable of the given kind.
  pub fn fresh_tvar(&mut self, kind: Kind) -> Ty {
    let id = TVarId::from_usize(self.next_tvar as usize);
    self.next_tvar += 1;
    Rc::new(TyKind::Var(TVar::fresh(id, kind)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counters_restart_on_new_ctx() {
    let mut ctx = Ctx::new();
    let a = ctx.fresh_temp();
    let mut ctx2 = Ctx::new();
    let b = ctx2.fresh_temp();
    assert_eq!(format!("{a:?}"), format!("{b:?}"));
  }

  #[test]
  fn fresh_temps_are_distinct() {
    let mut ctx = Ctx::new();
    let a = ctx.fresh_temp();
    let b = ctx.fresh_temp();
    assert_ne!(a, b);
  }
}
