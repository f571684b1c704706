//! The `Fact` notion shared by flow propagation and known-constructor
//! specialisation: a mapping from Temp to a Tail that is
//! repeatable and not self-referential, threaded downward through a
//! Code tree.

use im::HashMap;
use crate::types::atom::TempId;
use crate::types::tail::Tail;

/// An immutable-update fact set: `bind` returns the extended (or
/// narrowed) environment rather than mutating in place, since a
/// `Case`/`If`'s branches must each continue from the same point
/// without leaking each other's bindings. Backed by `im::HashMap`'s
/// structure-sharing (HAMT) clone rather than a full copy per `bind`,
/// the "persistent (copy-on-extend) map" `SPEC_FULL.md` §9 calls for.
#[derive(Default, Clone)]
pub(crate) struct Facts(HashMap<TempId, Tail>);

impl Facts {
  #[must_use] pub(crate) fn get(&self, t: TempId) -> Option<&Tail> { self.0.get(&t) }

  /// Extend with `v ↦ tail` if `tail` is repeatable and does not read
  /// `v` itself; otherwise `v`'s prior fact (if any) is killed, since a
  /// non-repeatable or self-referential binding cannot stand in for
  /// later uses of `v`.
  #[must_use] pub(crate) fn bind(&self, v: TempId, tail: &Tail) -> Self {
    let mut m = self.clone();
    let self_ref = tail.atoms().iter().any(|a| a.as_temp() == Some(v));
    if tail.is_repeatable() && !self_ref {
      m.0.insert(v, tail.clone());
    } else {
      m.0.remove(&v);
    }
    m
  }
}
