//! Types, type constructors, schemes and the canonicalising [`TypeSet`].
//!
//! A type is a reference-counted sum (`Ty = Rc<TyKind>`), cheap to clone
//! and cheap to compare by pointer once canonicalised.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use hashbrown::HashMap;
use crate::mk_idx;
use crate::symbol::{Idx, IdxVec, Symbol};

mk_idx! {
  /// A unification (type) variable.
  pub struct TVarId;
}
mk_idx! {
  /// A canonical type constructor.
  pub struct TyconId;
}

/// The kind of a type: whether it classifies ordinary values or natural
/// number indices (used in array lengths, bit widths, and the like).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
  /// The kind of proper types.
  Type,
  /// The kind of compile-time natural number indices.
  Nat,
}

/// A literal appearing in a type position: either a natural number
/// (used for e.g. array lengths and bit widths) or a symbolic literal
/// (used for nominal tags).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TLit {
  /// A natural number literal.
  Nat(u64),
  /// A symbolic (named) literal.
  Sym(Symbol),
}

#[derive(Debug)]
enum VarState {
  /// An as-yet-unbound variable, at the given synonym-tiebreak level.
  Unbound,
  /// A variable that unification has bound to a type: this realises the
  /// "indirection" case of the Type sum without a
  /// separate enum arm, since the cell's contents are read through on
  /// every dereference.
  Bound(Ty),
}

/// A unification variable: mutable, shared, and compared by identity.
#[derive(Debug)]
pub struct TVar {
  /// Stable identity, used for the occurs check and for display.
  pub id: TVarId,
  /// The kind this variable was created at.
  pub kind: Kind,
  state: RefCell<VarState>,
}

impl TVar {
  pub(crate) fn fresh(id: TVarId, kind: Kind) -> Rc<Self> {
    Rc::new(Self { id, kind, state: RefCell::new(VarState::Unbound) })
  }

  /// Whether this variable is still unbound.
  #[must_use] pub fn is_unbound(&self) -> bool {
    matches!(&*self.state.borrow(), VarState::Unbound)
  }
}

/// A type constructor: a data type name, the tuple constructor, the
/// function arrow, or a synonym carrying its expansion and tie-break
/// level.
#[derive(Debug)]
pub enum TyconData {
  /// A user-declared nominal data type.
  Data {
    /// The declared name.
    name: Symbol,
  },
  /// The n-ary tuple constructor.
  Tuple(u32),
  /// The function-arrow constructor `a -> b`.
  Arrow,
  /// A type synonym: `type name a1..an = expansion`. `level` breaks
  /// equality ties between two synonym heads: the side with the
  /// *greater* level is expanded first; equal levels expand both sides
  /// simultaneously.
  Synonym {
    /// The declared name, for diagnostics.
    name: Symbol,
    /// The tie-break level.
    level: u32,
    /// The right-hand side, as a scheme over the synonym's parameters.
    expansion: Scheme,
  },
}

/// A canonical, interned type constructor.
pub type Tycon = Rc<TyconData>;

/// A type expression. See `TyKind` for the variant list; `Ty` is the
/// reference-counted handle passed around everywhere.
pub type Ty = Rc<TyKind>;

/// The sum of type expression forms making up a type.
#[derive(Debug)]
pub enum TyKind {
  /// A unification variable.
  Var(Rc<TVar>),
  /// A de Bruijn-style index into the bound variables of an enclosing
  /// [`Scheme`] or [`AllocType`].
  Gen(u32, Kind),
  /// A reference to a canonical type constructor.
  Con(Tycon),
  /// A left-spined type application `f a`.
  App(Ty, Ty),
  /// A type-level literal.
  Lit(TLit),
}

/// Dereference a type through any bound variables at its root, without
/// mutating anything (pure path lookup; canonicalisation does the
/// compressing rewrite separately via [`TypeSet`]).
#[must_use] pub fn deref_root(ty: &Ty) -> Ty {
  let mut cur = ty.clone();
  loop {
    let next = match &*cur {
      TyKind::Var(v) => match &*v.state.borrow() {
        VarState::Bound(t) => t.clone(),
        VarState::Unbound => return cur.clone(),
      },
      _ => return cur,
    };
    cur = next;
  }
}

/// Bind an unbound variable to a type. Callers must have already
/// performed the occurs check; see [`crate::unify::unify`].
pub fn bind_var(v: &Rc<TVar>, ty: Ty) {
  debug_assert!(v.is_unbound(), "binding an already-bound variable");
  *v.state.borrow_mut() = VarState::Bound(ty);
}

/// Split a left-spined application into its head and argument vector,
/// e.g. `((f a) b) c` becomes `(f, [a, b, c])`.
#[must_use] pub fn spine(ty: &Ty) -> (Ty, Vec<Ty>) {
  let mut args = Vec::new();
  let mut head = deref_root(ty);
  loop {
    let next = match &*head {
      TyKind::App(f, a) => { args.push(a.clone()); Some(f.clone()) }
      _ => None,
    };
    match next {
      Some(f) => head = deref_root(&f),
      None => { args.reverse(); return (head, args) }
    }
  }
}

/// Apply a type to a sequence of arguments, left-spining them.
#[must_use] pub fn apply(head: Ty, args: impl IntoIterator<Item = Ty>) -> Ty {
  args.into_iter().fold(head, |f, a| Rc::new(TyKind::App(f, a)))
}

/// If `head` is a synonym type constructor, its tie-break level and
/// expansion scheme. Shared by [`unify`](crate::unify) (which needs the
/// level to decide which of two synonym heads to expand) and
/// [`TypeSet::canon`] (which always expands unconditionally, having no
/// "other side" to weigh against).
pub(crate) fn con_synonym(head: &Ty) -> Option<(u32, Scheme)> {
  if let TyKind::Con(tc) = &**head {
    if let TyconData::Synonym { level, expansion, .. } = &**tc {
      return Some((*level, expansion.clone()));
    }
  }
  None
}

/// Expand a synonym-headed type applied to `args`: instantiate the
/// expansion with as many of `args` as its bound-variable count needs,
/// then re-apply any surplus.
pub(crate) fn expand_synonym(head: &Ty, args: &[Ty]) -> Ty {
  let (_, expansion) = con_synonym(head).expect("expand_synonym called on a non-synonym head");
  let n = expansion.tvars.len().min(args.len());
  let body = expansion.instantiate_with(&args[..n]);
  apply(body, args[n..].iter().cloned())
}

/// A universally quantified type: a vector of kinded bound variables
/// (referenced in `body` via [`TyKind::Gen`]) plus the body itself.
#[derive(Clone, Debug)]
pub struct Scheme {
  /// The kinds of the quantified variables, in binding order.
  pub tvars: Vec<Kind>,
  /// The body, referencing bound variables via `Gen(i, _)`.
  pub body: Ty,
}

impl Scheme {
  /// A non-generic scheme: no bound variables.
  #[must_use] pub fn mono(ty: Ty) -> Self { Self { tvars: Vec::new(), body: ty } }

  /// Whether this scheme is actually polymorphic.
  #[must_use] pub fn is_polymorphic(&self) -> bool { !self.tvars.is_empty() }

  /// Instantiate the scheme with fresh unification variables, returning
  /// the instantiated body and the fresh variables (so a caller can
  /// later solve for them).
  #[must_use] pub fn instantiate(&self, ctx: &mut crate::ctx::Ctx) -> (Ty, Vec<Ty>) {
    let fresh: Vec<Ty> = self.tvars.iter().map(|&k| ctx.fresh_tvar(k)).collect();
    (subst_gen(&self.body, &fresh), fresh)
  }

  /// Instantiate the scheme with a caller-supplied list of types (used
  /// by the specialiser, which already knows the concrete arguments).
  #[must_use] pub fn instantiate_with(&self, args: &[Ty]) -> Ty {
    debug_assert_eq!(args.len(), self.tvars.len());
    subst_gen(&self.body, args)
  }
}

/// An allocator type: a closure's stored (captured) component types and
/// its callable result type, both under the same quantifier prefix.
#[derive(Clone, Debug)]
pub struct AllocType {
  /// The kinds of the quantified variables, shared between `stored` and
  /// `result`.
  pub tvars: Vec<Kind>,
  /// The captured/stored component types (subject to unused-arg
  /// filtering by `usedArgs`).
  pub stored: Vec<Ty>,
  /// The type produced when the closure is entered.
  pub result: Ty,
}

impl AllocType {
  /// Instantiate with fresh variables, as [`Scheme::instantiate`].
  #[must_use] pub fn instantiate(&self, ctx: &mut crate::ctx::Ctx) -> (Vec<Ty>, Ty, Vec<Ty>) {
    let fresh: Vec<Ty> = self.tvars.iter().map(|&k| ctx.fresh_tvar(k)).collect();
    let stored = self.stored.iter().map(|t| subst_gen(t, &fresh)).collect();
    (stored, subst_gen(&self.result, &fresh), fresh)
  }
}

fn subst_gen(ty: &Ty, args: &[Ty]) -> Ty {
  match &**ty {
    TyKind::Gen(i, _) => args[*i as usize].clone(),
    TyKind::App(f, a) => Rc::new(TyKind::App(subst_gen(f, args), subst_gen(a, args))),
    TyKind::Var(_) | TyKind::Con(_) | TyKind::Lit(_) => ty.clone(),
  }
}

/// Query the kind of a type in O(depth-of-head) time.
#[must_use] pub fn kind_of(ty: &Ty) -> Kind {
  match &*deref_root(ty) {
    TyKind::Var(v) => v.kind,
    TyKind::Gen(_, k) => *k,
    TyKind::Lit(TLit::Nat(_)) => Kind::Nat,
    TyKind::Lit(TLit::Sym(_)) => Kind::Type,
    TyKind::Con(_) | TyKind::App(..) => Kind::Type,
  }
}

/// The canonicalising store: two structurally equal
/// types map to the same representative `Ty`, so that dedup and
/// known-constructor matching can compare by `Rc::ptr_eq`.
#[derive(Default)]
pub struct TypeSet {
  tycons: IdxVec<TyconId, Tycon>,
  by_con: HashMap<(usize, usize), Ty>,
  by_app: HashMap<(usize, usize), Ty>,
  by_lit: HashMap<TLit, Ty>,
  by_other: HashMap<usize, Ty>,
}

impl TypeSet {
  /// A fresh, empty type set.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Register a new type constructor, returning its canonical id.
  pub fn declare_tycon(&mut self, data: TyconData) -> TyconId {
    self.tycons.push(Rc::new(data))
  }

  /// Look up a previously declared type constructor.
  #[must_use] pub fn tycon(&self, id: TyconId) -> &Tycon { &self.tycons[id] }

  /// Canonicalise a type: walk its spine, canonicalising each argument
  /// first, then ask the appropriate bucket for the shared
  /// representative of `(head, argc)`. A synonym-headed spine is
  /// expanded before interning, so `Wrap Int` and `Int` canonicalise to
  /// the same representative whenever `Wrap a = a` (directly or through
  /// a chain of synonyms), matching `unify::same`'s notion of equality.
  pub fn canon(&mut self, ty: &Ty) -> Ty {
    let ty = deref_root(ty);
    let (head, args) = spine(&ty);
    if con_synonym(&head).is_some() {
      let expanded = expand_synonym(&head, &args);
      return self.canon(&expanded);
    }
    match &*ty {
      TyKind::Con(tc) => {
        let key = (Rc::as_ptr(tc) as usize, 0);
        self.by_con.entry(key).or_insert_with(|| ty.clone()).clone()
      }
      TyKind::Lit(l) => self.by_lit.entry(l.clone()).or_insert_with(|| ty.clone()).clone(),
      TyKind::App(f, a) => {
        let fc = self.canon(f);
        let ac = self.canon(a);
        let key = (Rc::as_ptr(&fc) as usize, Rc::as_ptr(&ac) as usize);
        self.by_app.entry(key).or_insert_with(|| Rc::new(TyKind::App(fc, ac))).clone()
      }
      TyKind::Var(v) => {
        let key = Rc::as_ptr(v) as usize;
        self.by_other.entry(key).or_insert_with(|| ty.clone()).clone()
      }
      TyKind::Gen(i, k) => {
        // Gen nodes carry no identity beyond (index, kind); canonicalise
        // structurally like a literal.
        let key = (usize::try_from(*i).unwrap_or(usize::MAX), 1_000_000_007 * (*k as usize + 1));
        self.by_app.entry(key).or_insert_with(|| ty.clone()).clone()
      }
    }
  }
}

impl fmt::Debug for TypeSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TypeSet")
      .field("tycons", &self.tycons.len())
      .field("distinct_types", &(self.by_con.len() + self.by_app.len() + self.by_lit.len() + self.by_other.len()))
      .finish()
  }
}

/// A specialisation of [`TypeSet`] consulted read-only during LLVM
/// lowering: maps canonical types to their computed
/// representation (rep vector length and slot sizes), memoising the
/// `repCalc`/`bitSize`/`byteSize` queries used repeatedly while building
/// the CFG.
#[derive(Default)]
pub struct TypeMap {
  byte_size: HashMap<usize, Option<u32>>,
}

impl TypeMap {
  /// A fresh, empty map.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Memoised byte-size lookup/insert for a canonical type (identified
  /// by its `Rc` pointer, since it has already gone through
  /// [`TypeSet::canon`]).
  pub fn byte_size_cached(&mut self, ty: &Ty, compute: impl FnOnce() -> Option<u32>) -> Option<u32> {
    let key = Rc::as_ptr(ty) as usize;
    *self.byte_size.entry(key).or_insert_with(compute)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;

  #[test]
  fn canon_gives_pointer_equality() {
    let mut ts = TypeSet::new();
    let tc = ts.declare_tycon(TyconData::Data { name: intern("Int") });
    let con = Rc::new(TyKind::Con(ts.tycon(tc).clone()));
    let a = ts.canon(&con);
    let b = ts.canon(&Rc::new(TyKind::Con(ts.tycon(tc).clone())));
    assert!(Rc::ptr_eq(&a, &b));
  }

  #[test]
  fn canon_app_shares_structurally_equal_spines() {
    let mut ts = TypeSet::new();
    let list = ts.declare_tycon(TyconData::Data { name: intern("List") });
    let int = ts.declare_tycon(TyconData::Data { name: intern("Int") });
    let list_ty = Rc::new(TyKind::Con(ts.tycon(list).clone()));
    let int_ty = Rc::new(TyKind::Con(ts.tycon(int).clone()));
    let a = apply(list_ty.clone(), [int_ty.clone()]);
    let b = apply(list_ty, [int_ty]);
    let ca = ts.canon(&a);
    let cb = ts.canon(&b);
    assert!(Rc::ptr_eq(&ca, &cb));
  }

  #[test]
  fn fresh_var_is_unbound_then_bindable() {
    let v = TVar::fresh(TVarId::from_usize(0), Kind::Type);
    assert!(v.is_unbound());
    let int = Rc::new(TyKind::Lit(TLit::Nat(3)));
    bind_var(&v, int.clone());
    assert!(!v.is_unbound());
    let ty = Rc::new(TyKind::Var(v));
    assert!(Rc::ptr_eq(&deref_root(&ty), &int));
  }
}
