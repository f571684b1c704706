//! Atoms and temporaries: the leaf operands of the IR.

use std::cell::RefCell;
use std::fmt;
use num::BigInt;
use crate::mk_idx;
use crate::symbol::{intern, Symbol};
use crate::types::defn::DefId;
use crate::types::ty::{Ty, TyconId};

mk_idx! {
  /// A temporary's unique identity.
  pub struct TempId;
}

/// A reference to a data constructor: a tag within a declared [`TyconId`]
/// (the constructor-carrying data type), its declaration-order tag (used
/// to tie-break Case alternatives), and its field arity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ctor {
  /// The data type this constructor belongs to.
  pub tycon: TyconId,
  /// Declaration order among the tycon's constructors; also the
  /// run-time tag value used by LLVM lowering.
  pub tag: u32,
  /// Number of fields.
  pub arity: u32,
}

/// A variable binding introduced by a Block/ClosureDefn parameter or by
/// a `Bind`. Owns a mutable type slot because unification refines it
/// during inference.
#[derive(Debug)]
pub struct Temp {
  /// Stable identity.
  pub id: TempId,
  /// Source name, purely for diagnostics/printing; not significant for
  /// equality (`TempId` is).
  pub name: Symbol,
  ty: RefCell<Ty>,
}

impl Temp {
  /// Construct a new, named temp of the given type.
  #[must_use] pub fn new(id: TempId, name: Symbol, ty: Ty) -> Self {
    Self { id, name, ty: RefCell::new(ty) }
  }

  /// The wildcard sentinel name: a temp named `_` is dead by
  /// construction and must never be read.
  #[must_use] pub fn wildcard_name() -> Symbol { intern("_") }

  /// Whether this temp is the wildcard.
  #[must_use] pub fn is_wildcard(&self) -> bool { self.name == Self::wildcard_name() }

  /// Current type.
  #[must_use] pub fn ty(&self) -> Ty { self.ty.borrow().clone() }

  /// Overwrite the type, as done by unification during inference.
  pub fn set_ty(&self, ty: Ty) { *self.ty.borrow_mut() = ty; }
}

impl PartialEq for Temp {
  fn eq(&self, other: &Self) -> bool { self.id == other.id }
}
impl Eq for Temp {}
impl std::hash::Hash for Temp {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) { self.id.0.hash(state); }
}

/// A literal value: an unbounded integer (the common case) or a boolean,
/// matching the integral/boolean primitives named in the component
/// design.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Literal {
  /// An arbitrary-precision integer literal.
  Int(BigInt),
  /// A boolean literal.
  Bool(bool),
}

/// A leaf operand: a temporary, a top-level reference, a
/// constructor used as a first-class (nullary) data value, or a
/// literal. Wildcards are represented as a [`Temp`] named `_`
/// ([`Temp::is_wildcard`]), not as a separate variant, since they share
/// every other property of an ordinary temp.
#[derive(Clone, Debug)]
pub enum Atom {
  /// A reference to a temporary (possibly the wildcard).
  Temp(TempId),
  /// A reference to a top-level definition.
  Global(DefId),
  /// A nullary constructor used directly as a value (e.g. `Nil`).
  ConstData(Ctor),
  /// A literal value.
  Lit(Literal),
}

impl Atom {
  /// The temp this atom reads, if any.
  #[must_use] pub fn as_temp(&self) -> Option<TempId> {
    if let Atom::Temp(t) = self { Some(*t) } else { None }
  }
}

impl fmt::Display for Atom {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Atom::Temp(t) => write!(f, "%{}", t.0),
      Atom::Global(d) => write!(f, "@{}", d.0),
      Atom::ConstData(c) => write!(f, "#{:?}", c),
      Atom::Lit(Literal::Int(n)) => write!(f, "{n}"),
      Atom::Lit(Literal::Bool(b)) => write!(f, "{b}"),
    }
  }
}
