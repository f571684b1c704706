//! Symbol interning and typed index arenas.
//!
//! Identifiers that flow through the IR (Tycon names, top-level names) are
//! interned once so that later passes (dedup, specialisation) compare them
//! by a cheap integer instead of a string.

use std::cell::RefCell;
use std::fmt;
use hashbrown::HashMap;

/// An interned identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    Interner::with(|i| write!(f, "{:?}", i.strings[self.0 as usize]))
  }
}

impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    Interner::with(|i| write!(f, "{}", i.strings[self.0 as usize]))
  }
}

#[derive(Default)]
struct Interner {
  strings: Vec<Box<str>>,
  map: HashMap<Box<str>, u32>,
}

thread_local! {
  static INTERNER: RefCell<Interner> = RefCell::new(Interner::default());
}

impl Interner {
  fn with<R>(f: impl FnOnce(&Interner) -> R) -> R {
    INTERNER.with(|i| f(&i.borrow()))
  }
}

/// Intern a string, returning a [`Symbol`] that compares equal for equal
/// input and hashes cheaply thereafter.
#[must_use] pub fn intern(s: &str) -> Symbol {
  INTERNER.with(|i| {
    let mut i = i.borrow_mut();
    if let Some(&id) = i.map.get(s) { return Symbol(id); }
    let id = u32::try_from(i.strings.len()).expect("too many symbols");
    i.strings.push(s.into());
    i.map.insert(s.into(), id);
    Symbol(id)
  })
}

impl Symbol {
  /// Look up the underlying string. The returned string is owned because
  /// the interner is not guaranteed to outlive arbitrary borrows across
  /// calls into user code.
  #[must_use] pub fn as_str(self) -> Box<str> {
    Interner::with(|i| i.strings[self.0 as usize].clone())
  }
}

/// A type that can be used as a dense array index: a newtype wrapper
/// around `u32` convertible to and from `usize` for use as an
/// [`IdxVec`] index.
pub trait Idx: Copy + Eq {
  /// Construct an index from a `usize`.
  fn from_usize(n: usize) -> Self;
  /// Recover the underlying `usize`.
  fn into_usize(self) -> usize;
}

/// Declare a newtype index implementing [`Idx`], in the style of the
/// dense-index newtypes used throughout the IR (`TempId`, `DefId`,
/// `TyconId`, ...).
#[macro_export]
macro_rules! mk_idx {
  ($(#[$attr:meta])* $vis:vis struct $name:ident;) => {
    $(#[$attr])*
    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    $vis struct $name(pub u32);

    impl $crate::symbol::Idx for $name {
      fn from_usize(n: usize) -> Self { Self(u32::try_from(n).expect("index overflow")) }
      fn into_usize(self) -> usize { self.0 as usize }
    }

    impl std::fmt::Debug for $name {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", stringify!($name), self.0)
      }
    }
  };
}

/// A `Vec<T>` indexed by a typed [`Idx`] instead of a raw `usize`.
#[derive(Clone, Debug)]
pub struct IdxVec<I, T> {
  vec: Vec<T>,
  _marker: std::marker::PhantomData<fn(I)>,
}

impl<I, T> Default for IdxVec<I, T> {
  fn default() -> Self { Self { vec: Vec::new(), _marker: std::marker::PhantomData } }
}

impl<I: Idx, T> IdxVec<I, T> {
  /// An empty arena.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Push a value, returning its freshly minted index.
  pub fn push(&mut self, t: T) -> I {
    let id = I::from_usize(self.vec.len());
    self.vec.push(t);
    id
  }

  /// Number of elements stored.
  #[must_use] pub fn len(&self) -> usize { self.vec.len() }

  /// Whether the arena is empty.
  #[must_use] pub fn is_empty(&self) -> bool { self.vec.is_empty() }

  /// Iterate over `(index, value)` pairs in insertion order.
  pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
    self.vec.iter().enumerate().map(|(n, t)| (I::from_usize(n), t))
  }

  /// Iterate over `(index, value)` pairs, mutably.
  pub fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
    self.vec.iter_mut().enumerate().map(|(n, t)| (I::from_usize(n), t))
  }

  /// All indices in this arena, in insertion order.
  pub fn keys(&self) -> impl Iterator<Item = I> + '_ {
    (0..self.vec.len()).map(I::from_usize)
  }
}

impl<I: Idx, T> std::ops::Index<I> for IdxVec<I, T> {
  type Output = T;
  fn index(&self, i: I) -> &T { &self.vec[i.into_usize()] }
}

impl<I: Idx, T> std::ops::IndexMut<I> for IdxVec<I, T> {
  fn index_mut(&mut self, i: I) -> &mut T { &mut self.vec[i.into_usize()] }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_is_stable() {
    let a = intern("foo");
    let b = intern("foo");
    let c = intern("bar");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(&*a.as_str(), "foo");
  }

  mk_idx! { struct TestId; }

  #[test]
  fn idx_vec_roundtrip() {
    let mut v: IdxVec<TestId, &str> = IdxVec::new();
    let a = v.push("x");
    let b = v.push("y");
    assert_eq!(v[a], "x");
    assert_eq!(v[b], "y");
    assert_eq!(v.len(), 2);
  }
}
