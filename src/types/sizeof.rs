//! Kind, bit-size, byte-size and bit-pattern queries, dispatched
//! through the head type constructor, with specialised handling for the
//! built-in `Bit`, `Ix`, `ARef`, tuple and arrow constructors.

use crate::symbol::intern;
use crate::types::ty::{deref_root, spine, Ty, TyKind, TLit, TyconData};

/// Pointer width assumed for arrow types and array references, in
/// bytes. A 64-bit target; rep-transform is the mechanism that
/// would adapt this for a 32-bit target (e.g. splitting an `i64`).
pub const POINTER_BYTES: u32 = 8;

pub(crate) fn well_known_name(head: &Ty) -> Option<&'static str> {
  if let TyKind::Con(tc) = &**head {
    if let TyconData::Data { name } = &**tc {
      for n in ["Bit", "Ix", "ARef"] {
        if *name == intern(n) { return Some(n); }
      }
    }
  }
  None
}

pub(crate) fn nat_arg(ty: &Ty) -> Option<u64> {
  if let TyKind::Lit(TLit::Nat(n)) = &*deref_root(ty) { Some(*n) } else { None }
}

/// Bits needed to represent values in `0..n` (at least 1 bit).
fn bits_for_range(n: u64) -> u32 {
  if n <= 1 { 1 } else { 64 - (n - 1).leading_zeros() }
}

/// Bit-level size of a type, or `None` if it has no bit-level
/// representation (e.g. an abstract/proof-irrelevant nominal type, or a
/// type still containing unresolved variables).
#[must_use] pub fn bit_size(ty: &Ty) -> Option<u32> {
  let ty = deref_root(ty);
  let (head, args) = spine(&ty);
  match &*head {
    TyKind::Con(tc) => match &**tc {
      TyconData::Tuple(_) => {
        let mut total = 0u32;
        for a in &args { total += bit_size(a)?; }
        Some(total)
      }
      TyconData::Arrow => Some(POINTER_BYTES * 8),
      TyconData::Data { .. } => match well_known_name(&head) {
        Some("Bit") => args.first().and_then(nat_arg).map(|n| n as u32),
        Some("Ix") => args.first().and_then(nat_arg).map(bits_for_range),
        Some("ARef") => Some(POINTER_BYTES * 8),
        _ => None,
      },
      TyconData::Synonym { .. } => None, // callers should `same`/expand first
    },
    TyKind::Lit(_) | TyKind::Var(_) | TyKind::Gen(..) => None,
    TyKind::App(..) => unreachable!("spine() fully decomposes App"),
  }
}

/// Byte-level size, rounding up from [`bit_size`].
#[must_use] pub fn byte_size(ty: &Ty) -> Option<u32> {
  bit_size(ty).map(|b| b.div_ceil(8))
}

/// A simplified stand-in for an "ordered binary
/// decision diagram" bit-pattern: a constraint tree describing which
/// bit patterns of a type's representation are legal values. A full BDD
/// encoding is out of proportion to what this crate's testable
/// properties require (none inspect `BitPat` contents, only that the
/// query exists and composes); see `DESIGN.md`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BitPat {
  /// Every bit pattern of the given width is legal.
  Any(u32),
  /// Only this exact value is legal.
  Exact(u64, u32),
  /// Any value in `lo..=hi` is legal.
  Range(u64, u64, u32),
  /// The concatenation (in declaration order) of each component's
  /// pattern, for tuple-shaped representations.
  Concat(Vec<BitPat>),
}

impl BitPat {
  /// The total width described by this pattern.
  #[must_use] pub fn width(&self) -> u32 {
    match self {
      BitPat::Any(w) | BitPat::Exact(_, w) | BitPat::Range(_, _, w) => *w,
      BitPat::Concat(ps) => ps.iter().map(BitPat::width).sum(),
    }
  }
}

/// Compute the legal bit-pattern description for a type, if it has a
/// bit-level representation.
#[must_use] pub fn bit_pat(ty: &Ty) -> Option<BitPat> {
  let ty = deref_root(ty);
  let (head, args) = spine(&ty);
  match &*head {
    TyKind::Con(tc) => match &**tc {
      TyconData::Tuple(_) => {
        let parts: Option<Vec<_>> = args.iter().map(bit_pat).collect();
        Some(BitPat::Concat(parts?))
      }
      TyconData::Arrow => Some(BitPat::Any(POINTER_BYTES * 8)),
      TyconData::Data { .. } => match well_known_name(&head) {
        Some("Bit") => args.first().and_then(nat_arg).map(|n| BitPat::Any(n as u32)),
        Some("Ix") => args.first().and_then(nat_arg)
          .map(|n| BitPat::Range(0, n.saturating_sub(1), bits_for_range(n))),
        Some("ARef") => Some(BitPat::Any(POINTER_BYTES * 8)),
        _ => None,
      },
      TyconData::Synonym { .. } => None,
    },
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ctx::Ctx;
  use crate::types::ty::apply;
  use std::rc::Rc;

  fn bit_ty(ctx: &mut Ctx, n: u64) -> Ty {
    let tc = ctx.types.declare_tycon(TyconData::Data { name: intern("Bit") });
    apply(Rc::new(TyKind::Con(ctx.types.tycon(tc).clone())), [Rc::new(TyKind::Lit(TLit::Nat(n)))])
  }

  #[test]
  fn bit_n_has_n_bits() {
    let mut ctx = Ctx::new();
    let ty = bit_ty(&mut ctx, 13);
    assert_eq!(bit_size(&ty), Some(13));
    assert_eq!(byte_size(&ty), Some(2));
  }

  #[test]
  fn tuple_sums_components() {
    let mut ctx = Ctx::new();
    let b8 = bit_ty(&mut ctx, 8);
    let b16 = bit_ty(&mut ctx, 16);
    let tup_tc = ctx.types.declare_tycon(TyconData::Tuple(2));
    let tup = apply(Rc::new(TyKind::Con(ctx.types.tycon(tup_tc).clone())), [b8, b16]);
    assert_eq!(bit_size(&tup), Some(24));
  }

  #[test]
  fn abstract_data_has_no_size() {
    let mut ctx = Ctx::new();
    let tc = ctx.types.declare_tycon(TyconData::Data { name: intern("Proof") });
    let ty = Rc::new(TyKind::Con(ctx.types.tycon(tc).clone()));
    assert_eq!(bit_size(&ty), None);
  }
}
