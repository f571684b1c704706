//! The builder interface: the surface a parser or elaborator uses to
//! construct a [`Program`] one definition at a time, without reaching
//! into the arena's internals directly.
//!
//! This is deliberately thin — every method here is a direct wrapper
//! around a [`Program`]/[`Ctx`] operation, plus the bookkeeping a
//! front end shouldn't have to repeat at every call site (minting a
//! temp's id and registering its metadata together, say). Type
//! inference and unification are a separate collaborator
//! ([`crate::infer`], [`crate::unify`]); the builder just records the
//! types a front end already decided on, declared or inferred.

use crate::ctx::Ctx;
use crate::diag::FileSpan;
use crate::symbol::{intern, Symbol};
use crate::types::atom::TempId;
use crate::types::defn::{DefId, Defn, EntryPoint, ExternalKind, Program};
use crate::types::tail::{Code, Tail};
use crate::types::ty::{Kind, Ty, TyconData, TyconId};

/// Owns the [`Program`] and [`Ctx`] under construction, and hands out
/// the fresh ids a front end needs as it walks its own source tree.
pub struct Builder {
  /// The program under construction.
  pub prog: Program,
  /// The shared compilation context (fresh names, type store).
  pub ctx: Ctx,
}

impl Default for Builder {
  fn default() -> Self { Self::new() }
}

impl Builder {
  /// An empty builder, ready to accept definitions.
  #[must_use] pub fn new() -> Self {
    Self { prog: Program::new(), ctx: Ctx::new() }
  }

  /// Declare a type constructor, returning its canonical id.
  pub fn declare_tycon(&mut self, data: TyconData) -> TyconId {
    self.ctx.types.declare_tycon(data)
  }

  /// Declare a named nominal data type.
  pub fn declare_data(&mut self, name: &str) -> TyconId {
    self.declare_tycon(TyconData::Data { name: intern(name) })
  }

  /// Mint a fresh temp of the given name and type, registering its
  /// metadata in the program's temp arena.
  pub fn new_temp(&mut self, name: &str, ty: Ty) -> TempId {
    let sym = intern(name);
    self.prog.new_temp(&mut self.ctx, sym, ty)
  }

  /// Mint a fresh wildcard temp (never legally read, per
  /// [`crate::types::atom::Temp::is_wildcard`]).
  pub fn new_wildcard(&mut self, ty: Ty) -> TempId {
    let sym = crate::types::atom::Temp::wildcard_name();
    self.prog.new_temp(&mut self.ctx, sym, ty)
  }

  /// Mint a fresh unification variable, for a front end that defers
  /// some types to inference.
  pub fn fresh_tvar(&mut self, kind: Kind) -> Ty {
    self.ctx.fresh_tvar(kind)
  }

  /// Add a `Block` definition.
  pub fn add_block(
    &mut self,
    name: Option<&str>,
    span: Option<FileSpan>,
    params: Vec<TempId>,
    code: Code,
  ) -> DefId {
    self.prog.add(name.map(intern), span, Defn::Block { params, code })
  }

  /// Add a `ClosureDefn`.
  pub fn add_closure(
    &mut self,
    name: Option<&str>,
    span: Option<FileSpan>,
    params: Vec<TempId>,
    args: Vec<TempId>,
    tail: Tail,
    alloc_ty: crate::types::ty::AllocType,
  ) -> DefId {
    self.prog.add(name.map(intern), span, Defn::ClosureDefn {
      params, args, tail, alloc_ty,
      derived: std::cell::RefCell::new(Vec::new()),
    })
  }

  /// Add a `TopLevel` binding.
  pub fn add_top_level(
    &mut self,
    span: Option<FileSpan>,
    tail: Tail,
    lhs: Vec<&str>,
  ) -> DefId {
    let lhs = lhs.into_iter().map(intern).collect();
    self.prog.add(None, span, Defn::TopLevel { tail, lhs })
  }

  /// Add an `External` symbol declaration.
  pub fn add_external(&mut self, name: &str, ty: Ty, kind: ExternalKind) -> DefId {
    let sym = intern(name);
    self.prog.add(Some(sym), None, Defn::External { name: sym, ty, kind })
  }

  /// Register a compilation entry point.
  pub fn add_entry_point(&mut self, name: &str, def: DefId, ty: Ty) {
    self.prog.entry_points.push(EntryPoint { name: intern(name), def, ty });
  }

  /// Finish building, handing ownership of the assembled program and
  /// context to the caller (typically [`crate::pipeline::compile`]).
  #[must_use] pub fn finish(self) -> (Program, Ctx) { (self.prog, self.ctx) }
}

/// Convenience constructor for an entry point's name, shared by
/// builders and tests that need to refer to one without going through
/// [`Builder::add_entry_point`] (e.g. when comparing against a
/// pre-existing [`Symbol`]).
#[must_use] pub fn entry_name(s: &str) -> Symbol { intern(s) }

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::atom::{Atom, Literal};
  use crate::types::ty::TLit;
  use std::rc::Rc;

  fn unit_ty() -> Ty { Rc::new(crate::types::ty::TyKind::Lit(TLit::Nat(0))) }

  #[test]
  fn builds_a_trivial_program_with_one_entry_point() {
    let mut b = Builder::new();
    let x = b.new_temp("x", unit_ty());
    let body = Code::Done(Tail::Return(vec![Atom::Temp(x)]));
    let main = b.add_block(Some("main"), None, vec![x], body);
    b.add_entry_point("main", main, unit_ty());
    let (prog, _ctx) = b.finish();
    assert_eq!(prog.entry_points.len(), 1);
    assert_eq!(prog.entry_points[0].def, main);
  }

  #[test]
  fn wildcard_temp_is_flagged() {
    let mut b = Builder::new();
    let w = b.new_wildcard(unit_ty());
    assert!(b.prog.temps[w].is_wildcard());
  }

  #[test]
  fn external_and_literal_alloc_roundtrip() {
    let mut b = Builder::new();
    let ext = b.add_external("alloc", unit_ty(), ExternalKind::Proc);
    let code = Code::Done(Tail::Return(vec![Atom::Lit(Literal::Bool(true)), Atom::Global(ext)]));
    let blk = b.add_block(None, None, vec![], code);
    b.add_entry_point("use_alloc", blk, unit_ty());
    let (prog, _) = b.finish();
    assert_eq!(prog.defs.len(), 2);
  }
}
