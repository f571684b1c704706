//! Diagnostics: the [`Failure`] error model and the external sink interface.
//!
//! The optimiser never raises user-visible errors; only type inference,
//! unification, and the specialiser's entry-point check can fail. Kept as
//! a plain enum with a hand-written [`Display`] rather than pulling in a
//! derive-macro crate.

use std::fmt;
use crate::types::ty::{Kind, Ty};

/// A source position, opaque to the core — it is threaded through from
/// the builder interface and only ever handed back to the diagnostic sink.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FileSpan {
  /// File path or identifier, as given by the caller.
  pub file: std::rc::Rc<str>,
  /// Byte offset range within the file.
  pub span: (u32, u32),
}

/// The seven named error kinds, plus `Internal` for invariant violations.
#[derive(Debug)]
pub enum FailureKind {
  /// Two types failed to unify.
  TypeMismatch { expected: Ty, actual: Ty },
  /// A kind-inference invariant was violated.
  KindMismatch { expected: Kind, actual: Kind },
  /// A cyclic binding was proposed during unification.
  OccursCheck { var: crate::types::ty::TVarId, ty: Ty },
  /// An entry point's type remained quantified after generalisation.
  PolymorphicEntrypoint { name: crate::symbol::Symbol },
  /// An identifier referenced in a tail is not bound.
  Scope { name: crate::symbol::Symbol },
  /// A type name was declared more than once.
  MultipleDeclarations { name: crate::symbol::Symbol },
  /// A type variable is free in a definition's body but not in its
  /// declared signature. Warning-class: reported, does not abort.
  AmbiguousTypeVariable { name: crate::symbol::Symbol },
  /// An unreachable invariant was violated; always aborts the pass.
  Internal(String),
}

/// A diagnostic: a [`FailureKind`] together with an optional source
/// position, as handed to the external sink.
#[derive(Debug)]
pub struct Failure {
  /// What went wrong.
  pub kind: FailureKind,
  /// Where, if known.
  pub span: Option<FileSpan>,
}

impl Failure {
  /// Build a failure with no associated span.
  #[must_use] pub fn new(kind: FailureKind) -> Self { Self { kind, span: None } }

  /// Build a failure at a known span.
  #[must_use] pub fn spanned(kind: FailureKind, span: FileSpan) -> Self {
    Self { kind, span: Some(span) }
  }

  /// Whether this failure is warning-class (reported but does not abort
  /// the current pass).
  #[must_use] pub fn is_warning(&self) -> bool {
    matches!(self.kind, FailureKind::AmbiguousTypeVariable { .. })
  }
}

impl fmt::Display for Failure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.kind {
      FailureKind::TypeMismatch { expected, actual } =>
        write!(f, "type mismatch: expected {expected:?}, found {actual:?}"),
      FailureKind::KindMismatch { expected, actual } =>
        write!(f, "kind mismatch: expected {expected:?}, found {actual:?}"),
      FailureKind::OccursCheck { var, ty } =>
        write!(f, "occurs check failed: {var:?} occurs in {ty:?}"),
      FailureKind::PolymorphicEntrypoint { name } =>
        write!(f, "entry point {name} has a polymorphic type"),
      FailureKind::Scope { name } =>
        write!(f, "identifier {name} is not in scope"),
      FailureKind::MultipleDeclarations { name } =>
        write!(f, "{name} is declared more than once"),
      FailureKind::AmbiguousTypeVariable { name } =>
        write!(f, "ambiguous type variable in the body of {name}"),
      FailureKind::Internal(msg) => write!(f, "internal error: {msg}"),
    }?;
    if let Some(sp) = &self.span {
      write!(f, " (at {}:{}..{})", sp.file, sp.span.0, sp.span.1)?;
    }
    Ok(())
  }
}

impl std::error::Error for Failure {}

/// Convenience alias used at every fallible boundary in the crate.
pub type Result<T> = std::result::Result<T, Failure>;

/// The external diagnostic sink: a collaborator that records
/// failures (including non-aborting warnings) without the core ever
/// performing its own formatting or I/O.
pub trait Diagnostic {
  /// Record a failure. Called for both aborting errors and
  /// [`Failure::is_warning`] warnings.
  fn report(&mut self, failure: Failure);
}

/// A [`Diagnostic`] sink that simply collects everything it is given, for
/// use in tests and as a default collaborator.
#[derive(Default)]
pub struct CollectingDiagnostic(pub Vec<Failure>);

impl Diagnostic for CollectingDiagnostic {
  fn report(&mut self, failure: Failure) { self.0.push(failure); }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_includes_span() {
    let f = Failure::spanned(
      FailureKind::Scope { name: crate::symbol::intern("foo") },
      FileSpan { file: "a.mil".into(), span: (3, 7) },
    );
    let s = f.to_string();
    assert!(s.contains("foo"));
    assert!(s.contains("a.mil"));
  }

  #[test]
  fn ambiguous_type_variable_is_warning() {
    let f = Failure::new(FailureKind::AmbiguousTypeVariable { name: crate::symbol::intern("x") });
    assert!(f.is_warning());
    let f2 = Failure::new(FailureKind::Internal("oops".into()));
    assert!(!f2.is_warning());
  }
}
