//! The pass schedule: run-until-fixpoint of
//! `{inline, known-cons, flow, unused-args, dedup, hoist}`, followed once
//! by `{specialise, rep-transform, lower}`, and the [`compile`] entry
//! point a front end drives the whole back-end through.

use crate::ctx::Ctx;
use crate::diag::{Diagnostic, Failure, FailureKind, Result};
use crate::opt::unused_args::{self, UsedArgs};
use crate::opt::{dedup, flow, hoist, inline, known_cons};
use crate::options::{Options, Passes};
use crate::rep::{self, RepEnv};
use crate::specialize::{self, Specialiser};
use crate::types::defn::Program;
use crate::types::tail::{Code, Tail};
use crate::{llvm, lower};

/// Rewrite every `BlockCall`/`ClosAlloc` argument list in `tail` to
/// match its callee's current `usedArgs` bitmap. The callee's own
/// parameter list is filtered separately, by [`apply_unused_args`];
/// this is the "every caller's argument list, in lockstep" half of
/// §4.4.
fn rewrite_tail_args(tail: &mut Tail, used: &UsedArgs) {
  if let Tail::BlockCall(d, args) | Tail::ClosAlloc(d, args) = tail {
    if let Some(bitmap) = used.get(*d) {
      if bitmap.len() < args.len() {
        *args = unused_args::filter_args(args, bitmap);
      }
    }
  }
}

fn rewrite_code_args(code: &mut Code, used: &UsedArgs) {
  match code {
    Code::Bind(_, tail, rest) => { rewrite_tail_args(tail, used); rewrite_code_args(rest, used); }
    Code::Done(tail) => rewrite_tail_args(tail, used),
    Code::Case(_, alts, default) => {
      for (_, c) in alts.iter_mut() { rewrite_code_args(c, used); }
      if let Some(d) = default { rewrite_code_args(d, used); }
    }
    Code::If(_, t, f) => { rewrite_code_args(t, used); rewrite_code_args(f, used); }
  }
}

/// Apply one round of unused-argument elimination: filter every
/// analysed definition's own parameter list (and a ClosureDefn's
/// declared stored-component types) down to the bitmap `analyse`
/// computed, then rewrite every caller's argument list to match.
/// Returns whether anything was actually dropped.
fn apply_unused_args(prog: &mut Program, used: &UsedArgs) -> bool {
  use crate::types::defn::Defn;
  let order = prog.reachable_topo();
  let mut changed = false;
  for &d in &order {
    let Some(bitmap) = used.get(d) else { continue };
    match &mut prog.defs[d].defn {
      Defn::Block { params, .. } if bitmap.len() < params.len() => {
        unused_args::filter_params(params, None, bitmap);
        changed = true;
      }
      Defn::ClosureDefn { params, alloc_ty, .. } if bitmap.len() < params.len() => {
        unused_args::filter_params(params, Some(alloc_ty), bitmap);
        changed = true;
      }
      _ => {}
    }
  }
  for &d in &order {
    match &prog.defs[d].defn {
      Defn::Block { .. } => {
        let mut code = match &prog.defs[d].defn { Defn::Block { code, .. } => code.clone(), _ => unreachable!() };
        rewrite_code_args(&mut code, used);
        if let Defn::Block { code: slot, .. } = &mut prog.defs[d].defn { *slot = code; }
      }
      Defn::ClosureDefn { .. } | Defn::TopLevel { .. } => {
        let mut tail = match &prog.defs[d].defn {
          Defn::ClosureDefn { tail, .. } | Defn::TopLevel { tail, .. } => tail.clone(),
          _ => unreachable!(),
        };
        rewrite_tail_args(&mut tail, used);
        match &mut prog.defs[d].defn {
          Defn::ClosureDefn { tail: slot, .. } | Defn::TopLevel { tail: slot, .. } => *slot = tail,
          _ => unreachable!(),
        }
      }
      Defn::External { .. } => {}
    }
  }
  changed
}

/// Run `{inline, known-cons, flow, unused-args, dedup, hoist}` to a
/// fixpoint (bounded by `opts.max_fixpoint_iters`; exceeding the bound
/// is logged at `warn` rather than looping forever).
fn run_shape_passes(prog: &mut Program, ctx: &mut Ctx, opts: &Options) {
  let mut derived = known_cons::DerivedCache::default();
  for i in 0..opts.max_fixpoint_iters {
    let mut changed = false;
    if opts.passes.contains(Passes::INLINE) { changed |= inline::run(prog, ctx, opts); }
    if opts.passes.contains(Passes::KNOWN_CONS) { changed |= known_cons::run(prog, ctx, &mut derived); }
    if opts.passes.contains(Passes::FLOW) { changed |= flow::run(prog); }
    if opts.passes.contains(Passes::UNUSED_ARGS) {
      let used = unused_args::analyse(prog, opts.max_fixpoint_iters);
      changed |= apply_unused_args(prog, &used);
    }
    if opts.passes.contains(Passes::DEDUP) { changed |= dedup::run(prog); }
    if opts.passes.contains(Passes::HOIST) { changed |= hoist::run(prog, ctx); }
    if !changed {
      log::debug!("pipeline: shape passes reached fixpoint after {} iterations", i + 1);
      return;
    }
  }
  log::warn!(
    "pipeline: shape passes did not reach fixpoint within {} iterations",
    opts.max_fixpoint_iters
  );
}

/// Run monomorphising specialisation to a fixpoint: a freshly
/// instantiated copy may itself contain `ClosAlloc` call sites against
/// other polymorphic closures, so a single pass is not always enough.
fn run_specialize(prog: &mut Program, ctx: &mut Ctx, opts: &Options) -> Result<()> {
  let mut spec = Specialiser::new();
  for i in 0..opts.max_fixpoint_iters {
    if !specialize::run(prog, ctx, &mut spec)? {
      log::debug!("pipeline: specialisation reached fixpoint after {} iterations", i + 1);
      return Ok(());
    }
  }
  log::warn!(
    "pipeline: specialisation did not reach fixpoint within {} iterations",
    opts.max_fixpoint_iters
  );
  Ok(())
}

/// The compile entry point: given a [`Program`] whose `entry_points`
/// are already populated (by the builder interface's caller) and fully
/// monomorphic, run the full pass schedule and return the lowered LLVM
/// module, or the first [`Failure`] encountered.
///
/// Order: entry points are checked monomorphic first (so a malformed
/// entry point fails fast, before any pass does work); the shape
/// passes run to a fixpoint; specialisation then removes any remaining
/// polymorphism reachable from an entry point (re-checked afterwards —
/// an `Internal` failure here means a specialiser bug, not a user
/// error, since `check_entry_points` already ruled out the user-facing
/// case); representation transformation and LLVM lowering each run
/// once, last.
pub fn compile(
  prog: &mut Program,
  ctx: &mut Ctx,
  diag: &mut impl Diagnostic,
  opts: &Options,
) -> Result<llvm::Program> {
  specialize::check_entry_points(&prog.entry_points, diag)?;

  run_shape_passes(prog, ctx, opts);
  run_specialize(prog, ctx, opts)?;
  // Specialisation can uncover fresh hoisting/dedup opportunities (a
  // monomorphic copy's body is now eligible where the polymorphic
  // original wasn't), so give the shape passes one more fixpoint round.
  run_shape_passes(prog, ctx, opts);

  if let Some(d) = specialize::find_residual_polymorphism(prog) {
    let name = prog.defs[d].name.map_or_else(|| "<anonymous>".to_string(), |s| s.to_string());
    return Err(Failure::new(FailureKind::Internal(format!(
      "definition {name} ({d:?}) is still polymorphic after specialisation"
    ))));
  }

  let mut rep_env = RepEnv::new();
  rep::run(prog, ctx, &mut rep_env, opts.word_bits)?;

  lower::run(prog, ctx)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diag::CollectingDiagnostic;
  use crate::symbol::intern;
  use crate::types::atom::{Atom, Literal};
  use crate::types::defn::{Defn, EntryPoint};
  use crate::types::tail::{Code, Tail};
  use crate::types::ty::{TLit, TyKind};
  use std::rc::Rc;

  fn unit_ty() -> crate::types::ty::Ty { Rc::new(TyKind::Lit(TLit::Nat(0))) }

  #[test]
  fn trivial_program_compiles() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let code = Code::Done(Tail::Return(vec![Atom::Lit(Literal::Bool(true))]));
    let main = prog.add(Some(intern("main")), None, Defn::Block { params: vec![], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let mut diag = CollectingDiagnostic::default();
    let opts = Options::default();
    let module = compile(&mut prog, &mut ctx, &mut diag, &opts).unwrap();
    assert!(diag.0.is_empty());
    assert_eq!(module.functions.len(), 1);
  }

  #[test]
  fn polymorphic_entry_point_is_rejected() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let gen0 = Rc::new(TyKind::Gen(0, crate::types::ty::Kind::Type));
    let code = Code::Done(Tail::Return(vec![]));
    let main = prog.add(Some(intern("main")), None, Defn::Block { params: vec![], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: gen0 });

    let mut diag = CollectingDiagnostic::default();
    let opts = Options::default();
    let err = compile(&mut prog, &mut ctx, &mut diag, &opts).unwrap_err();
    assert!(matches!(err.kind, FailureKind::PolymorphicEntrypoint { .. }));
  }

  #[test]
  fn unused_args_drop_across_caller_and_callee() {
    // b[x,y,z] = f(x,z); main[] calls b with three args.
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let f = prog.add(None, None, Defn::External {
      name: intern("f"),
      ty: crate::types::ty::apply(
        Rc::new(TyKind::Con(Rc::new(crate::types::ty::TyconData::Arrow))), []),
      kind: crate::types::defn::ExternalKind::Proc,
    });
    let x = prog.new_temp(&mut ctx, intern("x"), unit_ty());
    let y = prog.new_temp(&mut ctx, intern("y"), unit_ty());
    let z = prog.new_temp(&mut ctx, intern("z"), unit_ty());
    let b_code = Code::Done(Tail::BlockCall(f, vec![Atom::Temp(x), Atom::Temp(z)]));
    let b = prog.add(Some(intern("b")), None, Defn::Block { params: vec![x, y, z], code: b_code });

    let a0 = prog.new_temp(&mut ctx, intern("a0"), unit_ty());
    let a1 = prog.new_temp(&mut ctx, intern("a1"), unit_ty());
    let a2 = prog.new_temp(&mut ctx, intern("a2"), unit_ty());
    let main_code = Code::Done(Tail::BlockCall(b, vec![Atom::Temp(a0), Atom::Temp(a1), Atom::Temp(a2)]));
    let main = prog.add(Some(intern("main")), None, Defn::Block { params: vec![a0, a1, a2], code: main_code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    run_shape_passes(&mut prog, &mut ctx, &Options::default());

    match &prog.defs[b].defn {
      Defn::Block { params, .. } => assert_eq!(params.len(), 2),
      _ => panic!("expected a Block"),
    }
    match &prog.defs[main].defn {
      Defn::Block { code, .. } => match code {
        Code::Done(Tail::BlockCall(_, args)) => assert_eq!(args.len(), 2),
        _ => panic!("expected a BlockCall tail"),
      },
      _ => panic!("expected a Block"),
    }
  }
}
