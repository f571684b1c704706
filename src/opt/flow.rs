//! Fact propagation and Case shorting.

use hashbrown::HashMap;
use crate::opt::facts::Facts;
use crate::opt::inline::rename_tail;
use crate::types::atom::{Atom, Ctor};
use crate::types::defn::{Defn, Program};
use crate::types::tail::{Code, Tail};

/// If `tail` is an `Enter` on an atom whose fact is a `ClosAlloc`,
/// rewrite it to the callee's tail applied to the stored (captured)
/// atoms plus the supplied arguments.
fn try_enter_shorting(tail: &Tail, facts: &Facts, prog: &Program) -> Option<Tail> {
  let (f, supplied) = match tail { Tail::Enter(f, supplied) => (f, supplied), _ => return None };
  let t = f.as_temp()?;
  let (d, captured) = match facts.get(t) { Some(Tail::ClosAlloc(d, captured)) => (*d, captured), _ => return None };
  let (params, args, body) = match &prog.defs[d].defn {
    Defn::ClosureDefn { params, args, tail: body, .. } => (params, args, body),
    _ => return None,
  };
  let mut subst = HashMap::new();
  for (p, a) in params.iter().zip(captured.iter()) { subst.insert(*p, a.clone()); }
  for (p, a) in args.iter().zip(supplied.iter()) { subst.insert(*p, a.clone()); }
  Some(rename_tail(body, &subst))
}

/// If `a`'s fact is a `DataAlloc`, rewrite a `Case` into whichever
/// alternative's code matches that constructor's declaration-order tag
/// (or the default, if none matches); ties never arise since tags are
/// unique within a tycon. If `a`'s fact is not a `DataAlloc`, no
/// shorting is performed.
fn try_case_shorting(a: &Atom, alts: &[(Ctor, Code)], default: &Option<Box<Code>>, facts: &Facts) -> Option<Code> {
  let t = a.as_temp()?;
  let ctor = match facts.get(t) { Some(Tail::DataAlloc(ctor, _)) => *ctor, _ => return None };
  if let Some((_, code)) = alts.iter().find(|(c, _)| c.tag == ctor.tag) {
    return Some(code.clone());
  }
  default.as_deref().cloned()
}

fn run_code(prog: &Program, code: &mut Code, facts: &Facts) -> bool {
  match code {
    Code::Done(tail) => {
      if let Some(new_tail) = try_enter_shorting(tail, facts, prog) {
        *tail = new_tail;
        true
      } else {
        false
      }
    }
    Code::Bind(vs, tail, rest) => {
      let mut changed = false;
      if let Some(new_tail) = try_enter_shorting(tail, facts, prog) {
        *tail = new_tail;
        changed = true;
      }
      let next_facts = if let [v] = vs.as_slice() { facts.bind(*v, tail) } else { facts.clone() };
      changed |= run_code(prog, rest, &next_facts);
      changed
    }
    Code::Case(a, alts, default) => {
      if let Some(shorted) = try_case_shorting(a, alts, default, facts) {
        *code = shorted;
        return true;
      }
      let mut changed = false;
      for (_, b) in alts.iter_mut() { changed |= run_code(prog, b, facts); }
      if let Some(d) = default { changed |= run_code(prog, d, facts); }
      changed
    }
    Code::If(_, t, f) => {
      let mut changed = run_code(prog, t, facts);
      changed |= run_code(prog, f, facts);
      changed
    }
  }
}

/// Run one pass of fact propagation and Case/Enter shorting over every
/// reachable `Block`'s body.
pub fn run(prog: &mut Program) -> bool {
  let order = prog.reachable_topo();
  let mut changed = false;
  for d in order {
    let mut code = match &prog.defs[d].defn {
      Defn::Block { code, .. } => code.clone(),
      _ => continue,
    };
    changed |= run_code(prog, &mut code, &Facts::default());
    if let Defn::Block { code: slot, .. } = &mut prog.defs[d].defn { *slot = code; }
  }
  changed
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ctx::Ctx;
  use crate::symbol::{intern, Idx};
  use crate::types::atom::Literal;
  use crate::types::defn::EntryPoint;
  use crate::types::ty::{TLit, TyKind, TyconId};
  use std::rc::Rc;

  fn unit_ty() -> crate::types::ty::Ty { Rc::new(TyKind::Lit(TLit::Nat(0))) }

  #[test]
  fn shorts_case_on_known_constructor() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let tycon = TyconId::from_usize(0);
    let nil = Ctor { tycon, tag: 0, arity: 0 };
    let cons = Ctor { tycon, tag: 1, arity: 1 };

    let h = prog.new_temp(&mut ctx, intern("h"), unit_ty());
    let nil_branch = Code::Done(Tail::Return(vec![Atom::Lit(Literal::Int(num::BigInt::from(0)))]));
    let cons_branch = Code::Done(Tail::Return(vec![Atom::Lit(Literal::Int(num::BigInt::from(1)))]));
    let code = Code::Bind(
      vec![h],
      Tail::DataAlloc(cons, vec![Atom::Lit(Literal::Bool(true))]),
      Box::new(Code::Case(Atom::Temp(h), vec![(nil, nil_branch), (cons, cons_branch)], None)),
    );
    let main = prog.add(None, None, Defn::Block { params: vec![], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let changed = run(&mut prog);
    assert!(changed);
    let code = match &prog.defs[main].defn { Defn::Block { code, .. } => code, _ => panic!() };
    if let Code::Bind(_, _, rest) = code {
      assert!(matches!(&**rest, Code::Done(Tail::Return(a)) if matches!(a.as_slice(), [Atom::Lit(Literal::Int(n))] if *n == num::BigInt::from(1))));
    } else {
      panic!("expected the Bind prefix to survive, got {code:?}");
    }
  }

  #[test]
  fn leaves_case_alone_without_a_fact() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let tycon = TyconId::from_usize(0);
    let nil = Ctor { tycon, tag: 0, arity: 0 };
    let p = prog.new_temp(&mut ctx, intern("p"), unit_ty());
    let code = Code::Case(Atom::Temp(p), vec![(nil, Code::Done(Tail::Return(vec![])))], None);
    let main = prog.add(None, None, Defn::Block { params: vec![p], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let changed = run(&mut prog);
    assert!(!changed);
  }

  #[test]
  fn shorts_enter_on_known_closure() {
    // k(x; y) = Return [y]   (captured x unused, invocation arg y returned)
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let x = prog.new_temp(&mut ctx, intern("x"), unit_ty());
    let y = prog.new_temp(&mut ctx, intern("y"), unit_ty());
    let alloc_ty = crate::types::ty::AllocType { tvars: vec![], stored: vec![unit_ty()], result: unit_ty() };
    let k = prog.add(None, None, Defn::ClosureDefn {
      params: vec![x],
      args: vec![y],
      tail: Tail::Return(vec![Atom::Temp(y)]),
      alloc_ty,
      derived: std::cell::RefCell::new(Vec::new()),
    });

    let f = prog.new_temp(&mut ctx, intern("f"), unit_ty());
    let code = Code::Bind(
      vec![f],
      Tail::ClosAlloc(k, vec![Atom::Lit(Literal::Int(num::BigInt::from(5)))]),
      Box::new(Code::Done(Tail::Enter(Atom::Temp(f), vec![Atom::Lit(Literal::Int(num::BigInt::from(9)))]))),
    );
    let main = prog.add(None, None, Defn::Block { params: vec![], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let changed = run(&mut prog);
    assert!(changed);
    let code = match &prog.defs[main].defn { Defn::Block { code, .. } => code, _ => panic!() };
    if let Code::Bind(_, _, rest) = code {
      assert!(matches!(&**rest, Code::Done(Tail::Return(a)) if matches!(a.as_slice(), [Atom::Lit(Literal::Int(n))] if *n == num::BigInt::from(9))));
    } else {
      panic!("expected the Bind prefix to survive, got {code:?}");
    }
  }
}
