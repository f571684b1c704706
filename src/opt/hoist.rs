//! Static-allocator hoisting: a `DataAlloc`/`ClosAlloc` whose
//! every argument is itself static is lifted into a fresh `TopLevel`, so
//! it is allocated once at program initialisation instead of on every
//! visit to its Bind.

use hashbrown::HashMap;
use crate::ctx::Ctx;
use crate::symbol::intern;
use crate::types::atom::{Atom, TempId};
use crate::types::defn::{Defn, Program};
use crate::types::tail::{Code, Tail};

/// Tracks, within one forward walk, which temps are now known to alias
/// a hoisted (or otherwise static) value — the mechanism that lets
/// "nested constants collapse" within a single pass: an outer
/// allocator whose argument is a temp bound to an already-hoisted inner
/// one is itself eligible.
#[derive(Default, Clone)]
struct StaticEnv(HashMap<TempId, ()>);

impl StaticEnv {
  fn mark(&mut self, t: TempId) { self.0.insert(t, ()); }
  fn is_static_temp(&self, t: TempId) -> bool { self.0.contains_key(&t) }
}

fn is_static(atom: &Atom, prog: &Program, env: &StaticEnv) -> bool {
  match atom {
    Atom::Lit(_) | Atom::ConstData(_) => true,
    Atom::Global(d) => matches!(prog.defs[*d].defn, Defn::TopLevel { .. } | Defn::External { .. }),
    Atom::Temp(t) => env.is_static_temp(*t),
  }
}

/// Whether `tail` is a hoistable allocator (all its arguments static).
fn hoistable(tail: &Tail, prog: &Program, env: &StaticEnv) -> bool {
  matches!(tail, Tail::DataAlloc(..) | Tail::ClosAlloc(..))
    && tail.atoms().iter().all(|a| is_static(a, prog, env))
}

fn hoist_one(prog: &mut Program, ctx: &mut Ctx, tail: Tail) -> Atom {
  let hint = ctx.fresh_def_hint();
  let name = intern(&format!("$hoist{hint}"));
  let def = prog.add(None, None, Defn::TopLevel { tail, lhs: vec![name] });
  Atom::Global(def)
}

fn run_code(prog: &mut Program, ctx: &mut Ctx, code: &mut Code, env: &StaticEnv) -> bool {
  match code {
    Code::Done(tail) => {
      if hoistable(tail, prog, env) {
        let hoisted = hoist_one(prog, ctx, tail.clone());
        *tail = Tail::Return(vec![hoisted]);
        true
      } else {
        false
      }
    }
    Code::Bind(vs, tail, rest) => {
      let mut changed = false;
      let mut next_env = env.clone();
      if hoistable(tail, prog, env) {
        let hoisted = hoist_one(prog, ctx, tail.clone());
        *tail = Tail::Return(vec![hoisted]);
        changed = true;
        if let [v] = vs.as_slice() { next_env.mark(*v); }
      }
      changed |= run_code(prog, ctx, rest, &next_env);
      changed
    }
    Code::Case(_, alts, default) => {
      let mut changed = false;
      for (_, b) in alts.iter_mut() { changed |= run_code(prog, ctx, b, env); }
      if let Some(d) = default { changed |= run_code(prog, ctx, d, env); }
      changed
    }
    Code::If(_, t, f) => {
      let mut changed = run_code(prog, ctx, t, env);
      changed |= run_code(prog, ctx, f, env);
      changed
    }
  }
}

/// Run hoisting once over every reachable `Block`'s body. Call
/// repeatedly, as the pass schedule driver does, until it stops
/// reporting a change, so that an allocator whose arguments only became
/// static because an *earlier* definition's allocator was hoisted in a
/// previous round also collapses.
pub fn run(prog: &mut Program, ctx: &mut Ctx) -> bool {
  let order = prog.reachable_topo();
  let mut changed = false;
  for d in order {
    let mut code = match &prog.defs[d].defn {
      Defn::Block { code, .. } => code.clone(),
      _ => continue,
    };
    changed |= run_code(prog, ctx, &mut code, &StaticEnv::default());
    if let Defn::Block { code: slot, .. } = &mut prog.defs[d].defn { *slot = code; }
  }
  changed
}
