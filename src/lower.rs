//! LLVM lowering: turns a fully optimised, monomorphic, rep-transformed
//! [`Program`] into an [`llvm::Program`].
//!
//! Each `Block`/`ClosureDefn` becomes a CFG rooted at its entry, built
//! by walking `Code` and splitting a fresh basic block at every
//! `Case`/`If`; control leaves the CFG only via `Ret`, `TailCall` or
//! `TailCallIndirect` (Design Notes: "control transfers out of the CFG
//! are tail calls or returns"). A `ClosureDefn`'s function takes the
//! closure pointer plus its invocation arguments; stored parameters are
//! loaded from offsets `1..N` of the closure layout struct, offset `0`
//! holding the entry code pointer. `DataAlloc`/`ClosAlloc` emit a call
//! to the external `alloc` symbol sized via the `getelementptr null, 1`
//! idiom, then store the tag (or callee code pointer) and fields.
//!
//! A `TopLevel` whose tail reduces to a bare reference (`Return` of a
//! single literal or another already-resolved global) is emitted as a
//! private constant with a bitcast alias to the generic object pointer
//! type, used directly as a value everywhere it's referenced. Every
//! other `TopLevel` — including a hoisted but structurally nontrivial
//! `DataAlloc`/`ClosAlloc` — is computed once by an ordered
//! initialisation function: see `DESIGN.md` for why this crate does not
//! attempt compile-time struct-constant folding of allocator-shaped
//! top levels (the narrow [`crate::llvm`] value model has no aggregate
//! constant-literal constructor). Dynamic top levels are modelled as a
//! private global slot the init function stores into once; later
//! initialisers and ordinary function bodies alike read it back with a
//! `Load`, with the `InitVarMap` ensuring each is computed exactly once
//! regardless of how many later initialisers reference it.

use hashbrown::HashMap;
use crate::ctx::Ctx;
use crate::diag::{Failure, FailureKind, Result};
use crate::llvm::{
  BinOp, GlobalName, LlvmAlias, LlvmBlock, LlvmConstant, LlvmFunction, LlvmInstr, LlvmTerm, LlvmType, LlvmValue,
  LocalId, UnOp as LUnOp,
};
use crate::types::atom::{Atom, Literal, TempId};
use crate::types::defn::{DefId, Defn, Program};
use crate::types::sizeof::bit_size;
use crate::types::tail::{Code, PrimOp, Tail};
use crate::types::ty::Ty;

/// The alloc entry point's linkage name (Design Notes §1: "the core
/// emits a call to an external 'alloc' symbol and defers policy").
const ALLOC_SYMBOL: &str = "alloc";

fn internal(msg: impl Into<String>) -> Failure { Failure::new(FailureKind::Internal(msg.into())) }

/// The struct layout of an allocated object: a tag/code-pointer slot
/// at offset 0, plus one slot per field.
fn layout_type(field_tys: &[LlvmType]) -> LlvmType {
  let mut fields = Vec::with_capacity(field_tys.len() + 1);
  fields.push(LlvmType::object_ptr());
  fields.extend_from_slice(field_tys);
  LlvmType::Struct(fields)
}

/// Map a MIL type to the LLVM type lowering represents it as: a
/// bit-sized scalar (`Bit`/`Ix`, after `rep::run` has already split
/// anything wider than the target word) becomes the smallest integer
/// type that holds it; anything without a bit-level representation (a
/// nominal data type, an arrow, an `ARef`) is a heap object, addressed
/// through the generic object pointer.
#[must_use] pub fn llvm_type_of(ty: &Ty) -> LlvmType {
  match bit_size(ty) {
    Some(b) if b <= 8 => LlvmType::I8,
    Some(b) if b <= 32 => LlvmType::I32,
    Some(_) => LlvmType::I64,
    None => LlvmType::object_ptr(),
  }
}

fn atom_llvm_type(prog: &Program, atom: &Atom) -> LlvmType {
  match atom {
    Atom::Temp(t) => llvm_type_of(&prog.temps[*t].ty()),
    Atom::Lit(Literal::Int(_)) => LlvmType::I64,
    Atom::Lit(Literal::Bool(_)) => LlvmType::I8,
    Atom::Global(_) | Atom::ConstData(_) => LlvmType::object_ptr(),
  }
}

/// How a definition's global reference behaves at lowered use sites: a
/// function, an external symbol, or a folded constant are already a
/// value once named; a dynamic top-level is a storage slot that must
/// be `Load`ed to yield its value.
#[derive(Clone)]
enum GlobalKind {
  Value(GlobalName),
  Slot(GlobalName),
}

impl GlobalKind {
  fn name(&self) -> &GlobalName {
    match self { GlobalKind::Value(n) | GlobalKind::Slot(n) => n }
  }
}

/// A monotonic local-register counter scoped to a single function,
/// per [`crate::llvm::Program::fresh_name`]'s documented convention
/// that callers restart the counter per function. Parameters are
/// always minted first, so they occupy ids `0..params.len()`
/// contiguously in declaration order.
struct LocalMint(u32);
impl LocalMint {
  fn new() -> Self { Self(0) }
  fn next(&mut self) -> LocalId {
    let id = LocalId(self.0);
    self.0 += 1;
    id
  }
}

type Env = HashMap<TempId, LlvmValue>;

/// Accumulates the basic blocks of one function as `Code` is walked.
struct FnBuilder<'p> {
  prog: &'p Program,
  globals: &'p HashMap<DefId, GlobalKind>,
  blocks: Vec<LlvmBlock>,
  label: String,
  instrs: Vec<LlvmInstr>,
  label_counter: u32,
}

impl<'p> FnBuilder<'p> {
  fn new(prog: &'p Program, globals: &'p HashMap<DefId, GlobalKind>, entry_label: String) -> Self {
    Self { prog, globals, blocks: Vec::new(), label: entry_label, instrs: Vec::new(), label_counter: 0 }
  }

  fn fresh_label(&mut self, prefix: &str) -> String {
    let n = self.label_counter;
    self.label_counter += 1;
    format!("{prefix}.{n}")
  }

  fn push(&mut self, i: LlvmInstr) { self.instrs.push(i); }

  fn finish_block(&mut self, term: LlvmTerm, next_label: String) {
    let label = std::mem::replace(&mut self.label, next_label);
    let instrs = std::mem::take(&mut self.instrs);
    self.blocks.push(LlvmBlock { label, instrs, term });
  }

  fn atom_value(&mut self, mint: &mut LocalMint, env: &Env, atom: &Atom) -> Result<LlvmValue> {
    Ok(match atom {
      Atom::Temp(t) => env.get(t).cloned()
        .ok_or_else(|| internal(format!("{t:?} read before bound (scope invariant violated)")))?,
      Atom::Lit(Literal::Int(n)) => {
        use num::ToPrimitive;
        LlvmValue::Int(n.to_i64().unwrap_or(i64::MAX), LlvmType::I64)
      }
      Atom::Lit(Literal::Bool(b)) => LlvmValue::Int(i64::from(*b), LlvmType::I8),
      Atom::ConstData(c) => LlvmValue::Int(i64::from(c.tag), LlvmType::I64),
      Atom::Global(d) => {
        let kind = self.globals.get(d)
          .ok_or_else(|| internal(format!("global {d:?} referenced before it was lowered")))?;
        match kind {
          GlobalKind::Value(name) => LlvmValue::Global(name.clone()),
          GlobalKind::Slot(name) => {
            let id = mint.next();
            self.push(LlvmInstr::Load(id, LlvmType::object_ptr(), LlvmValue::Global(name.clone())));
            LlvmValue::Local(id)
          }
        }
      }
    })
  }

  /// Allocate an object shaped `layout_type(field_tys)`: size it via
  /// the `getelementptr null, 1` idiom, call `alloc`, bitcast to the
  /// specific layout type, store `header` at offset 0 and each field
  /// at offsets `1..`, and return the raw object-pointer result.
  fn emit_alloc(&mut self, mint: &mut LocalMint, header: LlvmValue, fields: Vec<(LlvmValue, LlvmType)>) -> LlvmValue {
    let field_tys: Vec<LlvmType> = fields.iter().map(|(_, t)| t.clone()).collect();
    let layout = layout_type(&field_tys);
    let size = mint.next();
    self.push(LlvmInstr::Let(size, LlvmValue::SizeOf(layout.clone())));
    let raw = mint.next();
    self.push(LlvmInstr::Call(Some(raw), GlobalName(ALLOC_SYMBOL.to_string()), vec![LlvmValue::Local(size)], LlvmType::object_ptr()));
    let typed = mint.next();
    self.push(LlvmInstr::Let(typed, LlvmValue::Bitcast(Box::new(LlvmValue::Local(raw)), LlvmType::layout_ptr(field_tys.clone()))));
    let header_ptr = mint.next();
    self.push(LlvmInstr::Let(header_ptr, LlvmValue::Getelementptr(layout.clone(), Box::new(LlvmValue::Local(typed)), 0)));
    self.push(LlvmInstr::Store(header, LlvmValue::Local(header_ptr)));
    for (i, (val, _)) in fields.into_iter().enumerate() {
      let fptr = mint.next();
      self.push(LlvmInstr::Let(fptr, LlvmValue::Getelementptr(layout.clone(), Box::new(LlvmValue::Local(typed)), u32::try_from(i + 1).unwrap())));
      self.push(LlvmInstr::Store(val, LlvmValue::Local(fptr)));
    }
    LlvmValue::Local(raw)
  }
}

fn lower_prim(op: PrimOp, args: &[LlvmValue]) -> Result<LlvmValue> {
  let bin = |b: BinOp| -> Result<LlvmValue> {
    match (args.first(), args.get(1)) {
      (Some(a), Some(c)) => Ok(LlvmValue::BinOp(b, Box::new(a.clone()), Box::new(c.clone()))),
      _ => Err(internal(format!("{op:?} requires two operands"))),
    }
  };
  match op {
    PrimOp::Add => bin(BinOp::Add),
    PrimOp::Sub => bin(BinOp::Sub),
    PrimOp::Mul => bin(BinOp::Mul),
    PrimOp::Quot => bin(BinOp::SDiv),
    PrimOp::Rem => bin(BinOp::SRem),
    PrimOp::BitAnd | PrimOp::And => bin(BinOp::And),
    PrimOp::BitOr | PrimOp::Or => bin(BinOp::Or),
    PrimOp::BitXor => bin(BinOp::Xor),
    PrimOp::Shl => bin(BinOp::Shl),
    PrimOp::Shr => bin(BinOp::AShr),
    PrimOp::Eq => bin(BinOp::IcmpEq),
    PrimOp::Ne => bin(BinOp::IcmpNe),
    PrimOp::Lt => bin(BinOp::IcmpSlt),
    PrimOp::Le => bin(BinOp::IcmpSle),
    PrimOp::Not | PrimOp::BitNot => args.first().cloned()
      .map(|a| LlvmValue::UnOp(LUnOp::Not, Box::new(a)))
      .ok_or_else(|| internal(format!("{op:?} requires one operand"))),
  }
}

fn callee_name(globals: &HashMap<DefId, GlobalKind>, d: DefId) -> Result<GlobalName> {
  globals.get(&d).map(GlobalKind::name).cloned()
    .ok_or_else(|| internal(format!("{d:?} called before it was lowered")))
}

/// Lower a tail that produces a single value in non-terminal (`Bind`)
/// position, returning that value. `dest_ty` is the declared type of
/// the single temp it will be bound to, used to size a `Sel`'s load or
/// a call's result; `None` falls back to the generic object pointer.
fn lower_value_tail(
  fb: &mut FnBuilder,
  mint: &mut LocalMint,
  env: &Env,
  tail: &Tail,
  dest_ty: Option<LlvmType>,
) -> Result<LlvmValue> {
  let dest = dest_ty.unwrap_or(LlvmType::object_ptr());
  match tail {
    Tail::PrimCall(op, args) => {
      let vals = args.iter().map(|a| fb.atom_value(mint, env, a)).collect::<Result<Vec<_>>>()?;
      let v = lower_prim(*op, &vals)?;
      let id = mint.next();
      fb.push(LlvmInstr::Let(id, v));
      Ok(LlvmValue::Local(id))
    }
    Tail::Sel(ctor, idx, atom) => {
      let obj = fb.atom_value(mint, env, atom)?;
      // Field types besides the projected one are approximated as
      // object pointers: `Ctor` carries no field-type table to derive
      // them from precisely (see `DESIGN.md`).
      let mut field_tys: Vec<LlvmType> = (0..ctor.arity).map(|_| LlvmType::object_ptr()).collect();
      if let Some(slot) = field_tys.get_mut(*idx as usize) { *slot = dest.clone(); }
      let layout = layout_type(&field_tys);
      let bc = mint.next();
      fb.push(LlvmInstr::Let(bc, LlvmValue::Bitcast(Box::new(obj), LlvmType::layout_ptr(field_tys))));
      let gep = mint.next();
      fb.push(LlvmInstr::Let(gep, LlvmValue::Getelementptr(layout, Box::new(LlvmValue::Local(bc)), idx + 1)));
      let loaded = mint.next();
      fb.push(LlvmInstr::Load(loaded, dest, LlvmValue::Local(gep)));
      Ok(LlvmValue::Local(loaded))
    }
    Tail::DataAlloc(ctor, args) => {
      let fields = args.iter()
        .map(|a| Ok((fb.atom_value(mint, env, a)?, atom_llvm_type(fb.prog, a))))
        .collect::<Result<Vec<_>>>()?;
      let header = LlvmValue::Bitcast(Box::new(LlvmValue::Int(i64::from(ctor.tag), LlvmType::I64)), LlvmType::object_ptr());
      Ok(fb.emit_alloc(mint, header, fields))
    }
    Tail::ClosAlloc(d, args) => {
      let callee = callee_name(fb.globals, *d)?;
      let fields = args.iter()
        .map(|a| Ok((fb.atom_value(mint, env, a)?, atom_llvm_type(fb.prog, a))))
        .collect::<Result<Vec<_>>>()?;
      let header = LlvmValue::Bitcast(Box::new(LlvmValue::Global(callee)), LlvmType::object_ptr());
      Ok(fb.emit_alloc(mint, header, fields))
    }
    Tail::BlockCall(d, args) => {
      let callee = callee_name(fb.globals, *d)?;
      let vals = args.iter().map(|a| fb.atom_value(mint, env, a)).collect::<Result<Vec<_>>>()?;
      let id = mint.next();
      fb.push(LlvmInstr::Call(Some(id), callee, vals, dest));
      Ok(LlvmValue::Local(id))
    }
    Tail::Enter(f, args) => {
      let closure = fb.atom_value(mint, env, f)?;
      let code_ptr = mint.next();
      fb.push(LlvmInstr::Let(code_ptr, LlvmValue::Getelementptr(layout_type(&[]), Box::new(closure.clone()), 0)));
      let loaded_code = mint.next();
      fb.push(LlvmInstr::Load(loaded_code, LlvmType::object_ptr(), LlvmValue::Local(code_ptr)));
      let mut all = vec![closure];
      for a in args { all.push(fb.atom_value(mint, env, a)?); }
      let id = mint.next();
      fb.push(LlvmInstr::CallIndirect(Some(id), LlvmValue::Local(loaded_code), all, dest));
      Ok(LlvmValue::Local(id))
    }
    Tail::Return(atoms) => match atoms.as_slice() {
      [one] => fb.atom_value(mint, env, one),
      _ => Err(internal("a multi-valued Return cannot bind a single temp")),
    },
  }
}

/// Lower a tail in terminal position, finishing the current block.
fn lower_terminal_tail(fb: &mut FnBuilder, mint: &mut LocalMint, env: &Env, tail: &Tail, next_label: String) -> Result<()> {
  match tail {
    Tail::Return(atoms) => {
      let vals = atoms.iter().map(|a| fb.atom_value(mint, env, a)).collect::<Result<Vec<_>>>()?;
      fb.finish_block(LlvmTerm::Ret(vals), next_label);
      Ok(())
    }
    Tail::BlockCall(d, args) => {
      let callee = callee_name(fb.globals, *d)?;
      let vals = args.iter().map(|a| fb.atom_value(mint, env, a)).collect::<Result<Vec<_>>>()?;
      fb.finish_block(LlvmTerm::TailCall(callee, vals), next_label);
      Ok(())
    }
    Tail::Enter(f, args) => {
      let closure = fb.atom_value(mint, env, f)?;
      let code_ptr = mint.next();
      fb.push(LlvmInstr::Let(code_ptr, LlvmValue::Getelementptr(layout_type(&[]), Box::new(closure.clone()), 0)));
      let loaded_code = mint.next();
      fb.push(LlvmInstr::Load(loaded_code, LlvmType::object_ptr(), LlvmValue::Local(code_ptr)));
      let mut all = vec![closure];
      for a in args { all.push(fb.atom_value(mint, env, a)?); }
      fb.finish_block(LlvmTerm::TailCallIndirect(LlvmValue::Local(loaded_code), all), next_label);
      Ok(())
    }
    _ => {
      let v = lower_value_tail(fb, mint, env, tail, None)?;
      fb.finish_block(LlvmTerm::Ret(vec![v]), next_label);
      Ok(())
    }
  }
}

fn lower_code(fb: &mut FnBuilder, mint: &mut LocalMint, env: &mut Env, code: &Code) -> Result<()> {
  match code {
    Code::Done(tail) => {
      let next = fb.fresh_label("unreachable");
      lower_terminal_tail(fb, mint, env, tail, next)
    }
    Code::Bind(vs, tail, rest) => {
      match vs.as_slice() {
        [] => { lower_value_tail(fb, mint, env, tail, None)?; }
        [v] => {
          let ty = llvm_type_of(&fb.prog.temps[*v].ty());
          let val = lower_value_tail(fb, mint, env, tail, Some(ty))?;
          env.insert(*v, val);
        }
        _ => return Err(internal("a multi-valued Bind is not produced by any tail this crate lowers")),
      }
      lower_code(fb, mint, env, rest)
    }
    Code::If(a, t, f) => {
      let cond = fb.atom_value(mint, env, a)?;
      let tlabel = fb.fresh_label("if.then");
      let flabel = fb.fresh_label("if.else");
      fb.finish_block(LlvmTerm::CondBranch(cond, tlabel.clone(), flabel.clone()), tlabel);
      lower_code(fb, mint, &mut env.clone(), t)?;
      fb.label = flabel;
      lower_code(fb, mint, env, f)
    }
    Code::Case(a, alts, default) => {
      let scrut = fb.atom_value(mint, env, a)?;
      let bc = mint.next();
      fb.push(LlvmInstr::Let(bc, LlvmValue::Bitcast(Box::new(scrut), LlvmType::layout_ptr(vec![]))));
      let gep = mint.next();
      fb.push(LlvmInstr::Let(gep, LlvmValue::Getelementptr(layout_type(&[]), Box::new(LlvmValue::Local(bc)), 0)));
      let loaded = mint.next();
      fb.push(LlvmInstr::Load(loaded, LlvmType::object_ptr(), LlvmValue::Local(gep)));
      let tag_int = mint.next();
      fb.push(LlvmInstr::Let(tag_int, LlvmValue::Bitcast(Box::new(LlvmValue::Local(loaded)), LlvmType::I64)));
      let tag_val = LlvmValue::Local(tag_int);

      for (ctor, body) in alts {
        let alt_label = fb.fresh_label("case.alt");
        let next_label = fb.fresh_label("case.next");
        let cmp = mint.next();
        fb.push(LlvmInstr::Let(cmp, LlvmValue::BinOp(BinOp::IcmpEq, Box::new(tag_val.clone()), Box::new(LlvmValue::Int(i64::from(ctor.tag), LlvmType::I64)))));
        fb.finish_block(LlvmTerm::CondBranch(LlvmValue::Local(cmp), alt_label.clone(), next_label.clone()), alt_label);
        lower_code(fb, mint, &mut env.clone(), body)?;
        fb.label = next_label;
      }
      match default {
        Some(d) => lower_code(fb, mint, env, d),
        None => {
          log::warn!("lowering: Case has no matching alternative and no default; terminating with an empty Ret");
          let next = fb.fresh_label("case.unreachable");
          fb.finish_block(LlvmTerm::Ret(vec![]), next);
          Ok(())
        }
      }
    }
  }
}

fn ret_type_of(prog: &Program, final_tail: Option<&Tail>) -> LlvmType {
  match final_tail {
    Some(Tail::Return(atoms)) => match atoms.as_slice() {
      [] => LlvmType::Struct(vec![]),
      [one] => atom_llvm_type(prog, one),
      many => LlvmType::Struct(many.iter().map(|a| atom_llvm_type(prog, a)).collect()),
    },
    _ => LlvmType::object_ptr(),
  }
}

fn lower_block_function<'p>(prog: &'p Program, globals: &'p HashMap<DefId, GlobalKind>, name: GlobalName, params: &[TempId], code: &Code) -> Result<LlvmFunction> {
  let mut mint = LocalMint::new();
  let mut env = Env::new();
  let mut param_tys = Vec::with_capacity(params.len());
  for &p in params {
    let ty = llvm_type_of(&prog.temps[p].ty());
    let id = mint.next();
    env.insert(p, LlvmValue::Local(id));
    param_tys.push(ty);
  }
  let ret = ret_type_of(prog, code.final_tail());
  let mut fb = FnBuilder::new(prog, globals, "entry".to_string());
  lower_code(&mut fb, &mut mint, &mut env, code)?;
  Ok(LlvmFunction { name, params: param_tys, ret, blocks: fb.blocks })
}

fn lower_closure_function<'p>(
  prog: &'p Program,
  globals: &'p HashMap<DefId, GlobalKind>,
  name: GlobalName,
  params: &[TempId],
  args: &[TempId],
  tail: &Tail,
) -> Result<LlvmFunction> {
  let mut mint = LocalMint::new();
  let mut env = Env::new();
  let clos_id = mint.next();
  let mut param_tys = vec![LlvmType::object_ptr()];
  for &a in args {
    let ty = llvm_type_of(&prog.temps[a].ty());
    let id = mint.next();
    env.insert(a, LlvmValue::Local(id));
    param_tys.push(ty);
  }
  let ret = ret_type_of(prog, Some(tail));
  let mut fb = FnBuilder::new(prog, globals, "entry".to_string());
  let field_tys: Vec<LlvmType> = params.iter().map(|&p| llvm_type_of(&prog.temps[p].ty())).collect();
  let layout = layout_type(&field_tys);
  for (i, &p) in params.iter().enumerate() {
    let bc = mint.next();
    fb.push(LlvmInstr::Let(bc, LlvmValue::Bitcast(Box::new(LlvmValue::Local(clos_id)), LlvmType::layout_ptr(field_tys.clone()))));
    let gep = mint.next();
    fb.push(LlvmInstr::Let(gep, LlvmValue::Getelementptr(layout.clone(), Box::new(LlvmValue::Local(bc)), u32::try_from(i + 1).unwrap())));
    let loaded = mint.next();
    fb.push(LlvmInstr::Load(loaded, field_tys[i].clone(), LlvmValue::Local(gep)));
    env.insert(p, LlvmValue::Local(loaded));
  }
  let next = fb.fresh_label("unreachable");
  lower_terminal_tail(&mut fb, &mut mint, &env, tail, next)?;
  Ok(LlvmFunction { name, params: param_tys, ret, blocks: fb.blocks })
}

/// Whether a `TopLevel`'s tail reduces to a value already representable
/// without runtime computation: a bare reference to an already-resolved
/// global, or a literal. Everything else (including a fully-static
/// `DataAlloc`/`ClosAlloc` that `opt::hoist` produced) is computed by
/// the init function instead — see the module doc comment.
fn toplevel_is_trivial(globals: &HashMap<DefId, GlobalKind>, tail: &Tail) -> bool {
  match tail {
    Tail::Return(atoms) => match atoms.as_slice() {
      [Atom::Lit(_) | Atom::ConstData(_)] => true,
      [Atom::Global(d)] => matches!(globals.get(d), Some(GlobalKind::Value(_))),
      _ => false,
    },
    _ => false,
  }
}

/// Lower the program: assign every reachable definition a linkage name
/// and `GlobalKind`, emit each `Block`/`ClosureDefn` as a function, each
/// trivial `TopLevel` as a constant+alias, and thread the remaining
/// `TopLevel`s through a single ordered initialisation function
/// (`$init`), asserting the topological precondition `InitVarMap`
/// relies on (Design Notes Open Questions).
pub fn run(prog: &Program, ctx: &mut Ctx) -> Result<crate::llvm::Program> {
  let order = prog.reachable_topo();
  let mut out = crate::llvm::Program::new();
  let mut globals: HashMap<DefId, GlobalKind> = HashMap::new();

  // Pass 1: assign linkage names and classify every TopLevel, in
  // dependency (leaves-first) order, so a TopLevel's referenced
  // globals are already classified by the time we inspect it.
  for &d in &order {
    let name = match prog.defs[d].name {
      Some(sym) => GlobalName(format!("{}.{}", sym.as_str(), ctx.fresh_def_hint())),
      None => out.fresh_global("def"),
    };
    match &prog.defs[d].defn {
      Defn::Block { .. } | Defn::ClosureDefn { .. } => { globals.insert(d, GlobalKind::Value(name)); }
      Defn::External { name: sym, .. } => { globals.insert(d, GlobalKind::Value(GlobalName(sym.as_str().to_string()))); }
      Defn::TopLevel { tail, .. } => {
        if toplevel_is_trivial(&globals, tail) {
          globals.insert(d, GlobalKind::Value(name));
        } else {
          globals.insert(d, GlobalKind::Slot(name));
        }
      }
    }
  }

  // Pass 2: emit. Functions and trivial constants can be emitted in
  // any order now that every name is known; dynamic top levels are
  // threaded into one init function body, in the same dependency
  // order, so each is computed at most once and later initialisers can
  // read earlier ones back with a plain Load.
  let mut init_mint = LocalMint::new();
  let mut init_fb = FnBuilder::new(prog, &globals, "entry".to_string());
  let mut any_dynamic = false;

  for &d in &order {
    let kind = globals[&d].clone();
    match &prog.defs[d].defn {
      Defn::Block { params, code } => {
        out.add_function(lower_block_function(prog, &globals, kind.name().clone(), params, code)?);
      }
      Defn::ClosureDefn { params, args, tail, .. } => {
        out.add_function(lower_closure_function(prog, &globals, kind.name().clone(), params, args, tail)?);
      }
      Defn::External { .. } => {}
      Defn::TopLevel { tail, .. } => {
        match &kind {
          GlobalKind::Value(alias) => match tail {
            Tail::Return(atoms) => {
              let val = init_fb.atom_value(&mut init_mint, &Env::new(), &atoms[0])
                .expect("a trivial top-level's atom never reads a temp");
              out.add_alias(LlvmAlias { name: alias.clone(), ty: LlvmType::object_ptr(), target: val });
            }
            _ => unreachable!("toplevel_is_trivial only accepts Return"),
          },
          GlobalKind::Slot(slot) => {
            any_dynamic = true;
            out.add_constant(LlvmConstant { name: slot.clone(), ty: LlvmType::object_ptr(), init: LlvmValue::Null(LlvmType::object_ptr()) });
            let val = lower_value_tail(&mut init_fb, &mut init_mint, &Env::new(), tail, None)?;
            init_fb.push(LlvmInstr::Store(val, LlvmValue::Global(slot.clone())));
          }
        }
      }
    }
  }

  if any_dynamic {
    let next = init_fb.fresh_label("unreachable");
    init_fb.finish_block(LlvmTerm::Ret(vec![]), next);
    out.add_function(LlvmFunction {
      name: GlobalName("$init".to_string()),
      params: vec![],
      ret: LlvmType::Struct(vec![]),
      blocks: init_fb.blocks,
    });
  }

  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::{intern, Idx};
  use crate::types::atom::{Ctor, Literal};
  use crate::types::defn::{EntryPoint, ExternalKind};
  use crate::types::ty::{TLit, TyKind, TyconId};
  use std::rc::Rc;

  fn unit_ty() -> Ty { Rc::new(TyKind::Lit(TLit::Nat(0))) }

  #[test]
  fn lowers_trivial_return_to_a_single_block_ret() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let x = prog.new_temp(&mut ctx, intern("x"), unit_ty());
    let code = Code::Done(Tail::Return(vec![Atom::Temp(x)]));
    let main = prog.add(Some(intern("main")), None, Defn::Block { params: vec![x], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let module = run(&prog, &mut ctx).expect("lowering a trivial Return should not fail");
    assert_eq!(module.functions.len(), 1);
    let f = &module.functions[0];
    assert_eq!(f.blocks.len(), 1);
    assert!(matches!(&f.blocks[0].term, LlvmTerm::Ret(vs) if vs.len() == 1));
  }

  #[test]
  fn data_alloc_emits_an_alloc_call_and_field_stores() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let v = prog.new_temp(&mut ctx, intern("v"), unit_ty());
    let nil = Ctor { tycon: TyconId::from_usize(0), tag: 1, arity: 1 };
    let code = Code::Bind(
      vec![v],
      Tail::DataAlloc(nil, vec![Atom::Lit(Literal::Int(num::BigInt::from(7)))]),
      Box::new(Code::Done(Tail::Return(vec![Atom::Temp(v)]))),
    );
    let main = prog.add(Some(intern("main")), None, Defn::Block { params: vec![], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let module = run(&prog, &mut ctx).unwrap();
    let f = &module.functions[0];
    let calls_alloc = f.blocks.iter().flat_map(|b| &b.instrs)
      .any(|i| matches!(i, LlvmInstr::Call(_, name, ..) if name.0 == "alloc"));
    assert!(calls_alloc);
  }

  #[test]
  fn case_lowers_to_a_cascade_of_tag_comparisons() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let a = prog.new_temp(&mut ctx, intern("a"), unit_ty());
    let just_block = prog.add(None, None, Defn::Block { params: vec![], code: Code::Done(Tail::Return(vec![])) });
    let nothing_block = prog.add(None, None, Defn::Block { params: vec![], code: Code::Done(Tail::Return(vec![])) });
    let just = Ctor { tycon: TyconId::from_usize(0), tag: 0, arity: 1 };
    let nothing = Ctor { tycon: TyconId::from_usize(0), tag: 1, arity: 0 };
    let code = Code::Case(
      Atom::Temp(a),
      vec![
        (just, Code::Done(Tail::BlockCall(just_block, vec![]))),
        (nothing, Code::Done(Tail::BlockCall(nothing_block, vec![]))),
      ],
      None,
    );
    let main = prog.add(Some(intern("main")), None, Defn::Block { params: vec![a], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let module = run(&prog, &mut ctx).unwrap();
    let main_fn = module.functions.iter().find(|f| f.name.0.starts_with("main")).unwrap();
    let cond_branches = main_fn.blocks.iter().filter(|b| matches!(b.term, LlvmTerm::CondBranch(..))).count();
    assert_eq!(cond_branches, 2, "one comparison per alternative");
  }

  #[test]
  fn trivial_top_level_becomes_a_constant_alias() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let top = prog.add(Some(intern("answer")), None, Defn::TopLevel {
      tail: Tail::Return(vec![Atom::Lit(Literal::Int(num::BigInt::from(42)))]),
      lhs: vec![intern("answer")],
    });
    let code = Code::Done(Tail::Return(vec![Atom::Global(top)]));
    let main = prog.add(Some(intern("main")), None, Defn::Block { params: vec![], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let module = run(&prog, &mut ctx).unwrap();
    assert_eq!(module.aliases.len(), 1);
    assert!(module.functions.iter().all(|f| f.name.0 != "$init"));
  }

  #[test]
  fn dynamic_top_level_goes_through_init_function() {
    let mut prog = Program::new();
    let mut ctx = Ctx::new();
    let ext = prog.add(None, None, Defn::External { name: intern("getenv_flag"), ty: unit_ty(), kind: ExternalKind::Proc });
    let top = prog.add(Some(intern("flag")), None, Defn::TopLevel {
      tail: Tail::BlockCall(ext, vec![]),
      lhs: vec![intern("flag")],
    });
    let code = Code::Done(Tail::Return(vec![Atom::Global(top)]));
    let main = prog.add(Some(intern("main")), None, Defn::Block { params: vec![], code });
    prog.entry_points.push(EntryPoint { name: intern("main"), def: main, ty: unit_ty() });

    let module = run(&prog, &mut ctx).unwrap();
    assert!(module.functions.iter().any(|f| f.name.0 == "$init"));
    assert_eq!(module.constants.len(), 1);
    let main_fn = module.functions.iter().find(|f| f.name.0.starts_with("main")).unwrap();
    let loads_slot = main_fn.blocks.iter().flat_map(|b| &b.instrs)
      .any(|i| matches!(i, LlvmInstr::Load(_, _, LlvmValue::Global(_))));
    assert!(loads_slot);
  }
}
