//! The external LLVM value/type model: a narrow interface capturing
//! exactly the types and value constructors lowering needs, without
//! attempting to reproduce a full LLVM binding (the textual printer and
//! its surrounding tooling are an external collaborator's problem).

use std::fmt;

/// An LLVM type, restricted to the handful of shapes lowering ever
/// constructs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlvmType {
  /// An 8-bit integer (used for byte loads/stores and boolean tags).
  I8,
  /// A 32-bit integer.
  I32,
  /// A 64-bit integer (a pointer-width scalar on the lowering target).
  I64,
  /// An anonymous packed/unpacked struct of the given field types.
  Struct(Vec<LlvmType>),
  /// A pointer to the given pointee type.
  Ptr(Box<LlvmType>),
}

impl LlvmType {
  /// The generic opaque-object pointer type that `alloc`'s result and
  /// every closure/data layout's header field are typed as, once
  /// bitcast away from their specific struct shape.
  #[must_use] pub fn object_ptr() -> Self { LlvmType::Ptr(Box::new(LlvmType::I8)) }

  /// A pointer to a struct wrapping the given field types, as used for
  /// a closure/data layout before it is bitcast down to an object
  /// pointer.
  #[must_use] pub fn layout_ptr(fields: Vec<LlvmType>) -> Self {
    LlvmType::Ptr(Box::new(LlvmType::Struct(fields)))
  }
}

impl fmt::Display for LlvmType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LlvmType::I8 => write!(f, "i8"),
      LlvmType::I32 => write!(f, "i32"),
      LlvmType::I64 => write!(f, "i64"),
      LlvmType::Struct(fields) => {
        write!(f, "{{")?;
        for (i, t) in fields.iter().enumerate() {
          if i > 0 { write!(f, ", ")?; }
          write!(f, "{t}")?;
        }
        write!(f, "}}")
      }
      LlvmType::Ptr(t) => write!(f, "{t}*"),
    }
  }
}

/// A local SSA register name within a function body, as minted by
/// [`Program::fresh_name`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

/// Binary arithmetic, bitwise and comparison operators, matching the
/// primitives [`crate::types::tail::PrimOp`] lowers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
  Add, Sub, Mul, SDiv, SRem,
  And, Or, Xor, Shl, AShr,
  IcmpEq, IcmpNe, IcmpSlt, IcmpSle,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
  /// Bitwise/boolean complement.
  Not,
}

/// A global symbol name: either an externally supplied name (an
/// `alloc` entry point, say) or one this module itself defines.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GlobalName(pub String);

/// An LLVM value, restricted to the handful of value-producing
/// instructions and constants lowering emits.
#[derive(Clone, Debug)]
pub enum LlvmValue {
  /// An integer constant of the given type.
  Int(i64, LlvmType),
  /// A reference to a module-scope global (a private constant, an
  /// alias, or an external symbol).
  Global(GlobalName),
  /// A reference to a local SSA register already bound earlier in the
  /// current function body.
  Local(LocalId),
  /// The null pointer constant of the given pointer type.
  Null(LlvmType),
  /// A `bitcast` of a value to a new type, used to move between a
  /// layout's specific struct pointer type and the generic object
  /// pointer type.
  Bitcast(Box<LlvmValue>, LlvmType),
  /// A `getelementptr` addressing field `index` of a pointer to the
  /// given struct type.
  Getelementptr(LlvmType, Box<LlvmValue>, u32),
  /// The "index one element past a null pointer" idiom for computing a
  /// type's allocation size without a dedicated `sizeof` instruction.
  SizeOf(LlvmType),
  /// A binary arithmetic/bitwise/comparison operation.
  BinOp(BinOp, Box<LlvmValue>, Box<LlvmValue>),
  /// A unary operation.
  UnOp(UnOp, Box<LlvmValue>),
}

/// A single instruction in a straight-line code sequence, each bound to
/// a fresh [`LocalId`] except `Store`/`Ret`, which produce no value.
#[derive(Clone, Debug)]
pub enum LlvmInstr {
  /// Bind `dest` to the result of evaluating `value`.
  Let(LocalId, LlvmValue),
  /// Store `value` at the address `ptr`.
  Store(LlvmValue, LlvmValue),
  /// Load a value of the given type from `ptr`, binding it to `dest`.
  Load(LocalId, LlvmType, LlvmValue),
  /// Call `callee` with `args`, binding the (possibly void) result to
  /// `dest` if given.
  Call(Option<LocalId>, GlobalName, Vec<LlvmValue>, LlvmType),
  /// Call through a function-pointer value rather than a statically
  /// known symbol, as entering a closure requires.
  CallIndirect(Option<LocalId>, LlvmValue, Vec<LlvmValue>, LlvmType),
  /// Extract field `index` out of an aggregate value, binding the
  /// result to `dest`.
  ExtractValue(LocalId, LlvmValue, u32),
}

/// A terminator: how a basic block hands control onward.
#[derive(Clone, Debug)]
pub enum LlvmTerm {
  /// Return these values (multiple values are packed into a struct by
  /// the caller that builds this terminator).
  Ret(Vec<LlvmValue>),
  /// An unconditional jump to another block in the same function.
  Branch(String),
  /// A two-way conditional jump on a boolean value.
  CondBranch(LlvmValue, String, String),
  /// A tail call to another function, with no further instructions in
  /// this block.
  TailCall(GlobalName, Vec<LlvmValue>),
  /// A tail call through a function-pointer value, as a tail-position
  /// closure entry lowers to.
  TailCallIndirect(LlvmValue, Vec<LlvmValue>),
}

/// One straight-line basic block: a label, a sequence of instructions,
/// and a terminator.
#[derive(Clone, Debug)]
pub struct LlvmBlock {
  /// The block's label, unique within its enclosing function.
  pub label: String,
  /// Instructions executed in order.
  pub instrs: Vec<LlvmInstr>,
  /// How this block hands off control.
  pub term: LlvmTerm,
}

/// A function definition: a name, parameter types, a return type, and
/// its basic blocks in layout order (the first is the entry block).
#[derive(Clone, Debug)]
pub struct LlvmFunction {
  /// The function's linkage name.
  pub name: GlobalName,
  /// Parameter types, in declaration order.
  pub params: Vec<LlvmType>,
  /// The return type (a struct, for a multi-valued `Return`).
  pub ret: LlvmType,
  /// Basic blocks, entry block first.
  pub blocks: Vec<LlvmBlock>,
}

/// A private module-scope constant: a typed initialiser with no
/// runtime computation behind it (used for fully static `TopLevel`s).
#[derive(Clone, Debug)]
pub struct LlvmConstant {
  /// The constant's linkage name.
  pub name: GlobalName,
  /// Its declared type.
  pub ty: LlvmType,
  /// Its initialiser value.
  pub init: LlvmValue,
}

/// An alias from one global name to another (used to give a private
/// constant's bitcast-to-object-pointer form a stable name of its own,
/// so other definitions can reference it without repeating the cast).
#[derive(Clone, Debug)]
pub struct LlvmAlias {
  /// The alias's own name.
  pub name: GlobalName,
  /// Its declared type.
  pub ty: LlvmType,
  /// The value it aliases.
  pub target: LlvmValue,
}

/// The module accumulator: collects functions, constants and aliases
/// as lowering emits them, and mints fresh local/global names on
/// request.
#[derive(Default, Debug)]
pub struct Program {
  /// Emitted function definitions.
  pub functions: Vec<LlvmFunction>,
  /// Emitted private constants.
  pub constants: Vec<LlvmConstant>,
  /// Emitted aliases.
  pub aliases: Vec<LlvmAlias>,
  next_local: u32,
  next_global: u32,
}

impl Program {
  /// An empty module accumulator.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Mint a fresh local register name, unique within the function
  /// currently being built (callers are responsible for starting a new
  /// counter scope per function by discarding and reconstructing, or by
  /// tracking a base offset; this accumulator hands out a
  /// process-wide-unique id, which is always a safe over-approximation
  /// of per-function uniqueness).
  pub fn fresh_name(&mut self) -> LocalId {
    let id = LocalId(self.next_local);
    self.next_local += 1;
    id
  }

  /// Mint a fresh private global name with the given prefix (used for
  /// hoisted constants and closure-layout aliases that have no
  /// source-level name to reuse).
  pub fn fresh_global(&mut self, prefix: &str) -> GlobalName {
    let id = self.next_global;
    self.next_global += 1;
    GlobalName(format!("{prefix}.{id}"))
  }

  /// Add a function definition to the module.
  pub fn add_function(&mut self, f: LlvmFunction) { self.functions.push(f); }

  /// Add a private constant to the module.
  pub fn add_constant(&mut self, c: LlvmConstant) { self.constants.push(c); }

  /// Add an alias to the module.
  pub fn add_alias(&mut self, a: LlvmAlias) { self.aliases.push(a); }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fresh_names_are_distinct_and_stable() {
    let mut p = Program::new();
    let a = p.fresh_name();
    let b = p.fresh_name();
    assert_ne!(a, b);
    let g1 = p.fresh_global("hoist");
    let g2 = p.fresh_global("hoist");
    assert_ne!(g1, g2);
  }

  #[test]
  fn struct_type_displays_fields_in_order() {
    let t = LlvmType::Struct(vec![LlvmType::I32, LlvmType::object_ptr()]);
    assert_eq!(t.to_string(), "{i32, i8*}");
  }
}
