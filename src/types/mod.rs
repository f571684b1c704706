//! The MIL data model: types, atoms, tails, code sequences and definitions.

pub mod ty;
pub mod atom;
pub mod tail;
pub mod defn;
pub mod sizeof;

pub use ty::{Ty, TyKind, Tycon, TyconData, TyconId, Kind, Scheme, AllocType, TLit, TVarId};
pub use atom::{Atom, Temp, TempId, Ctor};
pub use tail::{Tail, Code, PrimOp};
pub use defn::{Defn, DefId, Program};
