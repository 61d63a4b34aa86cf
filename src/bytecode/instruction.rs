use std::fmt::{Display, Formatter};

use string_cache::DefaultAtom;
use strum_macros::{Display as StrumDisplay, IntoStaticStr};

use crate::marshal::Value;

/// The table an instruction operand indexes.
#[derive(StrumDisplay, IntoStaticStr, Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum Pool {
  #[strum(serialize = "constants")]
  Constants,
  #[strum(serialize = "names")]
  Names,
  #[strum(serialize = "locals")]
  Locals,
  #[strum(serialize = "free variables")]
  Free,
  #[strum(serialize = "comparison operators")]
  CompareOps,
  #[strum(serialize = "binary operators")]
  BinaryOps,
}

/// An operand as the instruction decoder sees it: classified, but not yet looked up.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum Operand {
  None,
  Immediate(u32),
  Index(Pool, u32),
  /// Absolute byte offset of the jump target.
  Jump(usize),
}

/// One decoded instruction before its operand is resolved.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct RawInstruction {
  /// Offset of the opcode byte. Argument extensions folded into this instruction come before it.
  pub offset: usize,
  /// Bytes from `offset` to the next instruction, inline caches included.
  pub size: usize,
  pub opcode: u8,
  pub opname: DefaultAtom,
  /// The argument after extension folding, if the opcode takes one.
  pub arg: Option<u32>,
  pub operand: Operand,
}

/// A resolved operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Argument {
  None,
  Immediate(u32),
  Const(Value),
  /// A code object constant. The unit itself lives in the owning constant pool.
  Code { index: usize, name: String },
  Name(String),
  Local(String),
  Free(String),
  Jump(usize),
  Compare(String),
  BinaryOp(String),
}

/// One instruction of an assembled unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
  pub offset: usize,
  pub size: usize,
  pub opname: DefaultAtom,
  pub arg: Option<u32>,
  pub argument: Argument,
}

impl Display for Argument {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Argument::None => Ok(()),
      Argument::Immediate(value) => write!(f, "{}", value),
      Argument::Const(value) => write!(f, "{}", value),
      Argument::Code { name, .. } => write!(f, "<code object {}>", name),
      | Argument::Name(name)
      | Argument::Local(name)
      | Argument::Free(name) => write!(f, "{}", name),
      Argument::Jump(target) => write!(f, "to {}", target),
      | Argument::Compare(symbol)
      | Argument::BinaryOp(symbol) => write!(f, "{}", symbol),
    }
  }
}

impl Display for Instruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:>6} {:<24}", self.offset, &*self.opname)?;
    match (&self.argument, self.arg) {
      (Argument::None, None) => Ok(()),
      (Argument::Immediate(_), Some(arg)) => write!(f, " {}", arg),
      (argument, Some(arg)) => write!(f, " {} ({})", arg, argument),
      (argument, None) => write!(f, " {}", argument),
    }
  }
}
