/*!
  Assembled code objects. A `CodeObject` is built from the `RawUnit` placeholder the marshal
  decoder leaves behind: named fields are extracted, nested units in the constant pool are
  assembled before their parents, the instruction stream is decoded and every operand is
  resolved against the pool it indexes.
*/

mod assemble;
mod lines;

use std::fmt::{Display, Formatter};

pub use assemble::Assembler;
pub use lines::LineStart;
pub use crate::bytecode::Pool;
use crate::bytecode::Instruction;
use crate::marshal::Value;
use crate::registry::StringFlavor;

/// Kinds in a `localsplus` layout.
pub const KIND_LOCAL: u8 = 0x20;
pub const KIND_CELL: u8 = 0x40;
pub const KIND_FREE: u8 = 0x80;

const FLAG_NAMES: [(u32, &str); 10] = [
  (0x0001, "OPTIMIZED"),
  (0x0002, "NEWLOCALS"),
  (0x0004, "VARARGS"),
  (0x0008, "VARKEYWORDS"),
  (0x0010, "NESTED"),
  (0x0020, "GENERATOR"),
  (0x0040, "NOFREE"),
  (0x0080, "COROUTINE"),
  (0x0100, "ITERABLE_COROUTINE"),
  (0x0200, "ASYNC_GENERATOR"),
];

/// The flag word of a code object.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct CodeFlags(pub u32);

impl CodeFlags {
  pub fn contains(&self, flag: u32) -> bool {
    self.0 & flag == flag
  }
}

/// Named flags joined with `|`, followed by any remaining bits in hex.
impl Display for CodeFlags {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let mut rest = self.0;
    let mut parts: Vec<String> = Vec::new();
    for &(bit, name) in FLAG_NAMES.iter() {
      if rest & bit != 0 {
        parts.push(name.to_string());
        rest &= !bit;
      }
    }
    if rest != 0 || parts.is_empty() {
      parts.push(format!("{:#x}", rest));
    }
    write!(f, "{}", parts.join(" | "))
  }
}

/// An entry of a constant pool.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
  Value(Value),
  Code(Box<CodeObject>),
}

impl Display for Constant {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Constant::Value(value) => write!(f, "{}", value),
      Constant::Code(unit) => write!(f, "<code object {}>", unit.name),
    }
  }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CodeObject {
  pub argcount: u32,
  pub posonlyargcount: u32,
  pub kwonlyargcount: u32,
  pub nlocals: u32,
  pub stacksize: u32,
  pub flags: CodeFlags,
  pub filename: String,
  pub name: String,
  /// Same as `name` for releases that do not record a qualified name.
  pub qualname: String,
  pub firstlineno: u32,
  pub consts: Vec<Constant>,
  pub names: Vec<String>,
  pub varnames: Vec<String>,
  pub freevars: Vec<String>,
  pub cellvars: Vec<String>,
  /// `(name, kind)` pairs of a `localsplus` layout; empty otherwise.
  pub localsplus: Vec<(String, u8)>,
  pub lines: Vec<LineStart>,
  pub code: Vec<u8>,
  pub exception_table: Vec<u8>,
  pub instructions: Vec<Instruction>,
  /// How the release writes string constants.
  pub strings: StringFlavor,
}

impl CodeObject {
  /// Code objects nested in the constant pool, in pool order.
  pub fn children(&self) -> impl Iterator<Item = &CodeObject> {
    self.consts.iter().filter_map(|constant| match constant {
      Constant::Code(unit) => Some(&**unit),
      Constant::Value(_) => None
    })
  }

  /// The source line of the instruction at `offset`.
  pub fn line_at(&self, offset: usize) -> Option<u32> {
    self.lines
        .iter()
        .take_while(|start| start.offset <= offset)
        .last()
        .map(|start| start.line)
  }
}
