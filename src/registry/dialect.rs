/*!
  A `Dialect` is everything about a release family that the decoders need to know: which
  marshal tags exist, how back-references work, how a code object's fields are ordered, how
  instructions are encoded, and the opcode table itself. Dialects are plain data. The decoding
  algorithms are written once and consult the dialect where releases disagree.

  Keyword forms of the enums below are what the dialect table uses, so each one derives
  `EnumString` and `Display` with the same spelling.
*/

use std::collections::HashMap;

use bimap::BiMap;
use string_cache::DefaultAtom;
use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};

/// How an instruction's argument is interpreted.
#[derive(
  StrumDisplay, EnumString, IntoStaticStr,
  Clone,        Copy,       Eq, PartialEq, Debug, Hash
)]
pub enum OperandKind {
  /// A raw integer: a count, a flag set, a stack depth.
  #[strum(serialize = "arg")]
  Immediate,
  /// Index into `co_consts`.
  #[strum(serialize = "const")]
  Const,
  /// Index into `co_names`.
  #[strum(serialize = "name")]
  Name,
  /// Index into the local variable names.
  #[strum(serialize = "local")]
  Local,
  /// Index into the cell and free variable names.
  #[strum(serialize = "free")]
  Free,
  /// Delta forward from the end of the instruction.
  #[strum(serialize = "jrel")]
  JumpForward,
  /// Absolute target.
  #[strum(serialize = "jabs")]
  JumpAbsolute,
  /// Delta backward from the end of the instruction.
  #[strum(serialize = "jback")]
  JumpBackward,
  /// Index into the comparison operator symbols.
  #[strum(serialize = "cmp")]
  Compare,
  /// Index into the binary operator symbols.
  #[strum(serialize = "binop")]
  BinaryOp,
  /// Argument extension, folded into the next instruction.
  #[strum(serialize = "ext")]
  Extend,
}

/// Everything the instruction decoder needs to know about one opcode besides its name.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash, Default)]
pub struct OpcodeInfo {
  /// `None` for opcodes that take no argument.
  pub kind: Option<OperandKind>,
  /// Right shift applied to the argument before it is used as a pool index.
  pub shift: u8,
  /// Number of two byte inline cache entries that follow the instruction.
  pub cache: u8,
}

impl OpcodeInfo {
  pub fn has_argument(&self) -> bool {
    self.kind.is_some()
  }
}

/**
  The opcode table of one dialect. Names are unique within a table, so the byte <-> name
  relation is a bijection and is kept in a `BiMap`.
*/
#[derive(Clone, Debug)]
pub struct OpcodeTable {
  names: BiMap<u8, DefaultAtom>,
  info: HashMap<u8, OpcodeInfo>,
}

impl OpcodeTable {
  pub fn new() -> OpcodeTable {
    OpcodeTable {
      names: BiMap::new(),
      info: HashMap::new()
    }
  }

  /// Adds or replaces the entry for `opcode`. Fails with the name if another opcode already
  /// uses it.
  pub fn insert(&mut self, opcode: u8, name: DefaultAtom, info: OpcodeInfo)
    -> Result<(), DefaultAtom>
  {
    if let Some(&existing) = self.names.get_by_right(&name) {
      if existing != opcode {
        return Err(name);
      }
    }
    self.names.insert(opcode, name);
    self.info.insert(opcode, info);
    Ok(())
  }

  /// Removes the entry for `opcode`, returning whether there was one.
  pub fn remove(&mut self, opcode: u8) -> bool {
    self.info.remove(&opcode);
    self.names.remove_by_left(&opcode).is_some()
  }

  pub fn lookup(&self, opcode: u8) -> Option<(&DefaultAtom, OpcodeInfo)> {
    let name = self.names.get_by_left(&opcode)?;
    let info = self.info.get(&opcode).copied().unwrap_or_default();
    Some((name, info))
  }

  pub fn opcode(&self, name: &str) -> Option<u8> {
    self.names.get_by_right(&DefaultAtom::from(name)).copied()
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

impl Default for OpcodeTable {
  fn default() -> Self {
    OpcodeTable::new()
  }
}

/// Whether interned (`'t'`) strings are byte strings or text.
#[derive(StrumDisplay, EnumString, Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum StringFlavor {
  #[strum(serialize = "bytes")]
  Bytes,
  #[strum(serialize = "text")]
  Text,
}

impl Default for StringFlavor {
  fn default() -> Self {
    StringFlavor::Text
  }
}

/// The fields that sit between the magic number and the marshalled body.
#[derive(StrumDisplay, EnumString, Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum HeaderLayout {
  /// `[magic][mtime]`
  #[strum(serialize = "classic")]
  Classic,
  /// `[magic][mtime][source size]`
  #[strum(serialize = "sized")]
  Sized,
  /// `[magic][flags][mtime][source size]` or `[magic][flags][source hash]`
  #[strum(serialize = "flagged")]
  Flagged,
}

#[derive(StrumDisplay, EnumString, Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum Encoding {
  /// One opcode byte, then two little-endian argument bytes if the opcode takes an argument.
  #[strum(serialize = "variable")]
  Variable,
  /// Every instruction is an opcode byte and an argument byte.
  #[strum(serialize = "wordcode")]
  Wordcode,
}

#[derive(StrumDisplay, EnumString, Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum LineFormat {
  /// `(byte increment, line increment)` pairs, both unsigned.
  #[strum(serialize = "lnotab")]
  Lnotab,
  /// As `lnotab`, with a signed line increment.
  #[strum(serialize = "lnotab_signed")]
  LnotabSigned,
  /// `(byte delta, signed line delta)` pairs where -128 means "no line".
  #[strum(serialize = "linetable")]
  LineTable,
  /// The variable length location table.
  #[strum(serialize = "locations")]
  Locations,
}

#[derive(StrumDisplay, EnumString, Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum LocalsLayout {
  /// Locals index `co_varnames`; cell and free operands index `co_cellvars + co_freevars`.
  #[strum(serialize = "varnames")]
  VarNames,
  /// Locals and cell/free operands all index `co_localsplusnames`.
  #[strum(serialize = "localsplus")]
  LocalsPlus,
}

/// The fields a code object can carry, in the spelling the dialect table uses.
#[derive(
  StrumDisplay, EnumString, IntoStaticStr,
  Clone,        Copy,       Eq, PartialEq, Debug, Hash
)]
pub enum UnitField {
  #[strum(serialize = "argcount")]
  ArgCount,
  #[strum(serialize = "posonlyargcount")]
  PosOnlyArgCount,
  #[strum(serialize = "kwonlyargcount")]
  KwOnlyArgCount,
  #[strum(serialize = "nlocals")]
  NLocals,
  #[strum(serialize = "stacksize")]
  StackSize,
  #[strum(serialize = "flags")]
  Flags,
  #[strum(serialize = "code")]
  Code,
  #[strum(serialize = "consts")]
  Consts,
  #[strum(serialize = "names")]
  Names,
  #[strum(serialize = "varnames")]
  VarNames,
  #[strum(serialize = "freevars")]
  FreeVars,
  #[strum(serialize = "cellvars")]
  CellVars,
  #[strum(serialize = "localsplusnames")]
  LocalsPlusNames,
  #[strum(serialize = "localspluskinds")]
  LocalsPlusKinds,
  #[strum(serialize = "filename")]
  FileName,
  #[strum(serialize = "name")]
  Name,
  #[strum(serialize = "qualname")]
  QualName,
  #[strum(serialize = "firstlineno")]
  FirstLineNo,
  #[strum(serialize = "linetable", serialize = "lnotab")]
  LineTable,
  #[strum(serialize = "exceptiontable")]
  ExceptionTable,
}

impl UnitField {
  /// Integer fields are stored as bare 32 bit words rather than as tagged values.
  pub fn is_integer(&self) -> bool {
    match self {
      | UnitField::ArgCount
      | UnitField::PosOnlyArgCount
      | UnitField::KwOnlyArgCount
      | UnitField::NLocals
      | UnitField::StackSize
      | UnitField::Flags
      | UnitField::FirstLineNo => true,
      _ => false
    }
  }
}

/// Fields every layout must name.
pub const REQUIRED_FIELDS: [UnitField; 5] = [
  UnitField::Code,
  UnitField::Consts,
  UnitField::Names,
  UnitField::Name,
  UnitField::FirstLineNo,
];

/// Immutable description of a release family.
#[derive(Clone, Debug)]
pub struct Dialect {
  pub name: DefaultAtom,
  pub opcodes: OpcodeTable,
  /// 2 and below use the `'t'`/`'R'` intern table; 3 and up the flagged reference arena.
  pub marshal_version: u8,
  pub strings: StringFlavor,
  pub header: HeaderLayout,
  pub layout: Vec<UnitField>,
  pub encoding: Encoding,
  /// Multiplier from a jump argument to a byte distance.
  pub jump_unit: u32,
  pub lines: LineFormat,
  pub locals: LocalsLayout,
  pub compare_ops: Vec<String>,
  pub binary_ops: Vec<String>,
  /// Width in bits of one digit of a marshalled long.
  pub digit_bits: u32,
}

impl Dialect {
  pub fn uses_ref_flag(&self) -> bool {
    self.marshal_version >= 3
  }

  /// How far accumulated extension payloads are shifted before the next argument is OR-ed in.
  pub fn extension_shift(&self) -> u32 {
    match self.encoding {
      Encoding::Variable => 16,
      Encoding::Wordcode => 8
    }
  }
}
