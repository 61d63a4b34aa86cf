/*!
  Every failure the disassembler can report. None of them are retried: the input bytes are
  fixed, so decoding the same buffer again produces the same error. Errors raised after the
  release is known carry the release identifier along with the byte offset where decoding
  stopped.
*/

use std::fmt::{Display, Formatter};

use string_cache::DefaultAtom;
use thiserror::Error;

use crate::registry::UnitField;
use crate::bytecode::Pool;

pub type Result<T> = std::result::Result<T, Error>;

/// Release label used for failures that happen before the magic number is resolved.
pub const UNRESOLVED: &str = "unresolved";

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown magic number {magic:#010x}: no release in the dialect table uses it")]
  UnknownRelease { magic: u32 },

  #[error("[{release}] unsupported value encoding: tag {tag:#04x} at byte {offset}")]
  UnsupportedValueEncoding {
    tag: u8,
    offset: usize,
    release: DefaultAtom
  },

  #[error("[{release}] truncated or corrupt data at byte {offset}: {reason}")]
  TruncatedOrCorrupt {
    offset: usize,
    release: DefaultAtom,
    reason: Corruption
  },

  #[error("[{release}] unknown opcode {opcode:#04x} at offset {offset} of `{unit}`")]
  UnknownOpcode {
    opcode: u8,
    offset: usize,
    unit: String,
    release: DefaultAtom
  },

  #[error(
    "[{release}] operand {index} of the instruction at offset {offset} of `{unit}` \
     is outside the {pool} pool ({len} entries)"
  )]
  CorruptOperandIndex {
    pool: Pool,
    index: u32,
    len: usize,
    offset: usize,
    unit: String,
    release: DefaultAtom
  },

  #[error("[{release}] {limit} exceeded at byte {offset}")]
  LimitExceeded {
    limit: Limit,
    offset: usize,
    release: DefaultAtom
  },

  #[error("dialect table, line {line}: {message}")]
  Table { line: usize, message: String },

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// The reason attached to `Error::TruncatedOrCorrupt`.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Corruption {
  #[error("needed {wanted} more bytes but only {available} remain")]
  UnexpectedEof { wanted: usize, available: usize },

  #[error("negative length {0}")]
  NegativeLength(i32),

  #[error("back-reference {index} does not name an earlier value ({known} recorded)")]
  DanglingReference { index: i32, known: usize },

  #[error("NULL object outside of a dictionary")]
  NullObject,

  #[error("long digit {0} is out of range")]
  LongDigit(u16),

  #[error("`{0}` is not a float literal")]
  FloatLiteral(String),

  #[error("field `{field}` should be {expected}")]
  FieldType { field: UnitField, expected: &'static str },

  #[error("required field `{0}` is missing from the dialect layout")]
  MissingField(UnitField),

  #[error("field `{field}` has out of range value {value}")]
  FieldRange { field: UnitField, value: i64 },

  #[error("the module body is not a code object")]
  NotACodeObject,

  #[error("instruction at offset {0} runs past the end of the code")]
  TruncatedInstruction(usize),

  #[error("argument extension at offset {0} is not followed by an instruction")]
  DanglingExtension(usize),

  #[error("backward jump at offset {0} lands before the start of the code")]
  JumpBeforeStart(usize),

  #[error("line table ends in the middle of an entry")]
  LineTable,
}

/// The configurable limits of `DecodeOptions`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Limit {
  Depth(usize),
  InputLength(usize),
}

impl Display for Limit {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Limit::Depth(depth) => write!(f, "nesting limit of {} levels", depth),
      Limit::InputLength(len) => write!(f, "input limit of {} bytes", len),
    }
  }
}

impl Error {
  pub(crate) fn corrupt(offset: usize, release: &DefaultAtom, reason: Corruption) -> Error {
    Error::TruncatedOrCorrupt { offset, release: release.clone(), reason }
  }

  pub(crate) fn table<M: Into<String>>(line: usize, message: M) -> Error {
    Error::Table { line, message: message.into() }
  }

  /// True for the `TruncatedOrCorrupt` family, which is what a short read produces.
  pub fn is_truncated_or_corrupt(&self) -> bool {
    match self {
      Error::TruncatedOrCorrupt { .. } => true,
      _ => false
    }
  }
}
