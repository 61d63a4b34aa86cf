use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, IntoStaticStr};

/// Set on a tag byte when the decoded value must be recorded for later back-references.
pub const FLAG_REF: u8 = 0x80;

/**
  The type tags of the marshal format, one per value encoding. The discriminant is the tag
  byte itself, so a byte converts with `Tag::try_from`.
*/
#[derive(
  StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq, PartialEq,    Debug,         Hash
)]
#[repr(u8)]
pub enum Tag {
  Null               = b'0',
  None               = b'N',
  False              = b'F',
  True               = b'T',
  StopIteration      = b'S',
  Ellipsis           = b'.',
  Int                = b'i',
  Int64              = b'I',
  Float              = b'f',
  BinaryFloat        = b'g',
  Complex            = b'x',
  BinaryComplex      = b'y',
  Long               = b'l',
  Bytes              = b's',
  Interned           = b't',
  Reference          = b'r',
  StringReference    = b'R',
  Tuple              = b'(',
  SmallTuple         = b')',
  List               = b'[',
  Dict               = b'{',
  Code               = b'c',
  Unicode            = b'u',
  Set                = b'<',
  FrozenSet          = b'>',
  Ascii              = b'a',
  AsciiInterned      = b'A',
  ShortAscii         = b'z',
  ShortAsciiInterned = b'Z',
}

impl Tag {
  /// The range of marshal versions that understand this tag.
  pub fn versions(&self) -> (u8, u8) {
    match self {
      Tag::StringReference => (1, 2),
      Tag::Reference => (3, u8::max_value()),
      | Tag::Ascii
      | Tag::AsciiInterned
      | Tag::ShortAscii
      | Tag::ShortAsciiInterned
      | Tag::SmallTuple => (4, u8::max_value()),
      | Tag::Set
      | Tag::FrozenSet
      | Tag::BinaryFloat
      | Tag::BinaryComplex => (2, u8::max_value()),
      _ => (0, u8::max_value())
    }
  }

  pub fn supported_by(&self, marshal_version: u8) -> bool {
    let (low, high) = self.versions();
    low <= marshal_version && marshal_version <= high
  }

  /// Tags whose payload enters the legacy intern table.
  pub fn is_interned(&self) -> bool {
    match self {
      Tag::Interned | Tag::AsciiInterned | Tag::ShortAsciiInterned => true,
      _ => false
    }
  }
}
