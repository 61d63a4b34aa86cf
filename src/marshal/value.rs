use std::fmt::{Display, Formatter, Write};

use num_bigint::BigInt;

use crate::registry::{StringFlavor, UnitField};

/// A decoded marshal value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
  None,
  Bool(bool),
  Int(i64),
  Long(BigInt),
  Float(f64),
  Complex(f64, f64),
  Bytes(Vec<u8>),
  Str(String),
  Tuple(Vec<Value>),
  List(Vec<Value>),
  /// Key/value pairs in stream order.
  Dict(Vec<(Value, Value)>),
  Set(Vec<Value>),
  FrozenSet(Vec<Value>),
  /// A code object whose fields have been read but not yet assembled.
  Code(Box<RawUnit>),
  StopIteration,
  Ellipsis,
}

/**
  The fields of a code object in the order the dialect layout lists them. Integer fields are
  held as `Value::Int`. `offset` is the position of the `'c'` tag in the input buffer.
*/
#[derive(Clone, Debug, PartialEq)]
pub struct RawUnit {
  pub offset: usize,
  pub fields: Vec<(UnitField, Value)>,
}

impl RawUnit {
  pub fn field(&self, field: UnitField) -> Option<&Value> {
    self.fields
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, value)| value)
  }

  /// The unit's name, when it has a textual one.
  pub fn name(&self) -> Option<&str> {
    self.field(UnitField::Name).and_then(Value::as_text)
  }
}

impl Value {
  /// Text content of `Str`, or of `Bytes` that happen to be UTF-8.
  pub fn as_text(&self) -> Option<&str> {
    match self {
      Value::Str(text) => Some(text),
      Value::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
      _ => None
    }
  }

  pub fn as_bytes(&self) -> Option<&[u8]> {
    match self {
      Value::Bytes(bytes) => Some(bytes),
      Value::Str(text) => Some(text.as_bytes()),
      _ => None
    }
  }

  /// Members of a tuple or list.
  pub fn as_sequence(&self) -> Option<&[Value]> {
    match self {
      Value::Tuple(items) | Value::List(items) => Some(items),
      _ => None
    }
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(value) => Some(*value),
      _ => None
    }
  }
}

fn write_float(f: &mut Formatter<'_>, value: f64) -> std::fmt::Result {
  if value.is_nan() {
    write!(f, "nan")
  } else if value.is_infinite() {
    write!(f, "{}", if value < 0.0 { "-inf" } else { "inf" })
  } else if value.fract() == 0.0 && value.abs() < 1e16 {
    write!(f, "{:.1}", value)
  } else {
    write!(f, "{}", value)
  }
}

fn write_quoted<I: Iterator<Item = char>>(f: &mut Formatter<'_>, chars: I, printable: fn(char) -> bool)
  -> std::fmt::Result
{
  f.write_char('\'')?;
  for c in chars {
    match c {
      '\\' => f.write_str("\\\\")?,
      '\'' => f.write_str("\\'")?,
      '\n' => f.write_str("\\n")?,
      '\r' => f.write_str("\\r")?,
      '\t' => f.write_str("\\t")?,
      c if printable(c) => f.write_char(c)?,
      c if (c as u32) < 0x100 => write!(f, "\\x{:02x}", c as u32)?,
      c if (c as u32) < 0x10000 => write!(f, "\\u{:04x}", c as u32)?,
      c => write!(f, "\\U{:08x}", c as u32)?,
    }
  }
  f.write_char('\'')
}

fn write_items(f: &mut Formatter<'_>, items: &[Value], strings: StringFlavor) -> std::fmt::Result {
  for (index, item) in items.iter().enumerate() {
    if index > 0 {
      f.write_str(", ")?;
    }
    write!(f, "{}", item.repr(strings))?;
  }
  Ok(())
}

/// Integral parts of a complex number print without a fraction, as in `(1+2j)`.
fn write_complex_part(f: &mut Formatter<'_>, value: f64) -> std::fmt::Result {
  match value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
    true => write!(f, "{}", value),
    false => write_float(f, value)
  }
}

/**
  A value formatted the way the interpreter's `repr` would. The string flavor picks the
  conventions of the release: under `StringFlavor::Bytes` byte strings have no prefix and text
  strings are written `u'...'`.
*/
pub struct Repr<'v> {
  value: &'v Value,
  strings: StringFlavor,
}

impl Value {
  pub fn repr(&self, strings: StringFlavor) -> Repr<'_> {
    Repr { value: self, strings }
  }
}

/// Formats with the conventions of text-flavored releases.
impl Display for Value {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    self.repr(StringFlavor::Text).fmt(f)
  }
}

impl<'v> Display for Repr<'v> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let strings = self.strings;
    match self.value {
      Value::None => write!(f, "None"),
      Value::Bool(true) => write!(f, "True"),
      Value::Bool(false) => write!(f, "False"),
      Value::Int(value) => write!(f, "{}", value),
      Value::Long(value) => write!(f, "{}", value),
      Value::Float(value) => write_float(f, *value),
      Value::Complex(real, imag) => {
        match *real == 0.0 && real.is_sign_positive() {
          true => {
            write_complex_part(f, *imag)?;
            write!(f, "j")
          }
          false => {
            write!(f, "(")?;
            write_complex_part(f, *real)?;
            if imag.is_sign_positive() || imag.is_nan() {
              write!(f, "+")?;
            }
            write_complex_part(f, *imag)?;
            write!(f, "j)")
          }
        }
      }
      Value::Bytes(bytes) => {
        if let StringFlavor::Text = strings {
          write!(f, "b")?;
        }
        write_quoted(f, bytes.iter().map(|b| *b as char), |c| c.is_ascii_graphic() || c == ' ')
      }
      Value::Str(text) => match strings {
        StringFlavor::Text => write_quoted(f, text.chars(), |c| !c.is_control()),
        StringFlavor::Bytes => {
          write!(f, "u")?;
          write_quoted(f, text.chars(), |c| c.is_ascii_graphic() || c == ' ')
        }
      },
      Value::Tuple(items) => {
        write!(f, "(")?;
        write_items(f, items, strings)?;
        match items.len() {
          1 => write!(f, ",)"),
          _ => write!(f, ")")
        }
      }
      Value::List(items) => {
        write!(f, "[")?;
        write_items(f, items, strings)?;
        write!(f, "]")
      }
      Value::Dict(pairs) => {
        write!(f, "{{")?;
        for (index, (key, value)) in pairs.iter().enumerate() {
          if index > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{}: {}", key.repr(strings), value.repr(strings))?;
        }
        write!(f, "}}")
      }
      Value::Set(items) if items.is_empty() => write!(f, "set()"),
      Value::Set(items) => {
        write!(f, "{{")?;
        write_items(f, items, strings)?;
        write!(f, "}}")
      }
      Value::FrozenSet(items) if items.is_empty() => write!(f, "frozenset()"),
      Value::FrozenSet(items) => {
        write!(f, "frozenset({{")?;
        write_items(f, items, strings)?;
        write!(f, "}})")
      }
      Value::Code(unit) => write!(f, "<code object {}>", unit.name().unwrap_or("?")),
      Value::StopIteration => write!(f, "StopIteration"),
      Value::Ellipsis => write!(f, "Ellipsis"),
    }
  }
}
