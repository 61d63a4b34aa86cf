/*!
  Decoding of the marshal envelope.

  Every value starts with a tag byte. From marshal version 3 on, the high bit of the tag
  (`FLAG_REF`) asks the decoder to remember the value: its slot in the reference arena is
  reserved when the tag is read and filled once the contents are complete, so a `'r'` that
  names a slot still under construction is rejected as corrupt. Older versions share strings
  through the intern table instead: every `'t'` string is appended to it, and `'R'` indexes it.

  Back-references are resolved by cloning, so the produced tree owns all of its values.
*/

use std::convert::TryFrom;

use num_bigint::BigInt;
use num_traits::Zero;
use string_cache::DefaultAtom;

use super::{Reader, RawUnit, Tag, Value, FLAG_REF};
use crate::error::{Corruption, Error, Limit, Result};
use crate::registry::{Dialect, StringFlavor, UnitField};

pub const DEFAULT_MAX_DEPTH: usize = 1000;

/// A container whose members are still being read.
enum Pending {
  Sequence { tag: Tag, slot: Option<usize>, remaining: usize, items: Vec<Value> },
  /// `key` holds a key whose value has not been read yet.
  Dict { slot: Option<usize>, key: Option<Value>, pairs: Vec<(Value, Value)> },
  Code { start: usize, slot: Option<usize>, fields: Vec<(UnitField, Value)> },
}

enum Opened {
  Value(Value),
  Container(Pending),
}

impl From<Value> for Opened {
  fn from(value: Value) -> Self {
    Opened::Value(value)
  }
}

pub struct ValueDecoder<'a> {
  reader: Reader<'a>,
  dialect: &'a Dialect,
  release: DefaultAtom,
  max_depth: usize,
  /// Reference arena. `None` marks a reserved slot whose value is still being decoded.
  refs: Vec<Option<Value>>,
  /// Legacy intern table.
  interned: Vec<Value>,
}

impl<'a> ValueDecoder<'a> {
  pub fn new(bytes: &'a [u8], dialect: &'a Dialect, release: DefaultAtom) -> Self {
    Self::starting_at(bytes, 0, dialect, release)
  }

  pub fn starting_at(bytes: &'a [u8], offset: usize, dialect: &'a Dialect, release: DefaultAtom) -> Self {
    ValueDecoder {
      reader: Reader::at(bytes, offset),
      dialect,
      release,
      max_depth: DEFAULT_MAX_DEPTH,
      refs: Vec::new(),
      interned: Vec::new()
    }
  }

  pub fn with_max_depth(mut self, max_depth: usize) -> Self {
    self.max_depth = max_depth;
    self
  }

  pub fn offset(&self) -> usize {
    self.reader.offset()
  }

  fn corrupt(&self, reason: Corruption) -> Error {
    Error::corrupt(self.reader.offset(), &self.release, reason)
  }

  // region Primitive reads

  fn read_u8(&mut self) -> Result<u8> {
    self.reader.read_u8().map_err(|reason| self.corrupt(reason))
  }

  fn read_u16(&mut self) -> Result<u16> {
    self.reader.read_u16().map_err(|reason| self.corrupt(reason))
  }

  fn read_i32(&mut self) -> Result<i32> {
    self.reader.read_i32().map_err(|reason| self.corrupt(reason))
  }

  fn read_i64(&mut self) -> Result<i64> {
    self.reader.read_i64().map_err(|reason| self.corrupt(reason))
  }

  fn read_f64(&mut self) -> Result<f64> {
    self.reader.read_f64().map_err(|reason| self.corrupt(reason))
  }

  fn read_length(&mut self) -> Result<usize> {
    self.reader.read_length().map_err(|reason| self.corrupt(reason))
  }

  fn take(&mut self, len: usize) -> Result<&'a [u8]> {
    self.reader.take(len).map_err(|reason| self.corrupt(reason))
  }

  /// A float in its textual form: a one byte length, then the digits.
  fn read_float_text(&mut self) -> Result<f64> {
    let len = self.read_u8()? as usize;
    let bytes = self.take(len)?;
    let text = String::from_utf8_lossy(bytes);
    let parsed = match text.trim().to_ascii_lowercase().as_str() {
      "inf" | "+inf" => Ok(std::f64::INFINITY),
      "-inf" => Ok(std::f64::NEG_INFINITY),
      "nan" | "+nan" | "-nan" => Ok(std::f64::NAN),
      other => other.parse::<f64>()
    };
    parsed.map_err(|_| self.corrupt(Corruption::FloatLiteral(text.into_owned())))
  }

  fn read_long(&mut self) -> Result<BigInt> {
    let count = self.read_i32()?;
    let bits = self.dialect.digit_bits;
    let size = (count as i64).abs() as usize;

    let mut digits = Vec::with_capacity(size.min(self.reader.remaining() / 2));
    for _ in 0..size {
      let digit = self.read_u16()?;
      if (digit as u32) >= (1u32 << bits) {
        return Err(self.corrupt(Corruption::LongDigit(digit)));
      }
      digits.push(digit);
    }

    let magnitude = digits
      .iter()
      .rev()
      .fold(BigInt::zero(), |acc, digit| (acc << bits as usize) + BigInt::from(*digit));
    match count < 0 {
      true => Ok(-magnitude),
      false => Ok(magnitude)
    }
  }

  fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
  }

  fn ascii(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| *byte as char).collect()
  }

  // endregion

  fn remember(&mut self, slot: Option<usize>, value: &Value) {
    if let Some(slot) = slot {
      self.refs[slot] = Some(value.clone());
    }
  }

  fn is_null_next(&self) -> bool {
    let mask = match self.dialect.uses_ref_flag() {
      true => !FLAG_REF,
      false => 0xFF
    };
    self.reader.peek().map(|byte| byte & mask) == Some(u8::from(Tag::Null))
  }

  /**
    Decodes the next value. Containers under construction live on an explicit stack instead of
    the call stack, so the depth limit bounds memory use and nothing else.
  */
  pub fn decode(&mut self) -> Result<Value> {
    let mut stack: Vec<Pending> = Vec::new();
    loop {
      let mut done = match self.open(stack.len())? {
        Opened::Value(value) => Some(value),
        Opened::Container(pending) => {
          stack.push(pending);
          None
        }
      };

      // Pass finished values up until some container wants another member.
      loop {
        if let Some(value) = done.take() {
          match stack.last_mut() {
            Some(parent) => self.accept(parent, value),
            None => return Ok(value)
          }
        }
        let complete = match stack.last_mut() {
          Some(top) => self.is_complete(top)?,
          None => false
        };
        if !complete {
          break;
        }
        if let Some(top) = stack.pop() {
          done = Some(self.close(top));
        }
      }
    }
  }

  /// Reads a tag. Scalars are read whole; containers are returned open, with no members yet.
  fn open(&mut self, depth: usize) -> Result<Opened> {
    let start = self.reader.offset();
    let byte = self.read_u8()?;
    let (flagged, code) = match self.dialect.uses_ref_flag() {
      true => (byte & FLAG_REF != 0, byte & !FLAG_REF),
      false => (false, byte)
    };

    let tag = match Tag::try_from(code) {
      Ok(tag) if tag.supported_by(self.dialect.marshal_version) => tag,
      _ => {
        return Err(Error::UnsupportedValueEncoding {
          tag: byte,
          offset: start,
          release: self.release.clone()
        })
      }
    };

    if depth >= self.max_depth {
      return Err(Error::LimitExceeded {
        limit: Limit::Depth(self.max_depth),
        offset: start,
        release: self.release.clone()
      });
    }

    let slot = match flagged {
      true => {
        self.refs.push(None);
        Some(self.refs.len() - 1)
      }
      false => None
    };

    let opened: Opened = match tag {

      Tag::Null => return Err(Error::corrupt(start, &self.release, Corruption::NullObject)),
      Tag::None => Value::None.into(),
      Tag::True => Value::Bool(true).into(),
      Tag::False => Value::Bool(false).into(),
      Tag::StopIteration => Value::StopIteration.into(),
      Tag::Ellipsis => Value::Ellipsis.into(),

      Tag::Int => Value::Int(self.read_i32()? as i64).into(),
      Tag::Int64 => Value::Int(self.read_i64()?).into(),
      Tag::Long => Value::Long(self.read_long()?).into(),
      Tag::Float => Value::Float(self.read_float_text()?).into(),
      Tag::BinaryFloat => Value::Float(self.read_f64()?).into(),
      Tag::Complex => {
        let real = self.read_float_text()?;
        Value::Complex(real, self.read_float_text()?).into()
      }
      Tag::BinaryComplex => {
        let real = self.read_f64()?;
        Value::Complex(real, self.read_f64()?).into()
      }

      Tag::Bytes => {
        let len = self.read_length()?;
        Value::Bytes(self.take(len)?.to_vec()).into()
      }
      Tag::Unicode => {
        let len = self.read_length()?;
        Value::Str(Self::text(self.take(len)?)).into()
      }
      Tag::Interned => {
        let len = self.read_length()?;
        let bytes = self.take(len)?;
        let value = match self.dialect.strings {
          StringFlavor::Bytes => Value::Bytes(bytes.to_vec()),
          StringFlavor::Text => Value::Str(Self::text(bytes))
        };
        if !self.dialect.uses_ref_flag() {
          self.interned.push(value.clone());
        }
        value.into()
      }
      Tag::Ascii | Tag::AsciiInterned => {
        let len = self.read_length()?;
        Value::Str(Self::ascii(self.take(len)?)).into()
      }
      Tag::ShortAscii | Tag::ShortAsciiInterned => {
        let len = self.read_u8()? as usize;
        Value::Str(Self::ascii(self.take(len)?)).into()
      }

      Tag::StringReference => {
        let index = self.read_i32()?;
        let known = self.interned.len();
        match usize::try_from(index).ok().and_then(|i| self.interned.get(i)) {
          Some(value) => value.clone().into(),
          None => return Err(self.corrupt(Corruption::DanglingReference { index, known }))
        }
      }
      Tag::Reference => {
        let index = self.read_i32()?;
        let known = self.refs.iter().filter(|slot| slot.is_some()).count();
        match usize::try_from(index).ok().and_then(|i| self.refs.get(i)) {
          Some(Some(value)) => value.clone().into(),
          _ => return Err(self.corrupt(Corruption::DanglingReference { index, known }))
        }
      }

      Tag::Tuple | Tag::List | Tag::Set | Tag::FrozenSet => {
        let count = self.read_length()?;
        self.sequence(tag, slot, count)
      }
      Tag::SmallTuple => {
        let count = self.read_u8()? as usize;
        self.sequence(tag, slot, count)
      }
      Tag::Dict => Opened::Container(Pending::Dict { slot, key: None, pairs: Vec::new() }),
      Tag::Code => Opened::Container(Pending::Code {
        start,
        slot,
        fields: Vec::with_capacity(self.dialect.layout.len())
      }),

    };

    if let Opened::Value(value) = &opened {
      self.remember(slot, value);
    }
    Ok(opened)
  }

  fn sequence(&self, tag: Tag, slot: Option<usize>, count: usize) -> Opened {
    Opened::Container(Pending::Sequence {
      tag,
      slot,
      remaining: count,
      items: Vec::with_capacity(count.min(self.reader.remaining()))
    })
  }

  /// Whether `pending` needs no further members. Reads a dict's terminator and a code object's
  /// integer fields on the way.
  fn is_complete(&mut self, pending: &mut Pending) -> Result<bool> {
    match pending {
      Pending::Sequence { remaining, .. } => Ok(*remaining == 0),
      Pending::Dict { key: Some(_), .. } => Ok(false),
      Pending::Dict { key: None, .. } => match self.is_null_next() {
        true => {
          self.read_u8()?;
          Ok(true)
        }
        false => Ok(false)
      },
      Pending::Code { fields, .. } => {
        let dialect = self.dialect;
        while let Some(field) = dialect.layout.get(fields.len()) {
          match field.is_integer() {
            true => {
              let value = self.read_i32()? as i64;
              fields.push((*field, Value::Int(value)));
            }
            false => return Ok(false)
          }
        }
        Ok(true)
      }
    }
  }

  fn accept(&self, pending: &mut Pending, value: Value) {
    match pending {
      Pending::Sequence { remaining, items, .. } => {
        items.push(value);
        *remaining -= 1;
      }
      Pending::Dict { key, pairs, .. } => match key.take() {
        Some(key) => pairs.push((key, value)),
        None => *key = Some(value)
      },
      Pending::Code { fields, .. } => {
        if let Some(field) = self.dialect.layout.get(fields.len()) {
          fields.push((*field, value));
        }
      }
    }
  }

  fn close(&mut self, pending: Pending) -> Value {
    let (slot, value) = match pending {
      Pending::Sequence { tag, slot, items, .. } => {
        let value = match tag {
          Tag::List => Value::List(items),
          Tag::Set => Value::Set(items),
          Tag::FrozenSet => Value::FrozenSet(items),
          _ => Value::Tuple(items)
        };
        (slot, value)
      }
      Pending::Dict { slot, pairs, .. } => (slot, Value::Dict(pairs)),
      Pending::Code { start, slot, fields } => {
        (slot, Value::Code(Box::new(RawUnit { offset: start, fields })))
      }
    };
    self.remember(slot, &value);
    value
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fixtures::marshal;
  use crate::registry::VersionRegistry;
  use num_traits::One;

  fn dialect(name: &str) -> std::sync::Arc<Dialect> {
    VersionRegistry::builtin().unwrap().dialect(name).unwrap()
  }

  fn decode(bytes: &[u8], name: &str) -> Result<Value> {
    let dialect = dialect(name);
    let mut decoder = ValueDecoder::new(bytes, &dialect, DefaultAtom::from(name));
    decoder.decode()
  }

  fn sample() -> Value {
    Value::Tuple(vec![
      Value::None,
      Value::Bool(true),
      Value::Int(-5),
      Value::Int(1 << 40),
      Value::Float(2.5),
      Value::Complex(1.0, -1.0),
      Value::Bytes(b"\x00\x01".to_vec()),
      Value::Str("caf\u{e9}".to_string()),
      Value::Str("plain".to_string()),
      Value::List(vec![Value::Ellipsis, Value::StopIteration]),
      Value::Dict(vec![(Value::Str("k".to_string()), Value::Int(1))]),
      Value::FrozenSet(vec![Value::Int(3)]),
      Value::Set(vec![]),
      Value::Long(BigInt::from(-7)),
    ])
  }

  #[test]
  fn written_values_decode_unchanged(){
    let value = sample();
    assert_eq!(decode(&marshal(&value, 4), "py3.8").unwrap(), value);
    assert_eq!(decode(&marshal(&value, 2), "py3.2").unwrap(), value);
  }

  #[test]
  fn decoding_is_repeatable(){
    let bytes = marshal(&sample(), 4);
    let first = decode(&bytes, "py3.8").unwrap();
    let second = decode(&bytes, "py3.8").unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn back_references_are_copied(){
    // ("hi", <ref 0>) with the first string flagged for reference.
    let bytes = [b')', 2, b'z' | FLAG_REF, 2, b'h', b'i', b'r', 0, 0, 0, 0];
    let hi = Value::Str("hi".to_string());
    assert_eq!(decode(&bytes, "py3.8").unwrap(), Value::Tuple(vec![hi.clone(), hi]));
  }

  #[test]
  fn reference_to_unfinished_value_is_corrupt(){
    // A flagged tuple whose only member refers to the tuple itself.
    let bytes = [b'(' | FLAG_REF, 1, 0, 0, 0, b'r', 0, 0, 0, 0];
    match decode(&bytes, "py3.8") {
      Err(Error::TruncatedOrCorrupt { reason: Corruption::DanglingReference { index: 0, .. }, .. }) => {}
      other => panic!("expected a dangling reference, got {:?}", other)
    }

    let bytes = [b'r', 3, 0, 0, 0];
    assert!(decode(&bytes, "py3.8").unwrap_err().is_truncated_or_corrupt());
  }

  #[test]
  fn legacy_intern_table(){
    let bytes = [b'(', 2, 0, 0, 0, b't', 2, 0, 0, 0, b'a', b'b', b'R', 0, 0, 0, 0];
    let ab = Value::Bytes(b"ab".to_vec());
    assert_eq!(decode(&bytes, "py2.7").unwrap(), Value::Tuple(vec![ab.clone(), ab]));

    // The same stream under a text dialect interns text.
    let ab = Value::Str("ab".to_string());
    assert_eq!(decode(&bytes, "py3.2").unwrap(), Value::Tuple(vec![ab.clone(), ab]));

    let bytes = [b'R', 0, 0, 0, 0];
    assert!(decode(&bytes, "py2.7").unwrap_err().is_truncated_or_corrupt());
  }

  #[test]
  fn tags_outside_the_dialect_are_unsupported(){
    let bytes = [b'R', 0, 0, 0, 0];
    match decode(&bytes, "py3.8") {
      Err(Error::UnsupportedValueEncoding { tag, offset, release }) => {
        assert_eq!(tag, b'R');
        assert_eq!(offset, 0);
        assert_eq!(&*release, "py3.8");
      }
      other => panic!("expected UnsupportedValueEncoding, got {:?}", other)
    }

    assert!(matches!(decode(&[b'?'], "py3.8"), Err(Error::UnsupportedValueEncoding { .. })));
    // Flagged tags do not exist before marshal version 3.
    assert!(matches!(decode(&[b'N' | FLAG_REF], "py2.7"), Err(Error::UnsupportedValueEncoding { .. })));
    assert_eq!(decode(&[b'N' | FLAG_REF], "py3.8").unwrap(), Value::None);
  }

  #[test]
  fn every_prefix_is_truncated(){
    let bytes = marshal(&sample(), 4);
    for len in 0..bytes.len() {
      let error = decode(&bytes[..len], "py3.8").unwrap_err();
      assert!(error.is_truncated_or_corrupt(), "prefix of {} bytes gave {:?}", len, error);
    }
  }

  #[test]
  fn big_longs(){
    // 2**100 is seven 15 bit digits, the last one 2**10.
    let mut bytes = vec![b'l', 7, 0, 0, 0];
    for _ in 0..6 {
      bytes.extend_from_slice(&[0, 0]);
    }
    bytes.extend_from_slice(&1024u16.to_le_bytes());
    let expected = BigInt::one() << 100usize;
    assert_eq!(decode(&bytes, "py3.8").unwrap(), Value::Long(expected.clone()));

    bytes[1] = (-7i32).to_le_bytes()[0];
    bytes[2..5].copy_from_slice(&(-7i32).to_le_bytes()[1..]);
    assert_eq!(decode(&bytes, "py3.8").unwrap(), Value::Long(-expected));

    let bytes = [b'l', 1, 0, 0, 0, 0x00, 0x80];
    match decode(&bytes, "py3.8") {
      Err(Error::TruncatedOrCorrupt { reason: Corruption::LongDigit(0x8000), .. }) => {}
      other => panic!("expected a bad digit, got {:?}", other)
    }
  }

  #[test]
  fn text_floats(){
    let bytes = [b'f', 3, b'1', b'.', b'5'];
    assert_eq!(decode(&bytes, "py2.7").unwrap(), Value::Float(1.5));
    let bytes = [b'f', 3, b'x', b'y', b'z'];
    assert!(decode(&bytes, "py2.7").unwrap_err().is_truncated_or_corrupt());
  }

  #[test]
  fn null_outside_dict_is_corrupt(){
    assert!(decode(&[b'0'], "py3.8").unwrap_err().is_truncated_or_corrupt());
    assert!(decode(&[b'(', 1, 0, 0, 0, b'0'], "py3.8").unwrap_err().is_truncated_or_corrupt());
    assert_eq!(decode(&[b'{', b'0'], "py3.8").unwrap(), Value::Dict(vec![]));
  }

  fn nested_lists(levels: usize) -> Value {
    let mut value = Value::None;
    for _ in 0..levels {
      value = Value::List(vec![value]);
    }
    value
  }

  fn depth_of(mut value: &Value) -> usize {
    let mut depth = 0;
    while let Value::List(items) = value {
      depth += 1;
      value = &items[0];
    }
    depth
  }

  #[test]
  fn nesting_is_limited(){
    let value = nested_lists(200);
    let bytes = marshal(&value, 4);
    assert_eq!(decode(&bytes, "py3.8").unwrap(), value);

    let dialect = dialect("py3.8");
    let mut decoder = ValueDecoder::new(&bytes, &dialect, DefaultAtom::from("3.8")).with_max_depth(50);
    match decoder.decode() {
      Err(Error::LimitExceeded { limit: Limit::Depth(50), offset, .. }) => assert_eq!(offset, 50 * 5),
      other => panic!("expected the depth limit, got {:?}", other)
    }
  }

  #[test]
  fn default_depth_limit_is_reachable(){
    // The innermost value of the deepest accepted nesting sits DEFAULT_MAX_DEPTH - 1 levels down.
    let bytes = marshal(&nested_lists(DEFAULT_MAX_DEPTH - 1), 4);
    let value = decode(&bytes, "py3.8").unwrap();
    assert_eq!(depth_of(&value), DEFAULT_MAX_DEPTH - 1);

    let bytes = marshal(&nested_lists(DEFAULT_MAX_DEPTH), 4);
    match decode(&bytes, "py3.8") {
      Err(Error::LimitExceeded { limit: Limit::Depth(DEFAULT_MAX_DEPTH), offset, .. }) => {
        assert_eq!(offset, DEFAULT_MAX_DEPTH * 5)
      }
      other => panic!("expected the depth limit, got {:?}", other.map(|value| depth_of(&value)))
    }
  }

  #[test]
  fn dict_pairs_end_at_their_terminator(){
    // {"a": [1], "b": {}} followed by a trailing None that must stay unread.
    let bytes = [
      b'{', b'z', 1, b'a', b'[', 1, 0, 0, 0, b'i', 1, 0, 0, 0,
      b'z', 1, b'b', b'{', b'0', b'0', b'N'
    ];
    let dialect = dialect("py3.8");
    let mut decoder = ValueDecoder::new(&bytes, &dialect, DefaultAtom::from("3.8"));
    assert_eq!(
      decoder.decode().unwrap(),
      Value::Dict(vec![
        (Value::Str("a".to_string()), Value::List(vec![Value::Int(1)])),
        (Value::Str("b".to_string()), Value::Dict(vec![])),
      ])
    );
    assert_eq!(decoder.offset(), bytes.len() - 1);

    // A key with no value is corrupt.
    let bytes = [b'{', b'z', 1, b'a', b'0'];
    assert!(decode(&bytes, "py3.8").unwrap_err().is_truncated_or_corrupt());
  }
}
