/*!
  Parser for the dialect table, the curated text file that maps magic numbers to releases and
  releases to dialects. The format is line oriented: each line is parsed on its own with `nom`
  combinators, and a small state machine tracks which block (`opcodes`, `dialect`) the line
  belongs to. Errors carry the 1-based line number.

  See `dialects.tbl` for the grammar.
*/

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use nom::{
  bytes::complete::{tag, take_while, take_while1},
  character::complete::{alpha1, char as one_char, digit1, space0, space1},
  combinator::{all_consuming, map, map_res, opt, rest},
  multi::many0,
  sequence::{delimited, pair, preceded, terminated, tuple},
  IResult
};
use string_cache::DefaultAtom;

use super::dialect::*;
use super::VersionRegistry;
use crate::error::{Error, Result};

type Parsed<'a, T> = IResult<&'a str, T>;

// region Line grammar

fn word(input: &str) -> Parsed<&str> {
  take_while1(|c: char| !c.is_whitespace())(input)
}

fn number<T: FromStr>(input: &str) -> Parsed<T> {
  map_res(digit1, |digits: &str| digits.parse::<T>())(input)
}

fn quoted(input: &str) -> Parsed<&str> {
  delimited(one_char('"'), take_while(|c: char| c != '"'), one_char('"'))(input)
}

/// `arg`, `const`, ..., optionally followed by a shift: `name>>1`.
fn operand(input: &str) -> Parsed<(OperandKind, u8)> {
  map(
    pair(
      map_res(alpha1, |text: &str| OperandKind::from_str(text)),
      opt(preceded(tag(">>"), number::<u8>))
    ),
    |(kind, shift)| (kind, shift.unwrap_or(0))
  )(input)
}

fn cache(input: &str) -> Parsed<u8> {
  preceded(tag("cache="), number::<u8>)(input)
}

/// `<byte> <NAME> [<kind>[>>n]] [cache=<n>]`
fn opcode_entry(input: &str) -> Parsed<(u8, &str, Option<(OperandKind, u8)>, Option<u8>)> {
  tuple((
    number::<u8>,
    preceded(space1, word),
    opt(preceded(space1, operand)),
    opt(preceded(space1, cache))
  ))(input)
}

fn drop_entry(input: &str) -> Parsed<u8> {
  preceded(pair(tag("drop"), space1), number::<u8>)(input)
}

/// `opcodes <id> [based <id>]`
fn opcodes_header(input: &str) -> Parsed<(&str, Option<&str>)> {
  preceded(
    pair(tag("opcodes"), space1),
    pair(word, opt(preceded(tuple((space1, tag("based"), space1)), word)))
  )(input)
}

fn dialect_header(input: &str) -> Parsed<&str> {
  preceded(pair(tag("dialect"), space1), word)(input)
}

/// `<key> <rest of line>`
fn property(input: &str) -> Parsed<(&str, &str)> {
  pair(word, preceded(space0, rest))(input)
}

/// `release <magic> <version> <dialect>`
fn release_line(input: &str) -> Parsed<(u16, &str, &str)> {
  preceded(
    pair(tag("release"), space1),
    tuple((
      number::<u16>,
      preceded(space1, word),
      preceded(space1, word)
    ))
  )(input)
}

/// `family <low> <high> <version> <dialect>`
fn family_line(input: &str) -> Parsed<(u16, u16, &str, &str)> {
  preceded(
    pair(tag("family"), space1),
    tuple((
      number::<u16>,
      preceded(space1, number::<u16>),
      preceded(space1, word),
      preceded(space1, word)
    ))
  )(input)
}

fn words(input: &str) -> Parsed<Vec<&str>> {
  many0(preceded(space0, word))(input)
}

fn quoted_list(input: &str) -> Parsed<Vec<&str>> {
  many0(preceded(space0, quoted))(input)
}

/// Runs `parser` over the whole (trimmed) line.
fn whole_line<'a, O, F>(parser: F, text: &'a str) -> Option<O>
  where F: Fn(&'a str) -> Parsed<'a, O>
{
  all_consuming(terminated(parser, space0))(text).ok().map(|(_, out)| out)
}

// endregion

// region Block state

struct DialectDraft {
  name: DefaultAtom,
  opcodes: Option<OpcodeTable>,
  marshal_version: Option<u8>,
  strings: StringFlavor,
  header: Option<HeaderLayout>,
  layout: Vec<UnitField>,
  encoding: Option<Encoding>,
  jump_unit: u32,
  lines: Option<LineFormat>,
  locals: LocalsLayout,
  compare_ops: Vec<String>,
  binary_ops: Vec<String>,
  digit_bits: u32,
}

impl DialectDraft {
  fn new(name: &str) -> DialectDraft {
    DialectDraft {
      name: DefaultAtom::from(name),
      opcodes: None,
      marshal_version: None,
      strings: StringFlavor::Text,
      header: None,
      layout: vec![],
      encoding: None,
      jump_unit: 1,
      lines: None,
      locals: LocalsLayout::VarNames,
      compare_ops: vec![],
      binary_ops: vec![],
      digit_bits: 15,
    }
  }

  fn finish(self, line: usize) -> Result<Dialect> {
    let name = self.name.clone();
    let missing = |key: &str| Error::table(line, format!("dialect `{}` has no `{}`", name, key));

    for field in REQUIRED_FIELDS.iter() {
      if !self.layout.contains(field) {
        return Err(Error::table(
          line,
          format!("dialect `{}` layout lacks the `{}` field", self.name, field)
        ));
      }
    }
    if self.digit_bits == 0 || self.digit_bits > 16 {
      return Err(Error::table(line, format!("digit_bits {} is not between 1 and 16", self.digit_bits)));
    }

    let opcodes = self.opcodes.ok_or_else(|| missing("opcodes"))?;
    let marshal_version = self.marshal_version.ok_or_else(|| missing("marshal"))?;
    let header = self.header.ok_or_else(|| missing("header"))?;
    let encoding = self.encoding.ok_or_else(|| missing("encoding"))?;
    let lines = self.lines.ok_or_else(|| missing("lines"))?;

    Ok(Dialect {
      opcodes,
      marshal_version,
      header,
      encoding,
      lines,
      strings: self.strings,
      jump_unit: self.jump_unit,
      locals: self.locals,
      digit_bits: self.digit_bits,
      layout: self.layout,
      compare_ops: self.compare_ops,
      binary_ops: self.binary_ops,
      name: self.name,
    })
  }
}

enum Block {
  Top,
  Opcodes(DefaultAtom, OpcodeTable),
  Dialect(DialectDraft),
}

// endregion

fn keyword<T: FromStr>(line: usize, key: &str, value: &str) -> Result<T> {
  T::from_str(value.trim())
    .map_err(|_| Error::table(line, format!("`{}` is not a valid value for `{}`", value.trim(), key)))
}

fn integer<T: FromStr>(line: usize, key: &str, value: &str) -> Result<T> {
  whole_line(number::<T>, value.trim())
    .ok_or_else(|| Error::table(line, format!("`{}` expects a number, found `{}`", key, value.trim())))
}

/// Parses the whole table into a registry.
pub fn parse_table(text: &str) -> Result<VersionRegistry> {
  let mut registry = VersionRegistry::empty();
  let mut tables: HashMap<DefaultAtom, OpcodeTable> = HashMap::new();
  let mut block = Block::Top;

  for (index, raw_line) in text.lines().enumerate() {
    let line = index + 1;
    let content = raw_line.split('#').next().unwrap_or("").trim();
    if content.is_empty() {
      continue;
    }

    block = match block {

      Block::Top => {
        if let Some((name, base)) = whole_line(opcodes_header, content) {
          let table = match base {
            Some(base) => {
              tables
                .get(&DefaultAtom::from(base))
                .cloned()
                .ok_or_else(|| Error::table(line, format!("unknown base opcode table `{}`", base)))?
            }
            None => OpcodeTable::new()
          };
          Block::Opcodes(DefaultAtom::from(name), table)
        } else if let Some(name) = whole_line(dialect_header, content) {
          Block::Dialect(DialectDraft::new(name))
        } else if let Some((magic, version, dialect)) = whole_line(release_line, content) {
          let dialect = registry.dialect(dialect).ok_or_else(|| {
            Error::table(line, format!("release {} names unknown dialect `{}`", magic, dialect))
          })?;
          if !registry.insert_release(magic, DefaultAtom::from(version), dialect) {
            return Err(Error::table(line, format!("magic number {} is listed twice", magic)));
          }
          Block::Top
        } else if let Some((low, high, version, dialect)) = whole_line(family_line, content) {
          if low > high {
            return Err(Error::table(line, format!("family range {}..{} is empty", low, high)));
          }
          let dialect = registry.dialect(dialect).ok_or_else(|| {
            Error::table(line, format!("family {}..{} names unknown dialect `{}`", low, high, dialect))
          })?;
          registry.insert_family(low, high, DefaultAtom::from(version), dialect);
          Block::Top
        } else {
          return Err(Error::table(line, format!("cannot parse `{}`", content)));
        }
      }

      Block::Opcodes(name, mut table) => {
        if content == "end" {
          tables.insert(name, table);
          Block::Top
        } else if let Some(opcode) = whole_line(drop_entry, content) {
          if !table.remove(opcode) {
            return Err(Error::table(line, format!("cannot drop opcode {}: not in the table", opcode)));
          }
          Block::Opcodes(name, table)
        } else if let Some((opcode, opname, kind, cache)) = whole_line(opcode_entry, content) {
          let info = opcode_info(opname, kind, cache);
          table
            .insert(opcode, DefaultAtom::from(opname), info)
            .map_err(|opname| Error::table(line, format!("opcode name `{}` is used twice", opname)))?;
          Block::Opcodes(name, table)
        } else {
          return Err(Error::table(line, format!("cannot parse opcode entry `{}`", content)));
        }
      }

      Block::Dialect(mut draft) => {
        if content == "end" {
          let dialect = draft.finish(line)?;
          registry.insert_dialect(Arc::new(dialect));
          Block::Top
        } else {
          let (key, value) = whole_line(property, content)
            .ok_or_else(|| Error::table(line, format!("cannot parse `{}`", content)))?;
          apply_property(&mut draft, &tables, line, key, value)?;
          Block::Dialect(draft)
        }
      }

    }; // end match block
  } // end for

  match block {
    Block::Top => Ok(registry),
    _ => Err(Error::table(text.lines().count(), "table ends inside a block (missing `end`)"))
  }
}

/// A relative jump whose name says it goes backward is a backward jump.
fn opcode_info(opname: &str, kind: Option<(OperandKind, u8)>, cache: Option<u8>) -> OpcodeInfo {
  let (kind, shift) = match kind {
    Some((OperandKind::JumpForward, shift)) if opname.contains("BACKWARD") => {
      (Some(OperandKind::JumpBackward), shift)
    }
    Some((kind, shift)) => (Some(kind), shift),
    None => (None, 0)
  };
  OpcodeInfo { kind, shift, cache: cache.unwrap_or(0) }
}

fn apply_property(
  draft  : &mut DialectDraft,
  tables : &HashMap<DefaultAtom, OpcodeTable>,
  line   : usize,
  key    : &str,
  value  : &str
) -> Result<()> {
  match key {
    "opcodes" => {
      let table = tables
        .get(&DefaultAtom::from(value.trim()))
        .ok_or_else(|| Error::table(line, format!("unknown opcode table `{}`", value.trim())))?;
      draft.opcodes = Some(table.clone());
    }
    "marshal" => {
      let version: u8 = integer(line, key, value)?;
      if !(2..=4).contains(&version) {
        return Err(Error::table(line, format!("marshal version {} is not supported", version)));
      }
      draft.marshal_version = Some(version);
    }
    "strings" => draft.strings = keyword(line, key, value)?,
    "header" => draft.header = Some(keyword(line, key, value)?),
    "encoding" => draft.encoding = Some(keyword(line, key, value)?),
    "lines" => draft.lines = Some(keyword(line, key, value)?),
    "locals" => draft.locals = keyword(line, key, value)?,
    "jump_unit" => draft.jump_unit = integer(line, key, value)?,
    "digit_bits" => draft.digit_bits = integer(line, key, value)?,
    "layout" => {
      let names = whole_line(words, value).unwrap_or_default();
      draft.layout = names
        .into_iter()
        .map(|name| keyword::<UnitField>(line, key, name))
        .collect::<Result<Vec<UnitField>>>()?;
    }
    "compare" | "binary_ops" => {
      let symbols = whole_line(quoted_list, value)
        .ok_or_else(|| Error::table(line, format!("`{}` expects a list of quoted symbols", key)))?;
      let symbols = symbols.into_iter().map(String::from).collect();
      if key == "compare" {
        draft.compare_ops = symbols;
      } else {
        draft.binary_ops = symbols;
      }
    }
    _ => return Err(Error::table(line, format!("unknown dialect property `{}`", key)))
  }
  Ok(())
}
