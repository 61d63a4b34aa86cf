/*!
  The textual listing of a disassembled module: the header fields as labeled keys, then each
  code object as a summary of its fields followed by a table of its instructions. Nested code
  objects are listed after their parent, indented one level deeper.
*/

use std::fmt::{Display, Formatter};

use prettytable::{format as TableFormat, Table};

use crate::bytecode::Argument;
use crate::module::{Fingerprint, Module};
use crate::unit::{CodeObject, Constant};

const INDENT: &str = "  ";

lazy_static! {
  static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}

fn joined(names: &[String]) -> String {
  match names.is_empty() {
    true => "()".to_string(),
    false => names.join(", ")
  }
}

/// Constants are written with the string conventions of the unit's release.
fn constant_text(unit: &CodeObject, constant: &Constant) -> String {
  match constant {
    Constant::Value(value) => value.repr(unit.strings).to_string(),
    Constant::Code(_) => constant.to_string(),
  }
}

fn argument_text(unit: &CodeObject, argument: &Argument) -> String {
  match argument {
    Argument::Const(value) => value.repr(unit.strings).to_string(),
    other => other.to_string(),
  }
}

fn instruction_table(unit: &CodeObject) -> Table {
  let mut table = Table::new();
  table.set_format(*TABLE_DISPLAY_FORMAT);
  table.set_titles(row![ubr->"Line", ubr->"Offset", ubl->"Opcode", ubr->"Arg", ubl->"Argument"]);

  let mut starts = unit.lines.iter().peekable();
  for instruction in unit.instructions.iter() {
    // Only the first instruction of each line shows the line number.
    let mut line = String::new();
    while let Some(start) = starts.peek() {
      if start.offset > instruction.offset {
        break;
      }
      line = start.line.to_string();
      starts.next();
    }

    let arg = instruction.arg.map(|arg| arg.to_string()).unwrap_or_default();
    table.add_row(row![
      r->line,
      r->instruction.offset,
      &*instruction.opname,
      r->arg,
      argument_text(unit, &instruction.argument)
    ]);
  }
  table
}

/// Writes `text` with every line indented `depth` levels.
fn write_indented(f: &mut Formatter<'_>, text: &str, depth: usize) -> std::fmt::Result {
  let indent = INDENT.repeat(depth);
  for line in text.lines() {
    match line.trim().is_empty() {
      true => writeln!(f)?,
      false => writeln!(f, "{}{}", indent, line.trim_end())?
    }
  }
  Ok(())
}

fn write_unit(f: &mut Formatter<'_>, unit: &CodeObject, depth: usize) -> std::fmt::Result {
  let mut summary = format!(
    "code object {} (file \"{}\", line {})\n",
    unit.qualname, unit.filename, unit.firstlineno
  );
  summary.push_str(&format!(
    "{i}argcount: {}\n{i}posonlyargcount: {}\n{i}kwonlyargcount: {}\n{i}nlocals: {}\n\
     {i}stacksize: {}\n{i}flags: {}\n",
    unit.argcount, unit.posonlyargcount, unit.kwonlyargcount, unit.nlocals, unit.stacksize,
    unit.flags,
    i = INDENT
  ));
  summary.push_str(&format!("{}consts:\n", INDENT));
  for (index, constant) in unit.consts.iter().enumerate() {
    summary.push_str(&format!("{}{}{:>4}: {}\n", INDENT, INDENT, index, constant_text(unit, constant)));
  }
  summary.push_str(&format!(
    "{i}names: {}\n{i}varnames: {}\n{i}cellvars: {}\n{i}freevars: {}\n",
    joined(&unit.names), joined(&unit.varnames), joined(&unit.cellvars), joined(&unit.freevars),
    i = INDENT
  ));

  write_indented(f, &summary, depth)?;
  write_indented(f, &instruction_table(unit).to_string(), depth)?;

  for child in unit.children() {
    writeln!(f)?;
    write_unit(f, child, depth + 1)?;
  }
  Ok(())
}

impl Display for CodeObject {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write_unit(f, self, 0)
  }
}

impl Display for Module {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    writeln!(f, "magic: {:#010x}", self.magic)?;
    match self.fingerprint {
      Fingerprint::Timestamp(mtime) => writeln!(f, "timestamp: {}", mtime)?,
      Fingerprint::Hash(hash) => writeln!(f, "source_hash: {:#018x}", hash)?,
    }
    if let Some(size) = self.source_size {
      writeln!(f, "source_size: {}", size)?;
    }
    match self.exact_release {
      true => writeln!(f, "python_version: {}", self.python_version)?,
      false => writeln!(f, "python_version: {} (development release)", self.python_version)?,
    }
    writeln!(f, "body:")?;
    write_unit(f, &self.body, 1)
  }
}
