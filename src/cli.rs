//! Command line parsing for the `pycdis` binary. It lives in the library so it can be tested.

use std::path::PathBuf;

use crate::module::DecodeOptions;

pub const USAGE: &str = "\
usage: pycdis [--table FILE] [--max-depth N] [--max-input BYTES] FILE...

  --table FILE       use the dialect table in FILE instead of the built-in one
  --max-depth N      reject values nested deeper than N levels (default 1000)
  --max-input BYTES  reject files larger than BYTES
  -h, --help         print this message";

#[derive(Debug, PartialEq)]
pub struct CliArgs {
  pub files: Vec<PathBuf>,
  pub table: Option<PathBuf>,
  pub options: DecodeOptions,
}

#[derive(Debug, PartialEq)]
pub enum ParsedArgs {
  Run(CliArgs),
  Help,
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
  args
    .get(i)
    .map(String::as_str)
    .ok_or_else(|| format!("{} requires an argument", flag))
}

fn count(text: &str, flag: &str) -> Result<usize, String> {
  text
    .parse::<usize>()
    .map_err(|_| format!("{} expects a number, found '{}'", flag, text))
}

/// Parses the full argument list, `argv[0]` included.
pub fn parse_args(args: &[String]) -> Result<ParsedArgs, String> {
  let mut files = Vec::new();
  let mut table = None;
  let mut options = DecodeOptions::default();
  let mut i = 1usize;

  while i < args.len() {
    match args[i].as_str() {
      "-h" | "--help" => return Ok(ParsedArgs::Help),
      "--table" => {
        i += 1;
        table = Some(PathBuf::from(value(args, i, "--table")?));
      }
      "--max-depth" => {
        i += 1;
        options.max_depth = count(value(args, i, "--max-depth")?, "--max-depth")?;
      }
      "--max-input" => {
        i += 1;
        options.max_input_len = Some(count(value(args, i, "--max-input")?, "--max-input")?);
      }
      flag if flag.starts_with('-') && flag.len() > 1 => {
        return Err(format!("unknown option '{}'", flag));
      }
      file => files.push(PathBuf::from(file)),
    }
    i += 1;
  }

  match files.is_empty() {
    true => Err("no input files".to_string()),
    false => Ok(ParsedArgs::Run(CliArgs { files, table, options }))
  }
}
