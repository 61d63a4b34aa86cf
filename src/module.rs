/*!
  The pipeline from file bytes to a `Module`: read the magic number and resolve the release,
  read the rest of the header as that release lays it out, decode the marshalled body, and
  assemble the root code object.

  Nothing is retried and nothing partial is returned. The first failure is passed to the caller
  unchanged.
*/

use std::fs;
use std::path::Path;

use string_cache::DefaultAtom;

use crate::error::{Corruption, Error, Limit, Result, UNRESOLVED};
use crate::marshal::{Reader, Value, ValueDecoder, DEFAULT_MAX_DEPTH};
use crate::registry::{HeaderLayout, VersionRegistry};
use crate::unit::{Assembler, CodeObject};

/// Set in the flags word of a flagged header when the file is keyed by a source hash.
pub const HASH_BASED: u32 = 0x1;

/// The limits a caller can put on untrusted input.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DecodeOptions {
  /// Deepest nesting of marshalled values.
  pub max_depth: usize,
  /// Largest accepted input, in bytes.
  pub max_input_len: Option<usize>,
}

impl Default for DecodeOptions {
  fn default() -> Self {
    DecodeOptions {
      max_depth: DEFAULT_MAX_DEPTH,
      max_input_len: None
    }
  }
}

/// What the header records about the source the module was compiled from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Fingerprint {
  /// Modification time of the source.
  Timestamp(u32),
  /// Hash of the source.
  Hash(u64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Module {
  pub magic: u32,
  pub fingerprint: Fingerprint,
  pub source_size: Option<u32>,
  /// Release identifier, e.g. `2.7`.
  pub release: DefaultAtom,
  pub python_version: String,
  /// False when the magic number only matched a family of development releases.
  pub exact_release: bool,
  pub body: CodeObject,
}

pub struct Disassembler<'r> {
  registry: &'r VersionRegistry,
  options: DecodeOptions,
}

impl<'r> Disassembler<'r> {
  pub fn new(registry: &'r VersionRegistry) -> Self {
    Disassembler {
      registry,
      options: DecodeOptions::default()
    }
  }

  pub fn with_options(mut self, options: DecodeOptions) -> Self {
    self.options = options;
    self
  }

  pub fn disassemble_file<P: AsRef<Path>>(&self, path: P) -> Result<Module> {
    let bytes = fs::read(path)?;
    self.disassemble(&bytes)
  }

  pub fn disassemble(&self, bytes: &[u8]) -> Result<Module> {
    let unresolved = DefaultAtom::from(UNRESOLVED);

    if let Some(limit) = self.options.max_input_len {
      if bytes.len() > limit {
        return Err(Error::LimitExceeded {
          limit: Limit::InputLength(limit),
          offset: limit,
          release: unresolved
        });
      }
    }

    let mut reader = Reader::new(bytes);
    let magic = reader.take(4).map_err(|reason| Error::corrupt(0, &unresolved, reason))?;
    let release = self.registry.resolve([magic[0], magic[1], magic[2], magic[3]])?;

    #[cfg(feature = "trace_decoding")]
    eprintln!("decoding {} bytes as {}", bytes.len(), release.python_version());

    let (fingerprint, source_size) = read_header(&mut reader, release.dialect.header)
      .map_err(|reason| Error::corrupt(reader.offset(), &release.version, reason))?;

    let body_offset = reader.offset();
    let dialect = &release.dialect;
    let mut decoder = ValueDecoder::starting_at(bytes, body_offset, dialect, release.version.clone())
      .with_max_depth(self.options.max_depth);
    let raw = match decoder.decode()? {
      Value::Code(raw) => raw,
      _ => return Err(Error::corrupt(body_offset, &release.version, Corruption::NotACodeObject))
    };

    let body = Assembler::new(dialect, release.version.clone()).build(&raw)?;

    Ok(Module {
      magic: release.magic,
      fingerprint,
      source_size,
      python_version: release.python_version(),
      exact_release: release.exact,
      release: release.version,
      body
    })
  }
}

fn read_header(reader: &mut Reader, layout: HeaderLayout)
  -> std::result::Result<(Fingerprint, Option<u32>), Corruption>
{
  match layout {
    HeaderLayout::Classic => Ok((Fingerprint::Timestamp(reader.read_u32()?), None)),
    HeaderLayout::Sized => {
      let mtime = reader.read_u32()?;
      Ok((Fingerprint::Timestamp(mtime), Some(reader.read_u32()?)))
    }
    HeaderLayout::Flagged => {
      let flags = reader.read_u32()?;
      match flags & HASH_BASED != 0 {
        true => Ok((Fingerprint::Hash(reader.read_u64()?), None)),
        false => {
          let mtime = reader.read_u32()?;
          Ok((Fingerprint::Timestamp(mtime), Some(reader.read_u32()?)))
        }
      }
    }
  }
}

/// Disassembles the file at `path` with the built-in release table.
pub fn disassemble<P: AsRef<Path>>(path: P) -> Result<Module> {
  Disassembler::new(VersionRegistry::builtin()?).disassemble_file(path)
}
