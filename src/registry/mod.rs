/*!
  Maps the 4-byte magic number at the start of a compiled module to a release identifier and the
  `Dialect` of that release.

  The mapping is data: a curated table (`dialects.tbl`) is parsed once into a `VersionRegistry`.
  The shipped copy is available through `VersionRegistry::builtin()`, and a caller with their own
  table can build a registry with `VersionRegistry::from_table()` and hand it to the
  `Disassembler`.

  Resolution tries the exact release numbers first. Magic numbers that were only ever used by
  development builds fall back to the family ranges, which identify the dialect but not the
  precise release (`Release::exact` is then false).
*/

pub mod dialect;
mod table;

use std::collections::HashMap;
use std::sync::Arc;

use string_cache::DefaultAtom;

pub use dialect::*;
use crate::error::{Error, Result};

/// The two bytes every magic number ends with.
pub const MAGIC_SUFFIX: [u8; 2] = [b'\r', b'\n'];

lazy_static! {
  static ref BUILTIN: std::result::Result<VersionRegistry, (usize, String)> =
    table::parse_table(include_str!("dialects.tbl")).map_err(|error| match error {
      Error::Table { line, message } => (line, message),
      other => (0, other.to_string())
    });
}

/// A resolved magic number.
#[derive(Clone, Debug)]
pub struct Release {
  /// The full 32 bit magic word, suffix included.
  pub magic: u32,
  /// Release identifier, e.g. `2.7` or `3.5.2`.
  pub version: DefaultAtom,
  pub dialect: Arc<Dialect>,
  /// False when the magic number only matched a family range.
  pub exact: bool,
}

impl Release {
  pub fn python_version(&self) -> String {
    format!("Python {}", self.version)
  }
}

#[derive(Clone, Debug)]
struct Family {
  low: u16,
  high: u16,
  version: DefaultAtom,
  dialect: Arc<Dialect>,
}

#[derive(Clone, Debug)]
pub struct VersionRegistry {
  dialects: HashMap<DefaultAtom, Arc<Dialect>>,
  releases: HashMap<u16, (DefaultAtom, Arc<Dialect>)>,
  families: Vec<Family>,
}

impl VersionRegistry {
  pub(crate) fn empty() -> VersionRegistry {
    VersionRegistry {
      dialects: HashMap::new(),
      releases: HashMap::new(),
      families: Vec::new()
    }
  }

  /// Parses a dialect table.
  pub fn from_table(text: &str) -> Result<VersionRegistry> {
    table::parse_table(text)
  }

  /// The table shipped with the crate, parsed on first use.
  pub fn builtin() -> Result<&'static VersionRegistry> {
    match &*BUILTIN {
      Ok(registry) => Ok(registry),
      Err((line, message)) => Err(Error::table(*line, message.clone()))
    }
  }

  pub(crate) fn insert_dialect(&mut self, dialect: Arc<Dialect>) {
    self.dialects.insert(dialect.name.clone(), dialect);
  }

  /// Returns false if the magic number is already taken.
  pub(crate) fn insert_release(&mut self, magic: u16, version: DefaultAtom, dialect: Arc<Dialect>) -> bool {
    match self.releases.contains_key(&magic) {
      true => false,
      false => {
        self.releases.insert(magic, (version, dialect));
        true
      }
    }
  }

  pub(crate) fn insert_family(&mut self, low: u16, high: u16, version: DefaultAtom, dialect: Arc<Dialect>) {
    self.families.push(Family { low, high, version, dialect });
  }

  pub fn dialect(&self, name: &str) -> Option<Arc<Dialect>> {
    self.dialects.get(&DefaultAtom::from(name)).cloned()
  }

  /// The exact releases, ordered by magic number.
  pub fn releases(&self) -> Vec<(u16, DefaultAtom)> {
    let mut releases: Vec<(u16, DefaultAtom)> =
      self.releases
          .iter()
          .map(|(magic, (version, _))| (*magic, version.clone()))
          .collect();
    releases.sort_by_key(|(magic, _)| *magic);
    releases
  }

  /// Identifies the release that wrote a file from its first four bytes.
  pub fn resolve(&self, magic: [u8; 4]) -> Result<Release> {
    let word = u32::from_le_bytes(magic);
    if magic[2..] != MAGIC_SUFFIX {
      return Err(Error::UnknownRelease { magic: word });
    }
    let number = u16::from_le_bytes([magic[0], magic[1]]);

    if let Some((version, dialect)) = self.releases.get(&number) {
      #[cfg(feature = "trace_decoding")]
      eprintln!("magic {} is release {} ({})", number, version, dialect.name);
      return Ok(Release { magic: word, version: version.clone(), dialect: dialect.clone(), exact: true });
    }

    match self.families.iter().find(|family| family.low <= number && number <= family.high) {
      Some(family) => {
        #[cfg(feature = "trace_decoding")]
        eprintln!("magic {} falls in the {} family ({})", number, family.version, family.dialect.name);
        Ok(Release {
          magic: word,
          version: family.version.clone(),
          dialect: family.dialect.clone(),
          exact: false
        })
      }
      None => Err(Error::UnknownRelease { magic: word })
    }
  }

  /// As `resolve`, taking the magic number as the little-endian word it is stored as.
  pub fn resolve_word(&self, magic: u32) -> Result<Release> {
    self.resolve(magic.to_le_bytes())
  }
}

/// Builds the four header bytes for a 16 bit magic number.
pub fn magic_bytes(number: u16) -> [u8; 4] {
  let [low, high] = number.to_le_bytes();
  [low, high, MAGIC_SUFFIX[0], MAGIC_SUFFIX[1]]
}
