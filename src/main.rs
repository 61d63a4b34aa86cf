use std::fs;
use std::process;

use pycdis::cli::{parse_args, CliArgs, ParsedArgs, USAGE};
use pycdis::{Disassembler, VersionRegistry};

fn main() {
  #[cfg(feature = "trace_decoding")]
  eprintln!("Decode Tracing ENABLED");

  let args: Vec<String> = std::env::args().collect();
  let args = match parse_args(&args) {
    Ok(ParsedArgs::Run(args)) => args,
    Ok(ParsedArgs::Help) => {
      println!("{}", USAGE);
      return;
    }
    Err(message) => {
      eprintln!("pycdis: {}\n{}", message, USAGE);
      process::exit(1);
    }
  };

  match run(&args) {
    true => {}
    false => process::exit(1)
  }
}

/// Lists every file, reporting failures as they happen. Returns whether all files succeeded.
fn run(args: &CliArgs) -> bool {
  let loaded;
  let registry = match &args.table {
    Some(path) => {
      let table = fs::read_to_string(path)
        .map_err(pycdis::Error::from)
        .and_then(|text| VersionRegistry::from_table(&text));
      match table {
        Ok(registry) => {
          loaded = registry;
          &loaded
        }
        Err(error) => {
          eprintln!("pycdis: {}: {}", path.display(), error);
          return false;
        }
      }
    }
    None => match VersionRegistry::builtin() {
      Ok(registry) => registry,
      Err(error) => {
        eprintln!("pycdis: {}", error);
        return false;
      }
    }
  };

  let disassembler = Disassembler::new(registry).with_options(args.options);
  let mut succeeded = true;
  for path in args.files.iter() {
    match disassembler.disassemble_file(path) {
      Ok(module) => {
        if args.files.len() > 1 {
          println!("{}:", path.display());
        }
        print!("{}", module);
      }
      Err(error) => {
        eprintln!("pycdis: {}: {}", path.display(), error);
        succeeded = false;
      }
    }
  }
  succeeded
}
