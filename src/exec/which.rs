// Copyright 2018-2025 the Deno authors. MIT license.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

/// Error when a program path could not be resolved.
#[derive(Error, Debug, PartialEq)]
pub(crate) enum ProgramResolutionError {
  #[error("{0}: command not found")]
  CommandNotFound(String),
  #[error("command name was empty")]
  CommandEmpty,
}

impl From<ProgramResolutionError> for io::Error {
  fn from(err: ProgramResolutionError) -> Self {
    let kind = match err {
      ProgramResolutionError::CommandNotFound(_) => io::ErrorKind::NotFound,
      ProgramResolutionError::CommandEmpty => io::ErrorKind::InvalidInput,
    };
    io::Error::new(kind, err)
  }
}

/// Resolves a program name to the path that will be spawned.
///
/// Paths with more than one component are used as-is, relative ones
/// being anchored at the stage's working directory. Bare names are
/// looked up in the `PATH` of the stage's effective environment,
/// falling back to this process' `PATH`.
pub(crate) fn resolve_program(
  program: &str,
  env: &BTreeMap<String, String>,
  dir: Option<&Path>,
) -> Result<PathBuf, ProgramResolutionError> {
  if program.is_empty() {
    return Err(ProgramResolutionError::CommandEmpty);
  }

  // check for absolute or relative path
  let path = Path::new(program);
  if path.is_absolute() {
    return Ok(path.to_path_buf());
  } else if path.components().count() > 1 {
    return Ok(match dir {
      Some(dir) => dir.join(path),
      None => path.to_path_buf(),
    });
  }

  let search_path = env
    .get("PATH")
    .map(OsString::from)
    .or_else(|| std::env::var_os("PATH"));
  let cwd = match dir {
    Some(dir) => dir.to_path_buf(),
    None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
  };
  which::which_in(program, search_path, cwd)
    .map_err(|_| ProgramResolutionError::CommandNotFound(program.to_string()))
}
