// Copyright 2018-2025 the Deno authors. MIT license.

use std::time::Duration;

use super::error::Error;
use super::signal::SignalKind;

/// How a pipeline's per-stage outcomes are reduced to one result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
#[cfg_attr(feature = "serialization", serde(rename_all = "camelCase"))]
pub enum PipeMode {
  /// Report the first stage that exited nonzero or failed, like a
  /// shell with `pipefail`.
  #[default]
  Strict,
  /// Report the last stage, carrying the first error found in any
  /// stage when the last stage has none of its own.
  BestEffort,
}

/// Outcome of one stage, or the primary outcome of a whole pipeline.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
#[cfg_attr(feature = "serialization", serde(rename_all = "camelCase"))]
pub struct CommandResult {
  pub stdout: String,
  pub stderr: String,
  /// `-1` when the process never reached a normal exit.
  pub exit_code: i32,
  #[cfg_attr(
    feature = "serialization",
    serde(serialize_with = "serialize_error")
  )]
  pub error: Option<Error>,
  pub duration: Duration,
  /// Signal that terminated the process, if any.
  pub signal: Option<SignalKind>,
}

impl CommandResult {
  pub(crate) fn from_error(error: Error) -> Self {
    Self {
      stdout: String::new(),
      stderr: String::new(),
      exit_code: -1,
      error: Some(error),
      duration: Duration::ZERO,
      signal: None,
    }
  }

  /// Whether the command exited with code zero and without an error.
  pub fn is_ok(&self) -> bool {
    self.error.is_none() && self.exit_code == 0
  }

  pub fn is_exit_code(&self, code: i32) -> bool {
    self.exit_code == code
  }

  pub fn is_signal(&self, kind: SignalKind) -> bool {
    self.signal == Some(kind)
  }

  pub fn error(&self) -> Option<&Error> {
    self.error.as_ref()
  }

  /// Converts into a `Result`, failing with the error if one was set.
  pub fn into_result(self) -> Result<CommandResult, Error> {
    match &self.error {
      Some(err) => Err(err.clone()),
      None => Ok(self),
    }
  }

  fn is_failure(&self) -> bool {
    self.exit_code != 0 || self.error.is_some()
  }
}

#[cfg(feature = "serialization")]
fn serialize_error<S: serde::Serializer>(
  error: &Option<Error>,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  match error {
    Some(err) => serializer.serialize_some(&err.to_string()),
    None => serializer.serialize_none(),
  }
}

/// The first error set on any of the results, in stage order.
pub fn first_error(results: &[CommandResult]) -> Option<&Error> {
  results
    .iter()
    .find_map(|result| result.error.as_ref())
}

/// Index of the stage whose result represents the pipeline.
pub(crate) fn primary_index(
  results: &[CommandResult],
  mode: PipeMode,
) -> usize {
  let last = results.len().saturating_sub(1);
  match mode {
    PipeMode::Strict => results
      .iter()
      .position(CommandResult::is_failure)
      .unwrap_or(last),
    PipeMode::BestEffort => last,
  }
}

/// Reduces per-stage results to the pipeline's primary result.
///
/// Returns `None` only for an empty list.
pub(crate) fn reduce(
  mut results: Vec<CommandResult>,
  mode: PipeMode,
) -> Option<(usize, CommandResult)> {
  if results.is_empty() {
    return None;
  }
  let index = primary_index(&results, mode);
  let first_error = first_error(&results).cloned();
  let mut primary = results.swap_remove(index);
  if mode == PipeMode::BestEffort && primary.error.is_none() {
    primary.error = first_error;
  }
  Some((index, primary))
}
