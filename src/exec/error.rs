// Copyright 2018-2025 the Deno authors. MIT license.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use super::signal::SignalKind;

/// Why a bound cancellation signal fired.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
  #[error("operation canceled")]
  Canceled,
  #[error("deadline exceeded")]
  DeadlineExceeded,
}

/// A stage that could not be started.
///
/// The exit code of a stage that never started is always `-1`.
#[derive(Error, Debug, Clone)]
#[error("{source}")]
pub struct StartError {
  source: Arc<io::Error>,
  stderr: String,
}

impl StartError {
  pub(crate) fn new(source: Arc<io::Error>, stderr: String) -> Self {
    Self { source, stderr }
  }

  /// The OS error reported while trying to spawn the process.
  pub fn os_error(&self) -> &io::Error {
    &self.source
  }

  pub fn kind(&self) -> io::ErrorKind {
    self.source.kind()
  }

  /// Stderr captured for the stage (always empty, as nothing ran).
  pub fn stderr(&self) -> &str {
    &self.stderr
  }

  pub fn exit_code(&self) -> i32 {
    -1
  }
}

/// Errors reported by command execution and process handles.
///
/// A nonzero exit code is never an error on its own. It only shows up
/// as `CommandResult::exit_code`.
#[derive(Error, Debug, Clone)]
pub enum Error {
  #[error(transparent)]
  Start(#[from] StartError),
  #[error(transparent)]
  Cancelled(#[from] CancelReason),
  #[error("pseudo-terminal capture is not supported with pipelines")]
  PtyWithPipeline,
  #[error("pseudo-terminal capture is not supported on this platform")]
  PtyUnsupported,
  #[error("process not started")]
  NotStarted,
  #[error("{0:?} cannot be delivered on this platform")]
  UnsupportedSignal(SignalKind),
  #[error("failed delivering signal: {0}")]
  Signal(Arc<io::Error>),
  #[error("failed creating runtime: {0}")]
  Runtime(Arc<io::Error>),
}

impl Error {
  /// Whether this error was caused by a bound cancellation signal
  /// firing (either explicit cancellation or an elapsed deadline).
  pub fn is_cancelled(&self) -> bool {
    matches!(self, Error::Cancelled(_))
  }

  pub fn is_deadline_exceeded(&self) -> bool {
    matches!(
      self,
      Error::Cancelled(CancelReason::DeadlineExceeded)
    )
  }

  /// Whether the process could not be spawned.
  pub fn is_start(&self) -> bool {
    matches!(self, Error::Start(_))
  }

  /// Whether the command was rejected before anything was spawned.
  pub fn is_configuration(&self) -> bool {
    matches!(
      self,
      Error::PtyWithPipeline | Error::PtyUnsupported
    )
  }

  pub fn as_start(&self) -> Option<&StartError> {
    match self {
      Error::Start(err) => Some(err),
      _ => None,
    }
  }
}
