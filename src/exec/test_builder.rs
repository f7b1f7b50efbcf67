// Copyright 2018-2025 the Deno authors. MIT license.

use std::fs;
use std::io;
use std::path::PathBuf;

use pretty_assertions::assert_eq;

use super::Command;
use super::CommandResult;
use super::SignalKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedError {
  Start(io::ErrorKind),
  Cancelled,
  DeadlineExceeded,
  PtyWithPipeline,
}

enum TextAssertion {
  Equals(String),
  Contains(Vec<String>),
}

impl TextAssertion {
  fn check(&self, actual: &str, stream: &str, command: &str) {
    match self {
      TextAssertion::Equals(expected) => assert_eq!(
        actual, expected,
        "\n\nUnexpected {stream} for: {command}"
      ),
      TextAssertion::Contains(parts) => {
        for part in parts {
          assert!(
            actual.contains(part.as_str()),
            "\n\nFailed for: {command}\nExpected {stream} to contain \
             {part:?}, got {actual:?}"
          );
        }
      }
    }
  }

  fn contains(&mut self, text: &str) {
    match self {
      TextAssertion::Equals(_) => {
        *self = TextAssertion::Contains(vec![text.to_string()])
      }
      TextAssertion::Contains(parts) => parts.push(text.to_string()),
    }
  }
}

struct TempDir {
  // hold to keep it alive until drop
  _inner: tempfile::TempDir,
  cwd: PathBuf,
}

impl TempDir {
  pub fn new() -> Self {
    let temp_dir = tempfile::tempdir().unwrap();
    let cwd = fs::canonicalize(temp_dir.path()).unwrap();
    Self {
      _inner: temp_dir,
      cwd,
    }
  }
}

pub struct TestBuilder {
  // it is much much faster to lazily create this
  temp_dir: Option<TempDir>,
  command: Option<Command>,
  expected_exit_code: i32,
  expected_stdout: TextAssertion,
  expected_stderr: TextAssertion,
  expected_error: Option<ExpectedError>,
  expected_signal: Option<SignalKind>,
}

impl TestBuilder {
  pub fn new() -> Self {
    Self {
      temp_dir: None,
      command: None,
      expected_exit_code: 0,
      expected_stdout: TextAssertion::Equals(String::new()),
      expected_stderr: TextAssertion::Equals(String::new()),
      expected_error: None,
      expected_signal: None,
    }
  }

  fn get_temp_dir(&mut self) -> &mut TempDir {
    self.temp_dir.get_or_insert_with(TempDir::new)
  }

  pub fn temp_dir_path(&mut self) -> PathBuf {
    self.get_temp_dir().cwd.clone()
  }

  /// Writes a file to the temp dir, which becomes the working directory.
  pub fn file(&mut self, path: &str, text: &str) -> &mut Self {
    let temp_dir = self.get_temp_dir();
    fs::write(temp_dir.cwd.join(path), text).unwrap();
    self
  }

  pub fn command(&mut self, command: Command) -> &mut Self {
    self.command = Some(command);
    self
  }

  pub fn assert_exit_code(&mut self, code: i32) -> &mut Self {
    self.expected_exit_code = code;
    self
  }

  pub fn assert_stdout(&mut self, output: &str) -> &mut Self {
    self.expected_stdout = TextAssertion::Equals(output.to_string());
    self
  }

  pub fn assert_stdout_contains(&mut self, output: &str) -> &mut Self {
    self.expected_stdout.contains(output);
    self
  }

  pub fn assert_stderr(&mut self, output: &str) -> &mut Self {
    self.expected_stderr = TextAssertion::Equals(output.to_string());
    self
  }

  pub fn assert_error(&mut self, error: ExpectedError) -> &mut Self {
    self.expected_error = Some(error);
    self
  }

  pub fn assert_signal(&mut self, kind: SignalKind) -> &mut Self {
    self.expected_signal = Some(kind);
    self
  }

  pub async fn run(&mut self) -> CommandResult {
    let mut command = self.command.take().expect("command not set");
    if let Some(temp_dir) = &self.temp_dir {
      command = command.current_dir(&temp_dir.cwd);
    }
    let display = command.to_string();
    let result = command.run().await;

    self
      .expected_stdout
      .check(&result.stdout, "stdout", &display);
    self
      .expected_stderr
      .check(&result.stderr, "stderr", &display);
    assert_eq!(
      result.exit_code, self.expected_exit_code,
      "\n\nFailed for: {display}"
    );
    assert_eq!(
      result.signal, self.expected_signal,
      "\n\nFailed for: {display}"
    );

    match (self.expected_error, &result.error) {
      (None, None) => {}
      (None, Some(err)) => {
        panic!("\n\nFailed for: {display}\nUnexpected error: {err}")
      }
      (Some(expected), None) => {
        panic!("\n\nFailed for: {display}\nExpected error {expected:?}")
      }
      (Some(expected), Some(err)) => {
        let matches = match expected {
          ExpectedError::Start(kind) => {
            err.as_start().is_some_and(|e| e.kind() == kind)
          }
          ExpectedError::Cancelled => {
            err.is_cancelled() && !err.is_deadline_exceeded()
          }
          ExpectedError::DeadlineExceeded => err.is_deadline_exceeded(),
          ExpectedError::PtyWithPipeline => {
            matches!(err, super::Error::PtyWithPipeline)
          }
        };
        assert!(
          matches,
          "\n\nFailed for: {display}\nExpected error {expected:?}, got {err:?}"
        );
      }
    }
    result
  }
}
