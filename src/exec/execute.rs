// Copyright 2018-2025 the Deno authors. MIT license.

use std::sync::Arc;
use std::time::Instant;

use super::command::Command;
use super::error::Error;
use super::pipeline::Pipeline;
use super::process::Process;
use super::pty;
use super::result::CommandResult;
use super::result::PipeMode;

/// Debug events emitted around an execution.
struct ExecutionTrace {
  command: String,
  started_at: Instant,
}

impl ExecutionTrace {
  fn begin(command: &Command, is_async: bool) -> Self {
    let command = command.to_string();
    tracing::debug!(%command, is_async, "executing");
    Self {
      command,
      started_at: Instant::now(),
    }
  }

  fn end(&self, result: &CommandResult) {
    tracing::debug!(
      command = %self.command,
      exit_code = result.exit_code,
      duration = ?self.started_at.elapsed(),
      error = result.error.as_ref().map(tracing::field::display),
      "executed"
    );
  }
}

/// Wait result of a pipeline that ran in the foreground.
struct Completed {
  pipeline: Pipeline,
  mode: PipeMode,
}

impl Completed {
  fn primary(&self) -> (CommandResult, String) {
    self.pipeline.primary(self.mode)
  }
}

impl Command {
  fn validate(&self) -> Result<(), Error> {
    if !self.uses_pty() {
      return Ok(());
    }
    if self.stage_count() > 1 {
      return Err(Error::PtyWithPipeline);
    }
    pty::check_supported()
  }

  fn into_pipeline(self, combined: bool) -> (Pipeline, PipeMode) {
    let mode = self.pipe_mode();
    let pty = self.uses_pty();
    (Pipeline::new(self.into_stages(), pty, combined), mode)
  }

  async fn execute(self, combined: bool) -> Result<Completed, Error> {
    self.validate()?;
    let (mut pipeline, mode) = self.into_pipeline(combined);
    pipeline.start();
    pipeline.wait().await;
    Ok(Completed { pipeline, mode })
  }

  /// Runs the command to completion.
  ///
  /// Never fails outright: configuration, spawn and cancellation errors
  /// are reported on the result.
  pub async fn run(self) -> CommandResult {
    let trace = ExecutionTrace::begin(&self, false);
    let result = match self.execute(false).await {
      Ok(completed) => completed.primary().0,
      Err(err) => CommandResult::from_error(err),
    };
    trace.end(&result);
    result
  }

  /// Runs the command and returns its stdout.
  ///
  /// A nonzero exit code is not an error.
  pub async fn output(self) -> Result<String, Error> {
    Ok(self.run().await.into_result()?.stdout)
  }

  pub async fn output_bytes(self) -> Result<Vec<u8>, Error> {
    Ok(self.output().await?.into_bytes())
  }

  /// Runs the command and returns its stdout without surrounding
  /// whitespace.
  pub async fn output_trimmed(self) -> Result<String, Error> {
    let output = self.output().await?;
    Ok(output.trim().to_string())
  }

  /// Runs the command and returns stdout and stderr interleaved in the
  /// order they were read.
  pub async fn combined_output(self) -> Result<String, Error> {
    let trace = ExecutionTrace::begin(&self, false);
    let completed = match self.execute(true).await {
      Ok(completed) => completed,
      Err(err) => {
        trace.end(&CommandResult::from_error(err.clone()));
        return Err(err);
      }
    };
    let (result, combined) = completed.primary();
    trace.end(&result);
    result.into_result()?;
    Ok(combined)
  }

  /// Runs the command and returns one result per stage.
  ///
  /// Only configuration errors fail the call. Spawn and cancellation
  /// errors are kept on the affected stages' results.
  pub async fn pipeline_results(self) -> Result<Vec<CommandResult>, Error> {
    let trace = ExecutionTrace::begin(&self, false);
    let completed = match self.execute(false).await {
      Ok(completed) => completed,
      Err(err) => {
        trace.end(&CommandResult::from_error(err.clone()));
        return Err(err);
      }
    };
    trace.end(&completed.primary().0);
    Ok(completed.pipeline.results())
  }

  /// Starts the command in the background.
  ///
  /// Every stage is spawned before this returns. Configuration and spawn
  /// errors are reported by `Process::wait`.
  ///
  /// # Panics
  ///
  /// Panics when called outside of a tokio runtime.
  pub fn start(self) -> Process {
    let trace = ExecutionTrace::begin(&self, true);
    if let Err(err) = self.validate() {
      let result = CommandResult::from_error(err);
      trace.end(&result);
      return Process::finished(trace.command, result);
    }
    let (mut pipeline, mode) = self.into_pipeline(false);
    pipeline.start();
    let process = Process::new(trace.command.clone(), pipeline.controls());
    let handle = process.clone();
    tokio::spawn(async move {
      pipeline.wait().await;
      let (result, _) = pipeline.primary(mode);
      trace.end(&result);
      handle.finish(result);
    });
    process
  }

  /// Runs the command to completion on a private current-thread runtime.
  ///
  /// Must not be called from within an asynchronous context.
  pub fn run_blocking(self) -> CommandResult {
    let runtime = match tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
    {
      Ok(runtime) => runtime,
      Err(err) => {
        return CommandResult::from_error(Error::Runtime(Arc::new(err)));
      }
    };
    runtime.block_on(self.run())
  }
}
