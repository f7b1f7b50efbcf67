// Copyright 2018-2025 the Deno authors. MIT license.

use std::io;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use tokio::process::Child;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::cancel::CancelSignal;
use super::command::StageSpec;
use super::error::CancelReason;
use super::error::Error;
use super::error::StartError;
use super::pipes::Drain;
use super::pipes::FanOut;
use super::pipes::LineCallback;
use super::pipes::LineWriter;
use super::pipes::OutputSink;
use super::pipes::SharedBuffer;
use super::pipes::Sink;
use super::pipes::StdinFeed;
use super::pipes::Stream;
use super::pty;
use super::result::CommandResult;
use super::signal;
use super::signal::SignalKind;

/// State of a stage shared with process handles.
#[derive(Debug, Default)]
pub(crate) struct StageControl {
  pid: OnceLock<u32>,
  exited: AtomicBool,
  kill_requested: Notify,
}

impl StageControl {
  pub fn pid(&self) -> Option<u32> {
    self.pid.get().copied()
  }

  pub fn has_exited(&self) -> bool {
    self.exited.load(Ordering::Acquire)
  }

  fn mark_exited(&self) {
    self.exited.store(true, Ordering::Release);
  }

  /// Asks the stage's waiter to kill the process. A request made before
  /// the waiter is polled is kept until it is.
  ///
  /// Returns whether the stage was spawned.
  pub fn request_kill(&self) -> bool {
    if self.pid().is_none() {
      return false;
    }
    self.kill_requested.notify_one();
    true
  }

  /// Delivers `kind` to the process.
  ///
  /// Returns `Ok(false)` when the stage was never spawned. A stage that
  /// already exited counts as started and is skipped.
  pub fn send(&self, kind: SignalKind) -> Result<bool, Error> {
    let Some(pid) = self.pid() else {
      return Ok(false);
    };
    if self.has_exited() {
      return Ok(true);
    }
    match signal::deliver(pid, kind) {
      Ok(()) => Ok(true),
      // raced with the process exiting
      Err(_) if self.has_exited() => Ok(true),
      Err(err) => Err(err),
    }
  }
}

/// Output wiring requested for one stage.
pub(crate) struct StageWiring {
  /// Read end of the previous stage's stdout.
  pub upstream: Option<os_pipe::PipeReader>,
  /// Whether the stage's stdout feeds a next stage.
  pub feeds_next: bool,
  pub pty: bool,
  pub combined: bool,
}

/// One external process of a pipeline.
pub(crate) struct Stage {
  command: Option<tokio::process::Command>,
  child: Option<Child>,
  stdout: SharedBuffer,
  stderr: SharedBuffer,
  combined: Option<SharedBuffer>,
  drains: Vec<Drain>,
  drain_handles: Vec<JoinHandle<anyhow::Result<()>>>,
  stdin_feed: Option<StdinFeed>,
  start_error: Option<Arc<io::Error>>,
  wait_error: Option<CancelReason>,
  status: Option<ExitStatus>,
  cancel: Option<CancelSignal>,
  control: Arc<StageControl>,
  started_at: Option<Instant>,
  duration: Duration,
}

impl Stage {
  /// Materializes a stage from its descriptor.
  ///
  /// Failures while preparing the process are kept and reported when the
  /// stage is started. Returns the read end of this stage's stdout when
  /// it feeds a next stage.
  pub fn new(
    mut spec: StageSpec,
    wiring: StageWiring,
  ) -> (Self, Option<os_pipe::PipeReader>) {
    let mut stage = Stage {
      command: None,
      child: None,
      stdout: SharedBuffer::default(),
      stderr: SharedBuffer::default(),
      combined: wiring.combined.then(SharedBuffer::default),
      drains: Vec::new(),
      drain_handles: Vec::new(),
      stdin_feed: None,
      start_error: None,
      wait_error: None,
      status: None,
      cancel: spec.cancel.take(),
      control: Default::default(),
      started_at: None,
      duration: Duration::ZERO,
    };
    match stage.wire(spec, wiring) {
      Ok(next) => (stage, next),
      Err(err) => {
        stage.fail_start(Arc::new(err));
        (stage, None)
      }
    }
  }

  fn wire(
    &mut self,
    mut spec: StageSpec,
    wiring: StageWiring,
  ) -> io::Result<Option<os_pipe::PipeReader>> {
    let mut command = spec.to_command()?;

    match wiring.upstream {
      Some(reader) => {
        command.stdin(Stdio::from(reader));
      }
      None => {
        let (stdio, feed) = std::mem::take(&mut spec.stdin).into_stdio()?;
        command.stdin(stdio);
        self.stdin_feed = feed;
      }
    }

    let next = if wiring.pty {
      self.wire_pty(&mut command, spec)?;
      None
    } else {
      let next = self.wire_output(
        &mut command,
        Stream::Stdout,
        spec.stdout_sink.take(),
        spec.on_stdout.take(),
        wiring.feeds_next,
      )?;
      self.wire_output(
        &mut command,
        Stream::Stderr,
        spec.stderr_sink.take(),
        spec.on_stderr.take(),
        false,
      )?;
      next
    };
    self.command = Some(command);
    Ok(next)
  }

  fn wire_output(
    &mut self,
    command: &mut tokio::process::Command,
    stream: Stream,
    sink: Option<OutputSink>,
    callback: Option<LineCallback>,
    feeds_next: bool,
  ) -> io::Result<Option<os_pipe::PipeReader>> {
    let passthrough = callback.is_none()
      && self.combined.is_none()
      && sink.iter().any(OutputSink::is_terminal);
    if passthrough && !feeds_next {
      if let Some(stdio) = sink.iter().find_map(|s| s.direct_stdio(stream)) {
        set_output(command, stream, stdio);
        return Ok(None);
      }
    }

    let mut out = FanOut::default();
    if let Some(sink) = sink {
      out.push(Sink::Raw(sink));
    }
    if !passthrough {
      out.push(Sink::Buffer(match stream {
        Stream::Stdout => self.stdout.clone(),
        Stream::Stderr => self.stderr.clone(),
      }));
      if let Some(combined) = &self.combined {
        out.push(Sink::Buffer(combined.clone()));
      }
      if let Some(callback) = callback {
        out.push(Sink::Lines(LineWriter::new(vec![callback])));
      }
    }
    let next = if feeds_next {
      let (reader, writer) = os_pipe::pipe()?;
      out.push(Sink::Pipe(writer));
      Some(reader)
    } else {
      None
    };

    let (reader, writer) = os_pipe::pipe()?;
    set_output(command, stream, Stdio::from(writer));
    self.drains.push(Drain {
      reader: Box::new(reader),
      out,
    });
    Ok(next)
  }

  fn wire_pty(
    &mut self,
    command: &mut tokio::process::Command,
    mut spec: StageSpec,
  ) -> io::Result<()> {
    let pair = pty::open()?;
    command.stdout(Stdio::from(pair.slave.try_clone()?));
    command.stderr(Stdio::from(pair.slave));

    let stdout_sink = spec.stdout_sink.take();
    let stderr_sink = spec.stderr_sink.take();
    let same_sink = match (&stdout_sink, &stderr_sink) {
      (Some(a), Some(b)) => a.is_same_stream(b),
      _ => false,
    };

    let mut out = FanOut::default();
    for sink in [Some(stdout_sink), (!same_sink).then_some(stderr_sink)]
      .into_iter()
      .flatten()
      .flatten()
    {
      out.push(Sink::Raw(sink));
    }
    out.push(Sink::Buffer(self.stdout.clone()));
    if let Some(combined) = &self.combined {
      out.push(Sink::Buffer(combined.clone()));
    }
    // both streams arrive merged, so every line goes to both callbacks
    let callbacks = [spec.on_stdout.take(), spec.on_stderr.take()]
      .into_iter()
      .flatten()
      .collect::<Vec<_>>();
    if !callbacks.is_empty() {
      out.push(Sink::Lines(LineWriter::new(callbacks)));
    }
    self.drains.push(Drain {
      reader: Box::new(pair.master),
      out,
    });
    Ok(())
  }

  pub fn control(&self) -> Arc<StageControl> {
    self.control.clone()
  }

  /// Spawns the process and its output drains.
  pub fn start(&mut self) -> Result<(), Arc<io::Error>> {
    let spawned = match self.command.take() {
      Some(mut command) => {
        let spawned = command.spawn();
        // the command holds the parent's copies of the child's pipe
        // ends, which must be closed for the drains to see EOF
        drop(command);
        spawned.map_err(Arc::new)
      }
      None => Err(self.start_error.clone().unwrap_or_else(|| {
        Arc::new(io::Error::other("stage was already started"))
      })),
    };
    match spawned {
      Ok(child) => {
        if let Some(pid) = child.id() {
          let _ = self.control.pid.set(pid);
        }
        self.child = Some(child);
        self.started_at = Some(Instant::now());
        let drains = std::mem::take(&mut self.drains);
        self.drain_handles = drains.into_iter().map(Drain::spawn).collect();
        if let Some(feed) = self.stdin_feed.take() {
          feed.spawn();
        }
        Ok(())
      }
      Err(err) => {
        self.fail_start(err.clone());
        Err(err)
      }
    }
  }

  /// Marks the stage as never started, releasing everything that was
  /// prepared for it. Dropping the prepared command closes this stage's
  /// end of the upstream pipe.
  pub fn fail_start(&mut self, err: Arc<io::Error>) {
    self.start_error = Some(err);
    self.command = None;
    self.drains.clear();
    self.stdin_feed = None;
  }

  /// Waits for the process to exit and for its output to be drained.
  ///
  /// The process is killed when the bound cancellation signal fires or
  /// when a kill is requested through the stage's control.
  pub async fn wait(&mut self) {
    let Some(child) = self.child.as_mut() else {
      return;
    };
    let cancel = self.cancel.clone();
    let cancelled = async move {
      match cancel {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending().await,
      }
    };
    let control = self.control.clone();

    let status = tokio::select! {
      status = child.wait() => status,
      reason = cancelled => {
        self.wait_error = Some(reason);
        kill_and_wait(child).await
      }
      _ = control.kill_requested.notified() => kill_and_wait(child).await,
    };
    self.control.mark_exited();

    for handle in self.drain_handles.drain(..) {
      match handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!("failed draining output: {err:#}"),
        Err(err) => tracing::warn!("output drain task failed: {err}"),
      }
    }

    match status {
      Ok(status) => self.status = Some(status),
      Err(err) => tracing::warn!("failed waiting for process: {err}"),
    }
    if let Some(started_at) = self.started_at {
      self.duration = started_at.elapsed();
    }
  }

  pub fn result(&self) -> CommandResult {
    let stdout = self.stdout.to_string_lossy();
    let stderr = self.stderr.to_string_lossy();
    if let Some(err) = &self.start_error {
      let error = StartError::new(err.clone(), stderr.clone());
      return CommandResult {
        stdout,
        stderr,
        exit_code: -1,
        error: Some(Error::Start(error)),
        duration: Duration::ZERO,
        signal: None,
      };
    }

    let status = self.status.as_ref();
    let exited_cleanly = status.is_some_and(|s| s.success());
    let error = self
      .wait_error
      .or_else(|| {
        // the signal may have fired while the process was exiting
        if exited_cleanly {
          None
        } else {
          self.cancel.as_ref()?.reason()
        }
      })
      .map(Error::Cancelled);
    CommandResult {
      stdout,
      stderr,
      exit_code: status.and_then(|s| s.code()).unwrap_or(-1),
      error,
      duration: self.duration,
      signal: status.and_then(signal::exit_signal),
    }
  }

  pub fn combined_output(&self) -> String {
    self
      .combined
      .as_ref()
      .map(SharedBuffer::to_string_lossy)
      .unwrap_or_default()
  }
}

async fn kill_and_wait(child: &mut Child) -> io::Result<ExitStatus> {
  if let Err(err) = child.start_kill() {
    // the process may have exited on its own in the meantime
    tracing::debug!("failed killing process: {err}");
  }
  child.wait().await
}

fn set_output(
  command: &mut tokio::process::Command,
  stream: Stream,
  stdio: Stdio,
) {
  match stream {
    Stream::Stdout => command.stdout(stdio),
    Stream::Stderr => command.stderr(stdio),
  };
}
