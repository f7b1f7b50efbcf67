// Copyright 2018-2025 the Deno authors. MIT license.

use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::error::Error;
use super::result::CommandResult;
use super::signal::SignalKind;
use super::stage::StageControl;

struct ProcessInner {
  command: String,
  controls: Vec<Arc<StageControl>>,
  done: watch::Sender<bool>,
  result: OnceLock<CommandResult>,
  kill_timer: Mutex<Option<JoinHandle<()>>>,
  /// Runtime the command was started on, used for kill timers.
  runtime: Option<Handle>,
}

/// Handle to a command started in the background.
///
/// Clones refer to the same running command.
#[derive(Clone)]
pub struct Process(Arc<ProcessInner>);

impl fmt::Debug for Process {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Process")
      .field("command", &self.0.command)
      .field("done", &self.is_done())
      .finish()
  }
}

impl Process {
  pub(crate) fn new(command: String, controls: Vec<Arc<StageControl>>) -> Self {
    let (done, _) = watch::channel(false);
    Self(Arc::new(ProcessInner {
      command,
      controls,
      done,
      result: OnceLock::new(),
      kill_timer: Default::default(),
      runtime: Handle::try_current().ok(),
    }))
  }

  /// A handle that already completed with `result`.
  pub(crate) fn finished(command: String, result: CommandResult) -> Self {
    let process = Self::new(command, Vec::new());
    process.finish(result);
    process
  }

  /// Stores the result and releases every waiter. Only the first call
  /// has an effect.
  pub(crate) fn finish(&self, result: CommandResult) {
    if self.0.result.set(result).is_err() {
      return;
    }
    self.0.done.send_replace(true);
    if let Some(timer) = self.0.kill_timer.lock().take() {
      timer.abort();
    }
  }

  pub fn is_done(&self) -> bool {
    self.0.result.get().is_some()
  }

  /// Waits for the command to complete and returns its primary result.
  /// Every call returns the same result.
  pub async fn wait(&self) -> CommandResult {
    let mut done = self.0.done.subscribe();
    // the sender lives as long as `self`, so this can't fail
    let _ = done.wait_for(|done| *done).await;
    match self.0.result.get() {
      Some(result) => result.clone(),
      None => CommandResult::from_error(Error::NotStarted),
    }
  }

  /// Delivers a signal to every stage that was spawned.
  ///
  /// Stages that already exited are skipped. Fails with
  /// `Error::NotStarted` when no stage was spawned, otherwise with the
  /// first delivery error.
  pub fn send(&self, kind: SignalKind) -> Result<(), Error> {
    let mut started = false;
    let mut first_error = None;
    for control in &self.0.controls {
      match control.send(kind) {
        Ok(was_started) => started |= was_started,
        Err(err) => {
          started = true;
          first_error.get_or_insert(err);
        }
      }
    }
    match first_error {
      Some(err) => Err(err),
      None if !started => Err(Error::NotStarted),
      None => Ok(()),
    }
  }

  pub fn interrupt(&self) -> Result<(), Error> {
    self.send(SignalKind::SIGINT)
  }

  /// Kills every stage unconditionally.
  ///
  /// Fails with `Error::NotStarted` when no stage was spawned.
  pub fn terminate(&self) -> Result<(), Error> {
    let mut started = false;
    for control in &self.0.controls {
      started |= control.request_kill();
    }
    if started {
      Ok(())
    } else {
      Err(Error::NotStarted)
    }
  }

  /// Sends `kind` and waits up to `timeout` for the command to exit,
  /// killing it when the time runs out.
  ///
  /// A zero timeout kills right away. Returns once the command has
  /// completed, or with the error from delivering `kind`.
  pub async fn graceful_shutdown(
    &self,
    kind: SignalKind,
    timeout: Duration,
  ) -> Result<(), Error> {
    if timeout.is_zero() {
      self.terminate()?;
      self.wait().await;
      return Ok(());
    }
    self.send(kind)?;
    let exited = tokio::time::timeout(timeout, self.wait()).await;
    if exited.is_err() {
      tracing::debug!(command = %self.0.command, "escalating to kill");
      self.terminate()?;
      self.wait().await;
    }
    Ok(())
  }

  /// Kills the command once `delay` elapses. Calling it again replaces
  /// the pending kill.
  ///
  /// The timer runs on the runtime the command was started on, so this
  /// can be called from any thread.
  pub fn kill_after(&self, delay: Duration) {
    let Some(runtime) = &self.0.runtime else {
      return;
    };
    if self.is_done() {
      return;
    }
    let inner = Arc::downgrade(&self.0);
    let timer = runtime.spawn(async move {
      tokio::time::sleep(delay).await;
      if let Some(inner) = inner.upgrade() {
        // stages that never started are reported by `wait`
        let _ = Process(inner).terminate();
      }
    });
    if let Some(previous) = self.0.kill_timer.lock().replace(timer) {
      previous.abort();
    }
  }
}
