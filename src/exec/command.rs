// Copyright 2018-2025 the Deno authors. MIT license.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use super::cancel::CancelSignal;
use super::os_controls::OsControls;
use super::pipes::LineCallback;
use super::pipes::OutputSink;
use super::pipes::StdinSource;
use super::result::PipeMode;
use super::signal::SignalKind;
use super::which::resolve_program;

type ExecCommandHook = Box<dyn FnOnce(&mut tokio::process::Command) + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum EnvMode {
  /// This process' environment plus the configured variables.
  #[default]
  Inherit,
  /// Only the configured variables.
  Only,
  /// Same as inherit, requested explicitly as an addition.
  Append,
}

/// Everything needed to spawn one stage of a command.
#[derive(Default)]
pub(crate) struct StageSpec {
  pub program: String,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub env_mode: EnvMode,
  pub dir: Option<PathBuf>,
  /// Signal supplied through `with_cancel`, kept so timeouts can derive
  /// from it.
  pub bound_cancel: Option<CancelSignal>,
  /// Signal the stage is actually bound to.
  pub cancel: Option<CancelSignal>,
  pub stdin: StdinSource,
  pub on_stdout: Option<LineCallback>,
  pub on_stderr: Option<LineCallback>,
  pub stdout_sink: Option<OutputSink>,
  pub stderr_sink: Option<OutputSink>,
  pub controls: OsControls,
  pub on_exec: Option<ExecCommandHook>,
}

impl StageSpec {
  fn new(program: String) -> Self {
    Self {
      program,
      ..Default::default()
    }
  }

  pub fn argv(&self) -> Vec<String> {
    let mut argv = Vec::with_capacity(self.args.len() + 1);
    argv.push(self.program.clone());
    argv.extend(self.args.iter().cloned());
    argv
  }

  /// The environment the child will see, sorted by key.
  pub fn effective_env(&self) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    if self.env_mode != EnvMode::Only {
      for (key, value) in std::env::vars_os() {
        merged.insert(
          normalize_env_key(&key.to_string_lossy()),
          value.to_string_lossy().into_owned(),
        );
      }
    }
    for (key, value) in &self.env {
      merged.insert(key.clone(), value.clone());
    }
    merged
  }

  /// Builds the process definition, resolving the program against the
  /// effective environment. Stdio is left for the pipeline to wire.
  pub fn to_command(&mut self) -> io::Result<tokio::process::Command> {
    let env = self.effective_env();
    let program = resolve_program(&self.program, &env, self.dir.as_deref())?;
    let mut command = tokio::process::Command::new(program);
    command
      .args(&self.args)
      .env_clear()
      .envs(env)
      .kill_on_drop(true);
    if let Some(dir) = &self.dir {
      command.current_dir(dir);
    }
    self.controls.apply(&mut command);
    if let Some(hook) = self.on_exec.take() {
      hook(&mut command);
    }
    Ok(command)
  }

  fn display(&self) -> String {
    let mut parts = Vec::with_capacity(self.args.len() + 1);
    parts.push(self.program.clone());
    for arg in &self.args {
      if arg.contains([' ', '\t', '\n', '\r']) {
        parts.push(format!("{arg:?}"));
      } else {
        parts.push(arg.clone());
      }
    }
    parts.join(" ")
  }

  fn shell_escaped(&self) -> String {
    std::iter::once(&self.program)
      .chain(&self.args)
      .map(|part| shell_escape(part))
      .collect::<Vec<_>>()
      .join(" ")
  }
}

fn normalize_env_key(key: &str) -> String {
  // environment variables are case insensitive on windows
  if cfg!(windows) {
    key.to_uppercase()
  } else {
    key.to_string()
  }
}

/// Quotes an argument so a POSIX shell reads it back verbatim.
pub(crate) fn shell_escape(arg: &str) -> String {
  if arg.is_empty() {
    return "''".to_string();
  }
  let is_safe = |c: char| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c);
  if arg.chars().all(is_safe) {
    return arg.to_string();
  }
  if arg.contains('\'')
    && !arg.contains(['\\', '"', '$', '`', '\n', '\r', '\t'])
  {
    return format!("\"{arg}\"");
  }
  format!("'{}'", arg.replace('\'', "'\"'\"'"))
}

/// Fluent builder for a command or a pipeline of commands.
///
/// Configuration methods apply to the most recently added stage, except
/// for the pipe mode and pseudo-terminal capture which apply to the
/// whole pipeline. Executing consumes the builder.
///
/// ```no_run
/// # async fn example() {
/// use proc_chain::Command;
///
/// let result = Command::new("printf")
///   .arg("go")
///   .pipe("tr")
///   .args(["a-z", "A-Z"])
///   .run()
///   .await;
/// assert_eq!(result.stdout, "GO");
/// # }
/// ```
pub struct Command {
  current: StageSpec,
  previous: Vec<StageSpec>,
  pipe_mode: PipeMode,
  pty: bool,
}

impl fmt::Debug for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Command")
      .field("command", &self.to_string())
      .field("pipe_mode", &self.pipe_mode)
      .field("pty", &self.pty)
      .finish()
  }
}

impl fmt::Display for Command {
  /// Renders every stage, quoting arguments that contain whitespace,
  /// joined by ` | `.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts = self
      .stages()
      .map(StageSpec::display)
      .collect::<Vec<_>>();
    f.write_str(&parts.join(" | "))
  }
}

impl Command {
  /// Constructs a new command without executing it.
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      current: StageSpec::new(program.into()),
      previous: Vec::new(),
      pipe_mode: PipeMode::Strict,
      pty: false,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.current.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let args = args.into_iter().map(Into::into);
    self.current.args.extend(args);
    self
  }

  /// Sets an environment variable, keeping the current env mode.
  pub fn env(
    mut self,
    key: impl Into<String>,
    value: impl Into<String>,
  ) -> Self {
    self
      .current
      .env
      .insert(normalize_env_key(&key.into()), value.into());
    self
  }

  pub fn envs<I, K, V>(mut self, vars: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    for (key, value) in vars {
      self = self.env(key, value);
    }
    self
  }

  /// Inherit this process' environment (the default).
  pub fn env_inherit(mut self) -> Self {
    self.current.env_mode = EnvMode::Inherit;
    self
  }

  /// Replaces the environment with exactly the given variables.
  pub fn env_only<I, K, V>(mut self, vars: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    self.current.env_mode = EnvMode::Only;
    self.current.env.clear();
    self.envs(vars)
  }

  /// Adds the given variables on top of the inherited environment.
  pub fn env_append<I, K, V>(mut self, vars: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    self.current.env_mode = EnvMode::Append;
    self.envs(vars)
  }

  pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.current.dir = Some(dir.into());
    self
  }

  /// Binds a cancellation signal. The process is killed when it fires
  /// and the stage reports the cancellation as its error.
  pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
    self.current.bound_cancel = Some(signal.clone());
    self.current.cancel = Some(signal);
    self
  }

  /// Kills the process once `timeout` elapses.
  ///
  /// Derives from a signal bound with `with_cancel` that has not fired
  /// yet. A previous timeout or deadline on this stage is replaced.
  pub fn with_timeout(self, timeout: Duration) -> Self {
    match Instant::now().checked_add(timeout) {
      Some(deadline) => self.with_deadline(deadline),
      None => self,
    }
  }

  /// Kills the process once `deadline` passes.
  pub fn with_deadline(mut self, deadline: Instant) -> Self {
    let parent = match &self.current.bound_cancel {
      Some(signal) if !signal.is_cancelled() => signal.clone(),
      _ => CancelSignal::new(),
    };
    self.current.cancel = Some(parent.with_deadline(deadline));
    self
  }

  pub fn stdin(mut self, source: StdinSource) -> Self {
    self.current.stdin = source;
    self
  }

  pub fn stdin_bytes(self, input: impl Into<Vec<u8>>) -> Self {
    self.stdin(StdinSource::Bytes(input.into()))
  }

  pub fn stdin_string(self, input: impl Into<String>) -> Self {
    self.stdin(StdinSource::Bytes(input.into().into_bytes()))
  }

  pub fn stdin_reader(self, reader: impl Read + Send + 'static) -> Self {
    self.stdin(StdinSource::Reader(Box::new(reader)))
  }

  pub fn stdin_file(self, file: File) -> Self {
    self.stdin(StdinSource::File(file))
  }

  /// Calls `callback` with every line written to stdout.
  pub fn on_stdout(
    mut self,
    callback: impl FnMut(&str) + Send + 'static,
  ) -> Self {
    self.current.on_stdout = Some(Box::new(callback));
    self
  }

  /// Calls `callback` with every line written to stderr.
  ///
  /// With pseudo-terminal capture stderr is merged into stdout, so both
  /// callbacks receive every line.
  pub fn on_stderr(
    mut self,
    callback: impl FnMut(&str) + Send + 'static,
  ) -> Self {
    self.current.on_stderr = Some(Box::new(callback));
    self
  }

  /// Also writes stdout to `sink`.
  ///
  /// When the sink is a terminal and neither a line callback nor
  /// combined output is requested, the child writes to it directly and
  /// stdout is not captured.
  pub fn stdout_writer(mut self, sink: OutputSink) -> Self {
    self.current.stdout_sink = Some(sink);
    self
  }

  /// Also writes stderr to `sink`. Same terminal rule as stdout.
  pub fn stderr_writer(mut self, sink: OutputSink) -> Self {
    self.current.stderr_sink = Some(sink);
    self
  }

  /// Runs the command attached to a pseudo-terminal.
  ///
  /// Stdout and stderr are merged into the captured stdout and stderr
  /// stays empty. Not available for pipelines.
  pub fn with_pty(mut self) -> Self {
    self.pty = true;
    self
  }

  /// Gives access to the process definition right before it is spawned.
  pub fn on_exec_command(
    mut self,
    hook: impl FnOnce(&mut tokio::process::Command) + Send + 'static,
  ) -> Self {
    self.current.on_exec = Some(Box::new(hook));
    self
  }

  /// Places the process in its own process group (unix only).
  pub fn setpgid(mut self, on: bool) -> Self {
    self.current.controls.setpgid = on;
    self
  }

  /// Starts the process in a new session (unix only).
  pub fn setsid(mut self, on: bool) -> Self {
    self.current.controls.setsid = on;
    self
  }

  /// Signal the process receives when its parent dies (linux only).
  pub fn pdeathsig(mut self, kind: SignalKind) -> Self {
    self.current.controls.pdeathsig = Some(kind);
    self
  }

  /// Raw process creation flags (windows only).
  pub fn creation_flags(mut self, flags: u32) -> Self {
    self.current.controls.creation_flags = Some(flags);
    self
  }

  /// Creates the process without a console window (windows only).
  pub fn hide_window(mut self, on: bool) -> Self {
    self.current.controls.hide_window = on;
    self
  }

  /// Appends a stage whose stdin is this stage's stdout.
  pub fn pipe(mut self, program: impl Into<String>) -> Self {
    let next = StageSpec::new(program.into());
    let current = std::mem::replace(&mut self.current, next);
    self.previous.push(current);
    self
  }

  pub fn pipe_strict(mut self) -> Self {
    self.pipe_mode = PipeMode::Strict;
    self
  }

  pub fn pipe_best_effort(mut self) -> Self {
    self.pipe_mode = PipeMode::BestEffort;
    self
  }

  pub fn pipe_mode(&self) -> PipeMode {
    self.pipe_mode
  }

  /// Program and arguments of the current stage.
  pub fn args_list(&self) -> Vec<String> {
    self.current.argv()
  }

  /// Sorted `KEY=VALUE` environment of the current stage.
  pub fn env_list(&self) -> Vec<String> {
    self
      .current
      .effective_env()
      .into_iter()
      .map(|(key, value)| format!("{key}={value}"))
      .collect()
  }

  /// Every stage rendered with POSIX shell quoting, joined by ` | `.
  pub fn shell_escaped(&self) -> String {
    let parts = self
      .stages()
      .map(StageSpec::shell_escaped)
      .collect::<Vec<_>>();
    parts.join(" | ")
  }

  pub fn stage_count(&self) -> usize {
    self.previous.len() + 1
  }

  pub(crate) fn uses_pty(&self) -> bool {
    self.pty
  }

  fn stages(&self) -> impl Iterator<Item = &StageSpec> {
    self
      .previous
      .iter()
      .chain(std::iter::once(&self.current))
  }

  pub(crate) fn into_stages(self) -> Vec<StageSpec> {
    let mut stages = self.previous;
    stages.push(self.current);
    stages
  }
}
