// Copyright 2018-2025 the Deno authors. MIT license.

use std::process::ExitStatus;

use super::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub enum SignalKind {
  SIGTERM,
  SIGKILL,
  SIGABRT,
  SIGQUIT,
  SIGINT,
  SIGSTOP,
  SIGHUP,
  Other(i32),
}

impl From<i32> for SignalKind {
  fn from(value: i32) -> Self {
    #[cfg(unix)]
    match value {
      nix::libc::SIGINT => SignalKind::SIGINT,
      nix::libc::SIGQUIT => SignalKind::SIGQUIT,
      nix::libc::SIGABRT => SignalKind::SIGABRT,
      nix::libc::SIGKILL => SignalKind::SIGKILL,
      nix::libc::SIGTERM => SignalKind::SIGTERM,
      nix::libc::SIGSTOP => SignalKind::SIGSTOP,
      nix::libc::SIGHUP => SignalKind::SIGHUP,
      _ => SignalKind::Other(value),
    }
    #[cfg(not(unix))]
    match value {
      1 => SignalKind::SIGHUP,
      2 => SignalKind::SIGINT,
      3 => SignalKind::SIGQUIT,
      6 => SignalKind::SIGABRT,
      9 => SignalKind::SIGKILL,
      15 => SignalKind::SIGTERM,
      19 => SignalKind::SIGSTOP,
      _ => SignalKind::Other(value),
    }
  }
}

impl From<SignalKind> for i32 {
  fn from(kind: SignalKind) -> i32 {
    #[cfg(unix)]
    match kind {
      SignalKind::SIGINT => nix::libc::SIGINT,
      SignalKind::SIGQUIT => nix::libc::SIGQUIT,
      SignalKind::SIGABRT => nix::libc::SIGABRT,
      SignalKind::SIGKILL => nix::libc::SIGKILL,
      SignalKind::SIGTERM => nix::libc::SIGTERM,
      SignalKind::SIGSTOP => nix::libc::SIGSTOP,
      SignalKind::SIGHUP => nix::libc::SIGHUP,
      SignalKind::Other(value) => value,
    }
    #[cfg(not(unix))]
    match kind {
      SignalKind::SIGHUP => 1,
      SignalKind::SIGINT => 2,
      SignalKind::SIGQUIT => 3,
      SignalKind::SIGABRT => 6,
      SignalKind::SIGKILL => 9,
      SignalKind::SIGTERM => 15,
      SignalKind::SIGSTOP => 19,
      SignalKind::Other(value) => value,
    }
  }
}

/// The signal that terminated a process, if it was terminated by one.
pub(crate) fn exit_signal(status: &ExitStatus) -> Option<SignalKind> {
  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(SignalKind::from)
  }
  #[cfg(not(unix))]
  {
    let _ = status;
    None
  }
}

/// Delivers a signal to a running process by pid.
#[cfg(unix)]
pub(crate) fn deliver(pid: u32, kind: SignalKind) -> Result<(), Error> {
  use std::sync::Arc;

  use nix::sys::signal::Signal;
  use nix::sys::signal::kill;
  use nix::unistd::Pid;

  let signal = Signal::try_from(i32::from(kind))
    .map_err(|errno| Error::Signal(Arc::new(errno.into())))?;
  tracing::trace!(pid, ?kind, "delivering signal");
  kill(Pid::from_raw(pid as i32), signal)
    .map_err(|errno| Error::Signal(Arc::new(errno.into())))
}

/// Only termination can be requested on platforms without POSIX signals,
/// and that goes through the stage's kill request instead.
#[cfg(not(unix))]
pub(crate) fn deliver(_pid: u32, kind: SignalKind) -> Result<(), Error> {
  Err(Error::UnsupportedSignal(kind))
}

#[cfg(test)]
mod test {
  use super::SignalKind;

  #[test]
  fn converts_signal_numbers() {
    for kind in [
      SignalKind::SIGTERM,
      SignalKind::SIGKILL,
      SignalKind::SIGABRT,
      SignalKind::SIGQUIT,
      SignalKind::SIGINT,
      SignalKind::SIGSTOP,
      SignalKind::SIGHUP,
    ] {
      let value: i32 = kind.into();
      assert_eq!(SignalKind::from(value), kind);
    }
    assert_eq!(SignalKind::from(9), SignalKind::SIGKILL);
    assert_eq!(SignalKind::from(1000), SignalKind::Other(1000));
  }
}
