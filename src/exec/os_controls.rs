// Copyright 2018-2025 the Deno authors. MIT license.

use tokio::process::Command;

use super::signal::SignalKind;

/// Platform specific process creation knobs requested for a stage.
///
/// Every knob is accepted on every platform. Platforms that have no
/// equivalent ignore it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct OsControls {
  /// Place the child in a new process group (unix).
  pub setpgid: bool,
  /// Start the child in a new session (unix). Takes precedence over
  /// `setpgid` since a session leader is always a group leader.
  pub setsid: bool,
  /// Signal delivered to the child when its parent thread exits (linux).
  pub pdeathsig: Option<SignalKind>,
  /// Raw process creation flags (windows).
  pub creation_flags: Option<u32>,
  /// Create the child without a console window (windows).
  pub hide_window: bool,
}

impl OsControls {
  pub fn apply(&self, command: &mut Command) {
    platform().apply(self, command);
  }
}

trait ProcessControls: Send + Sync {
  fn apply(&self, controls: &OsControls, command: &mut Command);
}

#[cfg(unix)]
fn platform() -> &'static dyn ProcessControls {
  &unix::UnixControls
}

#[cfg(windows)]
fn platform() -> &'static dyn ProcessControls {
  &windows::WindowsControls
}

#[cfg(not(any(unix, windows)))]
fn platform() -> &'static dyn ProcessControls {
  &NullControls
}

#[cfg(not(any(unix, windows)))]
struct NullControls;

#[cfg(not(any(unix, windows)))]
impl ProcessControls for NullControls {
  fn apply(&self, _: &OsControls, _: &mut Command) {}
}

#[cfg(unix)]
mod unix {
  use std::io;

  use tokio::process::Command;

  use super::OsControls;
  use super::ProcessControls;

  pub struct UnixControls;

  impl ProcessControls for UnixControls {
    fn apply(&self, controls: &OsControls, command: &mut Command) {
      if controls.setsid {
        // SAFETY: setsid is async-signal-safe and touches no memory
        // shared with the parent.
        unsafe {
          command.pre_exec(|| {
            nix::unistd::setsid()
              .map(drop)
              .map_err(io::Error::from)
          });
        }
      } else if controls.setpgid {
        command.process_group(0);
      }

      #[cfg(target_os = "linux")]
      if let Some(kind) = controls.pdeathsig {
        match nix::sys::signal::Signal::try_from(i32::from(kind)) {
          // SAFETY: prctl is async-signal-safe
          Ok(signal) => unsafe {
            command.pre_exec(move || {
              nix::sys::prctl::set_pdeathsig(signal).map_err(io::Error::from)
            });
          },
          Err(err) => {
            tracing::warn!("ignoring parent death signal {kind:?}: {err}")
          }
        }
      }
    }
  }
}

#[cfg(windows)]
mod windows {
  use tokio::process::Command;
  use windows_sys::Win32::System::Threading::CREATE_NO_WINDOW;

  use super::OsControls;
  use super::ProcessControls;

  pub struct WindowsControls;

  impl ProcessControls for WindowsControls {
    fn apply(&self, controls: &OsControls, command: &mut Command) {
      let mut flags = controls.creation_flags.unwrap_or(0);
      if controls.hide_window {
        flags |= CREATE_NO_WINDOW;
      }
      if flags != 0 {
        command.creation_flags(flags);
      }
    }
  }
}
