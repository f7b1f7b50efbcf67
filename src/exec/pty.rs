// Copyright 2018-2025 the Deno authors. MIT license.

use std::fs::File;
use std::io;

use super::error::Error;

/// Both sides of a freshly opened pseudo-terminal.
pub(crate) struct PtyPair {
  pub master: File,
  pub slave: File,
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
mod platform {
  use std::fs::File;
  use std::io;

  use super::Error;
  use super::PtyPair;

  pub fn check_supported() -> Result<(), Error> {
    Ok(())
  }

  pub fn open() -> io::Result<PtyPair> {
    let pair = nix::pty::openpty(None, None)?;
    Ok(PtyPair {
      master: File::from(pair.master),
      slave: File::from(pair.slave),
    })
  }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod platform {
  use std::io;

  use super::Error;
  use super::PtyPair;

  pub fn check_supported() -> Result<(), Error> {
    Err(Error::PtyUnsupported)
  }

  pub fn open() -> io::Result<PtyPair> {
    Err(io::Error::new(
      io::ErrorKind::Unsupported,
      Error::PtyUnsupported,
    ))
  }
}

/// Fails when this platform can't provide pseudo-terminals.
pub(crate) fn check_supported() -> Result<(), Error> {
  platform::check_supported()
}

pub(crate) fn open() -> io::Result<PtyPair> {
  platform::open()
}
