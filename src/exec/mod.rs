// Copyright 2018-2025 the Deno authors. MIT license.

mod cancel;
mod command;
mod error;
mod execute;
mod os_controls;
mod pipeline;
mod pipes;
mod process;
mod pty;
mod result;
mod signal;
mod stage;
mod which;

pub use cancel::CancelGuard;
pub use cancel::CancelSignal;
pub use command::Command;
pub use error::CancelReason;
pub use error::Error;
pub use error::StartError;
pub use pipes::LineCallback;
pub use pipes::OutputSink;
pub use pipes::StdinSource;
pub use process::Process;
pub use result::CommandResult;
pub use result::PipeMode;
pub use result::first_error;
pub use signal::SignalKind;

#[cfg(all(test, unix))]
mod test_builder;
