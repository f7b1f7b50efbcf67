// Copyright 2018-2025 the Deno authors. MIT license.

//! Builds, chains and runs external processes.
//!
//! A [`Command`] describes one process or a pipeline of processes
//! connected stdout to stdin. Running it captures every stage's output
//! and reduces the stages' outcomes to one [`CommandResult`] according to
//! the command's [`PipeMode`].

#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![deny(clippy::unused_async)]

mod exec;

pub use exec::*;
