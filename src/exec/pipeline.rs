// Copyright 2018-2025 the Deno authors. MIT license.

use std::io;
use std::sync::Arc;

use futures::future::join_all;

use super::command::StageSpec;
use super::error::Error;
use super::result::CommandResult;
use super::result::PipeMode;
use super::result::reduce;
use super::stage::Stage;
use super::stage::StageControl;
use super::stage::StageWiring;

/// Stages wired stdout to stdin, in declaration order.
pub(crate) struct Pipeline {
  stages: Vec<Stage>,
}

impl Pipeline {
  /// Materializes every stage. Nothing is spawned yet.
  pub fn new(specs: Vec<StageSpec>, pty: bool, combined: bool) -> Self {
    let count = specs.len();
    let mut stages = Vec::with_capacity(count);
    let mut upstream = None;
    for (index, spec) in specs.into_iter().enumerate() {
      let wiring = StageWiring {
        upstream: upstream.take(),
        feeds_next: index + 1 < count,
        pty,
        combined,
      };
      let (stage, next) = Stage::new(spec, wiring);
      upstream = next;
      stages.push(stage);
    }
    Self { stages }
  }

  /// Starts the stages in order. Once a stage fails to start, every
  /// following stage fails with the same error without being spawned.
  pub fn start(&mut self) {
    let mut failure: Option<Arc<io::Error>> = None;
    for (index, stage) in self.stages.iter_mut().enumerate() {
      match &failure {
        Some(err) => stage.fail_start(err.clone()),
        None => {
          if let Err(err) = stage.start() {
            tracing::debug!(stage = index, "failed starting process: {err}");
            failure = Some(err);
          }
        }
      }
    }
  }

  pub fn controls(&self) -> Vec<Arc<StageControl>> {
    self.stages.iter().map(Stage::control).collect()
  }

  /// Waits for every stage concurrently, so a stage blocked writing to a
  /// later stage can't stall the others.
  pub async fn wait(&mut self) {
    join_all(self.stages.iter_mut().map(Stage::wait)).await;
  }

  /// One result per stage, in declaration order.
  pub fn results(&self) -> Vec<CommandResult> {
    self.stages.iter().map(Stage::result).collect()
  }

  /// The result representing the pipeline along with the combined
  /// output of the stage it came from.
  pub fn primary(&self, mode: PipeMode) -> (CommandResult, String) {
    match reduce(self.results(), mode) {
      Some((index, primary)) => (primary, self.stages[index].combined_output()),
      // a command always has at least one stage
      None => (CommandResult::from_error(Error::NotStarted), String::new()),
    }
  }
}
