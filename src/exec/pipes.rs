// Copyright 2018-2025 the Deno authors. MIT license.

use std::fmt;
use std::fs::File;
use std::io;
use std::io::IsTerminal;
use std::io::Read;
use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Callback receiving one line of output without its line terminator.
pub type LineCallback = Box<dyn FnMut(&str) + Send>;

/// Destination for a stage's raw output, written alongside capture.
pub enum OutputSink {
  // For stdout and stderr we go through Rust std's wrappers and
  // flush after every write to bypass the internal buffer.
  Stdout,
  Stderr,
  File(File),
  Writer(Box<dyn Write + Send>),
}

impl fmt::Debug for OutputSink {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Stdout => f.write_str("Stdout"),
      Self::Stderr => f.write_str("Stderr"),
      Self::File(file) => f.debug_tuple("File").field(file).finish(),
      Self::Writer(_) => f.write_str("Writer(..)"),
    }
  }
}

impl OutputSink {
  pub fn writer(writer: impl Write + Send + 'static) -> Self {
    Self::Writer(Box::new(writer))
  }

  pub(crate) fn is_terminal(&self) -> bool {
    match self {
      Self::Stdout => io::stdout().is_terminal(),
      Self::Stderr => io::stderr().is_terminal(),
      Self::File(file) => file.is_terminal(),
      Self::Writer(_) => false,
    }
  }

  /// Stdio handing the sink straight to the child, when the sink can be
  /// shared with it for the given stream.
  pub(crate) fn direct_stdio(&self, stream: Stream) -> Option<Stdio> {
    match (self, stream) {
      (Self::Stdout, Stream::Stdout) | (Self::Stderr, Stream::Stderr) => {
        Some(Stdio::inherit())
      }
      (Self::File(file), _) => file.try_clone().ok().map(Stdio::from),
      _ => None,
    }
  }

  pub(crate) fn is_same_stream(&self, other: &OutputSink) -> bool {
    matches!(
      (self, other),
      (Self::Stdout, Self::Stdout) | (Self::Stderr, Self::Stderr)
    )
  }

  pub(crate) fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
    match self {
      Self::Stdout => {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bytes)?;
        stdout.flush()
      }
      Self::Stderr => {
        let mut stderr = io::stderr().lock();
        stderr.write_all(bytes)?;
        stderr.flush()
      }
      Self::File(file) => file.write_all(bytes),
      Self::Writer(writer) => writer.write_all(bytes),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stream {
  Stdout,
  Stderr,
}

/// Where the first stage of a command reads its input from.
#[derive(Default)]
pub enum StdinSource {
  /// The null device.
  #[default]
  Null,
  Bytes(Vec<u8>),
  Reader(Box<dyn Read + Send>),
  File(File),
}

impl fmt::Debug for StdinSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Null => f.write_str("Null"),
      Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
      Self::Reader(_) => f.write_str("Reader(..)"),
      Self::File(file) => f.debug_tuple("File").field(file).finish(),
    }
  }
}

/// Data to copy into a child's stdin once it has been spawned.
pub(crate) struct StdinFeed {
  source: Box<dyn Read + Send>,
  writer: os_pipe::PipeWriter,
}

impl StdinFeed {
  /// Copies the source into the child's stdin on a blocking task.
  ///
  /// The writer is dropped when the copy finishes so the child sees EOF.
  pub fn spawn(mut self) {
    tokio::task::spawn_blocking(move || {
      match io::copy(&mut self.source, &mut self.writer) {
        Ok(_) => {}
        // the child exited or closed stdin without reading everything
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
        Err(err) => tracing::warn!("failed writing stdin: {err:#}"),
      }
    });
  }
}

impl StdinSource {
  pub(crate) fn into_stdio(self) -> io::Result<(Stdio, Option<StdinFeed>)> {
    let source: Box<dyn Read + Send> = match self {
      Self::Null => return Ok((Stdio::null(), None)),
      Self::File(file) => return Ok((Stdio::from(file), None)),
      Self::Bytes(bytes) => Box::new(io::Cursor::new(bytes)),
      Self::Reader(reader) => reader,
    };
    let (reader, writer) = os_pipe::pipe()?;
    Ok((Stdio::from(reader), Some(StdinFeed { source, writer })))
  }
}

/// Growable output buffer shared between a drain and its stage.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
  pub fn write(&self, bytes: &[u8]) {
    self.0.lock().extend_from_slice(bytes);
  }

  pub fn to_string_lossy(&self) -> String {
    String::from_utf8_lossy(&self.0.lock()).into_owned()
  }
}

/// Splits written bytes into lines and hands each one to the callbacks.
///
/// Only `\n` terminated lines are delivered, with a trailing `\r`
/// stripped. A final unterminated segment is never delivered.
pub(crate) struct LineWriter {
  callbacks: Vec<LineCallback>,
  pending: Vec<u8>,
}

impl LineWriter {
  pub fn new(callbacks: Vec<LineCallback>) -> Self {
    Self {
      callbacks,
      pending: Vec::new(),
    }
  }

  pub fn write(&mut self, bytes: &[u8]) {
    let mut rest = bytes;
    while let Some(index) = rest.iter().position(|b| *b == b'\n') {
      self.pending.extend_from_slice(&rest[..index]);
      self.emit();
      rest = &rest[index + 1..];
    }
    self.pending.extend_from_slice(rest);
  }

  fn emit(&mut self) {
    let text = String::from_utf8_lossy(&self.pending);
    let line = text.strip_suffix('\r').unwrap_or(&text);
    for callback in &mut self.callbacks {
      callback(line);
    }
    self.pending.clear();
  }
}

pub(crate) enum Sink {
  Raw(OutputSink),
  Buffer(SharedBuffer),
  Lines(LineWriter),
  /// Write end of the pipe feeding the next stage's stdin.
  Pipe(os_pipe::PipeWriter),
}

impl Sink {
  fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
    match self {
      Sink::Raw(sink) => sink.write_all(bytes),
      Sink::Buffer(buffer) => {
        buffer.write(bytes);
        Ok(())
      }
      Sink::Lines(lines) => {
        lines.write(bytes);
        Ok(())
      }
      Sink::Pipe(pipe) => pipe.write_all(bytes),
    }
  }

  fn name(&self) -> &'static str {
    match self {
      Sink::Raw(_) => "output writer",
      Sink::Buffer(_) => "buffer",
      Sink::Lines(_) => "line callback",
      Sink::Pipe(_) => "downstream pipe",
    }
  }
}

/// Writes every chunk to all of its sinks in order.
///
/// A sink that fails is detached and the remaining sinks keep receiving
/// output, so capture stays complete when the next stage stops reading.
#[derive(Default)]
pub(crate) struct FanOut {
  sinks: Vec<Sink>,
}

impl FanOut {
  pub fn push(&mut self, sink: Sink) {
    self.sinks.push(sink);
  }

  pub fn write(&mut self, bytes: &[u8]) {
    self.sinks.retain_mut(|sink| match sink.write(bytes) {
      Ok(()) => true,
      Err(err) => {
        if err.kind() != io::ErrorKind::BrokenPipe {
          tracing::warn!("detaching {}: {err:#}", sink.name());
        }
        false
      }
    });
  }
}

/// Reader side of a child's output paired with where it should go.
pub(crate) struct Drain {
  pub reader: Box<dyn Read + Send>,
  pub out: FanOut,
}

impl Drain {
  /// Pipes the reader to the fan-out on a blocking task. Dropping the
  /// fan-out at the end closes any downstream pipe.
  pub fn spawn(self) -> JoinHandle<Result<()>> {
    tokio::task::spawn_blocking(move || self.pipe_to_end())
  }

  fn pipe_to_end(mut self) -> Result<()> {
    let mut buffer = [0; 8192];
    loop {
      let size = match self.reader.read(&mut buffer) {
        Ok(0) => break,
        Ok(size) => size,
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) if is_closed_terminal(&err) => break,
        Err(err) => return Err(err.into()),
      };
      self.out.write(&buffer[..size]);
    }
    Ok(())
  }
}

/// Reading a pseudo-terminal master fails with EIO once the slave side
/// has been closed by every process.
fn is_closed_terminal(err: &io::Error) -> bool {
  #[cfg(unix)]
  {
    err.raw_os_error() == Some(nix::libc::EIO)
  }
  #[cfg(not(unix))]
  {
    let _ = err;
    false
  }
}

#[cfg(test)]
mod test {
  use std::io::Write;
  use std::sync::Arc;

  use parking_lot::Mutex;
  use pretty_assertions::assert_eq;

  use super::*;

  fn collector() -> (Arc<Mutex<Vec<String>>>, LineCallback) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    (
      lines,
      Box::new(move |line: &str| sink.lock().push(line.to_string())),
    )
  }

  #[test]
  fn line_writer_splits_on_newlines() {
    let (lines, callback) = collector();
    let mut writer = LineWriter::new(vec![callback]);
    writer.write(b"one\ntw");
    writer.write(b"o\r\n\nthree");
    assert_eq!(*lines.lock(), vec!["one", "two", ""]);
    writer.write(b"\n");
    assert_eq!(*lines.lock(), vec!["one", "two", "", "three"]);
  }

  #[test]
  fn line_writer_feeds_every_callback() {
    let (first, first_callback) = collector();
    let (second, second_callback) = collector();
    let mut writer = LineWriter::new(vec![first_callback, second_callback]);
    writer.write(b"a\nb\n");
    assert_eq!(*first.lock(), vec!["a", "b"]);
    assert_eq!(*second.lock(), vec!["a", "b"]);
  }

  struct FailingWriter;

  impl Write for FailingWriter {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
      Err(io::Error::other("boom"))
    }

    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn fan_out_detaches_failing_sinks() {
    let buffer = SharedBuffer::default();
    let mut out = FanOut::default();
    out.push(Sink::Raw(OutputSink::writer(FailingWriter)));
    out.push(Sink::Buffer(buffer.clone()));
    out.write(b"hello ");
    out.write(b"world");
    assert_eq!(out.sinks.len(), 1);
    assert_eq!(buffer.to_string_lossy(), "hello world");
  }

  #[test]
  fn drain_copies_until_eof() {
    let buffer = SharedBuffer::default();
    let mut out = FanOut::default();
    out.push(Sink::Buffer(buffer.clone()));
    let drain = Drain {
      reader: Box::new(io::Cursor::new(b"line\n".repeat(5000))),
      out,
    };
    drain.pipe_to_end().unwrap();
    assert_eq!(buffer.to_string_lossy().len(), 5 * 5000);
  }

  #[test]
  fn drain_closes_downstream_pipe() {
    let (mut reader, writer) = os_pipe::pipe().unwrap();
    let mut out = FanOut::default();
    out.push(Sink::Pipe(writer));
    let drain = Drain {
      reader: Box::new(io::Cursor::new(b"piped".to_vec())),
      out,
    };
    drain.pipe_to_end().unwrap();
    let mut text = String::new();
    reader.read_to_string(&mut text).unwrap();
    assert_eq!(text, "piped");
  }
}
