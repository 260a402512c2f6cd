//! Utilities for command handlers.

use std::io::{self, ErrorKind, Write};

/// A writer wrapper that silently handles broken pipe errors.
///
/// Lets `kdrift diff release.yaml | head` exit cleanly once the reader goes
/// away instead of failing with EPIPE.
pub struct BrokenPipeGuard<W> {
	inner: W,
}

impl<W> BrokenPipeGuard<W> {
	pub fn new(inner: W) -> Self {
		Self { inner }
	}
}

fn ignore_broken_pipe<T>(result: io::Result<T>, closed: T) -> io::Result<T> {
	match result {
		Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(closed),
		other => other,
	}
}

impl<W: Write> Write for BrokenPipeGuard<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		ignore_broken_pipe(self.inner.write(buf), buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		ignore_broken_pipe(self.inner.flush(), ())
	}
}
