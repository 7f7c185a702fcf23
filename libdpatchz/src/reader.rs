//! Component A: a byte reader with a counting logical position, plus an
//! in-memory sub-reader used for the compressed sub-blocks component C
//! hands back (spec.md §4.A).
//!
//! Grounded in the teacher's own use of `countio::Counter` to track bytes
//! read/written across a stream (see `zstddiff.rs`, `diffing.rs` in
//! `libfoldiff`); `countio` already does exactly the "track logical offset"
//! job spec.md asks of component A.

use crate::error::{PatchError, Result};
use countio::Counter;
use std::io::Read;

/// Anything the parser can pull bytes from: a file-backed stream, or an
/// in-memory slice left over from a decompressed sub-block.
pub trait ByteSource {
	/// Reads exactly `n` bytes, failing with `UnexpectedEof` on underrun.
	fn read_n(&mut self, n: usize) -> Result<Vec<u8>> {
		let mut buf = vec![0u8; n];
		self.read_exact_into(&mut buf)?;
		Ok(buf)
	}

	/// Reads exactly `buf.len()` bytes into `buf`.
	fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()>;

	/// Reads a single byte.
	fn read_byte(&mut self) -> Result<u8> {
		let mut b = [0u8];
		self.read_exact_into(&mut b)?;
		Ok(b[0])
	}

	/// Reads bytes up to (and optionally including) the next occurrence of
	/// `sentinel`. Used for the null-terminated path strings in head data.
	fn read_until(&mut self, sentinel: u8, consume_sentinel: bool) -> Result<Vec<u8>> {
		let mut out = Vec::new();
		loop {
			let b = self.read_byte()?;
			if b == sentinel {
				if !consume_sentinel {
					self.unread(b);
				}
				return Ok(out);
			}
			out.push(b);
		}
	}

	/// Logical bytes consumed since this reader (or sub-reader) was created.
	fn position(&self) -> u64;

	/// Pushes `b` back so the next read returns it again. Only ever called
	/// with the byte that was just read via `read_byte`.
	fn unread(&mut self, b: u8);

	/// Diagnostic label, chained from any parent reader this was split off.
	fn context(&self) -> &str;

	/// Splits off an in-memory sub-reader over `data`, labeled as a child of
	/// this reader's context (spec.md §4.A: "a context label chained from
	/// the parent for diagnostics").
	fn sub_reader(&self, data: Vec<u8>, label: &str) -> SliceReader {
		SliceReader::new(data, format!("{}/{label}", self.context()))
	}
}

/// A file-backed (or otherwise streaming) reader with a counted position.
pub struct FileReader<R> {
	inner: Counter<R>,
	/// A byte read from `inner` but not yet handed out again, left behind by
	/// `unread` (spec.md §4.A: `readUntil(..., consumeSentinel=false)`).
	pending: Option<u8>,
	context: String,
}

impl<R: Read> FileReader<R> {
	pub fn new(inner: R, context: impl Into<String>) -> Self {
		Self { inner: Counter::new(inner), pending: None, context: context.into() }
	}
}

impl<R: Read> ByteSource for FileReader<R> {
	fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()> {
		let mut start = 0;
		if let Some(b) = self.pending.take() {
			buf[0] = b;
			start = 1;
		}
		if start < buf.len() {
			self.inner.read_exact(&mut buf[start..]).map_err(|_| {
				PatchError::eof(self.inner.reader_bytes() as u64, self.context.clone())
			})?;
		}
		Ok(())
	}

	fn position(&self) -> u64 {
		self.inner.reader_bytes() as u64 - self.pending.is_some() as u64
	}

	fn unread(&mut self, b: u8) {
		debug_assert!(self.pending.is_none(), "can only push back one byte");
		self.pending = Some(b);
	}

	fn context(&self) -> &str {
		&self.context
	}
}

/// An in-memory sub-reader over a fully-decompressed or otherwise bounded
/// byte slice.
pub struct SliceReader {
	data: Vec<u8>,
	pos: usize,
	context: String,
}

impl SliceReader {
	pub fn new(data: Vec<u8>, context: impl Into<String>) -> Self {
		Self { data, pos: 0, context: context.into() }
	}

	/// Total length of the wrapped slice.
	pub fn len(&self) -> usize {
		self.data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}
}

impl ByteSource for SliceReader {
	fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()> {
		if self.pos + buf.len() > self.data.len() {
			return Err(PatchError::eof(self.pos as u64, self.context.clone()));
		}
		buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
		self.pos += buf.len();
		Ok(())
	}

	fn position(&self) -> u64 {
		self.pos as u64
	}

	fn unread(&mut self, _b: u8) {
		debug_assert!(self.pos > 0, "can only push back a byte just read");
		self.pos -= 1;
	}

	fn context(&self) -> &str {
		&self.context
	}
}
