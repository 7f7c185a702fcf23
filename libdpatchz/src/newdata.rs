//! Component F: a streaming zstd puller over the new-data section of a diff
//! file, starting at `newDataOffset` (spec.md §4.F).

use crate::error::{PatchError, Result};
use std::io::Read;
use zstd::stream::read::Decoder;

/// Pulls exactly `n` bytes at a time out of a single zstd frame. Single-pass
/// and not rewindable, matching the reconstruction driver's sequential
/// consumption of cover and new-data streams.
pub struct NewDataPuller<R: Read> {
	decoder: Decoder<'static, std::io::BufReader<R>>,
}

impl<R: Read> NewDataPuller<R> {
	/// `inner` must already be positioned at `newDataOffset`.
	pub fn new(inner: R) -> Result<Self> {
		let decoder = Decoder::new(inner).map_err(|e| PatchError::DecompressionFailure {
			context: "newData".to_string(),
			message: e.to_string(),
		})?;
		Ok(Self { decoder })
	}

	/// Fills `dst` completely, failing with `UnexpectedEof` if the
	/// underlying zstd frame ends first.
	pub fn read(&mut self, dst: &mut [u8]) -> Result<()> {
		self.decoder.read_exact(dst).map_err(|e| {
			if e.kind() == std::io::ErrorKind::UnexpectedEof {
				PatchError::eof(0, "newData")
			} else {
				PatchError::DecompressionFailure { context: "newData".to_string(), message: e.to_string() }
			}
		})
	}
}
