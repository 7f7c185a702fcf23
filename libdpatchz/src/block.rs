//! Component C: a block that is either raw bytes or a single zstd frame
//! expanding to a known size (spec.md §4.C).

use crate::error::{PatchError, Result};
use crate::reader::ByteSource;

/// Reads either `uncompressed_size` raw bytes (when `compressed_size == 0`)
/// or `compressed_size` bytes of a zstd frame that must expand to exactly
/// `uncompressed_size` bytes.
///
/// This is a one-shot block read, not a stream: `zstd::bulk::decompress` is
/// given `uncompressed_size` as its destination capacity, so a frame that
/// would expand to more than that errors out of the decompressor itself,
/// and a frame that expands to less leaves a short `Vec` we check for below
/// -- together these enforce the "declared content size must equal
/// uncompressed_size" contract without needing to hand-parse the zstd frame
/// header.
pub fn read_maybe_compressed(
	reader: &mut impl ByteSource,
	uncompressed_size: usize,
	compressed_size: usize,
) -> Result<Vec<u8>> {
	if compressed_size == 0 {
		return reader.read_n(uncompressed_size);
	}

	let offset = reader.position();
	let compressed = reader.read_n(compressed_size)?;

	let decompressed = zstd::bulk::decompress(&compressed, uncompressed_size).map_err(|e| {
		PatchError::DecompressionFailure {
			context: reader.context().to_string(),
			message: e.to_string(),
		}
	})?;

	if decompressed.len() != uncompressed_size {
		return Err(PatchError::malformed(
			offset,
			format!(
				"compressed block declared content size {uncompressed_size}, got {}",
				decompressed.len()
			),
		));
	}

	Ok(decompressed)
}
