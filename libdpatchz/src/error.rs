//! Error taxonomy for parsing and patching (spec.md §7).

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, PatchError>;

/// The kinds of failure a patch run can hit. All of them are fatal: there is
/// no local recovery, matching the propagation policy in spec.md §7.
#[derive(Error, Debug)]
pub enum PatchError {
	/// Magic mismatch, varint overflow, a size invariant violated, a zstd
	/// frame's declared content size mismatched, a sub-reader wasn't at its
	/// declared end, or a reserved field was non-zero.
	#[error("malformed diff at offset {offset}: {message}")]
	MalformedFormat { offset: u64, message: String },

	/// zstd reported an error mid-frame.
	#[error("zstd decompression failed ({context}): {message}")]
	DecompressionFailure { context: String, message: String },

	/// Any reader underran its source.
	#[error("unexpected end of input while reading {context} (at offset {offset})")]
	UnexpectedEof { offset: u64, context: String },

	/// An old file referenced by the diff is missing, short, or unreadable.
	#[error("source directory inconsistent: {0}")]
	SourceInconsistency(String),

	/// Couldn't create a directory, open/write/flush/rename an output file.
	#[error("failed writing output at {path}: {message}")]
	OutputFailure { path: String, message: String },

	/// Preconditions the caller is responsible for (non-empty output dir,
	/// source not a directory, etc). Surfaced to CLI callers as-is.
	#[error("usage error: {0}")]
	UsageError(String),

	/// A plain I/O error that doesn't fit a more specific variant.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl PatchError {
	pub(crate) fn malformed(offset: u64, message: impl Into<String>) -> Self {
		PatchError::MalformedFormat { offset, message: message.into() }
	}

	pub(crate) fn eof(offset: u64, context: impl Into<String>) -> Self {
		PatchError::UnexpectedEof { offset, context: context.into() }
	}
}
