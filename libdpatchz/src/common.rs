//! Shared constants for the HDIFFZ directory-diff format (spec.md §3).

/// Default window size, in bytes, for the cached old-data reader (component
/// E) when the caller doesn't override it.
pub const DEFAULT_CACHE_WINDOW: usize = 4096;

/// Chunk size used when streaming new data out of the zstd pull stream and
/// when copying cover ranges out of the old-file virtual concatenation.
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;
