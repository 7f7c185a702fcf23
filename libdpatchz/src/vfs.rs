//! Component E: a cached random-access reader over the virtual
//! concatenation of every file listed in `oldFiles` (spec.md §4.E).
//!
//! Grounded in `wowemulation-dev-cascette-rs`'s `ngdp-patch` crate, which
//! reaches for `lru` to cache fixed-size windows over patch-relevant byte
//! ranges; the teacher (`yellowsink-foldiff`) has no equivalent component
//! since it diffs whole files rather than re-chunking a virtual stream.

use crate::common::DEFAULT_CACHE_WINDOW;
use crate::error::{PatchError, Result};
use crate::manifest::FileEntry;
use camino::{Utf8Path, Utf8PathBuf};
use lru::LruCache;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;

struct OldFile {
	path: Utf8PathBuf,
	start: u64,
	size: u64,
	handle: Option<File>,
}

/// Key for a cached window: which file, and which window index within it.
type WindowKey = (usize, u64);

/// Random-access reader over the logical concatenation of every old file,
/// backed by a small LRU of fixed-size windows so that the common cover
/// pattern -- many short, locally clustered reads -- doesn't reopen or
/// re-read the same bytes repeatedly.
pub struct OldFileVfs {
	source_dir: Utf8PathBuf,
	files: Vec<OldFile>,
	total_size: u64,
	window_size: usize,
	cache: LruCache<WindowKey, Vec<u8>>,
	pos: u64,
}

impl OldFileVfs {
	/// Builds the reader from `oldFiles` entries (in manifest order) rooted
	/// at `source_dir`. Files are opened lazily on first read.
	pub fn new(source_dir: &Utf8Path, entries: &[FileEntry], window_size: usize) -> Result<Self> {
		let mut files = Vec::with_capacity(entries.len());
		let mut offset = 0u64;
		for e in entries {
			files.push(OldFile {
				path: source_dir.join(&e.name),
				start: offset,
				size: e.file_size,
				handle: None,
			});
			offset += e.file_size;
		}
		let cache_cap = NonZeroUsize::new(64).expect("64 is nonzero");
		Ok(Self {
			source_dir: source_dir.to_path_buf(),
			files,
			total_size: offset,
			window_size: window_size.max(1),
			cache: LruCache::new(cache_cap),
			pos: 0,
		})
	}

	pub fn total_size(&self) -> u64 {
		self.total_size
	}

	/// Seeks the virtual cursor. Fails if `offset > total_size` (note: equal
	/// is permitted, as a zero-length read from end-of-stream is legal).
	pub fn seek(&mut self, offset: u64) -> Result<()> {
		if offset > self.total_size {
			return Err(PatchError::SourceInconsistency(format!(
				"seek to {offset} past virtual end {}",
				self.total_size
			)));
		}
		self.pos = offset;
		Ok(())
	}

	fn locate(&self, offset: u64) -> Result<usize> {
		let idx = self.files.partition_point(|f| f.start + f.size <= offset);
		if idx < self.files.len() {
			Ok(idx)
		} else {
			Err(PatchError::SourceInconsistency(format!("virtual offset {offset} has no owning old file")))
		}
	}

	fn window(&mut self, file_idx: usize, window_idx: u64) -> Result<&[u8]> {
		let key = (file_idx, window_idx);
		if !self.cache.contains(&key) {
			let window_start = window_idx * self.window_size as u64;
			let f = &mut self.files[file_idx];
			if f.handle.is_none() {
				let handle = File::open(&f.path).map_err(|e| {
					PatchError::SourceInconsistency(format!("opening old file {}: {e}", f.path))
				})?;
				f.handle = Some(handle);
			}
			let remaining_in_file = f.size.saturating_sub(window_start);
			let n = remaining_in_file.min(self.window_size as u64) as usize;
			let mut buf = vec![0u8; n];
			let handle = f.handle.as_mut().expect("just opened above");
			handle
				.seek(SeekFrom::Start(window_start))
				.map_err(|e| PatchError::SourceInconsistency(format!("seeking {}: {e}", f.path)))?;
			handle
				.read_exact(&mut buf)
				.map_err(|e| PatchError::SourceInconsistency(format!("reading {}: {e}", f.path)))?;
			self.cache.put(key, buf);
		}
		Ok(self.cache.get(&key).expect("just inserted").as_slice())
	}

	/// Reads exactly `out.len()` bytes starting at the current virtual
	/// position, advancing it, crossing old-file boundaries transparently.
	pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
		let mut filled = 0usize;
		while filled < out.len() {
			let offset = self.pos;
			let file_idx = self.locate(offset)?;
			let f_start = self.files[file_idx].start;
			let intra = offset - f_start;
			let window_idx = intra / self.window_size as u64;
			let window_off = (intra % self.window_size as u64) as usize;

			let window = self.window(file_idx, window_idx)?;
			if window_off >= window.len() {
				return Err(PatchError::SourceInconsistency(format!(
					"old file {} is shorter than declared size",
					self.files[file_idx].path
				)));
			}
			let avail = window.len() - window_off;
			let want = out.len() - filled;
			let n = avail.min(want);
			out[filled..filled + n].copy_from_slice(&window[window_off..window_off + n]);
			filled += n;
			self.pos += n as u64;
		}
		Ok(())
	}

	pub fn position(&self) -> u64 {
		self.pos
	}

	/// Path on disk backing the declared virtual file containing `offset`,
	/// used for error messages.
	pub fn source_dir(&self) -> &Utf8Path {
		&self.source_dir
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use camino::Utf8PathBuf;

	fn write_files(dir: &Utf8Path, contents: &[(&str, &[u8])]) -> Vec<FileEntry> {
		let mut entries = Vec::new();
		for (name, data) in contents {
			std::fs::write(dir.join(name), data).unwrap();
			entries.push(FileEntry { name: name.to_string(), file_offset: 0, file_size: data.len() as u64 });
		}
		entries
	}

	#[test]
	fn reads_across_file_boundary() {
		let tmp = tempfile::tempdir().unwrap();
		let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
		let entries = write_files(&dir, &[("a.bin", b"AAAA"), ("b.bin", b"BBBB")]);
		let mut vfs = OldFileVfs::new(&dir, &entries, 2).unwrap();
		vfs.seek(2).unwrap();
		let mut out = vec![0u8; 4];
		vfs.read_bytes(&mut out).unwrap();
		assert_eq!(out, b"AABB");
	}

	#[test]
	fn seek_past_end_fails() {
		let tmp = tempfile::tempdir().unwrap();
		let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
		let entries = write_files(&dir, &[("a.bin", b"AAAA")]);
		let mut vfs = OldFileVfs::new(&dir, &entries, DEFAULT_CACHE_WINDOW).unwrap();
		assert!(vfs.seek(5).is_err());
	}

	#[test]
	fn missing_old_file_is_source_inconsistency() {
		let tmp = tempfile::tempdir().unwrap();
		let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
		let entries = vec![FileEntry { name: "missing.bin".into(), file_offset: 0, file_size: 4 }];
		let mut vfs = OldFileVfs::new(&dir, &entries, DEFAULT_CACHE_WINDOW).unwrap();
		let mut out = vec![0u8; 4];
		assert!(vfs.read_bytes(&mut out).is_err());
	}
}
