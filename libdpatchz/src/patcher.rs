//! Component G: the reconstruction driver (spec.md §4.G).
//!
//! Strictly sequential by design (spec.md §5): no rayon, no worker pool,
//! unlike the teacher's `applying.rs` which fans whole-file diffs out across
//! a thread pool. Each output file is produced by interleaving covers
//! (copied from the cached old-file reader) and new data (pulled from the
//! streaming zstd decoder), in the exact order the diff file encodes them.

use crate::common::COPY_CHUNK_SIZE;
use crate::error::{PatchError, Result};
use crate::manifest::{Cover, DirDiff};
use crate::newdata::NewDataPuller;
use crate::progress::Progress;
use crate::vfs::OldFileVfs;
use std::fs::File;
use std::io::{Read, Write};

/// Where reconstructed new files get written. Component H provides two
/// implementations: straight into the output directory, or into a staging
/// tree that gets merged into place afterwards (in-place mode).
pub trait OutputSink {
	/// Opens a fresh sink for the new file named `name`, creating parent
	/// directories as needed.
	fn create(&mut self, name: &str) -> Result<Box<dyn Write + '_>>;
}

/// Drives reconstruction of every new file, in manifest order, writing each
/// one through an [`OutputSink`].
pub struct Patcher<R: Read> {
	diff: DirDiff,
	old: OldFileVfs,
	new_data: NewDataPuller<R>,
	cover_idx: usize,
	old_cursor: i64,
	pending_new_data: u64,
}

impl<R: Read> Patcher<R> {
	pub fn new(diff: DirDiff, old: OldFileVfs, new_data_source: R) -> Result<Self> {
		let new_data = NewDataPuller::new(new_data_source)?;
		let pending_new_data = diff
			.diff_z
			.cover_buf
			.covers
			.first()
			.map(|c| c.new_pos_delta)
			.unwrap_or(diff.diff_z.new_data_size);
		Ok(Self { diff, old, new_data, cover_idx: 0, old_cursor: 0, pending_new_data })
	}

	pub fn diff(&self) -> &DirDiff {
		&self.diff
	}

	/// Reconstructs every new file into `sink`, reporting progress on
	/// `progress`, then asserts the termination invariant (spec.md §4.G):
	/// every cover consumed and exactly `newDataSize` bytes pulled.
	pub fn run(&mut self, sink: &mut dyn OutputSink, progress: &mut dyn Progress) -> Result<()> {
		let total: u64 = self.diff.head_data.new_files.iter().map(|f| f.file_size).sum();
		progress.set_len(total);

		let files = self.diff.head_data.new_files.clone();
		for file in &files {
			let mut out = sink.create(&file.name)?;
			self.write_one_file(file.file_size, out.as_mut(), progress)?;
			out.flush().map_err(|e| PatchError::OutputFailure { path: file.name.clone(), message: e.to_string() })?;
		}

		let covers = &self.diff.diff_z.cover_buf.covers;
		if self.cover_idx != covers.len() {
			return Err(PatchError::SourceInconsistency(format!(
				"reconstruction ended with {} of {} covers unconsumed",
				covers.len() - self.cover_idx,
				covers.len()
			)));
		}
		if self.pending_new_data != 0 {
			return Err(PatchError::SourceInconsistency(format!(
				"reconstruction ended with {} bytes of new data unpulled",
				self.pending_new_data
			)));
		}
		progress.finish();
		Ok(())
	}

	fn write_one_file(&mut self, size: u64, out: &mut dyn Write, progress: &mut dyn Progress) -> Result<()> {
		let mut written_in_current_file = 0u64;
		let mut buf = vec![0u8; COPY_CHUNK_SIZE];

		while written_in_current_file < size {
			let remaining = size - written_in_current_file;
			let covers_len = self.diff.diff_z.cover_buf.covers.len();

			if self.pending_new_data == 0 && self.cover_idx < covers_len {
				let cov: Cover = self.diff.diff_z.cover_buf.covers[self.cover_idx];
				self.old_cursor += cov.old_pos_delta;
				if self.old_cursor < 0 {
					return Err(PatchError::MalformedFormat {
						offset: 0,
						message: format!("cover {} drove old cursor negative", self.cover_idx),
					});
				}
				let to_write = cov.length.min(remaining);

				self.old.seek(self.old_cursor as u64)?;
				copy_n(&mut self.old, out, to_write, &mut buf)?;

				written_in_current_file += to_write;
				self.old_cursor += to_write as i64;
				progress.inc(to_write);

				if to_write < cov.length {
					let cov_mut = &mut self.diff.diff_z.cover_buf.covers[self.cover_idx];
					cov_mut.length -= to_write;
					cov_mut.old_pos_delta = 0;
					cov_mut.new_pos_delta = 0;
					self.pending_new_data = 0;
				} else {
					self.cover_idx += 1;
					self.pending_new_data = self
						.diff
						.diff_z
						.cover_buf
						.covers
						.get(self.cover_idx)
						.map(|c| c.new_pos_delta)
						.unwrap_or(0);
				}
			} else {
				let mut to_write = remaining;
				if self.cover_idx < covers_len {
					to_write = to_write.min(self.pending_new_data);
				}
				pull_n(&mut self.new_data, out, to_write, &mut buf)?;
				self.pending_new_data -= to_write;
				written_in_current_file += to_write;
				progress.inc(to_write);
			}
		}
		Ok(())
	}
}

fn copy_n(old: &mut OldFileVfs, out: &mut dyn Write, mut n: u64, buf: &mut [u8]) -> Result<()> {
	while n > 0 {
		let chunk = n.min(buf.len() as u64) as usize;
		old.read_bytes(&mut buf[..chunk])?;
		out.write_all(&buf[..chunk]).map_err(|e| PatchError::OutputFailure {
			path: "<output stream>".to_string(),
			message: e.to_string(),
		})?;
		n -= chunk as u64;
	}
	Ok(())
}

fn pull_n<R: Read>(puller: &mut NewDataPuller<R>, out: &mut dyn Write, mut n: u64, buf: &mut [u8]) -> Result<()> {
	while n > 0 {
		let chunk = n.min(buf.len() as u64) as usize;
		puller.read(&mut buf[..chunk])?;
		out.write_all(&buf[..chunk]).map_err(|e| PatchError::OutputFailure {
			path: "<output stream>".to_string(),
			message: e.to_string(),
		})?;
		n -= chunk as u64;
	}
	Ok(())
}

/// An [`OutputSink`] that writes each new file straight into a directory
/// tree rooted at `root` (used directly for non-in-place runs, and for the
/// staging tree in in-place runs; see `commit.rs`).
pub struct DirectorySink {
	root: camino::Utf8PathBuf,
}

impl DirectorySink {
	pub fn new(root: impl Into<camino::Utf8PathBuf>) -> Self {
		Self { root: root.into() }
	}
}

impl OutputSink for DirectorySink {
	fn create(&mut self, name: &str) -> Result<Box<dyn Write + '_>> {
		let dest = self.root.join(name);
		if let Some(parent) = dest.parent() {
			std::fs::create_dir_all(parent)
				.map_err(|e| PatchError::OutputFailure { path: parent.to_string(), message: e.to_string() })?;
		}
		let file = File::create(&dest)
			.map_err(|e| PatchError::OutputFailure { path: dest.to_string(), message: e.to_string() })?;
		Ok(Box::new(file))
	}
}
