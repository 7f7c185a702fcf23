//! Component H: output commit -- either write straight to `output_dir`, or
//! (in-place mode) stage into a temp sibling of `source_dir` and merge it
//! back in on success (spec.md §4.H).
//!
//! Grounded in `original_source/src/patching.cpp`'s `get_tmp_dir`/
//! `merge_dirs` helpers, translated from `std::filesystem` to `std::fs`.

use crate::error::{PatchError, Result};
use crate::manifest::DirDiff;
use crate::patcher::{DirectorySink, Patcher};
use crate::progress::Progress;
use crate::vfs::OldFileVfs;
use camino::{Utf8Path, Utf8PathBuf};
use std::io::Read;

/// Picks `source_dir/tmp`, or `source_dir/1.tmp`, `2.tmp`, ... for the first
/// name not already in use.
fn pick_tmp_dir(source_dir: &Utf8Path) -> Utf8PathBuf {
	let candidate = source_dir.join("tmp");
	if !candidate.exists() {
		return candidate;
	}
	let mut n = 1u32;
	loop {
		let candidate = source_dir.join(format!("{n}.tmp"));
		if !candidate.exists() {
			return candidate;
		}
		n += 1;
	}
}

/// Moves every regular file under `staging` into its corresponding path
/// under `dest_root`, creating parent directories as needed, then removes
/// the now-empty staging tree.
fn merge_dirs(dest_root: &Utf8Path, staging: &Utf8Path) -> Result<()> {
	for entry in walk_files(staging)? {
		let relative = entry
			.strip_prefix(staging)
			.map_err(|e| PatchError::OutputFailure { path: entry.to_string(), message: e.to_string() })?;
		let target = dest_root.join(relative);
		if let Some(parent) = target.parent() {
			std::fs::create_dir_all(parent)
				.map_err(|e| PatchError::OutputFailure { path: parent.to_string(), message: e.to_string() })?;
		}
		std::fs::rename(&entry, &target).map_err(|e| PatchError::OutputFailure {
			path: target.to_string(),
			message: format!("rename from {entry}: {e}"),
		})?;
	}
	std::fs::remove_dir_all(staging)
		.map_err(|e| PatchError::OutputFailure { path: staging.to_string(), message: e.to_string() })?;
	Ok(())
}

fn walk_files(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
	let mut out = Vec::new();
	let mut stack = vec![root.to_path_buf()];
	while let Some(dir) = stack.pop() {
		for entry in std::fs::read_dir(&dir)
			.map_err(|e| PatchError::OutputFailure { path: dir.to_string(), message: e.to_string() })?
		{
			let entry = entry.map_err(|e| PatchError::OutputFailure { path: dir.to_string(), message: e.to_string() })?;
			let path = Utf8PathBuf::from_path_buf(entry.path())
				.map_err(|p| PatchError::OutputFailure { path: p.to_string_lossy().into_owned(), message: "non-UTF-8 path".into() })?;
			if path.is_dir() {
				stack.push(path);
			} else {
				out.push(path);
			}
		}
	}
	Ok(out)
}

/// Applies `diff` against `source_dir`, producing output under `output_dir`.
/// `output_dir` must either not exist or be empty; the caller is responsible
/// for that check (spec.md §6, "Directory contract").
pub fn apply_direct<R: Read>(
	diff: DirDiff,
	source_dir: &Utf8Path,
	output_dir: &Utf8Path,
	new_data_source: R,
	cache_window: usize,
	progress: &mut dyn Progress,
) -> Result<()> {
	std::fs::create_dir_all(output_dir)
		.map_err(|e| PatchError::OutputFailure { path: output_dir.to_string(), message: e.to_string() })?;
	for dir in &diff.head_data.new_dirs {
		std::fs::create_dir_all(output_dir.join(&dir.name))
			.map_err(|e| PatchError::OutputFailure { path: output_dir.to_string(), message: e.to_string() })?;
	}

	let old = OldFileVfs::new(source_dir, &diff.head_data.old_files, cache_window)?;
	let mut patcher = Patcher::new(diff, old, new_data_source)?;
	let mut sink = DirectorySink::new(output_dir.to_path_buf());
	patcher.run(&mut sink, progress)
}

/// Applies `diff` in place: patches into a temp sibling of `source_dir`,
/// then merges the result back into `source_dir` on success.
pub fn apply_in_place<R: Read>(
	diff: DirDiff,
	source_dir: &Utf8Path,
	new_data_source: R,
	cache_window: usize,
	progress: &mut dyn Progress,
) -> Result<()> {
	let staging = pick_tmp_dir(source_dir);
	std::fs::create_dir_all(&staging)
		.map_err(|e| PatchError::OutputFailure { path: staging.to_string(), message: e.to_string() })?;
	for dir in &diff.head_data.new_dirs {
		std::fs::create_dir_all(staging.join(&dir.name))
			.map_err(|e| PatchError::OutputFailure { path: staging.to_string(), message: e.to_string() })?;
	}

	let old = OldFileVfs::new(source_dir, &diff.head_data.old_files, cache_window)?;
	let mut patcher = Patcher::new(diff, old, new_data_source)?;
	let mut sink = DirectorySink::new(staging.clone());
	patcher.run(&mut sink, progress)?;

	merge_dirs(source_dir, &staging)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::manifest::{Cover, CoverBuf, DiffZ, FileEntry, HeadData};
	use camino::Utf8PathBuf;
	use std::io::Cursor;

	fn tiny_diff(name_old: &str, name_new: &str, content_len: u64) -> DirDiff {
		DirDiff {
			old_path_count: 1,
			old_path_sum_size: 0,
			new_path_count: 1,
			new_path_sum_size: 0,
			old_ref_file_count: 1,
			old_ref_size: content_len,
			new_ref_file_count: 1,
			new_ref_size: content_len,
			head_data_size: 0,
			head_data_compressed_size: 0,
			checksum_byte_size: 0,
			checksum: Vec::new(),
			head_data: HeadData {
				old_files: vec![FileEntry { name: name_old.into(), file_offset: 0, file_size: content_len }],
				new_files: vec![FileEntry { name: name_new.into(), file_offset: 0, file_size: content_len }],
				old_dirs: Vec::new(),
				new_dirs: Vec::new(),
			},
			diff_z: DiffZ {
				new_data_size: 0,
				old_data_size: content_len,
				cover_count: 1,
				cover_buf_size: 0,
				compressed_cover_buf_size: 0,
				rle_ctrl_buf_size: 0,
				compressed_rle_ctrl_buf_size: 0,
				rle_code_buf_size: 0,
				compressed_rle_code_buf_size: 0,
				new_data_diff_size: 0,
				compressed_new_data_diff_size: 0,
				cover_buf: CoverBuf { covers: vec![Cover { old_pos_delta: 0, new_pos_delta: 0, length: content_len }] },
				new_data_offset: 0,
			},
		}
	}

	fn empty_zstd_frame() -> Vec<u8> {
		zstd::stream::encode_all(Cursor::new(Vec::<u8>::new()), 3).unwrap()
	}

	#[test]
	fn direct_apply_writes_output_dir() {
		let tmp = tempfile::tempdir().unwrap();
		let source = Utf8PathBuf::from_path_buf(tmp.path().join("src")).unwrap();
		let output = Utf8PathBuf::from_path_buf(tmp.path().join("out")).unwrap();
		std::fs::create_dir_all(&source).unwrap();
		std::fs::write(source.join("a.txt"), b"hi").unwrap();

		let diff = tiny_diff("a.txt", "a.txt", 2);
		let mut progress = crate::progress::NullProgress;
		apply_direct(diff, &source, &output, Cursor::new(empty_zstd_frame()), 4096, &mut progress).unwrap();

		assert_eq!(std::fs::read(output.join("a.txt")).unwrap(), b"hi");
	}

	#[test]
	fn in_place_apply_merges_into_source() {
		let tmp = tempfile::tempdir().unwrap();
		let source = Utf8PathBuf::from_path_buf(tmp.path().join("src")).unwrap();
		std::fs::create_dir_all(&source).unwrap();
		std::fs::write(source.join("a.txt"), b"hi").unwrap();

		let diff = tiny_diff("a.txt", "a.txt", 2);
		let mut progress = crate::progress::NullProgress;
		apply_in_place(diff, &source, Cursor::new(empty_zstd_frame()), 4096, &mut progress).unwrap();

		assert_eq!(std::fs::read(source.join("a.txt")).unwrap(), b"hi");
		assert!(!source.join("tmp").exists());
	}

	#[test]
	fn pick_tmp_dir_avoids_existing() {
		let tmp = tempfile::tempdir().unwrap();
		let source = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
		std::fs::create_dir_all(source.join("tmp")).unwrap();
		std::fs::create_dir_all(source.join("1.tmp")).unwrap();
		assert_eq!(pick_tmp_dir(&source), source.join("2.tmp"));
	}
}
