use anyhow::{bail, ensure, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use libdpatchz::commit::{apply_direct, apply_in_place};
use libdpatchz::manifest::DirDiff;
use std::fs::File;

mod cliutils;

/// Applies an HDIFFZ directory diff (HDIFF19 / HDIFF13) to a source
/// directory.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
	/// Path to the diff file
	diff_file: String,
	/// Path to the source / "old" directory
	source_dir: String,
	/// Path to where the patched directory is created (ignored with -i)
	output_dir: Option<String>,
	/// Print the parsed manifest summary before patching
	#[arg(short, long, default_value_t = false)]
	verbose: bool,
	/// Cache-window size in bytes for the old-file reader
	#[arg(short, long, default_value_t = 4096)]
	cache: usize,
	/// Patch in place: stage into a temp sibling of source_dir, then merge back
	#[arg(short, long, default_value_t = false)]
	in_place: bool,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let source_dir: Utf8PathBuf = cli.source_dir.into();
	ensure!(
		std::fs::metadata(&source_dir).context("source_dir must exist")?.is_dir(),
		"source_dir must be a directory"
	);

	let diff_file = File::open(&cli.diff_file).context("failed to open diff file")?;
	let diff = DirDiff::parse(diff_file).context("failed to parse diff file")?;

	if cli.verbose {
		eprintln!("{}", console::style(&diff).dim());
	}

	let new_data_offset = diff.diff_z.new_data_offset;
	let mut new_data_file = File::open(&cli.diff_file).context("failed to reopen diff file for new data")?;
	use std::io::{Seek, SeekFrom};
	new_data_file
		.seek(SeekFrom::Start(new_data_offset))
		.context("failed to seek to new-data stream")?;

	let mut progress = cliutils::Bar::new();

	if cli.in_place {
		apply_in_place(diff, &source_dir, new_data_file, cli.cache, &mut progress)
			.context("failed to apply diff in place")?;
	} else {
		let output_dir: Utf8Path = match &cli.output_dir {
			Some(p) => Utf8Path::new(p),
			None => bail!("output_dir is required unless -i/--in-place is set"),
		};
		let output_dir = output_dir.to_owned();
		if std::fs::exists(&output_dir).context("failed to check for output existence")? {
			let entries = std::fs::read_dir(&output_dir).context("failed to read output_dir")?;
			ensure!(entries.count() == 0, "output_dir exists and is not empty");
		}
		apply_direct(diff, &source_dir, &output_dir, new_data_file, cli.cache, &mut progress)
			.context("failed to apply diff")?;
	}

	Ok(())
}
