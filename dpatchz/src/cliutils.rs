use indicatif::{ProgressBar, ProgressStyle};
use libdpatchz::progress::Progress;
use std::sync::LazyLock;

static BAR_TEMPLATE: &str = "{spinner} [{percent:>3}% {bytes:>10}/{total_bytes:10}] {wide_bar}";
static BAR_TEMPLATE_FINISHED: &str = "{spinner} [{percent:>3}% {bytes:>10}/{total_bytes:10}] done";
static TICKS: &[&str] = &["⠙", "⠸", "⢰", "⣠", "⣄", "⡆", "⠇", "⠋", "✓"];

static BAR_STYLE: LazyLock<ProgressStyle> =
	LazyLock::new(|| ProgressStyle::with_template(BAR_TEMPLATE).unwrap().tick_strings(TICKS));
static BAR_STYLE_FINISHED: LazyLock<ProgressStyle> = LazyLock::new(|| {
	ProgressStyle::with_template(&console::style(BAR_TEMPLATE_FINISHED).green().to_string())
		.unwrap()
		.tick_strings(TICKS)
});

/// Implements [`libdpatchz::progress::Progress`] over an `indicatif` bar.
pub struct Bar(ProgressBar);

impl Bar {
	pub fn new() -> Self {
		Self(ProgressBar::new(0).with_style(BAR_STYLE.clone()))
	}
}

impl Progress for Bar {
	fn set_len(&mut self, len: u64) {
		self.0.set_length(len);
	}

	fn inc(&mut self, n: u64) {
		self.0.inc(n);
	}

	fn finish(&mut self) {
		self.0.set_style(BAR_STYLE_FINISHED.clone());
		self.0.abandon();
	}
}
