//! Diff output formatting.
//!
//! Each resource gets a `=== <kind> <name> ===` header followed by its
//! annotated lines. Added lines are painted bright green and removed lines
//! bright red when color is enabled.

use std::io::Write;

use nu_ansi_term::{Color, Style};
use thiserror::Error;
use tracing::instrument;

use super::{
	diff::{ResourceDiff, ResourceFailure},
	render::{AnnotatedLine, LineChange},
};
use crate::commands::diff::ColorMode;

/// Errors that can occur during diff output.
#[derive(Debug, Error)]
pub enum OutputError {
	#[error("writing diff output")]
	Write(#[from] std::io::Error),
}

/// Handles diff output formatting with optional color.
pub struct DiffOutput<W: Write> {
	writer: W,
	use_color: bool,
}

impl<W: Write> DiffOutput<W> {
	/// Output bound for stdout.
	pub fn new(writer: W, color_mode: ColorMode) -> Self {
		Self::with_color(writer, color_mode.should_colorize())
	}

	/// Output with color already decided for the destination stream.
	pub fn with_color(writer: W, use_color: bool) -> Self {
		Self { writer, use_color }
	}

	/// Write a single resource diff, unchanged resources included.
	#[instrument(skip_all, fields(resource = %diff.display_name()))]
	pub fn write_diff(&mut self, diff: &ResourceDiff) -> Result<(), OutputError> {
		writeln!(self.writer, "=== {} {} ===", diff.kind, diff.name)?;
		for line in &diff.lines {
			self.write_line(line)?;
		}
		Ok(())
	}

	fn write_line(&mut self, line: &AnnotatedLine) -> Result<(), OutputError> {
		let color = match line.change {
			LineChange::Added => Some(Color::LightGreen),
			LineChange::Removed => Some(Color::LightRed),
			LineChange::Unchanged => None,
		};

		match color {
			Some(color) if self.use_color => {
				writeln!(self.writer, "{}", color.paint(line.to_string()))?
			}
			_ => writeln!(self.writer, "{line}")?,
		}
		Ok(())
	}

	/// Write summary mode output (just resource names grouped by status).
	#[instrument(skip_all, fields(diff_count = diffs.len()))]
	pub fn write_summary(&mut self, diffs: &[ResourceDiff]) -> Result<(), OutputError> {
		let (modified, unchanged): (Vec<_>, Vec<_>) = diffs.iter().partition(|d| d.has_changes());
		let modified: Vec<String> = modified.into_iter().map(ResourceDiff::display_name).collect();
		let unchanged: Vec<String> = unchanged.into_iter().map(ResourceDiff::display_name).collect();

		if !modified.is_empty() {
			self.write_section("Modified", &modified, Color::Yellow)?;
		}
		if !unchanged.is_empty() {
			self.write_section("Unchanged", &unchanged, Color::Default)?;
		}

		writeln!(self.writer)?;
		let total = format!("Total: {} resource(s) with changes", modified.len());
		if self.use_color {
			writeln!(self.writer, "{}", Style::new().bold().paint(total))?;
		} else {
			writeln!(self.writer, "{total}")?;
		}
		Ok(())
	}

	/// Write the resources that could not be compared.
	pub fn write_failures(&mut self, failures: &[ResourceFailure]) -> Result<(), OutputError> {
		for failure in failures {
			if self.use_color {
				writeln!(self.writer, "{}", Color::LightRed.paint(failure.to_string()))?;
			} else {
				writeln!(self.writer, "{failure}")?;
			}
		}
		Ok(())
	}

	pub fn flush(&mut self) -> Result<(), OutputError> {
		self.writer.flush()?;
		Ok(())
	}

	fn write_section(&mut self, title: &str, items: &[String], color: Color) -> Result<(), OutputError> {
		if self.use_color {
			writeln!(
				self.writer,
				"\n{}",
				Style::new().bold().fg(color).paint(format!("{title}:"))
			)?;
		} else {
			writeln!(self.writer, "\n{title}:")?;
		}

		for item in items {
			writeln!(self.writer, "  {item}")?;
		}
		Ok(())
	}
}
