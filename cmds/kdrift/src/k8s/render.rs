//! Line-level comparison of declared and live trees.

use std::fmt;

use serde_json::Value;
use similar::{Algorithm, ChangeTag, TextDiff};
use thiserror::Error;

use crate::yaml::to_yaml;

#[derive(Debug, Error)]
pub enum RenderError {
	#[error("serializing {side} resource to YAML")]
	Yaml {
		side: &'static str,
		#[source]
		source: serde_saphyr::ser_error::Error,
	},
}

/// How a line relates the declared side to the live side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineChange {
	Unchanged,
	/// Only present in the live object.
	Added,
	/// Only present in the declared manifest.
	Removed,
}

impl LineChange {
	pub fn marker(self) -> &'static str {
		match self {
			LineChange::Unchanged => "  ",
			LineChange::Added => "+ ",
			LineChange::Removed => "- ",
		}
	}

	/// The same change seen from the other side.
	pub fn inverse(self) -> Self {
		match self {
			LineChange::Unchanged => LineChange::Unchanged,
			LineChange::Added => LineChange::Removed,
			LineChange::Removed => LineChange::Added,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedLine {
	pub change: LineChange,
	pub text: String,
}

impl fmt::Display for AnnotatedLine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}{}", self.change.marker(), self.text)
	}
}

/// Diff the canonical YAML of both trees line by line.
///
/// Uses an LCS alignment; removed and added lines are interleaved where the
/// two sides diverge.
pub fn render(declared: &Value, live: &Value) -> Result<Vec<AnnotatedLine>, RenderError> {
	let declared_yaml = to_yaml(declared).map_err(|source| RenderError::Yaml {
		side: "declared",
		source,
	})?;
	let live_yaml = to_yaml(live).map_err(|source| RenderError::Yaml {
		side: "live",
		source,
	})?;

	Ok(diff_lines(&declared_yaml, &live_yaml))
}

fn diff_lines(old: &str, new: &str) -> Vec<AnnotatedLine> {
	let mut config = TextDiff::configure();
	config.algorithm(Algorithm::Lcs);
	let diff = config.diff_lines(old, new);

	diff.iter_all_changes()
		.map(|change| AnnotatedLine {
			change: match change.tag() {
				ChangeTag::Equal => LineChange::Unchanged,
				ChangeTag::Insert => LineChange::Added,
				ChangeTag::Delete => LineChange::Removed,
			},
			text: change.value().trim_end_matches(['\r', '\n']).to_string(),
		})
		.collect()
}
