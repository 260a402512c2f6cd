//! Configuration file support for kdrift
//!
//! Supports `.kdrift.yaml` files that can be placed anywhere in the directory
//! hierarchy. kdrift searches from the working directory upward to the
//! filesystem root unless `--config` names a file explicitly.

use std::{
	fs, io,
	path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::commands::diff::ColorMode;

/// The name of the config file kdrift looks for
pub const CONFIG_FILE_NAME: &str = ".kdrift.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file: {}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("failed to parse config file: {}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_yaml_with_quirks::Error,
	},
}

/// Root configuration structure for .kdrift.yaml
///
/// Every key is optional. Command-line flags take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KdriftConfig {
	/// Compare live objects without stripping server-managed fields
	#[serde(default)]
	pub keep_common_changes: bool,

	/// Extra JSON pointers excluded from comparison
	#[serde(default)]
	pub ignore_fields: Vec<String>,

	/// Keep diffing after a resource cannot be located
	#[serde(default)]
	pub continue_on_error: bool,

	#[serde(default)]
	pub concurrency: Option<usize>,

	/// Kubeconfig context to use instead of the current one
	#[serde(default)]
	pub context: Option<String>,

	#[serde(default)]
	pub color: Option<ColorMode>,
}

impl KdriftConfig {
	/// Load config by searching from the given directory upward
	pub fn load_from_directory(start_dir: &Path) -> Result<Option<Self>, ConfigError> {
		find_config_file(start_dir)
			.map(|path| Self::load_from_file(&path))
			.transpose()
	}

	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::parse(&content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	fn parse(content: &str) -> Result<Self, serde_yaml_with_quirks::Error> {
		// An empty file decodes to null rather than an empty mapping
		if content.trim().is_empty() {
			return Ok(Self::default());
		}
		serde_yaml_with_quirks::from_str(content)
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let start = start_dir
		.canonicalize()
		.unwrap_or_else(|_| start_dir.to_path_buf());

	start
		.ancestors()
		.map(|dir| dir.join(CONFIG_FILE_NAME))
		.find(|candidate| candidate.is_file())
}
