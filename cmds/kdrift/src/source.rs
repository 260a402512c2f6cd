//! Where declared manifests come from.

use std::{
	fs,
	io::{self, Read},
	path::PathBuf,
};

use thiserror::Error;

use crate::k8s::{release::ReleaseDecodeError, TransportError};

#[derive(Debug, Error)]
pub enum SourceError {
	#[error("reading manifests from {}", path.display())]
	ReadFile {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("reading manifests from stdin")]
	ReadStdin(#[source] io::Error),

	#[error("release {release} not found in namespace {namespace}")]
	ReleaseNotFound { release: String, namespace: String },

	#[error("listing storage of release {release}")]
	ReleaseStorage {
		release: String,
		#[source]
		source: TransportError,
	},

	#[error("decoding release {release}")]
	ReleaseDecode {
		release: String,
		#[source]
		source: ReleaseDecodeError,
	},
}

/// Supplies a release's rendered manifest stream and its namespace.
pub trait ManifestSource {
	fn manifest_text(&self) -> Result<String, SourceError>;

	/// `None` defers to the cluster connection's default namespace.
	fn namespace(&self) -> Option<&str>;
}

/// Manifests read from a file, or stdin when no path (or `-`) is given.
#[derive(Debug, Clone, Default)]
pub struct FileManifestSource {
	path: Option<PathBuf>,
	namespace: Option<String>,
}

impl FileManifestSource {
	pub fn new(path: Option<PathBuf>, namespace: Option<String>) -> Self {
		let path = path.filter(|p| p.as_os_str() != "-");
		Self { path, namespace }
	}

	pub fn is_stdin(&self) -> bool {
		self.path.is_none()
	}
}

impl ManifestSource for FileManifestSource {
	fn manifest_text(&self) -> Result<String, SourceError> {
		match &self.path {
			Some(path) => fs::read_to_string(path).map_err(|source| SourceError::ReadFile {
				path: path.clone(),
				source,
			}),
			None => {
				let mut text = String::new();
				io::stdin()
					.lock()
					.read_to_string(&mut text)
					.map_err(SourceError::ReadStdin)?;
				Ok(text)
			}
		}
	}

	fn namespace(&self) -> Option<&str> {
		self.namespace.as_deref()
	}
}

/// Manifests held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticManifestSource {
	text: String,
	namespace: Option<String>,
}

impl StaticManifestSource {
	pub fn new(text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			namespace: None,
		}
	}

	#[must_use]
	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = Some(namespace.into());
		self
	}
}

impl ManifestSource for StaticManifestSource {
	fn manifest_text(&self) -> Result<String, SourceError> {
		Ok(self.text.clone())
	}

	fn namespace(&self) -> Option<&str> {
		self.namespace.as_deref()
	}
}
