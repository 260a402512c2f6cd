//! Helm release storage.
//!
//! Helm keeps one Secret per release revision in the release namespace,
//! labelled `owner=helm`, `name=<release>` and `version=<revision>`. The
//! `release` key holds the release record as gzipped JSON, base64 encoded
//! once more on top of the Secret's own encoding.

use std::io::Read;

use base64::{prelude::BASE64_STANDARD, Engine};
use flate2::read::GzDecoder;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use super::client::ClusterConnection;
use crate::source::{ManifestSource, SourceError};

/// Data key of the encoded release record.
const RELEASE_KEY: &str = "release";

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

#[derive(Debug, Error)]
pub enum ReleaseDecodeError {
	#[error("secret has no `release` entry")]
	MissingPayload,

	#[error("invalid base64 payload")]
	Base64(#[from] base64::DecodeError),

	#[error("decompressing payload")]
	Gzip(#[source] std::io::Error),

	#[error("invalid release record")]
	Json(#[from] serde_json::Error),
}

/// The fields of a Helm release record that drift detection needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HelmRelease {
	pub name: String,
	#[serde(default)]
	pub namespace: String,
	pub version: u32,
	#[serde(default)]
	pub manifest: String,
}

impl HelmRelease {
	/// Decode the `release` payload of a storage Secret.
	///
	/// Records written without compression are plain JSON and accepted as is.
	pub fn decode(payload: &[u8]) -> Result<Self, ReleaseDecodeError> {
		let raw = BASE64_STANDARD.decode(payload)?;
		let json = if raw.starts_with(&GZIP_MAGIC) {
			let mut decompressed = Vec::new();
			GzDecoder::new(raw.as_slice())
				.read_to_end(&mut decompressed)
				.map_err(ReleaseDecodeError::Gzip)?;
			decompressed
		} else {
			raw
		};
		Ok(serde_json::from_slice(&json)?)
	}
}

/// Revision number from a storage Secret's `version` label.
fn revision(secret: &Secret) -> Option<u32> {
	secret.metadata.labels.as_ref()?.get("version")?.parse().ok()
}

/// The storage Secret of the newest revision.
fn latest_revision(secrets: Vec<Secret>) -> Option<Secret> {
	secrets
		.into_iter()
		.filter_map(|secret| revision(&secret).map(|version| (version, secret)))
		.max_by_key(|(version, _)| *version)
		.map(|(_, secret)| secret)
}

/// Manifests of the latest revision of a Helm release.
#[derive(Debug, Clone)]
pub struct HelmReleaseSource {
	release: HelmRelease,
}

impl HelmReleaseSource {
	/// Read the newest revision of `release` from its storage Secrets.
	///
	/// `namespace` is where Helm stored the release, defaulting to the
	/// connection's namespace.
	#[instrument(skip(connection))]
	pub async fn fetch(
		connection: &ClusterConnection,
		release: &str,
		namespace: Option<&str>,
	) -> Result<Self, SourceError> {
		let namespace = namespace.unwrap_or(connection.default_namespace());
		let api: Api<Secret> = Api::namespaced(connection.client().clone(), namespace);
		let params = ListParams::default().labels(&format!("owner=helm,name={release}"));

		let secrets = api
			.list(&params)
			.await
			.map_err(|e| SourceError::ReleaseStorage {
				release: release.to_string(),
				source: e.into(),
			})?
			.items;
		tracing::debug!(revisions = secrets.len(), "found release storage");

		let secret = latest_revision(secrets).ok_or_else(|| SourceError::ReleaseNotFound {
			release: release.to_string(),
			namespace: namespace.to_string(),
		})?;
		Self::from_secret(release, &secret)
	}

	fn from_secret(release: &str, secret: &Secret) -> Result<Self, SourceError> {
		let decoded = secret
			.data
			.as_ref()
			.and_then(|data| data.get(RELEASE_KEY))
			.ok_or(ReleaseDecodeError::MissingPayload)
			.and_then(|payload| HelmRelease::decode(&payload.0))
			.map_err(|source| SourceError::ReleaseDecode {
				release: release.to_string(),
				source,
			})?;

		tracing::debug!(
			version = decoded.version,
			namespace = %decoded.namespace,
			"decoded release"
		);
		Ok(Self { release: decoded })
	}

	pub fn release(&self) -> &HelmRelease {
		&self.release
	}
}

impl ManifestSource for HelmReleaseSource {
	fn manifest_text(&self) -> Result<String, SourceError> {
		Ok(self.release.manifest.clone())
	}

	fn namespace(&self) -> Option<&str> {
		Some(self.release.namespace.as_str()).filter(|ns| !ns.is_empty())
	}
}
