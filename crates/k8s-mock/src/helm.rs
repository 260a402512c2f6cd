//! Helm release storage fixtures.

use std::io::Write;

use base64::{prelude::BASE64_STANDARD, Engine};
use flate2::{write::GzEncoder, Compression};
use serde_json::{json, Value};

/// One revision of a Helm release, stored the way Helm 3 stores it.
#[derive(Debug, Clone)]
pub struct MockHelmRelease {
	pub name: String,
	pub namespace: String,
	pub version: u32,
	pub manifest: String,
}

impl MockHelmRelease {
	pub fn new(name: &str, version: u32, manifest: &str) -> Self {
		Self {
			name: name.to_string(),
			namespace: "default".to_string(),
			version,
			manifest: manifest.to_string(),
		}
	}

	#[must_use]
	pub fn in_namespace(mut self, namespace: &str) -> Self {
		self.namespace = namespace.to_string();
		self
	}

	/// The release record Helm serializes into storage.
	pub fn record(&self) -> Value {
		json!({
			"name": self.name,
			"namespace": self.namespace,
			"version": self.version,
			"info": {"status": "deployed"},
			"manifest": self.manifest,
		})
	}

	/// The storage Secret as served by the API, `data` values base64 encoded.
	pub fn secret(&self) -> Value {
		let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
		encoder
			.write_all(self.record().to_string().as_bytes())
			.expect("writing to a Vec should never fail");
		let compressed = encoder
			.finish()
			.expect("writing to a Vec should never fail");

		let payload = BASE64_STANDARD.encode(compressed);
		json!({
			"apiVersion": "v1",
			"kind": "Secret",
			"type": "helm.sh/release.v1",
			"metadata": {
				"name": format!("sh.helm.release.v1.{}.v{}", self.name, self.version),
				"namespace": self.namespace,
				"labels": {
					"owner": "helm",
					"name": self.name,
					"version": self.version.to_string(),
					"status": "deployed"
				}
			},
			"data": {
				"release": BASE64_STANDARD.encode(payload)
			}
		})
	}
}
