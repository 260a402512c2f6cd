//! Mock Kubernetes API discovery types.

use std::collections::BTreeMap;

/// Resource catalogs served by the mock, keyed by group-version.
///
/// Entries keep their order, so sub-resources listed before their parent are
/// served that way too.
#[derive(Debug, Clone)]
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	pub group_resources: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("secrets", "Secret"),
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::subresource("services/status", "Service", true),
				MockApiResource::namespaced("pods", "Pod"),
				MockApiResource::subresource("pods/log", "Pod", true),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
				MockApiResource::subresource("namespaces/status", "Namespace", false),
			],
			group_resources: BTreeMap::from([(
				"apps/v1".to_string(),
				vec![
					// Listed first on purpose: lookups must skip it
					MockApiResource::subresource("deployments/status", "Deployment", true),
					MockApiResource::namespaced("deployments", "Deployment"),
					MockApiResource::subresource("deployments/scale", "Scale", true),
					MockApiResource::namespaced("statefulsets", "StatefulSet"),
					MockApiResource::namespaced("daemonsets", "DaemonSet"),
				],
			)]),
		}
	}
}

impl MockDiscovery {
	/// Serve an extra group-version, e.g. a custom resource definition.
	#[must_use]
	pub fn with_group(mut self, group_version: &str, resources: Vec<MockApiResource>) -> Self {
		self.group_resources
			.insert(group_version.to_string(), resources);
		self
	}

	/// The catalog served for a group-version.
	pub fn resources(&self, group_version: &str) -> Option<&[MockApiResource]> {
		if group_version == "v1" {
			Some(&self.core_resources)
		} else {
			self.group_resources.get(group_version).map(Vec::as_slice)
		}
	}

	/// The primary resource serving `kind`, never a sub-resource.
	pub fn primary(&self, group_version: &str, kind: &str) -> Option<&MockApiResource> {
		self.resources(group_version)?
			.iter()
			.find(|r| r.kind == kind && !r.name.contains('/'))
	}
}

/// A mock API resource definition.
#[derive(Debug, Clone)]
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::new(name, kind, true, &["get", "list", "watch", "create", "patch", "delete"])
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::new(name, kind, false, &["get", "list", "watch", "create", "patch", "delete"])
	}

	/// A `<plural>/<sub>` endpoint sharing the parent's kind.
	pub fn subresource(name: &str, kind: &str, namespaced: bool) -> Self {
		Self::new(name, kind, namespaced, &["get", "patch", "update"])
	}

	fn new(name: &str, kind: &str, namespaced: bool, verbs: &[&str]) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced,
			verbs: verbs.iter().map(|v| v.to_string()).collect(),
		}
	}
}
