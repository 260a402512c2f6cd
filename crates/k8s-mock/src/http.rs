//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual kubeconfig-based
//! connections. It answers legacy discovery, single-object GETs and collection
//! lists filtered by equality label selectors; everything else is a
//! `404 NotFound` status.

use std::collections::HashMap;

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::discovery::MockDiscovery;

/// Objects keyed by (collection path, name).
type ResourceMap = HashMap<(String, String), Value>;

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery: MockDiscovery,
	/// Resources to serve as raw manifests. The server derives API paths from
	/// apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<Value>,
	/// Group-versions whose discovery endpoint answers `403 Forbidden`.
	#[builder(default)]
	forbidden_group_versions: Vec<String>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut resources = ResourceMap::new();
		for manifest in self.resources {
			match api_path_for_manifest(&manifest, &self.discovery) {
				Some((api_path, name)) => {
					trace!(api_path = %api_path, name = %name, "Registered resource");
					resources.insert((api_path, name), manifest);
				}
				None => debug!(?manifest, "Manifest has no matching resource type, not served"),
			}
		}

		mount_forbidden(&server, &self.forbidden_group_versions).await;
		mount_discovery(&server, &self.discovery).await;
		mount_resources(&server, resources).await;

		RunningHttpMockK8sServer { server }
	}
}

/// Derive the collection path and name for a manifest using discovery data.
fn api_path_for_manifest(manifest: &Value, discovery: &MockDiscovery) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?.to_string();
	let namespace = manifest
		.pointer("/metadata/namespace")
		.and_then(Value::as_str)
		.unwrap_or("default");

	let resource = discovery.primary(api_version, kind)?;
	let prefix = if api_version.contains('/') {
		format!("/apis/{api_version}")
	} else {
		format!("/api/{api_version}")
	};

	let path = if resource.namespaced {
		format!("{prefix}/namespaces/{namespace}/{}", resource.name)
	} else {
		format!("{prefix}/{}", resource.name)
	};

	Some((path, name))
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context", "default")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context
	/// name and default namespace.
	pub fn kubeconfig_with_context(&self, context_name: &str, namespace: &str) -> Kubeconfig {
		kubeconfig_for(&self.uri(), context_name, namespace)
	}

	/// Number of requests received for exactly `request_path`.
	pub async fn request_count(&self, request_path: &str) -> usize {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.iter()
			.filter(|req| req.url.path() == request_path)
			.count()
	}
}

/// Build a single-context kubeconfig for `server`.
///
/// Also useful for pointing a client at an address nothing listens on.
pub fn kubeconfig_for(server: &str, context_name: &str, namespace: &str) -> Kubeconfig {
	let cluster_name = "mock-cluster";
	let user_name = "mock-user";

	Kubeconfig {
		clusters: vec![NamedCluster {
			name: cluster_name.to_string(),
			cluster: Some(Cluster {
				server: Some(server.to_string()),
				insecure_skip_tls_verify: Some(true),
				..Default::default()
			}),
		}],
		contexts: vec![NamedContext {
			name: context_name.to_string(),
			context: Some(Context {
				cluster: cluster_name.to_string(),
				user: Some(user_name.to_string()),
				namespace: Some(namespace.to_string()),
				..Default::default()
			}),
		}],
		auth_infos: vec![NamedAuthInfo {
			name: user_name.to_string(),
			auth_info: Some(AuthInfo::default()),
		}],
		current_context: Some(context_name.to_string()),
		..Default::default()
	}
}

fn status(code: u16, reason: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

fn discovery_path(group_version: &str) -> String {
	if group_version.contains('/') {
		format!("/apis/{group_version}")
	} else {
		format!("/api/{group_version}")
	}
}

async fn mount_forbidden(server: &MockServer, group_versions: &[String]) {
	for gv in group_versions {
		Mock::given(method("GET"))
			.and(path(discovery_path(gv)))
			.respond_with(status(
				403,
				"Forbidden",
				&format!("discovery of {gv} is forbidden for user mock-user"),
			))
			.mount(server)
			.await;
	}
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery) {
	let resource_list = |gv: &str, resources: &[super::MockApiResource]| {
		let resources: Vec<_> = resources
			.iter()
			.map(|r| {
				json!({
					"name": r.name,
					"singularName": "",
					"namespaced": r.namespaced,
					"kind": r.kind,
					"verbs": r.verbs,
				})
			})
			.collect();
		json!({
			"kind": "APIResourceList",
			"apiVersion": "v1",
			"groupVersion": gv,
			"resources": resources
		})
	};

	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(
			ResponseTemplate::new(200).set_body_json(resource_list("v1", &discovery.core_resources)),
		)
		.mount(server)
		.await;

	for (gv, resources) in &discovery.group_resources {
		Mock::given(method("GET"))
			.and(path(discovery_path(gv)))
			.respond_with(ResponseTemplate::new(200).set_body_json(resource_list(gv, resources)))
			.mount(server)
			.await;
	}
}

async fn mount_resources(server: &MockServer, resources: ResourceMap) {
	// Catch-all: mounted last so discovery endpoints take precedence
	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let request_path = req.url.path().trim_end_matches('/');
			if is_collection_path(request_path) {
				let selector = req
					.url
					.query_pairs()
					.find(|(key, _)| key == "labelSelector")
					.map(|(_, value)| value.into_owned())
					.unwrap_or_default();
				return ResponseTemplate::new(200)
					.set_body_json(list_collection(&resources, request_path, &selector));
			}

			let (api_path, name) = parse_resource_path(request_path);
			match resources.get(&(api_path, name)) {
				Some(resource) => ResponseTemplate::new(200).set_body_json(resource.clone()),
				None => status(404, "NotFound", "not found"),
			}
		})
		.mount(server)
		.await;
}

/// Whether `path` addresses a collection rather than a single object.
///
/// `/api/v1/namespaces` lists namespaces; `/api/v1/namespaces/prod` reads one.
fn is_collection_path(path: &str) -> bool {
	let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
	let rest = match segments.as_slice() {
		["api", _, rest @ ..] | ["apis", _, _, rest @ ..] => rest,
		_ => return false,
	};
	matches!(rest, [_] | ["namespaces", _, _])
}

/// Objects stored under `collection` whose labels match every `key=value`
/// pair of `selector`.
fn list_collection(resources: &ResourceMap, collection: &str, selector: &str) -> Value {
	let required: Vec<(&str, &str)> = selector
		.split(',')
		.filter_map(|term| term.split_once('='))
		.collect();

	let mut items: Vec<(&String, &Value)> = resources
		.iter()
		.filter(|((api_path, _), _)| api_path == collection)
		.filter(|(_, resource)| {
			required.iter().all(|(key, value)| {
				resource
					.pointer(&format!("/metadata/labels/{key}"))
					.and_then(Value::as_str)
					== Some(*value)
			})
		})
		.map(|((_, name), resource)| (name, resource))
		.collect();
	items.sort_by(|(a, _), (b, _)| a.cmp(b));

	json!({
		"kind": "List",
		"apiVersion": "v1",
		"metadata": {"resourceVersion": ""},
		"items": items.into_iter().map(|(_, resource)| resource.clone()).collect::<Vec<_>>()
	})
}

/// Parse a Kubernetes API path into (api_path, resource_name).
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps/my-config` -> (`/api/v1/namespaces/default/configmaps`, `my-config`)
/// - `/api/v1/namespaces/my-ns` -> (`/api/v1/namespaces`, `my-ns`)
fn parse_resource_path(path: &str) -> (String, String) {
	let path = path.trim_end_matches('/');
	match path.rsplit_once('/') {
		Some((api_path, name)) => (api_path.to_string(), name.to_string()),
		None => (path.to_string(), String::new()),
	}
}
