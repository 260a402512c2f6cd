//! Integration tests for the diff command using a mock Kubernetes API server.
//!
//! These call `diff_release` with a real `ClusterConnection` pointed at the
//! mock, covering the flow from manifest parsing to rendered output.

use std::process::ExitCode;

use assert_matches::assert_matches;
use indoc::indoc;
use k8s_mock::{HttpMockK8sServer, MockApiResource, MockDiscovery, RunningHttpMockK8sServer};
use kdrift::{
	commands::diff::{diff_release, exit_code, ColorMode, DiffOpts, EXIT_DIFFERENCES},
	k8s::{
		client::ClusterConnection,
		diff::{DiffError, DiffReport, FailurePolicy},
		locate::LocateError,
		normalize::FieldFilter,
	},
	source::StaticManifestSource,
};
use rstest::rstest;
use serde_json::{json, Value};

fn cluster_state() -> Vec<Value> {
	vec![
		json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {
				"name": "settings",
				"namespace": "default",
				"uid": "6f1c2a7e-0b1d-4c55-9f0e-3d2a1b7c9e10",
				"resourceVersion": "4821",
				"creationTimestamp": "2024-01-01T00:00:00Z"
			},
			"data": {"mode": "fast"}
		}),
		json!({
			"apiVersion": "apps/v1",
			"kind": "Deployment",
			"metadata": {
				"name": "web",
				"namespace": "default",
				"generation": 7
			},
			"spec": {"replicas": 5},
			"status": {"readyReplicas": 5}
		}),
		json!({
			"apiVersion": "v1",
			"kind": "Namespace",
			"metadata": {"name": "prod"}
		}),
		json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": "settings", "namespace": "prod"},
			"data": {"mode": "safe"}
		}),
	]
}

const RELEASE: &str = indoc! {"
	apiVersion: v1
	kind: ConfigMap
	metadata:
	  name: settings
	data:
	  mode: fast
	---
	apiVersion: apps/v1
	kind: Deployment
	metadata:
	  name: web
	spec:
	  replicas: 3
"};

const RELEASE_WITH_MISSING: &str = indoc! {"
	apiVersion: v1
	kind: ConfigMap
	metadata:
	  name: settings
	data:
	  mode: fast
	---
	apiVersion: v1
	kind: ConfigMap
	metadata:
	  name: foo
	data:
	  a: b
	---
	apiVersion: apps/v1
	kind: Deployment
	metadata:
	  name: web
	spec:
	  replicas: 3
"};

async fn start(resources: Vec<Value>) -> RunningHttpMockK8sServer {
	HttpMockK8sServer::builder()
		.resources(resources)
		.build()
		.start()
		.await
}

/// Run `diff_release` against the mock and capture stdout.
async fn run_diff(
	server: &RunningHttpMockK8sServer,
	source: StaticManifestSource,
	opts: DiffOpts,
) -> (anyhow::Result<DiffReport>, String) {
	let connection = ClusterConnection::from_kubeconfig(server.kubeconfig(), None)
		.await
		.expect("failed to create connection");

	// Ensure color is disabled for consistent output
	let opts = DiffOpts {
		color: ColorMode::Never,
		..opts
	};

	let mut output = Vec::new();
	let result = diff_release(&source, connection, opts, &mut output).await;
	let output = String::from_utf8(output).expect("diff output should be valid UTF-8");
	(result, output)
}

#[tokio::test]
async fn test_diff_prints_every_resource_in_order() {
	let server = start(cluster_state()).await;

	let (result, output) = run_diff(&server, StaticManifestSource::new(RELEASE), DiffOpts::default()).await;

	let report = result.expect("diff failed");
	assert!(report.has_changes());
	assert_eq!(exit_code(&report, false).unwrap(), ExitCode::SUCCESS);
	assert_eq!(exit_code(&report, true).unwrap(), ExitCode::from(EXIT_DIFFERENCES));
	assert_eq!(
		output,
		indoc! {"
			=== ConfigMap settings ===
			  apiVersion: v1
			  data:
			    mode: fast
			  kind: ConfigMap
			  metadata:
			    name: settings
			=== Deployment web ===
			  apiVersion: apps/v1
			  kind: Deployment
			  metadata:
			    name: web
			  spec:
			-   replicas: 3
			+   replicas: 5
		"}
	);
}

#[rstest]
#[case(1)]
#[case(4)]
#[tokio::test]
async fn test_missing_resource_aborts_without_output(#[case] concurrency: usize) {
	let server = start(cluster_state()).await;
	let opts = DiffOpts {
		concurrency,
		..DiffOpts::default()
	};

	let (result, output) =
		run_diff(&server, StaticManifestSource::new(RELEASE_WITH_MISSING), opts).await;

	let err = result.expect_err("missing resource should abort");
	assert_eq!(
		format!("{err:#}"),
		"finding cluster resource ConfigMap foo failed: ConfigMap foo does not exist in the cluster"
	);
	assert_matches!(
		err.downcast_ref::<DiffError>(),
		Some(DiffError::Resource { source: LocateError::NotFound { .. }, .. })
	);
	assert_eq!(output, "");
}

#[tokio::test]
async fn test_continue_on_error_diffs_the_rest() {
	let server = start(cluster_state()).await;
	let opts = DiffOpts {
		policy: FailurePolicy::Continue,
		summarize: true,
		..DiffOpts::default()
	};

	let (result, output) =
		run_diff(&server, StaticManifestSource::new(RELEASE_WITH_MISSING), opts).await;

	let report = result.expect("diff failed");
	assert!(exit_code(&report, false).is_err());
	assert_eq!(report.failures.len(), 1);
	assert_eq!(report.failures[0].name, "foo");
	assert_eq!(
		output,
		indoc! {"

			Modified:
			  Deployment web

			Unchanged:
			  ConfigMap settings

			Total: 1 resource(s) with changes
		"}
	);
}

#[tokio::test]
async fn test_release_namespace_and_document_namespace() {
	let server = start(cluster_state()).await;
	let release = indoc! {"
		apiVersion: v1
		kind: ConfigMap
		metadata:
		  name: settings
		data:
		  mode: safe
		---
		apiVersion: v1
		kind: ConfigMap
		metadata:
		  name: settings
		  namespace: default
		data:
		  mode: fast
	"};

	let (result, _) = run_diff(
		&server,
		StaticManifestSource::new(release).with_namespace("prod"),
		DiffOpts::default(),
	)
	.await;

	let report = result.expect("diff failed");
	assert_eq!(report.diffs.len(), 2);
	// The first lands in prod, the second in its own namespace. Only the
	// declared namespace line differs, since it is stripped from live objects.
	assert!(!report.diffs[0].has_changes());
	let changed: Vec<_> = report.diffs[1]
		.lines
		.iter()
		.filter(|l| l.to_string().starts_with('-') || l.to_string().starts_with('+'))
		.map(ToString::to_string)
		.collect();
	assert_eq!(changed, vec!["-   namespace: default"]);
}

#[tokio::test]
async fn test_cluster_scoped_resource_ignores_namespace() {
	let server = start(cluster_state()).await;
	let release = indoc! {"
		apiVersion: v1
		kind: Namespace
		metadata:
		  name: prod
	"};

	let (result, output) = run_diff(
		&server,
		StaticManifestSource::new(release).with_namespace("elsewhere"),
		DiffOpts::default(),
	)
	.await;

	let report = result.expect("diff failed");
	assert!(!report.has_changes());
	assert!(output.starts_with("=== Namespace prod ===\n"));
	assert_eq!(server.request_count("/api/v1/namespaces/prod").await, 1);
}

#[tokio::test]
async fn test_custom_resource_skips_subresource_entries() {
	let discovery = MockDiscovery::default().with_group(
		"example.com/v1",
		vec![
			MockApiResource::subresource("widgets/status", "Widget", true),
			MockApiResource::namespaced("widgets", "Widget"),
		],
	);
	let server = HttpMockK8sServer::builder()
		.discovery(discovery)
		.resources(vec![json!({
			"apiVersion": "example.com/v1",
			"kind": "Widget",
			"metadata": {"name": "gizmo", "namespace": "default"},
			"spec": {"size": "large"}
		})])
		.build()
		.start()
		.await;
	let release = indoc! {"
		apiVersion: example.com/v1
		kind: Widget
		metadata:
		  name: gizmo
		spec:
		  size: large
	"};

	let (result, _) = run_diff(&server, StaticManifestSource::new(release), DiffOpts::default()).await;

	let report = result.expect("diff failed");
	assert!(!report.has_changes());
	assert_eq!(
		server
			.request_count("/apis/example.com/v1/namespaces/default/widgets/gizmo")
			.await,
		1
	);
}

#[tokio::test]
async fn test_unserved_group_version_is_type_resolution_error() {
	let server = start(cluster_state()).await;
	let release = indoc! {"
		apiVersion: example.com/v1
		kind: Widget
		metadata:
		  name: gizmo
	"};

	let (result, output) = run_diff(&server, StaticManifestSource::new(release), DiffOpts::default()).await;

	let err = result.expect_err("unknown type should abort");
	assert_eq!(
		format!("{err:#}"),
		"finding cluster resource Widget gizmo failed: did not find matching resource type for example.com/v1 Widget"
	);
	assert_eq!(output, "");
}

#[tokio::test]
async fn test_forbidden_discovery_is_transport_error() {
	let server = HttpMockK8sServer::builder()
		.resources(cluster_state())
		.forbidden_group_versions(vec!["apps/v1".to_string()])
		.build()
		.start()
		.await;

	let (result, _) = run_diff(&server, StaticManifestSource::new(RELEASE), DiffOpts::default()).await;

	let err = result.expect_err("forbidden discovery should abort");
	assert_matches!(
		err.downcast_ref::<DiffError>(),
		Some(DiffError::Resource { kind, source, .. }) if kind == "Deployment" && source.is_transport()
	);
}

#[rstest]
#[case(1)]
#[case(4)]
#[tokio::test]
async fn test_catalog_fetched_once_per_group_version(#[case] concurrency: usize) {
	let server = start(cluster_state()).await;
	let release = indoc! {"
		apiVersion: v1
		kind: ConfigMap
		metadata:
		  name: settings
		data:
		  mode: fast
		---
		apiVersion: v1
		kind: Namespace
		metadata:
		  name: prod
		---
		apiVersion: v1
		kind: ConfigMap
		metadata:
		  name: settings
		  namespace: prod
		data:
		  mode: safe
	"};
	let opts = DiffOpts {
		concurrency,
		..DiffOpts::default()
	};

	let (result, _) = run_diff(&server, StaticManifestSource::new(release), opts).await;

	result.expect("diff failed");
	assert_eq!(server.request_count("/api/v1").await, 1);
}

#[tokio::test]
async fn test_keep_common_changes_shows_server_fields() {
	let server = start(cluster_state()).await;
	let release = indoc! {"
		apiVersion: apps/v1
		kind: Deployment
		metadata:
		  name: web
		spec:
		  replicas: 5
	"};
	let opts = DiffOpts {
		filter: FieldFilter::none(),
		..DiffOpts::default()
	};

	let (result, output) = run_diff(&server, StaticManifestSource::new(release), opts).await;

	result.expect("diff failed");
	assert_eq!(
		output,
		indoc! {"
			=== Deployment web ===
			  apiVersion: apps/v1
			  kind: Deployment
			  metadata:
			+   generation: 7
			    name: web
			+   namespace: default
			  spec:
			    replicas: 5
			+ status:
			+   readyReplicas: 5
		"}
	);
}

#[tokio::test]
async fn test_skipped_documents_do_not_abort() {
	let server = start(cluster_state()).await;
	let release = indoc! {"
		---
		# rendered from an empty template
		---
		apiVersion: v1
		kind: ConfigMap
		data:
		  orphan: true
		---
		apiVersion: v1
		kind: ConfigMap
		metadata:
		  name: settings
		data:
		  mode: fast
	"};

	let (result, output) = run_diff(&server, StaticManifestSource::new(release), DiffOpts::default()).await;

	let report = result.expect("diff failed");
	assert_eq!(report.diffs.len(), 1);
	assert!(output.starts_with("=== ConfigMap settings ===\n"));
}
