//! Kubernetes cluster connection management.

use std::time::Duration;

use kube::{
	api::{Api, DynamicObject},
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use super::{
	discovery::{ResolvedType, ResourceCatalog, ResourceTypeRecord},
	locate::ObjectStore,
	TransportError,
};

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("no context named `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(String),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// Represents a connection to a Kubernetes cluster.
///
/// Serves both as the resource type catalog and the object store for drift
/// detection. Cloning is cheap and shares the underlying HTTP client.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	/// Kubeconfig context the connection was built from.
	context: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("context", &self.context)
			.field("default_namespace", &self.default_namespace())
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect using the kubeconfig from the standard locations.
	#[instrument]
	pub async fn connect(context: Option<&str>) -> Result<Self, ConnectionError> {
		let kubeconfig = Kubeconfig::read()?;
		Self::from_kubeconfig(kubeconfig, context).await
	}

	/// Connect using a provided kubeconfig.
	///
	/// `context` selects a named context; `None` uses the kubeconfig's current
	/// context.
	#[instrument(skip(kubeconfig))]
	pub async fn from_kubeconfig(
		kubeconfig: Kubeconfig,
		context: Option<&str>,
	) -> Result<Self, ConnectionError> {
		if let Some(name) = context {
			if !kubeconfig.contexts.iter().any(|c| c.name == name) {
				return Err(ConnectionError::ContextNotFound(name.to_string()));
			}
		}

		let context_name = context
			.map(str::to_string)
			.or_else(|| kubeconfig.current_context.clone())
			.unwrap_or_default();

		let mut config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: context.map(str::to_string),
				..Default::default()
			},
		)
		.await?;
		config.read_timeout = Some(DEFAULT_API_TIMEOUT);

		let client = Client::try_from(config)?;
		tracing::debug!(
			context = %context_name,
			namespace = %client.default_namespace(),
			"connected to cluster"
		);

		Ok(Self {
			client,
			context: context_name,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Get the default namespace from the selected context.
	pub fn default_namespace(&self) -> &str {
		self.client.default_namespace()
	}

	pub fn context(&self) -> &str {
		&self.context
	}
}

impl ResourceCatalog for ClusterConnection {
	#[instrument(skip(self))]
	async fn list_resource_types(
		&self,
		group_version: &str,
	) -> Result<Vec<ResourceTypeRecord>, TransportError> {
		let list = if group_version.contains('/') {
			self.client.list_api_group_resources(group_version).await
		} else {
			self.client.list_core_api_resources(group_version).await
		};

		match list {
			Ok(list) => Ok(list
				.resources
				.into_iter()
				.map(|r| ResourceTypeRecord {
					kind: r.kind,
					name: r.name,
					namespaced: r.namespaced,
				})
				.collect()),
			// The server does not serve this group-version at all
			Err(kube::Error::Api(err)) if err.code == 404 => {
				tracing::debug!(group_version, "group-version not served");
				Ok(Vec::new())
			}
			Err(e) => Err(e.into()),
		}
	}
}

impl ObjectStore for ClusterConnection {
	#[instrument(skip(self, resource), fields(plural = %resource.plural))]
	async fn get_object(
		&self,
		resource: &ResolvedType,
		namespace: Option<&str>,
		name: &str,
	) -> Result<Option<Value>, TransportError> {
		let ar = resource.api_resource();
		let api: Api<DynamicObject> = match namespace {
			Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
			None => Api::all_with(self.client.clone(), &ar),
		};

		let object = api.get_opt(name).await?;
		Ok(object.map(serde_json::to_value).transpose()?)
	}
}
