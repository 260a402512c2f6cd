//! Live object lookup.
//!
//! The locator resolves a declared type through the [`TypeRegistry`] and then
//! fetches the named object from the matching collection. It never looks at
//! the kind beyond comparing it with catalog entries.

use std::future::Future;

use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use super::{
	discovery::{ResolvedType, ResourceCatalog, TypeRegistry},
	TransportError,
};

/// Errors that can occur while locating a live resource.
#[derive(Debug, Error)]
pub enum LocateError {
	#[error("invalid apiVersion `{0}`")]
	InvalidApiVersion(String),

	#[error("did not find matching resource type for {api_version} {kind}")]
	TypeResolution { api_version: String, kind: String },

	#[error("{kind} {name} does not exist in the cluster")]
	NotFound {
		kind: String,
		name: String,
		namespace: Option<String>,
	},

	#[error("fetching resource types for {group_version}")]
	Catalog {
		group_version: String,
		#[source]
		source: TransportError,
	},

	#[error("fetching {kind} {name} from the cluster")]
	Fetch {
		kind: String,
		name: String,
		#[source]
		source: TransportError,
	},
}

impl LocateError {
	/// True for connectivity and authorization failures.
	pub fn is_transport(&self) -> bool {
		matches!(self, Self::Catalog { .. } | Self::Fetch { .. })
	}
}

/// Reads single objects from the cluster.
pub trait ObjectStore: Send + Sync {
	/// `namespace` is `None` for cluster-scoped types. A missing object is
	/// `Ok(None)`.
	fn get_object(
		&self,
		resource: &ResolvedType,
		namespace: Option<&str>,
		name: &str,
	) -> impl Future<Output = Result<Option<Value>, TransportError>> + Send;
}

/// Resolves declared resources to their live counterparts.
pub struct ResourceLocator<C, S> {
	registry: TypeRegistry<C>,
	store: S,
}

impl<C: ResourceCatalog, S: ObjectStore> ResourceLocator<C, S> {
	pub fn new(catalog: C, store: S) -> Self {
		Self {
			registry: TypeRegistry::new(catalog),
			store,
		}
	}

	/// Fetch the live object for a declared resource.
	///
	/// The namespace only applies to namespaced types.
	#[instrument(skip(self))]
	pub async fn locate(
		&self,
		api_version: &str,
		kind: &str,
		name: &str,
		namespace: &str,
	) -> Result<Value, LocateError> {
		let resolved = self.registry.resolve(api_version, kind).await?;
		let namespace = resolved.is_namespaced().then_some(namespace);

		self.store
			.get_object(&resolved, namespace, name)
			.await
			.map_err(|source| LocateError::Fetch {
				kind: kind.to_string(),
				name: name.to_string(),
				source,
			})?
			.ok_or_else(|| LocateError::NotFound {
				kind: kind.to_string(),
				name: name.to_string(),
				namespace: namespace.map(str::to_string),
			})
	}
}
