//! Resource type discovery and caching.
//!
//! Manifests name their type by apiVersion and kind, but the API addresses
//! collections by plural resource name and scope. This module queries the
//! cluster's catalog for a group-version, picks the matching primary resource,
//! and caches each catalog for the rest of the run.

use std::{collections::HashMap, future::Future, sync::Arc};

use kube::{core::GroupVersionKind, discovery::ApiResource};
use tokio::sync::{Mutex, OnceCell};
use tracing::instrument;

use super::{locate::LocateError, ResourceScope, TransportError};

/// One entry of a group-version's resource catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTypeRecord {
	pub kind: String,
	/// Plural resource name, or `<plural>/<subresource>` for sub-resources.
	pub name: String,
	pub namespaced: bool,
}

impl ResourceTypeRecord {
	pub fn new(name: &str, kind: &str, namespaced: bool) -> Self {
		Self {
			kind: kind.to_string(),
			name: name.to_string(),
			namespaced,
		}
	}

	/// Sub-resources (`deployments/status`, `pods/log`) share the kind of their
	/// parent but are separate endpoints.
	pub fn is_subresource(&self) -> bool {
		self.name.contains('/')
	}
}

/// Lists the resource types a cluster serves for a group-version.
pub trait ResourceCatalog: Send + Sync {
	/// An unknown group-version yields an empty list rather than an error.
	fn list_resource_types(
		&self,
		group_version: &str,
	) -> impl Future<Output = Result<Vec<ResourceTypeRecord>, TransportError>> + Send;
}

/// Split an apiVersion into group and version.
///
/// The core group has no prefix, so `v1` yields `("", "v1")`.
pub fn split_api_version(api_version: &str) -> Option<(&str, &str)> {
	let (group, version) = match api_version.split_once('/') {
		Some((group, version)) if !group.is_empty() => (group, version),
		Some(_) => return None,
		None => ("", api_version),
	};
	if version.is_empty() || version.contains('/') {
		return None;
	}
	Some((group, version))
}

/// Pick the primary resource for `kind`: first match in catalog order, never a
/// sub-resource.
pub fn select_record<'a>(
	records: &'a [ResourceTypeRecord],
	kind: &str,
) -> Option<&'a ResourceTypeRecord> {
	records
		.iter()
		.find(|record| record.kind == kind && !record.is_subresource())
}

/// A resource type resolved against the live catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
	pub gvk: GroupVersionKind,
	pub plural: String,
	pub scope: ResourceScope,
}

impl ResolvedType {
	/// The kube `ApiResource` used to build a dynamic API for this type.
	pub fn api_resource(&self) -> ApiResource {
		ApiResource::from_gvk_with_plural(&self.gvk, &self.plural)
	}

	pub fn is_namespaced(&self) -> bool {
		self.scope == ResourceScope::Namespaced
	}
}

type CatalogCell = Arc<OnceCell<Arc<[ResourceTypeRecord]>>>;

/// Run-scoped registry of resource types.
///
/// Each group-version's catalog is fetched at most once. Concurrent lookups
/// for the same group-version wait for the first fetch; lookups for other
/// group-versions do not. A failed fetch is retried by the next lookup.
pub struct TypeRegistry<C> {
	catalog: C,
	catalogs: Mutex<HashMap<String, CatalogCell>>,
}

impl<C: ResourceCatalog> TypeRegistry<C> {
	pub fn new(catalog: C) -> Self {
		Self {
			catalog,
			catalogs: Mutex::new(HashMap::new()),
		}
	}

	/// Resolve `kind` within `api_version` to an addressable resource type.
	#[instrument(skip(self))]
	pub async fn resolve(&self, api_version: &str, kind: &str) -> Result<ResolvedType, LocateError> {
		let (group, version) = split_api_version(api_version)
			.ok_or_else(|| LocateError::InvalidApiVersion(api_version.to_string()))?;

		let records = self
			.records(api_version)
			.await
			.map_err(|source| LocateError::Catalog {
				group_version: api_version.to_string(),
				source,
			})?;

		let record = select_record(&records, kind).ok_or_else(|| LocateError::TypeResolution {
			api_version: api_version.to_string(),
			kind: kind.to_string(),
		})?;

		tracing::debug!(plural = %record.name, namespaced = record.namespaced, "resolved resource type");

		Ok(ResolvedType {
			gvk: GroupVersionKind::gvk(group, version, kind),
			plural: record.name.clone(),
			scope: ResourceScope::from_namespaced(record.namespaced),
		})
	}

	async fn records(&self, group_version: &str) -> Result<Arc<[ResourceTypeRecord]>, TransportError> {
		let cell = self
			.catalogs
			.lock()
			.await
			.entry(group_version.to_string())
			.or_default()
			.clone();

		let records = cell
			.get_or_try_init(|| async {
				tracing::debug!(group_version, "fetching resource catalog");
				let records: Arc<[ResourceTypeRecord]> =
					self.catalog.list_resource_types(group_version).await?.into();
				Ok::<_, TransportError>(records)
			})
			.await?;
		Ok(records.clone())
	}
}
