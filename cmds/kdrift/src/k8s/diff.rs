//! Drift detection engine.
//!
//! Locates the live counterpart of every declared resource, strips
//! server-managed fields and renders a line diff per resource. Results are
//! always reported in manifest order, whatever the lookup concurrency.

use std::{fmt, sync::Arc};

use serde_json::Value;
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::instrument;

use super::{
	discovery::ResourceCatalog,
	locate::{LocateError, ObjectStore, ResourceLocator},
	normalize::FieldFilter,
	render::{render, AnnotatedLine, LineChange, RenderError},
};
use crate::manifest::ResourceDescriptor;

/// Errors that abort a drift run.
#[derive(Debug, Error)]
pub enum DiffError {
	#[error("finding cluster resource {kind} {name} failed")]
	Resource {
		kind: String,
		name: String,
		#[source]
		source: LocateError,
	},

	#[error("rendering diff for {kind} {name}")]
	Render {
		kind: String,
		name: String,
		#[source]
		source: RenderError,
	},

	#[error("lookup task panicked")]
	TaskPanicked(#[source] tokio::task::JoinError),

	#[error("internal error: concurrency semaphore unexpectedly closed")]
	SemaphoreClosed,
}

/// What to do when a single resource cannot be located.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
	/// Stop the run before anything is rendered.
	#[default]
	Abort,
	/// Diff the remaining resources and report failures at the end.
	Continue,
}

/// Line diff of one declared resource against its live counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDiff {
	/// Position of the resource in the manifest stream.
	pub index: usize,
	pub kind: String,
	pub name: String,
	pub lines: Vec<AnnotatedLine>,
}

impl ResourceDiff {
	pub fn has_changes(&self) -> bool {
		self.lines
			.iter()
			.any(|line| line.change != LineChange::Unchanged)
	}

	pub fn display_name(&self) -> String {
		format!("{} {}", self.kind, self.name)
	}
}

/// A resource skipped under [`FailurePolicy::Continue`].
#[derive(Debug)]
pub struct ResourceFailure {
	pub index: usize,
	pub kind: String,
	pub name: String,
	pub error: LocateError,
}

impl fmt::Display for ResourceFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "finding cluster resource {} {} failed: {}", self.kind, self.name, self.error)
	}
}

/// Outcome of a drift run, both lists in manifest order.
#[derive(Debug, Default)]
pub struct DiffReport {
	pub diffs: Vec<ResourceDiff>,
	pub failures: Vec<ResourceFailure>,
}

impl DiffReport {
	pub fn has_changes(&self) -> bool {
		self.diffs.iter().any(ResourceDiff::has_changes)
	}

	pub fn is_complete(&self) -> bool {
		self.failures.is_empty()
	}
}

type Lookup = (usize, Result<Value, LocateError>);

/// Compares declared resources with the cluster.
pub struct DiffEngine<C, S> {
	locator: Arc<ResourceLocator<C, S>>,
	filter: FieldFilter,
	policy: FailurePolicy,
	concurrency: usize,
}

impl<C, S> DiffEngine<C, S>
where
	C: ResourceCatalog + 'static,
	S: ObjectStore + 'static,
{
	pub fn new(locator: ResourceLocator<C, S>, filter: FieldFilter) -> Self {
		Self {
			locator: Arc::new(locator),
			filter,
			policy: FailurePolicy::default(),
			concurrency: 1,
		}
	}

	#[must_use]
	pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
		self.policy = policy;
		self
	}

	/// Maximum number of lookups in flight. Values below 2 run sequentially.
	#[must_use]
	pub fn with_concurrency(mut self, concurrency: usize) -> Self {
		self.concurrency = concurrency.max(1);
		self
	}

	/// Diff every descriptor against the cluster.
	///
	/// `namespace` applies to descriptors without their own
	/// `metadata.namespace`. Nothing is rendered before every lookup is in.
	/// Under [`FailurePolicy::Abort`] the first failure in manifest order ends
	/// the run and cancels the lookups still in flight.
	#[instrument(skip_all, fields(resource_count = descriptors.len(), namespace = %namespace))]
	pub async fn diff_all(
		&self,
		descriptors: &[ResourceDescriptor],
		namespace: &str,
	) -> Result<DiffReport, DiffError> {
		let lookups = if self.concurrency > 1 {
			self.locate_concurrent(descriptors, namespace).await?
		} else {
			self.locate_sequential(descriptors, namespace).await?
		};

		let mut report = DiffReport::default();
		for (index, result) in lookups {
			let descriptor = &descriptors[index];
			match result {
				Ok(live) => report.diffs.push(self.diff_one(index, descriptor, live)?),
				Err(error) => {
					tracing::warn!(resource = %descriptor, error = %error, "skipping resource");
					report.failures.push(ResourceFailure {
						index,
						kind: descriptor.kind.clone(),
						name: descriptor.name.clone(),
						error,
					});
				}
			}
		}

		tracing::debug!(
			diffs = report.diffs.len(),
			failures = report.failures.len(),
			"diff complete"
		);
		Ok(report)
	}

	fn diff_one(
		&self,
		index: usize,
		descriptor: &ResourceDescriptor,
		live: Value,
	) -> Result<ResourceDiff, DiffError> {
		let live = self.filter.apply(live);
		let lines = render(&descriptor.document, &live).map_err(|source| DiffError::Render {
			kind: descriptor.kind.clone(),
			name: descriptor.name.clone(),
			source,
		})?;

		Ok(ResourceDiff {
			index,
			kind: descriptor.kind.clone(),
			name: descriptor.name.clone(),
			lines,
		})
	}

	async fn locate_sequential(
		&self,
		descriptors: &[ResourceDescriptor],
		namespace: &str,
	) -> Result<Vec<Lookup>, DiffError> {
		let mut lookups = Vec::with_capacity(descriptors.len());
		for (index, descriptor) in descriptors.iter().enumerate() {
			let result = self
				.locator
				.locate(
					&descriptor.api_version,
					&descriptor.kind,
					&descriptor.name,
					descriptor.namespace().unwrap_or(namespace),
				)
				.await;
			lookups.push((index, self.check(descriptor, result)?));
		}
		Ok(lookups)
	}

	async fn locate_concurrent(
		&self,
		descriptors: &[ResourceDescriptor],
		namespace: &str,
	) -> Result<Vec<Lookup>, DiffError> {
		let semaphore = Arc::new(Semaphore::new(self.concurrency));
		let mut join_set: JoinSet<Result<Lookup, DiffError>> = JoinSet::new();

		for (index, descriptor) in descriptors.iter().enumerate() {
			let locator = self.locator.clone();
			let sem = semaphore.clone();
			let api_version = descriptor.api_version.clone();
			let kind = descriptor.kind.clone();
			let name = descriptor.name.clone();
			let namespace = descriptor.namespace().unwrap_or(namespace).to_string();

			join_set.spawn(async move {
				let _permit = sem.acquire().await.map_err(|_| DiffError::SemaphoreClosed)?;
				let result = locator.locate(&api_version, &kind, &name, &namespace).await;
				Ok((index, result))
			});
		}

		// Results are settled in manifest order as soon as every earlier lookup
		// is in, so the reported failure does not depend on scheduling.
		let mut pending: Vec<Option<Result<Value, LocateError>>> =
			std::iter::repeat_with(|| None).take(descriptors.len()).collect();
		let mut settled = Vec::with_capacity(descriptors.len());

		while let Some(joined) = join_set.join_next().await {
			let (index, result) = joined.map_err(DiffError::TaskPanicked)??;
			pending[index] = Some(result);

			while let Some(result) = pending.get_mut(settled.len()).and_then(Option::take) {
				let index = settled.len();
				match self.check(&descriptors[index], result) {
					Ok(result) => settled.push((index, result)),
					Err(err) => {
						tracing::debug!(index, in_flight = join_set.len(), "cancelling remaining lookups");
						join_set.abort_all();
						return Err(err);
					}
				}
			}
		}
		Ok(settled)
	}

	/// Promote a lookup failure to a run failure under the abort policy.
	fn check(
		&self,
		descriptor: &ResourceDescriptor,
		result: Result<Value, LocateError>,
	) -> Result<Result<Value, LocateError>, DiffError> {
		match (result, self.policy) {
			(Err(source), FailurePolicy::Abort) => Err(DiffError::Resource {
				kind: descriptor.kind.clone(),
				name: descriptor.name.clone(),
				source,
			}),
			(result, _) => Ok(result),
		}
	}
}
