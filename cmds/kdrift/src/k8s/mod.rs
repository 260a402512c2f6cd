//! Kubernetes access for drift detection.
//!
//! Resource types are resolved at run time from the cluster's discovery
//! catalog, so any kind the API server serves can be compared, custom
//! resources included.

pub mod client;
pub mod diff;
pub mod discovery;
pub mod locate;
pub mod normalize;
pub mod output;
pub mod release;
pub mod render;

use thiserror::Error;

/// Failure talking to the cluster, surfaced verbatim.
#[derive(Debug, Error)]
pub enum TransportError {
	#[error(transparent)]
	Kube(#[from] Box<kube::Error>),

	#[error("decoding object returned by the cluster")]
	Decode(#[from] serde_json::Error),
}

impl From<kube::Error> for TransportError {
	fn from(err: kube::Error) -> Self {
		Self::Kube(Box::new(err))
	}
}

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}

impl ResourceScope {
	pub fn from_namespaced(namespaced: bool) -> Self {
		if namespaced {
			Self::Namespaced
		} else {
			Self::ClusterWide
		}
	}
}
