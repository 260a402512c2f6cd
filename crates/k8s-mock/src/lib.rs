//! Mock Kubernetes API server for testing.
//!
//! Serves legacy discovery, object reads and label-filtered lists over HTTP
//! so tests can connect through an ordinary kubeconfig.

pub mod discovery;
pub mod helm;
pub mod http;

pub use discovery::{MockApiResource, MockDiscovery};
pub use helm::MockHelmRelease;
pub use http::{HttpMockK8sServer, RunningHttpMockK8sServer};
