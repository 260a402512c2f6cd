//! Removal of server-managed fields before comparison.

use std::{fmt, str::FromStr};

use serde_json::Value;
use thiserror::Error;

/// Fields the API server assigns or mutates on its own.
///
/// Only stripped from the live side; declared manifests are compared as-is.
pub const NON_DETERMINISTIC_FIELDS: &[&[&str]] = &[
	&["status"],
	&["metadata", "creationTimestamp"],
	&["metadata", "deletionTimestamp"],
	&["metadata", "selfLink"],
	&["metadata", "resourceVersion"],
	&["metadata", "generation"],
	&["metadata", "uid"],
	&["metadata", "namespace"],
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid field path `{0}`: expected a JSON pointer such as /metadata/labels")]
pub struct InvalidFieldPath(String);

/// A path of object keys from the document root.
///
/// Parsed from RFC 6901 JSON pointer syntax, so keys containing `/` are written
/// with `~1` (`/metadata/annotations/example.com~1owner`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
	pub fn new<I, S>(segments: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self(segments.into_iter().map(Into::into).collect())
	}

	pub fn segments(&self) -> &[String] {
		&self.0
	}
}

impl FromStr for FieldPath {
	type Err = InvalidFieldPath;

	fn from_str(pointer: &str) -> Result<Self, Self::Err> {
		let rest = pointer
			.strip_prefix('/')
			.ok_or_else(|| InvalidFieldPath(pointer.to_string()))?;
		if rest.is_empty() {
			return Err(InvalidFieldPath(pointer.to_string()));
		}
		Ok(Self(
			rest.split('/')
				.map(|segment| segment.replace("~1", "/").replace("~0", "~"))
				.collect(),
		))
	}
}

impl fmt::Display for FieldPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for segment in &self.0 {
			write!(f, "/{}", segment.replace('~', "~0").replace('/', "~1"))?;
		}
		Ok(())
	}
}

/// The set of paths excluded from comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
	paths: Vec<FieldPath>,
}

impl Default for FieldFilter {
	fn default() -> Self {
		Self::non_deterministic()
	}
}

impl FieldFilter {
	/// The server-managed field set.
	pub fn non_deterministic() -> Self {
		Self {
			paths: NON_DETERMINISTIC_FIELDS
				.iter()
				.map(|path| FieldPath::new(path.iter().copied()))
				.collect(),
		}
	}

	/// Compare live objects verbatim.
	pub fn none() -> Self {
		Self { paths: Vec::new() }
	}

	/// Add extra paths, keeping the first occurrence of duplicates.
	#[must_use]
	pub fn with_paths(mut self, paths: impl IntoIterator<Item = FieldPath>) -> Self {
		for path in paths {
			if !self.paths.contains(&path) {
				self.paths.push(path);
			}
		}
		self
	}

	pub fn paths(&self) -> &[FieldPath] {
		&self.paths
	}

	pub fn apply(&self, tree: Value) -> Value {
		normalize(tree, &self.paths)
	}
}

/// Remove every excluded path from `tree`.
///
/// Paths whose intermediate keys are missing or not objects are ignored.
pub fn normalize(mut tree: Value, excluded: &[FieldPath]) -> Value {
	for path in excluded {
		remove_path(&mut tree, path.segments());
	}
	tree
}

fn remove_path(tree: &mut Value, segments: &[String]) {
	let Some((last, parents)) = segments.split_last() else {
		return;
	};

	let mut current = tree;
	for segment in parents {
		match current.get_mut(segment.as_str()) {
			Some(child) => current = child,
			None => return,
		}
	}

	if let Value::Object(object) = current {
		object.remove(last);
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use rstest::rstest;
	use serde_json::json;

	use super::*;

	fn contains_path(tree: &Value, path: &FieldPath) -> bool {
		let mut current = tree;
		for segment in path.segments() {
			match current.get(segment.as_str()) {
				Some(child) => current = child,
				None => return false,
			}
		}
		true
	}

	#[test]
	fn test_normalize_strips_server_fields() {
		let live = json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {
				"name": "a",
				"namespace": "default",
				"uid": "123",
				"resourceVersion": "9",
				"generation": 2,
				"creationTimestamp": "2024-01-01T00:00:00Z",
				"selfLink": "/api/v1/namespaces/default/configmaps/a",
				"labels": {"app": "a"}
			},
			"data": {"x": "1"},
			"status": {"ready": true}
		});

		let normalized = FieldFilter::non_deterministic().apply(live);

		assert_eq!(
			normalized,
			json!({
				"apiVersion": "v1",
				"kind": "ConfigMap",
				"metadata": {"name": "a", "labels": {"app": "a"}},
				"data": {"x": "1"}
			})
		);
	}

	#[test]
	fn test_normalize_without_paths_is_noop() {
		let tree = json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": "a"},
			"data": {"status": "kept", "uid": "kept"}
		});

		let normalized = FieldFilter::non_deterministic().apply(tree.clone());
		assert_eq!(normalized, tree);
	}

	#[test]
	fn test_normalize_skips_non_object_parents() {
		let tree = json!({"metadata": "not-an-object", "status": null});
		let normalized = FieldFilter::non_deterministic().apply(tree);
		assert_eq!(normalized, json!({"metadata": "not-an-object"}));
	}

	#[test]
	fn test_normalize_leaves_no_configured_path() {
		let filter = FieldFilter::non_deterministic().with_paths([
			"/spec/template/metadata/annotations/checksum~1config".parse().unwrap(),
		]);
		let tree = json!({
			"metadata": {"uid": "1", "generation": 3, "deletionTimestamp": "now"},
			"spec": {"template": {"metadata": {"annotations": {
				"checksum/config": "abc",
				"other": "kept"
			}}}},
			"status": {"replicas": 1}
		});

		let normalized = filter.apply(tree);

		for path in filter.paths() {
			assert!(!contains_path(&normalized, path), "{path} survived");
		}
		assert_eq!(
			normalized.pointer("/spec/template/metadata/annotations/other"),
			Some(&json!("kept"))
		);
	}

	#[test]
	fn test_none_filter_keeps_everything() {
		let tree = json!({"metadata": {"uid": "1"}, "status": {}});
		assert_eq!(FieldFilter::none().apply(tree.clone()), tree);
	}

	#[test]
	fn test_with_paths_deduplicates() {
		let filter = FieldFilter::non_deterministic().with_paths(["/status".parse().unwrap()]);
		assert_eq!(filter.paths().len(), NON_DETERMINISTIC_FIELDS.len());
	}

	#[rstest]
	#[case("/metadata/managedFields", &["metadata", "managedFields"])]
	#[case("/metadata/annotations/a~1b", &["metadata", "annotations", "a/b"])]
	#[case("/x~0y", &["x~y"])]
	fn test_field_path_parse(#[case] pointer: &str, #[case] expected: &[&str]) {
		let path: FieldPath = pointer.parse().unwrap();
		assert_eq!(path, FieldPath::new(expected.iter().copied()));
		assert_eq!(path.to_string(), pointer);
	}

	#[rstest]
	#[case("")]
	#[case("/")]
	#[case("metadata.uid")]
	fn test_field_path_parse_rejects(#[case] pointer: &str) {
		assert_matches!(pointer.parse::<FieldPath>(), Err(InvalidFieldPath(_)));
	}
}
