//! Release manifest parsing.
//!
//! A release manifest is a multi-document YAML stream. Every document is decoded
//! into a generic tree, converted to a string-keyed JSON tree, and validated to
//! carry the identity of a Kubernetes object. Documents that fail validation are
//! logged and skipped; only a corrupt stream fails the whole parse.

use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Number, Value};
use serde_yaml_with_quirks::Value as YamlValue;
use thiserror::Error;
use tracing::{instrument, warn};

/// Errors that abort manifest parsing.
#[derive(Debug, Error)]
pub enum ParseError {
	#[error("decoding manifest document {index}")]
	Decode {
		index: usize,
		#[source]
		source: serde_yaml_with_quirks::Error,
	},
}

/// A decoded tree that can't be represented with string keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
	#[error("mapping key {0} is not a string")]
	NonStringKey(String),

	#[error("number {0} has no JSON representation")]
	UnrepresentableNumber(String),
}

/// Why a single document was left out of the parse result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
	#[error("document is empty")]
	Empty,

	#[error("document is not a mapping")]
	NotAMapping,

	#[error(transparent)]
	InvalidTree(#[from] TreeError),

	#[error("missing or empty {0}")]
	MissingField(&'static str),
}

/// One declared resource from the release manifest.
///
/// Identity fields are extracted once from `document`, which keeps the full
/// declared body for diffing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
	pub api_version: String,
	pub kind: String,
	pub name: String,
	pub document: Value,
}

impl ResourceDescriptor {
	/// Build a descriptor from a string-keyed tree.
	pub fn from_document(document: Value) -> Result<Self, SkipReason> {
		let object = match &document {
			Value::Null => return Err(SkipReason::Empty),
			Value::Object(object) => object,
			_ => return Err(SkipReason::NotAMapping),
		};

		let api_version = non_empty_str(object.get("apiVersion"))
			.ok_or(SkipReason::MissingField("apiVersion"))?
			.to_string();
		let kind = non_empty_str(object.get("kind"))
			.ok_or(SkipReason::MissingField("kind"))?
			.to_string();
		let metadata = object
			.get("metadata")
			.and_then(Value::as_object)
			.ok_or(SkipReason::MissingField("metadata"))?;
		let name = non_empty_str(metadata.get("name"))
			.ok_or(SkipReason::MissingField("metadata.name"))?
			.to_string();

		Ok(Self {
			api_version,
			kind,
			name,
			document,
		})
	}

	/// Namespace set explicitly in the declared document, if any.
	pub fn namespace(&self) -> Option<&str> {
		self.document
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.filter(|ns| !ns.is_empty())
	}
}

impl fmt::Display for ResourceDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}", self.kind, self.name)
	}
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
	value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Parse a multi-document manifest stream into descriptors, in document order.
#[instrument(skip_all, fields(bytes = text.len()))]
pub fn parse(text: &str) -> Result<Vec<ResourceDescriptor>, ParseError> {
	let mut descriptors = Vec::new();
	if text.trim().is_empty() {
		return Ok(descriptors);
	}

	for (index, document) in serde_yaml_with_quirks::Deserializer::from_str(text).enumerate() {
		let raw = YamlValue::deserialize(document)
			.map_err(|source| ParseError::Decode { index, source })?;

		let descriptor = to_string_keyed(raw)
			.map_err(SkipReason::from)
			.and_then(ResourceDescriptor::from_document);

		match descriptor {
			Ok(descriptor) => {
				tracing::debug!(index, resource = %descriptor, "parsed manifest document");
				descriptors.push(descriptor);
			}
			// Blank documents come from templates rendering nothing
			Err(SkipReason::Empty) => {
				tracing::debug!(index, "skipping empty document");
			}
			Err(reason) => {
				warn!(index, reason = %reason, "skipping manifest document");
			}
		}
	}

	Ok(descriptors)
}

/// Convert a decoded YAML tree into a tree whose mappings all have string keys.
///
/// Fails on the first mapping key that is not a string, at any depth.
pub fn to_string_keyed(value: YamlValue) -> Result<Value, TreeError> {
	Ok(match value {
		YamlValue::Null => Value::Null,
		YamlValue::Bool(b) => Value::Bool(b),
		YamlValue::Number(n) => Value::Number(to_json_number(&n)?),
		YamlValue::String(s) => Value::String(s),
		YamlValue::Sequence(items) => Value::Array(
			items
				.into_iter()
				.map(to_string_keyed)
				.collect::<Result<_, _>>()?,
		),
		YamlValue::Mapping(mapping) => {
			let mut object = Map::new();
			for (key, value) in mapping {
				let YamlValue::String(key) = key else {
					return Err(TreeError::NonStringKey(describe_key(&key)));
				};
				object.insert(key, to_string_keyed(value)?);
			}
			Value::Object(object)
		}
	})
}

fn to_json_number(n: &serde_yaml_with_quirks::Number) -> Result<Number, TreeError> {
	if let Some(i) = n.as_i64() {
		return Ok(Number::from(i));
	}
	if let Some(u) = n.as_u64() {
		return Ok(Number::from(u));
	}
	n.as_f64()
		.and_then(Number::from_f64)
		.ok_or_else(|| TreeError::UnrepresentableNumber(n.to_string()))
}

fn describe_key(key: &YamlValue) -> String {
	match key {
		YamlValue::Null => "null".to_string(),
		YamlValue::Bool(b) => b.to_string(),
		YamlValue::Number(n) => n.to_string(),
		YamlValue::String(s) => format!("{s:?}"),
		YamlValue::Sequence(_) => "<sequence>".to_string(),
		YamlValue::Mapping(_) => "<mapping>".to_string(),
	}
}
