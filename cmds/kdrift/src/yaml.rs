//! Canonical YAML serialization for diffing.
//!
//! Both sides of a comparison are rendered through [`to_yaml`], so the text
//! only differs where the trees do. Keys are ordered the way Go's yaml
//! encoders order them, which keeps the output familiar to Helm users.

use std::cmp::Ordering;

use serde_json::Value;
use tracing::instrument;

/// Recursively order every object's keys with [`natural_key_cmp`].
pub fn sort_json_keys(value: Value) -> Value {
	match value {
		Value::Object(map) => {
			let mut entries: Vec<(String, Value)> = map.into_iter().collect();
			entries.sort_by(|(a, _), (b, _)| natural_key_cmp(a, b));
			Value::Object(
				entries
					.into_iter()
					.map(|(k, v)| (k, sort_json_keys(v)))
					.collect(),
			)
		}
		Value::Array(items) => Value::Array(items.into_iter().map(sort_json_keys).collect()),
		other => other,
	}
}

/// Key ordering used by go-yaml when marshalling maps.
///
/// Runs of digits compare numerically (`item2` < `item10`). Where one side has a
/// letter and the other doesn't, letters win right after a digit and lose
/// everywhere else.
fn natural_key_cmp(a: &str, b: &str) -> Ordering {
	let a: Vec<char> = a.chars().collect();
	let b: Vec<char> = b.chars().collect();
	let mut after_digit = false;

	for i in 0..a.len().min(b.len()) {
		if a[i] == b[i] {
			after_digit = a[i].is_ascii_digit();
			continue;
		}

		match (a[i].is_alphabetic(), b[i].is_alphabetic()) {
			(true, true) => return a[i].cmp(&b[i]),
			(true, false) if after_digit => return Ordering::Less,
			(false, true) if after_digit => return Ordering::Greater,
			(true, false) => return Ordering::Greater,
			(false, true) => return Ordering::Less,
			(false, false) => {}
		}

		// A zero following non-zero digits is part of a larger number
		let mut seeded = false;
		if a[i] == '0' || b[i] == '0' {
			seeded = a[..i]
				.iter()
				.rev()
				.take_while(|c| c.is_ascii_digit())
				.any(|&c| c != '0');
		}

		let (a_num, a_end) = digit_run(&a, i, seeded);
		let (b_num, b_end) = digit_run(&b, i, seeded);

		return a_num
			.cmp(&b_num)
			.then(a_end.cmp(&b_end))
			.then(a[i].cmp(&b[i]));
	}

	a.len().cmp(&b.len())
}

fn digit_run(chars: &[char], start: usize, seeded: bool) -> (i64, usize) {
	let mut value = i64::from(seeded);
	let mut end = start;
	while end < chars.len() && chars[end].is_ascii_digit() {
		value = value
			.saturating_mul(10)
			.saturating_add(i64::from(chars[end] as u8 - b'0'));
		end += 1;
	}
	(value, end)
}

/// Serialize a tree to YAML with deterministic key order.
#[instrument(skip_all)]
pub fn to_yaml(value: &Value) -> Result<String, serde_saphyr::ser_error::Error> {
	let sorted = sort_json_keys(value.clone());

	let options = serde_saphyr::SerializerOptions {
		indent_step: 2,
		indent_array: Some(0),
		prefer_block_scalars: true,
		empty_map_as_braces: true,
		empty_array_as_brackets: true,
		line_width: Some(80),
		scientific_notation_threshold: Some(1000000),
		scientific_notation_small_threshold: Some(0.0001),
		quote_ambiguous_keys: true,
		quote_numeric_strings: true,
		..Default::default()
	};

	let mut output = String::new();
	serde_saphyr::to_fmt_writer_with_options(&mut output, &sorted, options)?;
	Ok(output)
}
