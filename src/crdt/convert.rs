//! Conversions between `serde_json::Value`/the engine's `Entry` model and
//! `yrs::Any`, the value type used for leaves inside the CRDT document.

use std::collections::HashMap;

use yrs::Any;

use crate::types::{Attributes, Entry, EntryType, SystemTag};

pub fn json_to_any(value: &serde_json::Value) -> Any {
	match value {
		serde_json::Value::Null => Any::Null,
		serde_json::Value::Bool(b) => Any::Bool(*b),
		serde_json::Value::Number(n) => {
			if let Some(i) = n.as_i64() {
				Any::BigInt(i)
			} else {
				Any::Number(n.as_f64().unwrap_or_default())
			}
		}
		serde_json::Value::String(s) => Any::String(s.as_str().into()),
		serde_json::Value::Array(items) => {
			Any::Array(items.iter().map(json_to_any).collect::<Vec<_>>().into())
		}
		serde_json::Value::Object(map) => {
			let converted: HashMap<String, Any> =
				map.iter().map(|(k, v)| (k.clone(), json_to_any(v))).collect();
			Any::Map(Box::new(converted))
		}
	}
}

pub fn any_to_json(value: &Any) -> serde_json::Value {
	match value {
		Any::Null | Any::Undefined => serde_json::Value::Null,
		Any::Bool(b) => serde_json::Value::Bool(*b),
		Any::Number(n) => serde_json::json!(n),
		Any::BigInt(i) => serde_json::json!(i),
		Any::String(s) => serde_json::Value::String(s.to_string()),
		Any::Array(items) => serde_json::Value::Array(items.iter().map(any_to_json).collect()),
		Any::Map(map) => {
			let obj: serde_json::Map<String, serde_json::Value> =
				map.iter().map(|(k, v)| (k.clone(), any_to_json(v))).collect();
			serde_json::Value::Object(obj)
		}
		Any::Buffer(bytes) => serde_json::json!(base64_of(bytes)),
	}
}

fn base64_of(bytes: &[u8]) -> String {
	use base64::Engine;
	base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn entry_type_str(kind: EntryType) -> &'static str {
	match kind {
		EntryType::Text => "text",
		EntryType::Json => "json",
		EntryType::Image => "image",
		EntryType::File => "file",
	}
}

fn entry_type_parse(s: &str) -> EntryType {
	match s {
		"json" => EntryType::Json,
		"image" => EntryType::Image,
		"file" => EntryType::File,
		_ => EntryType::Text,
	}
}

fn system_tag_str(tag: SystemTag) -> &'static str {
	match tag {
		SystemTag::SystemPrompt => "SystemPrompt",
		SystemTag::LlmRead => "LLMRead",
		SystemTag::LlmWrite => "LLMWrite",
		SystemTag::ApplyTemplate => "ApplyTemplate",
		SystemTag::Protected => "protected",
	}
}

fn system_tag_parse(s: &str) -> Option<SystemTag> {
	match s {
		"SystemPrompt" => Some(SystemTag::SystemPrompt),
		"LLMRead" => Some(SystemTag::LlmRead),
		"LLMWrite" => Some(SystemTag::LlmWrite),
		"ApplyTemplate" => Some(SystemTag::ApplyTemplate),
		"protected" => Some(SystemTag::Protected),
		_ => None,
	}
}

pub fn attributes_to_any(attrs: &Attributes) -> Any {
	let mut map: HashMap<String, Any> = HashMap::new();
	map.insert("type".to_string(), Any::String(entry_type_str(attrs.kind).into()));
	if let Some(ct) = &attrs.content_type {
		map.insert("contentType".to_string(), Any::String(ct.as_str().into()));
	}
	map.insert(
		"contentTags".to_string(),
		Any::Array(attrs.content_tags.iter().map(|t| Any::String(t.as_str().into())).collect::<Vec<_>>().into()),
	);
	map.insert(
		"systemTags".to_string(),
		Any::Array(
			attrs.system_tags.iter().map(|t| Any::String(system_tag_str(*t).into())).collect::<Vec<_>>().into(),
		),
	);
	map.insert("zIndex".to_string(), Any::BigInt(attrs.z_index));
	Any::Map(Box::new(map))
}

pub fn any_to_attributes(value: &Any) -> Attributes {
	let Any::Map(map) = value else {
		return Attributes {
			kind: EntryType::Text,
			content_type: None,
			content_tags: vec![],
			system_tags: vec![],
			z_index: 0,
		};
	};
	let kind = match map.get("type") {
		Some(Any::String(s)) => entry_type_parse(s),
		_ => EntryType::Text,
	};
	let content_type = match map.get("contentType") {
		Some(Any::String(s)) => Some(s.to_string()),
		_ => None,
	};
	let content_tags = match map.get("contentTags") {
		Some(Any::Array(items)) => items
			.iter()
			.filter_map(|item| if let Any::String(s) = item { Some(s.to_string()) } else { None })
			.collect(),
		_ => Vec::new(),
	};
	let system_tags = match map.get("systemTags") {
		Some(Any::Array(items)) => items
			.iter()
			.filter_map(|item| if let Any::String(s) = item { system_tag_parse(s) } else { None })
			.collect(),
		_ => Vec::new(),
	};
	let z_index = match map.get("zIndex") {
		Some(Any::BigInt(i)) => *i,
		Some(Any::Number(n)) => *n as i64,
		_ => 0,
	};
	Attributes { kind, content_type, content_tags, system_tags, z_index }
}

/// Builds the `{value, attributes}` pair stored under one entry name in the
/// `mindcache` root map (§4.1).
pub fn entry_fields(value: &serde_json::Value, attrs: &Attributes) -> HashMap<String, Any> {
	let mut fields = HashMap::new();
	fields.insert("value".to_string(), json_to_any(value));
	fields.insert("attributes".to_string(), attributes_to_any(attrs));
	fields
}

/// Reconstructs an `Entry` from its two stored `Any` fields, stamping the
/// wall-clock projection time (§3 `updatedAt`).
pub fn fields_to_entry(value: Option<Any>, attributes: Option<Any>, updated_at: i64) -> Entry {
	Entry {
		value: value.as_ref().map(any_to_json).unwrap_or(serde_json::Value::Null),
		attributes: attributes.as_ref().map(any_to_attributes).unwrap_or(Attributes {
			kind: EntryType::Text,
			content_type: None,
			content_tags: vec![],
			system_tags: vec![],
			z_index: 0,
		}),
		updated_at,
	}
}


// vim: ts=4
