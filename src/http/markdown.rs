//! Markdown import dialect (§6, `POST /import`). Top-level sections `## STM
//! Entries` and `## Appendix: Binary Data`; each entry is a `### <name>`
//! heading followed by `- **Key**: value` bullets. Binary entries carry
//! their payload in a fenced code block under the matching appendix letter.
//!
//! This is hand-rolled line scanning rather than a markdown-parser
//! dependency: the dialect is a narrow, fixed bullet list, not general
//! markdown, and the reference platform takes the same approach for its
//! own small structured-text formats (e.g. `server/src/action/dsl` line
//! parsing) rather than reaching for a CommonMark crate.

use std::collections::HashMap;

use base64::Engine;

use crate::prelude::*;
use crate::types::{Attributes, EntryType, SystemTag};

pub struct ImportedEntry {
	pub name: String,
	pub value: serde_json::Value,
	pub attributes: Attributes,
}

pub fn parse(markdown: &str) -> ClResult<Vec<ImportedEntry>> {
	let sections = split_sections(markdown);
	let entries_section = sections
		.get("stm entries")
		.ok_or_else(|| Error::Validation("missing '## STM Entries' section".into()))?;
	let appendix = sections.get("appendix: binary data").map(|s| parse_appendix(s)).unwrap_or_default();

	split_subsections(entries_section)
		.into_iter()
		.map(|(name, body)| parse_entry(&name, &body, &appendix))
		.collect()
}

/// Splits top-level `## Heading` blocks, keyed by lowercased heading text.
fn split_sections(markdown: &str) -> HashMap<String, String> {
	let mut sections: HashMap<String, String> = HashMap::new();
	let mut current: Option<String> = None;
	let mut body = String::new();

	for line in markdown.lines() {
		if let Some(title) = line.strip_prefix("## ") {
			if let Some(key) = current.take() {
				sections.insert(key, std::mem::take(&mut body));
			}
			current = Some(title.trim().to_lowercase());
		} else if current.is_some() {
			body.push_str(line);
			body.push('\n');
		}
	}
	if let Some(key) = current {
		sections.insert(key, body);
	}
	sections
}

/// Splits a section's `### <name>` subsections, preserving the name's
/// original case.
fn split_subsections(section: &str) -> Vec<(String, String)> {
	let mut out = Vec::new();
	let mut current: Option<String> = None;
	let mut body = String::new();

	for line in section.lines() {
		if let Some(name) = line.strip_prefix("### ") {
			if let Some(key) = current.take() {
				out.push((key, std::mem::take(&mut body)));
			}
			current = Some(name.trim().to_string());
		} else if current.is_some() {
			body.push_str(line);
			body.push('\n');
		}
	}
	if let Some(key) = current {
		out.push((key, body));
	}
	out
}

/// Appendix letter -> decoded binary payload, read out of the fenced code
/// block under each `### <letter>` heading.
fn parse_appendix(section: &str) -> HashMap<String, Vec<u8>> {
	let mut out = HashMap::new();
	for (letter, body) in split_subsections(section) {
		if let Some(encoded) = extract_fenced_block(&body) {
			if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
				out.insert(letter, bytes);
			}
		}
	}
	out
}

fn extract_fenced_block(body: &str) -> Option<String> {
	let mut lines = body.lines();
	let mut inside = false;
	let mut collected = String::new();
	for line in &mut lines {
		if line.trim_start().starts_with("```") {
			if inside {
				return Some(collected);
			}
			inside = true;
			continue;
		}
		if inside {
			collected.push_str(line);
			collected.push('\n');
		}
	}
	None
}

/// Parses one `- **Key**: value` bullet list into a lookup, tolerating the
/// unbolded `- Key: value` form too.
fn parse_bullets(body: &str) -> HashMap<String, String> {
	let mut bullets = HashMap::new();
	for line in body.lines() {
		let line = line.trim();
		let Some(rest) = line.strip_prefix("- ") else { continue };
		let rest = rest.trim_start_matches("**");
		let Some((key, value)) = rest.split_once(':') else { continue };
		let key = key.trim_end_matches("**").trim().to_lowercase();
		bullets.insert(key, value.trim().to_string());
	}
	bullets
}

fn parse_entry(name: &str, body: &str, appendix: &HashMap<String, Vec<u8>>) -> ClResult<ImportedEntry> {
	if name.is_empty() {
		return Err(Error::Validation("entry heading has no name".into()));
	}
	if name.starts_with(crate::types::SYSTEM_KEY_PREFIX) {
		return Err(Error::Validation(format!("'{name}' is a reserved system key and cannot be imported")));
	}

	let bullets = parse_bullets(body);
	let kind = match bullets.get("type").map(String::as_str) {
		Some("text") | None => EntryType::Text,
		Some("json") => EntryType::Json,
		Some("image") => EntryType::Image,
		Some("file") => EntryType::File,
		Some(other) => return Err(Error::Validation(format!("entry '{name}': unknown type '{other}'"))),
	};

	let readonly = bool_bullet(&bullets, "readonly");
	let visible = bool_bullet(&bullets, "visible");
	let template = bool_bullet(&bullets, "template");

	let mut system_tags = Vec::new();
	if visible {
		system_tags.push(SystemTag::SystemPrompt);
	}
	if !readonly {
		system_tags.push(SystemTag::LlmWrite);
	}
	if template {
		system_tags.push(SystemTag::ApplyTemplate);
	}

	let content_tags: Vec<String> = bullets
		.get("tags")
		.map(|v| v.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect())
		.unwrap_or_default();

	let z_index = bullets.get("z-index").and_then(|v| v.parse().ok()).unwrap_or(0);
	let content_type = bullets.get("content type").cloned();

	let value = match kind {
		EntryType::Image | EntryType::File => {
			let raw = bullets
				.get("value")
				.ok_or_else(|| Error::Validation(format!("entry '{name}': missing Value bullet")))?;
			let letter = extract_appendix_letter(raw)
				.ok_or_else(|| Error::Validation(format!("entry '{name}': Value does not reference an appendix letter")))?;
			let bytes = appendix
				.get(&letter)
				.ok_or_else(|| Error::Validation(format!("entry '{name}': appendix '{letter}' not found")))?;
			let mime = content_type.as_deref().unwrap_or("application/octet-stream");
			let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
			serde_json::Value::String(format!("data:{mime};base64,{encoded}"))
		}
		EntryType::Json => {
			let raw = bullets.get("value").map(String::as_str).unwrap_or("null");
			serde_json::from_str(raw).map_err(|err| Error::Validation(format!("entry '{name}': invalid JSON value: {err}")))?
		}
		EntryType::Text => serde_json::Value::String(bullets.get("value").cloned().unwrap_or_default()),
	};

	Ok(ImportedEntry {
		name: name.to_string(),
		value,
		attributes: Attributes { kind, content_type, content_tags, system_tags, z_index },
	})
}

fn bool_bullet(bullets: &HashMap<String, String>, key: &str) -> bool {
	matches!(bullets.get(key).map(|v| v.to_lowercase()).as_deref(), Some("true") | Some("yes") | Some("1"))
}

/// Pulls a single appendix letter out of forms like `Appendix A`, `[A]`, or
/// a bare `A`.
fn extract_appendix_letter(raw: &str) -> Option<String> {
	let cleaned = raw.trim().trim_start_matches("Appendix").trim().trim_matches(['[', ']']).trim();
	if !cleaned.is_empty() && cleaned.chars().all(|c| c.is_ascii_alphanumeric()) {
		Some(cleaned.to_string())
	} else {
		None
	}
}


// vim: ts=4
