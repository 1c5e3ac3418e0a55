//! Materialization Projector (§4.4): keeps the `keys` relational view in
//! sync with the CRDT document on every commit. Grounded on the DDL/upsert
//! style of `adapters/auth-adapter-sqlite/src/schema.rs`.

use crate::crdt::document::Document;
use crate::prelude::*;
use crate::store::Store;
use crate::types::now_ms;

/// Applies one commit's changed-name set to the materialized view. Per §4.4
/// this is per-name and best-effort: a failed row write is logged and does
/// not roll back the others, since the document remains authoritative and
/// the next commit reconciles (SPEC_FULL.md §9 Open Question ii).
pub async fn project(store: &Store, doc: &Document, changed_names: &[String]) {
	let current: std::collections::HashMap<String, crate::types::Entry> = doc.entries().into_iter().collect();

	for name in changed_names {
		let result = match current.get(name) {
			Some(entry) => upsert_row(store, name, entry).await,
			None => delete_row(store, name).await,
		};
		if let Err(err) = result {
			warn!("projector failed to apply change for '{}': {}", name, err);
		}
	}
}

async fn upsert_row(store: &Store, name: &str, entry: &crate::types::Entry) -> ClResult<()> {
	let value_json = serde_json::to_string(&entry.value)?;
	let type_str = match entry.attributes.kind {
		crate::types::EntryType::Text => "text",
		crate::types::EntryType::Json => "json",
		crate::types::EntryType::Image => "image",
		crate::types::EntryType::File => "file",
	};
	let content_tags = serde_json::to_string(&entry.attributes.content_tags)?;
	let system_tags = serde_json::to_string(&entry.attributes.system_tags)?;

	sqlx::query(
		"INSERT INTO keys (name, value, type, content_type, content_tags, system_tags, z_index, updated_at)
		 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
		 ON CONFLICT(name) DO UPDATE SET
			value = excluded.value, type = excluded.type, content_type = excluded.content_type,
			content_tags = excluded.content_tags, system_tags = excluded.system_tags,
			z_index = excluded.z_index, updated_at = excluded.updated_at",
	)
	.bind(name)
	.bind(value_json)
	.bind(type_str)
	.bind(&entry.attributes.content_type)
	.bind(content_tags)
	.bind(system_tags)
	.bind(entry.attributes.z_index)
	.bind(now_ms())
	.execute(store.pool())
	.await?;
	Ok(())
}

async fn delete_row(store: &Store, name: &str) -> ClResult<()> {
	sqlx::query("DELETE FROM keys WHERE name = ?").bind(name).execute(store.pool()).await?;
	Ok(())
}

/// Reads the current materialized view, ordered `(zIndex asc, name asc)`
/// per §4.4 — backs `GET /keys`.
pub async fn read_all(store: &Store) -> ClResult<Vec<(String, crate::types::Entry)>> {
	let rows: Vec<(String, String, String, Option<String>, String, String, i64, i64)> = sqlx::query_as(
		"SELECT name, value, type, content_type, content_tags, system_tags, z_index, updated_at
		 FROM keys ORDER BY z_index ASC, name ASC",
	)
	.fetch_all(store.pool())
	.await?;

	let mut out = Vec::with_capacity(rows.len());
	for (name, value, kind, content_type, content_tags, system_tags, z_index, updated_at) in rows {
		let entry = crate::types::Entry {
			value: serde_json::from_str(&value)?,
			attributes: crate::types::Attributes {
				kind: match kind.as_str() {
					"json" => crate::types::EntryType::Json,
					"image" => crate::types::EntryType::Image,
					"file" => crate::types::EntryType::File,
					_ => crate::types::EntryType::Text,
				},
				content_type,
				content_tags: serde_json::from_str(&content_tags)?,
				system_tags: serde_json::from_str(&system_tags)?,
				z_index,
			},
			updated_at,
		};
		out.push((name, entry));
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{Attributes, EntryType};

	fn attrs(z: i64) -> Attributes {
		Attributes { kind: EntryType::Text, content_type: None, content_tags: vec![], system_tags: vec![], z_index: z }
	}

	#[tokio::test]
	async fn upsert_then_delete_round_trips() {
		let store = Store::open_in_memory().await.unwrap();
		let doc = Document::new();
		doc.set_entry("bridge", "greeting", &serde_json::json!("hi"), &attrs(0)).unwrap();
		project(&store, &doc, &["greeting".to_string()]).await;

		let rows = read_all(&store).await.unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].0, "greeting");
		assert_eq!(rows[0].1.value, serde_json::json!("hi"));

		doc.remove_entry("bridge", "greeting").unwrap();
		project(&store, &doc, &["greeting".to_string()]).await;
		let rows = read_all(&store).await.unwrap();
		assert!(rows.is_empty());
	}

	#[tokio::test]
	async fn orders_by_z_index_then_name() {
		let store = Store::open_in_memory().await.unwrap();
		let doc = Document::new();
		doc.set_entry("bridge", "zeta", &serde_json::json!(1), &attrs(0)).unwrap();
		doc.set_entry("bridge", "alpha", &serde_json::json!(2), &attrs(0)).unwrap();
		doc.set_entry("bridge", "beta", &serde_json::json!(3), &attrs(-1)).unwrap();
		project(&store, &doc, &["zeta".to_string(), "alpha".to_string(), "beta".to_string()]).await;

		let rows = read_all(&store).await.unwrap();
		let names: Vec<&str> = rows.iter().map(|(n, _)| n.as_str()).collect();
		assert_eq!(names, vec!["beta", "alpha", "zeta"]);
	}
}

// vim: ts=4
