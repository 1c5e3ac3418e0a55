//! Migration Runner (§4.7): one-shot, idempotent upgrade from legacy boolean
//! attribute columns to the tag-based schema, grounded on the reference
//! platform's `adapters/auth-adapter-sqlite/src/schema.rs` migration blocks
//! (`ALTER TABLE ... ADD COLUMN`, errors ignored since SQLite has no
//! `IF NOT EXISTS` for `ALTER TABLE`, all inside one transaction per boot).

use serde_json::json;

use super::Store;
use crate::prelude::*;

const CURRENT_SCHEMA_VERSION: i64 = 2;

pub async fn run(store: &Store) -> ClResult<()> {
	let current: i64 = store
		.get_meta("schema_version")
		.await?
		.and_then(|v| v.parse().ok())
		.unwrap_or(0);

	if current >= CURRENT_SCHEMA_VERSION {
		return Ok(());
	}

	info!("running migration: schema_version {} -> {}", current, CURRENT_SCHEMA_VERSION);

	let mut tx = store.pool().begin().await.map_err(|err| Error::Migration(err.to_string()))?;

	// Legacy columns predate system/content tags; add the new columns if
	// missing. SQLite errors on re-adding an existing column, so ignore.
	let _ = sqlx::query("ALTER TABLE keys ADD COLUMN readonly INTEGER").execute(&mut *tx).await;
	let _ = sqlx::query("ALTER TABLE keys ADD COLUMN visible INTEGER").execute(&mut *tx).await;
	let _ = sqlx::query("ALTER TABLE keys ADD COLUMN hardcoded INTEGER").execute(&mut *tx).await;
	let _ = sqlx::query("ALTER TABLE keys ADD COLUMN template INTEGER").execute(&mut *tx).await;
	let _ = sqlx::query("ALTER TABLE keys ADD COLUMN tags TEXT").execute(&mut *tx).await;

	// Any row that has a legacy column populated but no system_tags yet is a
	// pre-migration row; derive system_tags/content_tags from the legacy
	// booleans (§4.7 step 2) and backfill. A fresh install has no such rows
	// and this is a no-op.
	let legacy_rows: Vec<(String, Option<i64>, Option<i64>, Option<i64>, Option<i64>, Option<String>)> = sqlx::query_as(
		"SELECT name, readonly, visible, hardcoded, template, tags FROM keys
		 WHERE (readonly IS NOT NULL OR visible IS NOT NULL OR hardcoded IS NOT NULL OR template IS NOT NULL OR tags IS NOT NULL)
		   AND (system_tags IS NULL OR system_tags = '' OR system_tags = '[]')",
	)
	.fetch_all(&mut *tx)
	.await
	.map_err(|err| Error::Migration(err.to_string()))?;

	for (name, readonly, visible, hardcoded, template, tags) in legacy_rows {
		let mut system_tags: Vec<&str> = Vec::new();
		// Open Question (i) resolved in SPEC_FULL.md §9: `visible` maps to
		// `SystemPrompt` only, not also `LLMRead`.
		if visible == Some(1) {
			system_tags.push("SystemPrompt");
		}
		if readonly != Some(1) {
			system_tags.push("LLMWrite");
		}
		if hardcoded == Some(1) {
			system_tags.push("Protected");
		}
		if template == Some(1) {
			system_tags.push("ApplyTemplate");
		}

		let content_tags: Vec<String> = tags
			.as_deref()
			.and_then(|t| serde_json::from_str(t).ok())
			.unwrap_or_default();

		sqlx::query("UPDATE keys SET system_tags = ?, content_tags = ? WHERE name = ?")
			.bind(json!(system_tags).to_string())
			.bind(json!(content_tags).to_string())
			.bind(&name)
			.execute(&mut *tx)
			.await
			.map_err(|err| Error::Migration(err.to_string()))?;
	}

	sqlx::query(
		"INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?)
		 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
	)
	.bind(CURRENT_SCHEMA_VERSION.to_string())
	.execute(&mut *tx)
	.await
	.map_err(|err| Error::Migration(err.to_string()))?;

	tx.commit().await.map_err(|err| Error::Migration(err.to_string()))?;

	info!("migration complete: schema_version = {}", CURRENT_SCHEMA_VERSION);
	Ok(())
}


// vim: ts=4
