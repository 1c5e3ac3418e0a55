//! Persistent Store (§2.1, §6 "Persisted state layout").
//!
//! Owns the two durable artifacts per instance: the opaque CRDT state blob
//! and the relational materialized view, plus the `schema_meta` row the
//! Migration Runner consults. Also backs the minimal owner/grant tables the
//! Permission Gate needs in a standalone build (SPEC_FULL.md §10.6).

pub mod migration;

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::prelude::*;

/// Durable key for the opaque CRDT state blob (§6 "Persisted state layout").
pub const CRDT_BLOB_KEY: &str = "yjs_encoded_state";

#[derive(Debug, Clone)]
pub struct Store {
	pool: SqlitePool,
}

impl Store {
	pub async fn open(path: &std::path::Path) -> ClResult<Self> {
		let url = format!("sqlite://{}?mode=rwc", path.display());
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect(&url)
			.await
			.map_err(|err| Error::Storage(err.to_string()))?;
		let store = Self { pool };
		store.init_schema().await?;
		Ok(store)
	}

	/// In-memory pool for tests and the integration harness (§10.4) — never
	/// used by `main.rs`, which always opens a file-backed pool.
	pub async fn open_in_memory() -> ClResult<Self> {
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect("sqlite::memory:")
			.await
			.map_err(|err| Error::Storage(err.to_string()))?;
		let store = Self { pool };
		store.init_schema().await?;
		Ok(store)
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	async fn init_schema(&self) -> ClResult<()> {
		let mut tx = self.pool.begin().await?;

		sqlx::query(
			"CREATE TABLE IF NOT EXISTS schema_meta (
				key TEXT NOT NULL,
				value TEXT,
				PRIMARY KEY(key)
			)",
		)
		.execute(&mut *tx)
		.await?;

		sqlx::query(
			"CREATE TABLE IF NOT EXISTS blobs (
				key TEXT NOT NULL,
				value BLOB NOT NULL,
				PRIMARY KEY(key)
			)",
		)
		.execute(&mut *tx)
		.await?;

		sqlx::query(
			"CREATE TABLE IF NOT EXISTS keys (
				name TEXT NOT NULL,
				value TEXT NOT NULL,
				type TEXT NOT NULL,
				content_type TEXT,
				content_tags TEXT NOT NULL,
				system_tags TEXT NOT NULL,
				z_index INTEGER NOT NULL,
				updated_at INTEGER NOT NULL,
				PRIMARY KEY(name)
			)",
		)
		.execute(&mut *tx)
		.await?;

		sqlx::query(
			"CREATE TABLE IF NOT EXISTS owners (
				instance_id TEXT NOT NULL,
				actor_id TEXT NOT NULL,
				PRIMARY KEY(instance_id, actor_id)
			)",
		)
		.execute(&mut *tx)
		.await?;

		sqlx::query(
			"CREATE TABLE IF NOT EXISTS grants (
				instance_id TEXT NOT NULL,
				actor_id TEXT NOT NULL,
				actor_kind TEXT NOT NULL,
				level TEXT NOT NULL,
				expires_at INTEGER,
				PRIMARY KEY(instance_id, actor_id, actor_kind)
			)",
		)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		Ok(())
	}

	pub async fn get_blob(&self, key: &str) -> ClResult<Option<Vec<u8>>> {
		let row: Option<(Vec<u8>,)> =
			sqlx::query_as("SELECT value FROM blobs WHERE key = ?").bind(key).fetch_optional(&self.pool).await?;
		Ok(row.map(|(value,)| value))
	}

	pub async fn set_blob(&self, key: &str, value: &[u8]) -> ClResult<()> {
		sqlx::query("INSERT INTO blobs (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value")
			.bind(key)
			.bind(value)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	pub async fn get_meta(&self, key: &str) -> ClResult<Option<String>> {
		let row: Option<(Option<String>,)> =
			sqlx::query_as("SELECT value FROM schema_meta WHERE key = ?").bind(key).fetch_optional(&self.pool).await?;
		Ok(row.and_then(|(value,)| value))
	}

	pub async fn set_meta(&self, key: &str, value: &str) -> ClResult<()> {
		sqlx::query(
			"INSERT INTO schema_meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
		)
		.bind(key)
		.bind(value)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Wipes every durable artifact for this instance (`DELETE /destroy`, §4.6).
	pub async fn wipe(&self) -> ClResult<()> {
		let mut tx = self.pool.begin().await?;
		sqlx::query("DELETE FROM blobs").execute(&mut *tx).await?;
		sqlx::query("DELETE FROM keys").execute(&mut *tx).await?;
		sqlx::query("DELETE FROM schema_meta").execute(&mut *tx).await?;
		tx.commit().await?;
		Ok(())
	}
}

// vim: ts=4
