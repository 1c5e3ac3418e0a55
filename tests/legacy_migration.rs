//! §8 seed scenario 5: legacy boolean-column rows upgrade to the tag-based
//! schema on boot, and re-running the migration is idempotent.

use mindcache_engine::store::{migration, Store};

#[tokio::test]
async fn legacy_rows_upgrade_to_tags_and_migration_is_idempotent() {
	let store = Store::open_in_memory().await.unwrap();

	sqlx::query(
		"INSERT INTO keys (name, value, type, content_tags, system_tags, z_index, updated_at)
		 VALUES ('note', '\"hello\"', 'text', '[]', '[]', 0, 0)",
	)
	.execute(store.pool())
	.await
	.unwrap();
	sqlx::query("ALTER TABLE keys ADD COLUMN readonly INTEGER").execute(store.pool()).await.unwrap();
	sqlx::query("ALTER TABLE keys ADD COLUMN visible INTEGER").execute(store.pool()).await.unwrap();
	sqlx::query("ALTER TABLE keys ADD COLUMN hardcoded INTEGER").execute(store.pool()).await.unwrap();
	sqlx::query("ALTER TABLE keys ADD COLUMN template INTEGER").execute(store.pool()).await.unwrap();
	sqlx::query("ALTER TABLE keys ADD COLUMN tags TEXT").execute(store.pool()).await.unwrap();
	sqlx::query(
		"UPDATE keys SET readonly = 0, visible = 1, hardcoded = 0, template = 1, tags = '[\"SystemPrompt\"]' WHERE name = 'note'",
	)
	.execute(store.pool())
	.await
	.unwrap();

	migration::run(&store).await.unwrap();

	let (system_tags, content_tags): (String, String) =
		sqlx::query_as("SELECT system_tags, content_tags FROM keys WHERE name = 'note'")
			.fetch_one(store.pool())
			.await
			.unwrap();
	let tags: Vec<String> = serde_json::from_str(&system_tags).unwrap();
	assert!(tags.contains(&"SystemPrompt".to_string()));
	assert!(tags.contains(&"LLMWrite".to_string()));
	assert!(tags.contains(&"ApplyTemplate".to_string()));
	assert_eq!(content_tags, "[\"SystemPrompt\"]");

	let version: i64 = store.get_meta("schema_version").await.unwrap().unwrap().parse().unwrap();
	assert_eq!(version, 2);

	// Re-running after reaching the current version is a no-op; bytes stay identical.
	migration::run(&store).await.unwrap();
	let (system_tags_again, content_tags_again): (String, String) =
		sqlx::query_as("SELECT system_tags, content_tags FROM keys WHERE name = 'note'")
			.fetch_one(store.pool())
			.await
			.unwrap();
	assert_eq!(system_tags, system_tags_again);
	assert_eq!(content_tags, content_tags_again);
}
