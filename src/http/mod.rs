//! HTTP Bridge (§4.6): narrow internal endpoints that mutate through the
//! same CRDT path as streaming peers, so every bridge write is observed by
//! connected clients through the ordinary commit → broadcast pipeline. Each
//! mutation runs through the Permission Gate (`authorize`, below) whenever
//! the caller supplies a `principalId`. Grounded on the reference platform's
//! router-assembly style (`server/src/routes.rs`: `Router::new().route(...)`
//! composition) and its `Error`-as-`IntoResponse` mapping
//! (`server/src/error.rs`), reused directly via `crate::error::Error`.

pub mod markdown;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::permission::{Capabilities, PermissionGate};
use crate::prelude::*;
use crate::types::{Attributes, Entry, GrantLevel};

pub fn router() -> Router<Engine> {
	Router::new()
		.route("/keys", get(get_keys).post(post_keys))
		.route("/keys/{key}", delete(delete_key))
		.route("/destroy", delete(destroy))
		.route("/import", post(import))
}

#[derive(Serialize)]
struct KeysResponse(std::collections::BTreeMap<String, Entry>);

/// `GET /keys` (§4.6): the current materialized view, `(zIndex asc, name
/// asc)` — already the order `projector::read_all` returns rows in.
/// `serde_json`'s `preserve_order` feature backs `Map` with an `IndexMap`
/// instead of a `BTreeMap`, so inserting in that order is enough to keep it
/// on the wire; without that feature this would silently re-sort by name.
async fn get_keys(State(engine): State<Engine>) -> ClResult<Json<serde_json::Value>> {
	let rows = crate::projector::read_all(&engine.store).await?;
	let mut obj = serde_json::Map::with_capacity(rows.len());
	for (name, entry) in rows {
		obj.insert(name, serde_json::to_value(entry)?);
	}
	Ok(Json(serde_json::Value::Object(obj)))
}

#[derive(Deserialize)]
struct PrincipalQuery {
	#[serde(rename = "principalId")]
	principal_id: Option<String>,
}

#[derive(Deserialize)]
struct PostKeyBody {
	key: String,
	value: serde_json::Value,
	attributes: Attributes,
	#[serde(rename = "principalId")]
	principal_id: Option<String>,
}

/// §4.5: consults the Permission Gate for a bridge caller that identified
/// itself with a `principalId`. A call with no `principalId` is the
/// internal-trusted case (§1 scope: reached only through the outer router's
/// own authentication) and proceeds ungated, matching the optional
/// `principalId?` in the wire shape.
async fn authorize(engine: &Engine, principal_id: Option<&str>, required: GrantLevel) -> ClResult<()> {
	let Some(actor_id) = principal_id else { return Ok(()) };
	PermissionGate::new(&engine.store)
		.check(&engine.opts.instance_id, actor_id, "user", Capabilities::all(), required)
		.await
}

/// `POST /keys` (§4.6): local CRDT transaction with origin `"bridge"`,
/// synchronously persisted and projected before the response so the caller
/// sees a durable, queryable write (bridge callers get the stronger
/// synchronous guarantee; streaming-originated commits remain best-effort
/// async per the §3 invariant).
async fn post_keys(State(engine): State<Engine>, Json(body): Json<PostKeyBody>) -> ClResult<Json<Entry>> {
	if body.key.is_empty() {
		return Err(Error::Validation("key must not be empty".into()));
	}
	authorize(&engine, body.principal_id.as_deref(), GrantLevel::Write).await?;
	let doc = engine.current_doc().await;
	let already_exists = doc.entries().iter().any(|(name, _)| name == &body.key);
	if body.key.starts_with(crate::types::SYSTEM_KEY_PREFIX) && !already_exists {
		return Err(Error::Validation(format!("'{}' is a reserved system key", body.key)));
	}

	doc.set_entry("bridge", &body.key, &body.value, &body.attributes)?;
	persist_and_project_now(&engine, &doc, &[body.key.clone()]).await?;

	let entry = crate::projector::read_all(&engine.store)
		.await?
		.into_iter()
		.find(|(name, _)| name == &body.key)
		.map(|(_, entry)| entry)
		.ok_or(Error::Storage("row missing immediately after upsert".into()))?;
	Ok(Json(entry))
}

/// `DELETE /keys/:key` (§4.6).
async fn delete_key(
	State(engine): State<Engine>,
	Path(key): Path<String>,
	Query(principal): Query<PrincipalQuery>,
) -> ClResult<()> {
	authorize(&engine, principal.principal_id.as_deref(), GrantLevel::Write).await?;
	let doc = engine.current_doc().await;
	let removed = doc.remove_entry("bridge", &key)?;
	if removed.is_none() {
		return Err(Error::NotFound);
	}
	persist_and_project_now(&engine, &doc, &[key]).await?;
	Ok(())
}

/// `DELETE /destroy` (§4.6): closes every live connection, wipes storage,
/// re-initializes the document. Destructive enough to require the gate's
/// top tier when a caller identifies itself.
async fn destroy(State(engine): State<Engine>, Query(principal): Query<PrincipalQuery>) -> ClResult<()> {
	authorize(&engine, principal.principal_id.as_deref(), GrantLevel::System).await?;
	engine.destroy().await
}

#[derive(Deserialize)]
struct ImportBody {
	markdown: String,
	#[serde(rename = "principalId")]
	principal_id: Option<String>,
}

/// `POST /import` (§4.6, §6 dialect): parses the markdown and replays every
/// entry inside one CRDT transaction tagged `"import"`.
async fn import(State(engine): State<Engine>, Json(body): Json<ImportBody>) -> ClResult<()> {
	authorize(&engine, body.principal_id.as_deref(), GrantLevel::Write).await?;
	let entries = markdown::parse(&body.markdown)?;
	let doc = engine.current_doc().await;
	let batch: Vec<(String, serde_json::Value, Attributes)> =
		entries.into_iter().map(|entry| (entry.name, entry.value, entry.attributes)).collect();
	if batch.is_empty() {
		return Ok(());
	}
	let names: Vec<String> = batch.iter().map(|(name, _, _)| name.clone()).collect();
	doc.set_entries_batch("import", &batch)?;
	persist_and_project_now(&engine, &doc, &names).await?;
	Ok(())
}

/// Bridge mutations persist and project synchronously before acknowledging
/// the caller (§3 invariant: "writes to the blob precede acknowledging
/// durability to the calling bridge"), unlike streaming-originated commits
/// which the façade's commit subscriber persists asynchronously.
async fn persist_and_project_now(engine: &Engine, doc: &crate::crdt::Document, changed: &[String]) -> ClResult<()> {
	crate::projector::project(&engine.store, doc, changed).await;
	let blob = doc.encode_full_state();
	engine.store.set_blob(crate::store::CRDT_BLOB_KEY, &blob).await?;
	Ok(())
}

// vim: ts=4
