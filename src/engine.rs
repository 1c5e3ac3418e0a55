//! Engine Façade (§4.8): owns the per-instance boot sequence and the handle
//! every HTTP and streaming caller goes through. Grounded on the reference
//! platform's `AppBuilder`/`AppState` fluent-builder shape
//! (`crates/cloudillo-core/src/app.rs`) and its `bootstrap()`-then-`run()`
//! split, narrowed from a multi-adapter platform app to this engine's single
//! document + single store.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::EngineOpts;
use crate::crdt::{self, Document};
use crate::prelude::*;
use crate::projector;
use crate::session::ConnectionRegistry;
use crate::store::{migration, Store, CRDT_BLOB_KEY};
use crate::types::Attributes;

/// Shared engine state; cloned cheaply (`Arc`) into every axum handler and
/// connection task.
pub type Engine = Arc<EngineInner>;

pub struct EngineInner {
	pub opts: EngineOpts,
	pub store: Store,
	/// Swapped wholesale on `DELETE /destroy` (§4.6) so a destroyed instance
	/// starts from a CRDT document with no tombstone history, rather than
	/// one cleared via an ordinary transaction.
	doc: RwLock<Arc<Document>>,
	/// Handle of the commit-subscriber task for the current document, so
	/// `destroy()` can abort the old one instead of leaking a task parked on
	/// a broadcast channel nothing will ever send to again.
	commit_subscriber: Mutex<JoinHandle<()>>,
	pub registry: ConnectionRegistry,
}

impl EngineInner {
	/// Current document handle. Cheap: a read-lock acquisition plus an
	/// `Arc` clone, released immediately — callers never hold the engine's
	/// document lock across I/O (§5).
	pub async fn current_doc(&self) -> Arc<Document> {
		self.doc.read().await.clone()
	}

	/// `DELETE /destroy` (§4.6): closes every live connection, wipes
	/// persistent storage, and re-initializes the document as empty.
	pub async fn destroy(self: &Arc<Self>) -> ClResult<()> {
		self.registry.close_all();
		self.store.wipe().await?;

		let fresh = Arc::new(Document::new());
		*self.doc.write().await = fresh.clone();

		let new_subscriber = spawn_commit_subscriber(self.clone(), fresh);
		let old_subscriber = std::mem::replace(&mut *self.commit_subscriber.lock().await, new_subscriber);
		old_subscriber.abort();

		info!("instance '{}' destroyed", self.opts.instance_id);
		Ok(())
	}
}

pub struct EngineBuilder {
	opts: EngineOpts,
}

impl EngineBuilder {
	pub fn new(opts: EngineOpts) -> Self {
		Self { opts }
	}

	/// §4.8 boot sequence: schema + migration, hydrate, install commit
	/// subscription, ready to accept traffic.
	pub async fn build(self) -> ClResult<Engine> {
		let store = Store::open(&self.opts.db_path).await?;
		self.build_with_store(store).await
	}

	/// Same boot sequence as `build`, against an already-open store — used
	/// by the integration test harness (§10.4) to run in-memory.
	pub async fn build_with_store(self, store: Store) -> ClResult<Engine> {
		migration::run(&store).await?;

		let doc = Document::new();
		match store.get_blob(CRDT_BLOB_KEY).await? {
			Some(bytes) => {
				info!("hydrating document from persisted CRDT blob ({} bytes)", bytes.len());
				doc.apply_full_state("migration", &bytes)?;
			}
			None => {
				info!("no persisted CRDT blob found; hydrating from materialized view");
				let rows = projector::read_all(&store).await?;
				let rows: Vec<(String, serde_json::Value, Attributes)> =
					rows.into_iter().map(|(name, entry)| (name, entry.value, entry.attributes)).collect();
				doc.hydrate_from_rows(rows)?;
				store.set_blob(CRDT_BLOB_KEY, &doc.encode_full_state()).await?;
			}
		}

		let doc = Arc::new(doc);
		// `spawn_commit_subscriber` needs the final `Arc<EngineInner>` to
		// reach `engine.store`/`engine.registry`, so the engine is built with
		// a placeholder join handle and the real one installed right after.
		let engine = Arc::new(EngineInner {
			opts: self.opts,
			store,
			doc: RwLock::new(doc.clone()),
			commit_subscriber: Mutex::new(tokio::spawn(async {})),
			registry: ConnectionRegistry::new(),
		});

		let subscriber = spawn_commit_subscriber(engine.clone(), doc);
		*engine.commit_subscriber.lock().await = subscriber;

		info!("engine booted for instance '{}'", engine.opts.instance_id);
		Ok(engine)
	}
}

/// Installs the commit subscription (§4.8 step 3): on every commit,
/// broadcast the update to every connection except its origin, project the
/// changed names into the materialized view, and persist the new full
/// state — all after the document has already merged the update, so no
/// peer ever observes a partial commit (§5).
fn spawn_commit_subscriber(engine: Engine, doc: Arc<Document>) -> JoinHandle<()> {
	let mut rx = doc.subscribe();
	tokio::spawn(async move {
		loop {
			match rx.recv().await {
				Ok(event) => {
					let envelope = crdt::Envelope::Update(event.update.clone()).encode();
					engine.registry.broadcast_except(&event.origin, envelope);

					projector::project(&engine.store, &doc, &event.changed_names).await;

					let blob = doc.encode_full_state();
					if let Err(err) = engine.store.set_blob(CRDT_BLOB_KEY, &blob).await {
						warn!("failed to persist CRDT blob after commit from '{}': {}", event.origin, err);
					}
				}
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					warn!("commit subscriber lagged, skipped {} events", skipped);
				}
				Err(broadcast::error::RecvError::Closed) => break,
			}
		}
	})
}

// vim: ts=4
