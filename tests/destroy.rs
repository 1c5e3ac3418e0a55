//! §8 seed scenario 6: with two live peers and five keys, `DELETE /destroy`
//! closes both peers and empties durable storage, so the next `GET /keys`
//! is empty.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use mindcache_engine::config::EngineOpts;
use mindcache_engine::session::OutboundMessage;
use mindcache_engine::store::Store;
use mindcache_engine::types::{Attributes, EntryType, Session, SessionPermission};
use mindcache_engine::{http, projector, EngineBuilder};
use tokio::sync::mpsc;
use tower::ServiceExt;

fn attrs() -> Attributes {
	Attributes { kind: EntryType::Text, content_type: None, content_tags: vec![], system_tags: vec![], z_index: 0 }
}

#[tokio::test]
async fn destroy_closes_peers_and_empties_storage() {
	let store = Store::open_in_memory().await.unwrap();
	let engine = EngineBuilder::new(EngineOpts::default()).build_with_store(store).await.unwrap();

	let doc = engine.current_doc().await;
	for i in 0..5 {
		doc.set_entry("bridge", &format!("key{i}"), &serde_json::json!(i), &attrs()).unwrap();
	}
	projector::project(&engine.store, &doc, &(0..5).map(|i| format!("key{i}")).collect::<Vec<_>>()).await;
	engine.store.set_blob(mindcache_engine::store::CRDT_BLOB_KEY, &doc.encode_full_state()).await.unwrap();

	let (tx1, mut rx1) = mpsc::unbounded_channel::<OutboundMessage>();
	let (tx2, mut rx2) = mpsc::unbounded_channel::<OutboundMessage>();
	let session = |id: &str| Session { principal_id: id.to_string(), permission: SessionPermission::Write };
	engine.registry.register("peer-1".to_string(), session("peer-1"), tx1);
	engine.registry.register("peer-2".to_string(), session("peer-2"), tx2);
	assert_eq!(engine.registry.len(), 2);

	let app = http::router().with_state(engine.clone());
	let request = Request::builder().method("DELETE").uri("/destroy").body(Body::empty()).unwrap();
	let response = app.clone().oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	assert!(matches!(rx1.recv().await.unwrap(), OutboundMessage::Close));
	assert!(matches!(rx2.recv().await.unwrap(), OutboundMessage::Close));
	assert_eq!(engine.registry.len(), 0);

	let request = Request::builder().method("GET").uri("/keys").body(Body::empty()).unwrap();
	let response = app.oneshot(request).await.unwrap();
	let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
	let view: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
	assert_eq!(view, serde_json::json!({}));
}
