//! §8 seed scenario 2: a bridge write on an empty instance reaches exactly
//! one connected streaming peer as a single Update envelope, and `GET
//! /keys` reflects the write synchronously.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use mindcache_engine::config::EngineOpts;
use mindcache_engine::crdt::Envelope;
use mindcache_engine::session::OutboundMessage;
use mindcache_engine::store::Store;
use mindcache_engine::types::{Session, SessionPermission};
use mindcache_engine::{http, EngineBuilder};
use tokio::sync::mpsc;
use tower::ServiceExt;

#[tokio::test]
async fn bridge_write_broadcasts_once_and_is_visible_via_get_keys() {
	let store = Store::open_in_memory().await.unwrap();
	let engine = EngineBuilder::new(EngineOpts::default()).build_with_store(store).await.unwrap();

	let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
	let session = Session { principal_id: "peer-1".to_string(), permission: SessionPermission::Read };
	engine.registry.register("peer-1".to_string(), session, outbound_tx);

	let app = http::router().with_state(engine.clone());

	let body = serde_json::json!({
		"key": "name",
		"value": "Alice",
		"attributes": {"type": "text"},
	});
	let request = Request::builder()
		.method("POST")
		.uri("/keys")
		.header("content-type", "application/json")
		.body(Body::from(serde_json::to_vec(&body).unwrap()))
		.unwrap();
	let response = app.clone().oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	// Exactly one Update envelope was broadcast to the connected peer.
	let first = outbound_rx.recv().await.unwrap();
	let OutboundMessage::Binary(bytes) = first else { panic!("expected a binary envelope") };
	assert!(matches!(Envelope::decode(&bytes).unwrap(), Envelope::Update(_)));
	assert!(outbound_rx.try_recv().is_err(), "exactly one commit must be broadcast for one bridge write");

	let request = Request::builder().method("GET").uri("/keys").body(Body::empty()).unwrap();
	let response = app.oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
	let view: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
	assert_eq!(view["name"]["value"], "Alice");
	assert_eq!(view["name"]["attributes"]["type"], "text");
	assert_eq!(view["name"]["attributes"]["contentTags"], serde_json::json!([]));
	assert_eq!(view["name"]["attributes"]["systemTags"], serde_json::json!([]));
	assert_eq!(view["name"]["attributes"]["zIndex"], 0);
	assert!(view["name"]["updatedAt"].is_i64());
}
