//! `POST /import` (§4.6, §6 dialect): parses the markdown dialect and
//! replays every entry inside one CRDT transaction, visible to a connected
//! streaming peer as exactly one Update envelope and to `GET /keys`
//! afterwards.

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
async fn import_replays_every_entry_in_one_commit() {
	let store = Store::open_in_memory().await.unwrap();
	let engine = EngineBuilder::new(EngineOpts::default()).build_with_store(store).await.unwrap();

	let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
	let session = Session { principal_id: "peer-1".to_string(), permission: SessionPermission::Read };
	engine.registry.register("peer-1".to_string(), session, outbound_tx);

	let app = http::router().with_state(engine.clone());

	let markdown = "## STM Entries\n\n\
		### greeting\n- **Type**: text\n- **Visible**: true\n- **Value**: hi\n\n\
		### config\n- **Type**: json\n- **Value**: {\"a\":1}\n";
	let body = serde_json::json!({ "markdown": markdown });
	let request = Request::builder()
		.method("POST")
		.uri("/import")
		.header("content-type", "application/json")
		.body(Body::from(serde_json::to_vec(&body).unwrap()))
		.unwrap();
	let response = app.clone().oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	// The whole import is one CRDT transaction, so exactly one Update
	// envelope reaches the connected peer for both imported entries.
	let first = outbound_rx.recv().await.unwrap();
	let OutboundMessage::Binary(bytes) = first else { panic!("expected a binary envelope") };
	assert!(matches!(Envelope::decode(&bytes).unwrap(), Envelope::Update(_)));
	assert!(outbound_rx.try_recv().is_err(), "one import must broadcast exactly one commit");

	let request = Request::builder().method("GET").uri("/keys").body(Body::empty()).unwrap();
	let response = app.oneshot(request).await.unwrap();
	let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
	let view: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
	assert_eq!(view["greeting"]["value"], "hi");
	assert_eq!(view["config"]["value"], serde_json::json!({"a": 1}));
}

#[tokio::test]
async fn import_rejects_malformed_markdown() {
	let store = Store::open_in_memory().await.unwrap();
	let engine = EngineBuilder::new(EngineOpts::default()).build_with_store(store).await.unwrap();
	let app = http::router().with_state(engine);

	let body = serde_json::json!({ "markdown": "# Nothing here\n" });
	let request = Request::builder()
		.method("POST")
		.uri("/import")
		.header("content-type", "application/json")
		.body(Body::from(serde_json::to_vec(&body).unwrap()))
		.unwrap();
	let response = app.oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// vim: ts=4
