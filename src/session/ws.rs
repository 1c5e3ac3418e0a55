//! Streaming connection handler: the state machine from §4.3's diagram,
//! trusted-header upgrade with the legacy JSON `auth` fallback, and the
//! binary/legacy frame dispatch loop. Grounded on the reference platform's
//! websocket upgrade handlers (`core/websocket_ref.rs`: `WebSocketUpgrade`
//! + header/auth extraction before `on_upgrade`) and `crdt_ref/websocket.rs`
//! (split sink/stream, heartbeat task racing the receive loop, per-message
//! dispatch).

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::crdt::{self, Envelope};
use crate::engine::Engine;
use crate::prelude::*;
use crate::session::OutboundMessage;
use crate::types::{Attributes, SessionPermission};

/// GET `/<sync-prefix>/<instanceId>?token=...` (§6). The `token` itself is
/// the outer router's concern (exchanged for the trusted headers before the
/// upgrade ever reaches the engine); this handler only reads the headers.
pub async fn upgrade(
	ws: WebSocketUpgrade,
	State(engine): State<Engine>,
	Path(instance_id): Path<String>,
	headers: HeaderMap,
) -> Response {
	if instance_id != *engine.opts.instance_id {
		return Error::NotFound.into_response();
	}
	let trusted = extract_trusted_session(&headers);
	let production = engine.opts.production;
	ws.on_upgrade(move |socket| handle_connection(socket, engine, trusted, production))
}

/// Reads the three trusted pre-auth headers the outer router stamps after
/// exchanging the connection token (§6): `X-PreAuth: true`, `X-PrincipalId`,
/// `X-Permission`.
fn extract_trusted_session(headers: &HeaderMap) -> Option<Session> {
	let pre_auth = headers.get("x-preauth").and_then(|v| v.to_str().ok())?;
	if pre_auth != "true" {
		return None;
	}
	let principal_id = headers.get("x-principalid").and_then(|v| v.to_str().ok())?.to_string();
	let permission = headers.get("x-permission").and_then(|v| v.to_str().ok()).and_then(SessionPermission::parse)?;
	Some(Session { principal_id, permission })
}

async fn handle_connection(socket: WebSocket, engine: Engine, trusted: Option<Session>, production: bool) {
	let id = format!("conn-{}", Uuid::new_v4());
	let (mut sink, mut stream) = socket.split();

	let session = match trusted {
		Some(session) => session,
		None if production => {
			let _ = send_close(&mut sink, 4401, "unauthorized").await;
			return;
		}
		// Legacy fallback (§4.3): non-production only, granting write to a
		// synthetic principal after a `{type:"auth"}` JSON handshake frame.
		None => match await_legacy_auth(&mut stream, &mut sink).await {
			Some(session) => session,
			None => {
				let _ = send_close(&mut sink, 4401, "unauthorized").await;
				return;
			}
		},
	};

	let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
	engine.registry.register(id.clone(), session.clone(), outbound_tx.clone());
	info!("connection open: {} principal='{}' permission={:?}", id, session.principal_id, session.permission);

	let doc = engine.current_doc().await;
	let step1 = crdt::initial_step1(&doc).encode();
	let _ = outbound_tx.send(OutboundMessage::Binary(step1));

	let writer = tokio::spawn(async move {
		while let Some(msg) = outbound_rx.recv().await {
			match msg {
				OutboundMessage::Binary(bytes) => {
					if sink.send(Message::Binary(bytes.into())).await.is_err() {
						break;
					}
				}
				OutboundMessage::Json(value) => {
					if sink.send(Message::Text(value.to_string().into())).await.is_err() {
						break;
					}
				}
				OutboundMessage::Ping => {
					if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
						break;
					}
				}
				OutboundMessage::Close => {
					let _ = send_close(&mut sink, 1000, "").await;
					break;
				}
			}
		}
	});

	let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
	heartbeat.tick().await; // first tick fires immediately; discard it

	loop {
		tokio::select! {
			_ = heartbeat.tick() => {
				if outbound_tx.send(OutboundMessage::Ping).is_err() {
					break;
				}
			}
			inbound = stream.next() => {
				match inbound {
					Some(Ok(Message::Binary(bytes))) => {
						if let Err(err) = handle_binary(&engine, &id, &session, &bytes, &outbound_tx).await {
							warn!("protocol error on {}: {}", id, err);
							let _ = outbound_tx.send(OutboundMessage::Close);
							break;
						}
					}
					Some(Ok(Message::Text(text))) => {
						handle_legacy_frame(&engine, &id, &session, &text, &outbound_tx).await;
					}
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(_)) => {}
					Some(Err(err)) => {
						debug!("connection {} read error: {}", id, err);
						break;
					}
				}
			}
		}
	}

	engine.registry.remove(&id);
	writer.abort();
	info!("connection closed: {}", id);
}

async fn send_close(
	sink: &mut (impl futures::Sink<Message> + Unpin),
	code: u16,
	reason: &'static str,
) -> Result<(), ()> {
	sink.send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
		.await
		.map_err(|_| ())
}

/// Applies one inbound binary envelope (§4.2). `SyncStep2`/`Update` mutate
/// the document, so they're gated on the connection's own permission (§3
/// invariant: "a session whose permission does not include write cannot
/// cause any CRDT mutation originating on its connection"); `SyncStep1`
/// only produces a diff reply and needs no permission.
async fn handle_binary(
	engine: &Engine,
	id: &str,
	session: &Session,
	bytes: &[u8],
	outbound_tx: &mpsc::UnboundedSender<OutboundMessage>,
) -> ClResult<()> {
	let envelope = Envelope::decode(bytes)?;
	let mutates = matches!(envelope, Envelope::SyncStep2(_) | Envelope::Update(_));
	if mutates && !session.permission.can_mutate() {
		let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "error", "code": "NO_PERMISSION"})));
		return Ok(());
	}

	let doc = engine.current_doc().await;
	let reply = crdt::handle_envelope(&doc, id, envelope)?;
	if let Some(reply) = reply {
		let _ = outbound_tx.send(OutboundMessage::Binary(reply.encode()));
	}
	Ok(())
}

/// Legacy JSON control frames (§6): accepted for compatibility, routed
/// through the same permission checks and CRDT transaction path as the
/// binary protocol and every other mutation path (SPEC_FULL.md §9 Open
/// Question i).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum LegacyFrame {
	Auth {
		#[serde(rename = "apiKey")]
		api_key: String,
	},
	Set {
		name: String,
		value: serde_json::Value,
		attributes: Attributes,
	},
	Delete {
		name: String,
	},
	Clear,
	Ping,
}

async fn handle_legacy_frame(
	engine: &Engine,
	id: &str,
	session: &Session,
	text: &str,
	outbound_tx: &mpsc::UnboundedSender<OutboundMessage>,
) {
	let frame: LegacyFrame = match serde_json::from_str(text) {
		Ok(frame) => frame,
		Err(err) => {
			let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "error", "code": "PROTOCOL", "message": err.to_string()})));
			return;
		}
	};

	match frame {
		LegacyFrame::Auth { .. } => {
			// Already authenticated at upgrade time on this path; a
			// duplicate `auth` frame re-acknowledges without side effects.
			let _ = outbound_tx.send(OutboundMessage::Json(json!({
				"type": "auth_success",
				"instanceId": *engine.opts.instance_id,
				"userId": session.principal_id,
				"permission": session.permission,
			})));
		}
		LegacyFrame::Ping => {
			let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "pong"})));
		}
		LegacyFrame::Set { name, value, attributes } => {
			if !session.permission.can_mutate() {
				let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "error", "code": "NO_PERMISSION"})));
				return;
			}
			let doc = engine.current_doc().await;
			match doc.set_entry(id, &name, &value, &attributes) {
				Ok(_) => {
					let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "key_updated", "name": name})));
				}
				Err(err) => {
					warn!("legacy set failed for '{}': {}", name, err);
					let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "error", "code": "STORAGE"})));
				}
			}
		}
		LegacyFrame::Delete { name } => {
			if !session.permission.can_mutate() {
				let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "error", "code": "NO_PERMISSION"})));
				return;
			}
			let doc = engine.current_doc().await;
			match doc.remove_entry(id, &name) {
				Ok(Some(_)) => {
					let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "key_deleted", "name": name})));
				}
				Ok(None) => {
					let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "error", "code": "NOT_FOUND"})));
				}
				Err(err) => {
					warn!("legacy delete failed for '{}': {}", name, err);
					let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "error", "code": "STORAGE"})));
				}
			}
		}
		LegacyFrame::Clear => {
			if !session.permission.can_clear() {
				let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "error", "code": "NO_PERMISSION"})));
				return;
			}
			let doc = engine.current_doc().await;
			match doc.clear(id) {
				Ok(_) => {
					let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "cleared"})));
				}
				Err(err) => {
					warn!("legacy clear failed: {}", err);
					let _ = outbound_tx.send(OutboundMessage::Json(json!({"type": "error", "code": "STORAGE"})));
				}
			}
		}
	}
}

/// Waits for the first frame on a connection with no trusted headers,
/// accepting only `{type:"auth", apiKey}` (§6). Any apiKey is accepted in
/// non-production mode; the resulting session is a synthetic principal
/// with `write` permission (§4.3).
async fn await_legacy_auth(
	stream: &mut (impl futures::Stream<Item = Result<Message, axum::Error>> + Unpin),
	sink: &mut (impl futures::Sink<Message> + Unpin),
) -> Option<Session> {
	let msg = stream.next().await?.ok()?;
	let Message::Text(text) = msg else { return None };
	let frame: LegacyFrame = serde_json::from_str(&text).ok()?;
	let LegacyFrame::Auth { api_key } = frame else { return None };

	let session = Session { principal_id: format!("legacy:{}", api_key), permission: SessionPermission::Write };
	let ack = json!({
		"type": "auth_success",
		"instanceId": "",
		"userId": session.principal_id,
		"permission": session.permission,
	});
	let _ = sink.send(Message::Text(ack.to_string().into())).await;
	Some(session)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::EngineOpts;
	use crate::crdt::Document;
	use crate::engine::EngineBuilder;
	use crate::store::Store;
	use crate::types::Attributes;

	fn headers_with(principal: &str, permission: &str) -> HeaderMap {
		let mut headers = HeaderMap::new();
		headers.insert("x-preauth", "true".parse().unwrap());
		headers.insert("x-principalid", principal.parse().unwrap());
		headers.insert("x-permission", permission.parse().unwrap());
		headers
	}

	#[test]
	fn extract_trusted_session_reads_headers() {
		let headers = headers_with("alice", "write");
		let session = extract_trusted_session(&headers).unwrap();
		assert_eq!(session.principal_id, "alice");
		assert_eq!(session.permission, SessionPermission::Write);
	}

	#[test]
	fn extract_trusted_session_missing_preauth_returns_none() {
		let headers = HeaderMap::new();
		assert!(extract_trusted_session(&headers).is_none());
	}

	/// §8 seed scenario 4 (hibernation round-trip): there is no global
	/// session table, so "eviction and revival" is just a second connection
	/// independently re-deriving the same `Session` from the same trusted
	/// headers — exercised here as two separate calls standing in for two
	/// separate connection lifetimes on either side of an eviction.
	#[test]
	fn hibernation_round_trip_reconstructs_identical_session() {
		let headers = headers_with("p1", "write");
		let before_eviction = extract_trusted_session(&headers).unwrap();
		let after_revival = extract_trusted_session(&headers).unwrap();
		assert_eq!(before_eviction.principal_id, after_revival.principal_id);
		assert_eq!(before_eviction.permission, after_revival.permission);
	}

	fn attrs() -> Attributes {
		Attributes {
			kind: crate::types::EntryType::Text,
			content_type: None,
			content_tags: vec![],
			system_tags: vec![],
			z_index: 0,
		}
	}

	async fn test_engine() -> Engine {
		EngineBuilder::new(EngineOpts::default()).build_with_store(Store::open_in_memory().await.unwrap()).await.unwrap()
	}

	/// §8 seed scenario 3: a `write`-permission connection cannot `clear`.
	#[tokio::test]
	async fn legacy_clear_denied_without_admin_permission() {
		let engine = test_engine().await;
		let doc = engine.current_doc().await;
		doc.set_entry("bridge", "greeting", &serde_json::json!("hi"), &attrs()).unwrap();

		let session = Session { principal_id: "bob".to_string(), permission: SessionPermission::Write };
		let (tx, mut rx) = mpsc::unbounded_channel();
		handle_legacy_frame(&engine, "conn-1", &session, r#"{"type":"clear"}"#, &tx).await;

		let reply = rx.recv().await.unwrap();
		match reply {
			OutboundMessage::Json(value) => assert_eq!(value["code"], "NO_PERMISSION"),
			other => panic!("expected a JSON error reply, got {other:?}"),
		}
		assert_eq!(doc.entries().len(), 1, "document must be unchanged after a denied clear");
	}

	/// A read-only connection must not be able to cause any CRDT mutation
	/// via the binary sync protocol either (§3 permission-safety invariant).
	#[tokio::test]
	async fn binary_update_denied_for_read_only_session() {
		let engine = test_engine().await;
		let writer_doc = Document::new();
		let event = writer_doc.set_entry("writer", "greeting", &serde_json::json!("hi"), &attrs()).unwrap();
		let envelope = Envelope::Update(event.update).encode();

		let session = Session { principal_id: "readonly-bob".to_string(), permission: SessionPermission::Read };
		let (tx, mut rx) = mpsc::unbounded_channel();
		handle_binary(&engine, "conn-2", &session, &envelope, &tx).await.unwrap();

		let reply = rx.recv().await.unwrap();
		match reply {
			OutboundMessage::Json(value) => assert_eq!(value["code"], "NO_PERMISSION"),
			other => panic!("expected a JSON error reply, got {other:?}"),
		}
		assert!(engine.current_doc().await.entries().is_empty());
	}
}

// vim: ts=4
