//! Session Registry & Connection Lifecycle (§4.3).
//!
//! Holds one entry per live streaming connection: its `Session` record and
//! an outbound channel the central commit subscriber (see `engine.rs`) and
//! the bridge's `DELETE /destroy` handler use to reach it without blocking
//! on a slow peer. Grounded on the reference platform's `BroadcastManager`
//! (`core/ws_broadcast.rs`: `DashMap`-style registry keyed by channel,
//! non-blocking `tokio::sync::broadcast` send) generalized from per-channel
//! pub/sub to per-connection unicast-with-exclude, and the `CrdtConnection`
//! shape in `crdt_ref/websocket.rs` (heartbeat task alongside the receive
//! loop, split sink/stream).

pub mod ws;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::types::Session;

/// One message destined for a connection's outbound `tokio::sync::mpsc`
/// channel; the connection's writer task drains this into its WebSocket
/// sink.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
	Binary(Vec<u8>),
	Json(serde_json::Value),
	/// WebSocket-level ping, used by the connection's heartbeat task
	/// (SPEC_FULL.md §10.6) to detect and reap dead peers promptly.
	Ping,
	/// Close with code 1000 (`DELETE /destroy`, §4.6).
	Close,
}

struct ConnectionHandle {
	session: Session,
	outbound: mpsc::UnboundedSender<OutboundMessage>,
}

/// Set of active streaming connections for this instance (§2 component 4).
/// A connection is reachable only by its id (the origin tag used for its
/// CRDT transactions); there is no engine-global session table beyond this.
#[derive(Default)]
pub struct ConnectionRegistry {
	conns: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
	pub fn new() -> Self {
		Self { conns: DashMap::new() }
	}

	pub fn register(&self, id: String, session: Session, outbound: mpsc::UnboundedSender<OutboundMessage>) {
		self.conns.insert(id, ConnectionHandle { session, outbound });
	}

	pub fn remove(&self, id: &str) {
		self.conns.remove(id);
	}

	pub fn session_of(&self, id: &str) -> Option<Session> {
		self.conns.get(id).map(|h| h.session.clone())
	}

	pub fn len(&self) -> usize {
		self.conns.len()
	}

	/// Sends one message to a single connection, e.g. a sync reply destined
	/// only for the requester (§4.2: "produces zero or one reply envelope").
	pub fn send_to(&self, id: &str, msg: OutboundMessage) {
		if let Some(handle) = self.conns.get(id) {
			let _ = handle.outbound.send(msg);
		}
	}

	/// Writes the same binary envelope to every connection except the one
	/// whose origin tag produced the commit (§4.1, §4.3 "Broadcast").
	/// Non-blocking: a slow or dead peer's channel simply drops the message
	/// (§4.3 "a slow peer must not stall broadcast").
	pub fn broadcast_except(&self, origin: &str, bytes: Vec<u8>) {
		for entry in self.conns.iter() {
			if entry.key() != origin {
				let _ = entry.value().outbound.send(OutboundMessage::Binary(bytes.clone()));
			}
		}
	}

	/// Signals every live connection to close with code 1000 (`DELETE
	/// /destroy`, §4.6) and forgets them all.
	pub fn close_all(&self) {
		for entry in self.conns.iter() {
			let _ = entry.value().outbound.send(OutboundMessage::Close);
		}
		self.conns.clear();
	}
}

// vim: ts=4
