//! Sync Protocol Handler (§4.2): a pure transformer over length-prefixed
//! binary envelopes, generalized from the teacher's byte-tagged message
//! framing (`CrdtMessageType` in the reference platform's older CRDT
//! websocket stub) to the three yrs sync-protocol message kinds instead of
//! a Sync/Awareness pair.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{ReadTxn, StateVector, Transact, Update};

use crate::crdt::document::Document;
use crate::prelude::*;

const TAG_SYNC_STEP1: u8 = 0;
const TAG_SYNC_STEP2: u8 = 1;
const TAG_UPDATE: u8 = 2;

/// One decoded sync-protocol message (§4.2 "Envelope kinds").
#[derive(Debug, Clone)]
pub enum Envelope {
	/// Sender's state vector; peer replies with Step-2.
	SyncStep1(StateVector),
	/// Update the sender computed it believes the peer is missing.
	SyncStep2(Vec<u8>),
	/// Incremental delta, applied directly.
	Update(Vec<u8>),
}

impl Envelope {
	/// Decodes one envelope from a complete binary frame. Framing (the
	/// length prefix itself) is the streaming transport's job (§4.3); this
	/// operates on one already-delimited frame.
	pub fn decode(bytes: &[u8]) -> ClResult<Self> {
		let (tag, payload) =
			bytes.split_first().ok_or_else(|| Error::Protocol("empty envelope".into()))?;
		match *tag {
			TAG_SYNC_STEP1 => {
				let sv = StateVector::decode_v1(payload)
					.map_err(|err| Error::Protocol(format!("malformed state vector: {err}")))?;
				Ok(Envelope::SyncStep1(sv))
			}
			TAG_SYNC_STEP2 => Ok(Envelope::SyncStep2(payload.to_vec())),
			TAG_UPDATE => Ok(Envelope::Update(payload.to_vec())),
			other => Err(Error::Protocol(format!("unknown envelope tag {other}"))),
		}
	}

	pub fn encode(&self) -> Vec<u8> {
		match self {
			Envelope::SyncStep1(sv) => {
				let mut buf = vec![TAG_SYNC_STEP1];
				buf.extend(sv.encode_v1());
				buf
			}
			Envelope::SyncStep2(update) => {
				let mut buf = vec![TAG_SYNC_STEP2];
				buf.extend(update);
				buf
			}
			Envelope::Update(update) => {
				let mut buf = vec![TAG_UPDATE];
				buf.extend(update);
				buf
			}
		}
	}
}

/// Builds the unsolicited Step-1 envelope a connection emits on open (§4.2:
/// "the handler emits an unsolicited Step-1 using the document's current
/// state so the peer knows what to send back").
pub fn initial_step1(doc: &Document) -> Envelope {
	Envelope::SyncStep1(doc.state_vector())
}

/// Applies one inbound envelope to the document, returning the reply
/// envelope (if any) per §4.2: "produces zero or one reply envelope".
///
/// `origin` identifies the connection the envelope arrived on, so the
/// resulting commit (if any) can be excluded from broadcast back to its
/// sender (§4.1, §4.3).
pub fn handle_envelope(doc: &Document, origin: &str, envelope: Envelope) -> ClResult<Option<Envelope>> {
	match envelope {
		Envelope::SyncStep1(their_sv) => {
			let update = doc.encode_diff(&their_sv)?;
			Ok(Some(Envelope::SyncStep2(update)))
		}
		Envelope::SyncStep2(update) => {
			apply_update(doc, origin, &update)?;
			Ok(None)
		}
		Envelope::Update(update) => {
			apply_update(doc, origin, &update)?;
			Ok(None)
		}
	}
}

fn apply_update(doc: &Document, origin: &str, update: &[u8]) -> ClResult<()> {
	let decoded =
		Update::decode_v1(update).map_err(|err| Error::Protocol(format!("malformed update: {err}")))?;
	doc.apply_remote(origin, decoded)
}


// vim: ts=4
