//! CRDT Document (§4.1): owns the authoritative replicated state for one
//! instance and emits commit notifications. Grounded on the reference
//! platform's `server/src/file/duplicate.rs` (yrs `Doc`/`Transact` usage,
//! `Update::decode_v1`/`apply_update`, `encode_state_as_update_v1`) and
//! `server/src/crdt_adapter.rs` (origin-tagged update/change-event shape).

use std::collections::{BTreeSet, HashMap};

use tokio::sync::broadcast;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Any, Doc, Map, MapPrelim, MapRef, ReadTxn, StateVector, Transact, Update};

use crate::crdt::convert::{entry_fields, fields_to_entry};
use crate::prelude::*;
use crate::types::{Attributes, Entry};

const MINDCACHE: &str = "mindcache";

/// One committed transaction (§4.1 "Commit event payload").
#[derive(Debug, Clone)]
pub struct CommitEvent {
	/// Opaque binary update (the delta) produced by this commit.
	pub update: Vec<u8>,
	/// Origin tag of the transaction that produced this commit: `"bridge"`,
	/// a connection handle, `"migration"`, or `"import"`.
	pub origin: String,
	/// Entry names whose root-level slot or nested attributes/value map
	/// changed as a result of this commit.
	pub changed_names: Vec<String>,
}

pub struct Document {
	doc: Doc,
	mindcache: MapRef,
	commit_tx: broadcast::Sender<CommitEvent>,
}

impl std::fmt::Debug for Document {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Document").finish_non_exhaustive()
	}
}

impl Document {
	pub fn new() -> Self {
		let doc = Doc::new();
		let mindcache = doc.get_or_insert_map(MINDCACHE);
		let (commit_tx, _) = broadcast::channel(1024);
		Self { doc, mindcache, commit_tx }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<CommitEvent> {
		self.commit_tx.subscribe()
	}

	pub fn state_vector(&self) -> StateVector {
		let txn = self.doc.transact();
		txn.state_vector()
	}

	/// Encodes the full document state (used for persistence, §4.8).
	pub fn encode_full_state(&self) -> Vec<u8> {
		let txn = self.doc.transact();
		txn.encode_state_as_update_v1(&StateVector::default())
	}

	/// Encodes every update the caller's state vector is missing (§4.1
	/// "diff since state-vector").
	pub fn encode_diff(&self, sv: &StateVector) -> ClResult<Vec<u8>> {
		let txn = self.doc.transact();
		Ok(txn.encode_state_as_update_v1(sv))
	}

	/// Applies a persisted or inbound full-state blob without emitting a
	/// commit event; used only during boot hydration (§4.8 step 2), before
	/// the commit subscription is installed.
	pub fn apply_full_state(&self, origin: &str, bytes: &[u8]) -> ClResult<()> {
		let update =
			Update::decode_v1(bytes).map_err(|err| Error::Storage(format!("corrupt CRDT blob: {err}")))?;
		let mut txn = self.doc.transact_mut_with(origin);
		txn.apply_update(update).map_err(|err| Error::Storage(format!("failed to hydrate: {err}")))?;
		Ok(())
	}

	/// Sets `root[name] = {value, attributes}` in one local transaction
	/// (§4.6 `POST /keys`, and the legacy `set` frame).
	pub fn set_entry(&self, origin: &str, name: &str, value: &serde_json::Value, attrs: &Attributes) -> ClResult<CommitEvent> {
		let before_sv = self.state_vector();
		{
			let mut txn = self.doc.transact_mut_with(origin);
			let fields = entry_fields(value, attrs);
			self.mindcache.insert(&mut txn, name, MapPrelim::from(fields));
		}
		self.emit_commit(origin, vec![name.to_string()], &before_sv)
	}

	/// Removes `root[name]` (§4.6 `DELETE /keys/:key`, legacy `delete`
	/// frame). Returns `None` if the name was absent (caller maps to 404).
	pub fn remove_entry(&self, origin: &str, name: &str) -> ClResult<Option<CommitEvent>> {
		let before_sv = self.state_vector();
		let removed = {
			let mut txn = self.doc.transact_mut_with(origin);
			self.mindcache.remove(&mut txn, name)
		};
		if removed.is_none() {
			return Ok(None);
		}
		Ok(Some(self.emit_commit(origin, vec![name.to_string()], &before_sv)?))
	}

	/// Sets several entries inside a single local transaction (§4.6 `POST
	/// /import`: "replays its entries inside one CRDT transaction"), emitting
	/// exactly one commit event that covers every name touched.
	pub fn set_entries_batch(
		&self,
		origin: &str,
		entries: &[(String, serde_json::Value, Attributes)],
	) -> ClResult<CommitEvent> {
		let before_sv = self.state_vector();
		let names: Vec<String> = entries.iter().map(|(name, _, _)| name.clone()).collect();
		{
			let mut txn = self.doc.transact_mut_with(origin);
			for (name, value, attrs) in entries {
				let fields = entry_fields(value, attrs);
				self.mindcache.insert(&mut txn, name.as_str(), MapPrelim::from(fields));
			}
		}
		self.emit_commit(origin, names, &before_sv)
	}

	/// Removes every entry (legacy `clear` frame, gated to `system`/`admin`
	/// by the Permission Gate before this is ever called).
	pub fn clear(&self, origin: &str) -> ClResult<CommitEvent> {
		let before_sv = self.state_vector();
		let names: Vec<String> = {
			let txn = self.doc.transact();
			self.mindcache.iter(&txn).map(|(name, _)| name.to_string()).collect()
		};
		{
			let mut txn = self.doc.transact_mut_with(origin);
			for name in &names {
				self.mindcache.remove(&mut txn, name);
			}
		}
		self.emit_commit(origin, names, &before_sv)
	}

	/// Applies a remote update (§4.2 Step-2/Update envelopes). The set of
	/// changed names is not known ahead of time, so it is derived from a
	/// before/after snapshot diff, which tolerates deep changes (a single
	/// attribute updated inside an entry still surfaces as a changed name).
	pub fn apply_remote(&self, origin: &str, update: Update) -> ClResult<CommitEvent> {
		let before_sv = self.state_vector();
		let before_snapshot = self.snapshot();
		{
			let mut txn = self.doc.transact_mut_with(origin);
			txn.apply_update(update)
				.map_err(|err| Error::Protocol(format!("failed to apply update: {err}")))?;
		}
		let after_snapshot = self.snapshot();
		let changed = diff_names(&before_snapshot, &after_snapshot);
		self.emit_commit(origin, changed, &before_sv)
	}

	/// Full current state as `(name, Entry)` pairs, sorted by `(zIndex asc,
	/// name asc)` per §4.4 — used to hydrate the materialized view on first
	/// boot and to answer `GET /keys` directly from the document if needed.
	pub fn entries(&self) -> Vec<(String, Entry)> {
		let txn = self.doc.transact();
		let mut out: Vec<(String, Entry)> = self
			.mindcache
			.iter(&txn)
			.filter_map(|(name, value)| {
				let yrs::types::Value::YMap(entry_map) = value else { return None };
				let value_field = entry_map.get(&txn, "value").map(|v| to_any(&txn, v));
				let attrs_field = entry_map.get(&txn, "attributes").map(|v| to_any(&txn, v));
				Some((name.to_string(), fields_to_entry(value_field, attrs_field, now_ms())))
			})
			.collect();
		out.sort_by(|a, b| a.1.attributes.z_index.cmp(&b.1.attributes.z_index).then_with(|| a.0.cmp(&b.0)));
		out
	}

	/// One-shot hydration from the materialized view on first boot, inside
	/// a single transaction tagged `"migration"` (§4.8 step 2).
	pub fn hydrate_from_rows(&self, rows: Vec<(String, serde_json::Value, Attributes)>) -> ClResult<()> {
		let mut txn = self.doc.transact_mut_with("migration");
		for (name, value, attrs) in rows {
			let fields = entry_fields(&value, &attrs);
			self.mindcache.insert(&mut txn, name.as_str(), MapPrelim::from(fields));
		}
		Ok(())
	}

	fn snapshot(&self) -> HashMap<String, Any> {
		let txn = self.doc.transact();
		match self.mindcache.to_json(&txn) {
			Any::Map(map) => *map,
			_ => HashMap::new(),
		}
	}

	fn emit_commit(&self, origin: &str, changed_names: Vec<String>, before_sv: &StateVector) -> ClResult<CommitEvent> {
		let update = self.encode_diff(before_sv)?;
		let event = CommitEvent { update, origin: origin.to_string(), changed_names };
		let _ = self.commit_tx.send(event.clone());
		Ok(event)
	}
}

impl Default for Document {
	fn default() -> Self {
		Self::new()
	}
}

fn to_any<T: ReadTxn>(txn: &T, value: yrs::types::Value) -> Any {
	match value {
		yrs::types::Value::Any(any) => any,
		yrs::types::Value::YMap(map) => map.to_json(txn),
		yrs::types::Value::YArray(arr) => arr.to_json(txn),
		yrs::types::Value::YText(text) => Any::String(text.get_string(txn).into()),
		_ => Any::Null,
	}
}

fn diff_names(before: &HashMap<String, Any>, after: &HashMap<String, Any>) -> Vec<String> {
	let mut changed = BTreeSet::new();
	for (name, value) in after {
		if before.get(name) != Some(value) {
			changed.insert(name.clone());
		}
	}
	for name in before.keys() {
		if !after.contains_key(name) {
			changed.insert(name.clone());
		}
	}
	changed.into_iter().collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::EntryType;

	fn attrs() -> Attributes {
		Attributes { kind: EntryType::Text, content_type: None, content_tags: vec![], system_tags: vec![], z_index: 0 }
	}

	#[test]
	fn set_then_get_round_trips() {
		let doc = Document::new();
		doc.set_entry("bridge", "greeting", &serde_json::json!("hi"), &attrs()).unwrap();
		let entries = doc.entries();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].0, "greeting");
		assert_eq!(entries[0].1.value, serde_json::json!("hi"));
	}

	#[test]
	fn set_entries_batch_emits_a_single_commit_for_every_name() {
		let doc = Document::new();
		let mut rx = doc.subscribe();
		let entries = vec![
			("a".to_string(), serde_json::json!("1"), attrs()),
			("b".to_string(), serde_json::json!("2"), attrs()),
		];
		let event = doc.set_entries_batch("import", &entries).unwrap();
		assert_eq!(event.changed_names, vec!["a".to_string(), "b".to_string()]);
		assert_eq!(doc.entries().len(), 2);
		// Exactly one commit event was emitted for the whole batch.
		let received = rx.try_recv().unwrap();
		assert_eq!(received.origin, "import");
		assert!(rx.try_recv().is_err());
	}

	#[test]
	fn remove_missing_entry_returns_none() {
		let doc = Document::new();
		let result = doc.remove_entry("bridge", "missing").unwrap();
		assert!(result.is_none());
	}

	#[test]
	fn two_peers_converge_on_concurrent_edits() {
		let a = Document::new();
		let b = Document::new();
		a.set_entry("a", "greeting", &serde_json::json!("hi"), &attrs()).unwrap();
		b.set_entry("b", "greeting", &serde_json::json!("bye"), &attrs()).unwrap();

		let a_update = a.encode_diff(&StateVector::default()).unwrap();
		let b_update = b.encode_diff(&StateVector::default()).unwrap();

		a.apply_remote("b", Update::decode_v1(&b_update).unwrap()).unwrap();
		b.apply_remote("a", Update::decode_v1(&a_update).unwrap()).unwrap();

		let a_entries = a.entries();
		let b_entries = b.entries();
		assert_eq!(a_entries.len(), 1);
		assert_eq!(a_entries[0].1.value, b_entries[0].1.value);
	}

	#[test]
	fn apply_remote_reports_changed_names_for_deep_attribute_change() {
		let a = Document::new();
		a.set_entry("a", "note", &serde_json::json!("x"), &attrs()).unwrap();
		let sv_before = StateVector::default();
		let full = a.encode_diff(&sv_before).unwrap();

		let b = Document::new();
		b.apply_remote("a", Update::decode_v1(&full).unwrap()).unwrap();

		let mut changed_attrs = attrs();
		changed_attrs.z_index = 5;
		let before_sv = b.state_vector();
		b.set_entry("b", "note", &serde_json::json!("x"), &changed_attrs).unwrap();
		let delta = b.encode_diff(&before_sv).unwrap();

		let event = a.apply_remote("b", Update::decode_v1(&delta).unwrap()).unwrap();
		assert_eq!(event.changed_names, vec!["note".to_string()]);
	}
}

// vim: ts=4
