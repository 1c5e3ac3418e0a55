//! §8 seed scenario 1: two peers edit concurrently, exchange updates, and
//! converge on a single deterministic value; a third peer joining later
//! via Step-1/Step-2 observes the same final state.

use mindcache_engine::crdt::{handle_envelope, initial_step1, Document, Envelope};
use mindcache_engine::types::{Attributes, EntryType};
use yrs::updates::decoder::Decode;
use yrs::Update;

fn attrs() -> Attributes {
	Attributes { kind: EntryType::Text, content_type: None, content_tags: vec![], system_tags: vec![], z_index: 0 }
}

#[test]
fn two_peers_converge_and_a_late_joiner_observes_the_same_state() {
	let a = Document::new();
	let b = Document::new();

	// A sets greeting=hi, B sets greeting=bye before receiving A's update.
	a.set_entry("a", "greeting", &serde_json::json!("hi"), &attrs()).unwrap();
	b.set_entry("b", "greeting", &serde_json::json!("bye"), &attrs()).unwrap();

	// Exchange: each peer sends its full state as Step-2 and the other applies it.
	let a_state = a.encode_full_state();
	let b_state = b.encode_full_state();
	a.apply_remote("b", Update::decode_v1(&b_state).unwrap()).unwrap();
	b.apply_remote("a", Update::decode_v1(&a_state).unwrap()).unwrap();

	// `updated_at` is stamped at read time, so compare name/value/attributes
	// only — the `Entry` itself carries no stable equality across reads.
	let values = |doc: &Document| -> Vec<(String, serde_json::Value, Attributes)> {
		doc.entries().into_iter().map(|(name, entry)| (name, entry.value, entry.attributes)).collect()
	};

	let a_values = values(&a);
	assert_eq!(a_values.len(), 1);
	assert_eq!(a_values, values(&b), "both peers must converge on the same CRDT-chosen value");

	// A late joiner, C, syncs via Step-1/Step-2 against A and must land on
	// the same final state.
	let c = Document::new();
	let step1 = initial_step1(&c);
	let reply = handle_envelope(&a, "c", step1).unwrap();
	let Some(Envelope::SyncStep2(update)) = reply else { panic!("expected a Step-2 reply") };
	handle_envelope(&c, "a", Envelope::SyncStep2(update)).unwrap();

	assert_eq!(values(&c), a_values, "late joiner must converge to the same state via sync");
}
