//! CRDT Document + Sync Protocol Handler (§4.1, §4.2).

pub mod convert;
pub mod document;
pub mod envelope;

pub use document::{CommitEvent, Document};
pub use envelope::{handle_envelope, initial_step1, Envelope};

// vim: ts=4
