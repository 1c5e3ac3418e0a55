//! Data model types (§3).

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Unix-second timestamp, used for expiry and other coarse-grained fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Timestamp {
		let secs = SystemTime::now()
			.duration_since(SystemTime::UNIX_EPOCH)
			.unwrap_or_default()
			.as_secs();
		Timestamp(secs as i64)
	}

	pub fn add_seconds(&self, seconds: i64) -> Timestamp {
		Timestamp(self.0 + seconds)
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Unix-millisecond timestamp, used for `Entry::updated_at` (§3 requires
/// "server-assigned wall-clock ms at projection time").
pub fn now_ms() -> i64 {
	SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Entries whose name starts with this prefix are system keys (§3 invariant);
/// they cannot be created or renamed into existence via bridge endpoints.
pub const SYSTEM_KEY_PREFIX: char = '$';

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryType {
	Text,
	Json,
	Image,
	File,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemTag {
	SystemPrompt,
	#[serde(rename = "LLMRead")]
	LlmRead,
	#[serde(rename = "LLMWrite")]
	LlmWrite,
	ApplyTemplate,
	Protected,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attributes {
	#[serde(rename = "type")]
	pub kind: EntryType,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content_type: Option<String>,
	#[serde(default)]
	pub content_tags: Vec<String>,
	#[serde(default)]
	pub system_tags: Vec<SystemTag>,
	#[serde(default)]
	pub z_index: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
	pub value: serde_json::Value,
	pub attributes: Attributes,
	#[serde(rename = "updatedAt")]
	pub updated_at: i64,
}

/// Session permission (§3 `Session`), attached to one streaming connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPermission {
	Read,
	Write,
	Admin,
}

impl SessionPermission {
	pub fn can_mutate(self) -> bool {
		self >= SessionPermission::Write
	}

	pub fn can_clear(self) -> bool {
		self >= SessionPermission::Admin
	}

	pub fn parse(s: &str) -> Option<SessionPermission> {
		match s {
			"read" => Some(SessionPermission::Read),
			"write" => Some(SessionPermission::Write),
			"admin" => Some(SessionPermission::Admin),
			_ => None,
		}
	}
}

/// Capability/grant level (§3 `Permission Grant`), monotone `read < write <
/// system`; distinct from `SessionPermission` because grants are consulted
/// by the Permission Gate independently of how a connection authenticated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantLevel {
	Read,
	Write,
	System,
}

impl GrantLevel {
	pub fn parse(s: &str) -> Option<GrantLevel> {
		match s {
			"read" => Some(GrantLevel::Read),
			"write" => Some(GrantLevel::Write),
			"system" => Some(GrantLevel::System),
			_ => None,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			GrantLevel::Read => "read",
			GrantLevel::Write => "write",
			GrantLevel::System => "system",
		}
	}
}

/// Session record (§3, §4.3), attached to a connection so it survives
/// hibernation without a global session table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
	pub principal_id: String,
	pub permission: SessionPermission,
}

// vim: ts=4
