//! Permission Gate (§4.5): capability flags intersected with a resource-level
//! grant table. Grounded on the reference platform's small, composable
//! capability-check style (`crates/cloudillo-types/src/abac.rs`'s `AttrSet`
//! trait), generalized here to the engine's simpler three-level model.

use crate::prelude::*;
use crate::store::Store;
use crate::types::GrantLevel;

/// Capability flags for one principal (§4.5 step 1). In the standalone
/// engine these are supplied by the outer store at session-creation time
/// (carried on the trusted headers, §4.3) rather than looked up here.
#[derive(Clone, Copy, Debug)]
pub struct Capabilities {
	pub can_read: bool,
	pub can_write: bool,
	pub can_system: bool,
}

impl Capabilities {
	pub fn all() -> Self {
		Self { can_read: true, can_write: true, can_system: true }
	}

	fn has(self, level: GrantLevel) -> bool {
		match level {
			GrantLevel::Read => self.can_read,
			GrantLevel::Write => self.can_write,
			GrantLevel::System => self.can_system,
		}
	}
}

pub struct PermissionGate<'a> {
	store: &'a Store,
}

impl<'a> PermissionGate<'a> {
	pub fn new(store: &'a Store) -> Self {
		Self { store }
	}

	/// §4.5 algorithm: capability flag, then resource grant, then owner
	/// override.
	pub async fn check(
		&self,
		instance_id: &str,
		actor_id: &str,
		actor_kind: &str,
		caps: Capabilities,
		required: GrantLevel,
	) -> ClResult<()> {
		if !caps.has(required) {
			return Err(Error::PermissionDenied);
		}

		if self.is_owner(instance_id, actor_id).await? {
			return Ok(());
		}

		let grant = self.lookup_grant(instance_id, actor_id, actor_kind).await?;
		match grant {
			Some(level) if level >= required => Ok(()),
			_ => Err(Error::PermissionDenied),
		}
	}

	async fn is_owner(&self, instance_id: &str, actor_id: &str) -> ClResult<bool> {
		let row: Option<(i64,)> = sqlx::query_as(
			"SELECT 1 FROM owners WHERE instance_id = ? AND actor_id = ?",
		)
		.bind(instance_id)
		.bind(actor_id)
		.fetch_optional(self.store.pool())
		.await?;
		Ok(row.is_some())
	}

	async fn lookup_grant(
		&self,
		instance_id: &str,
		actor_id: &str,
		actor_kind: &str,
	) -> ClResult<Option<GrantLevel>> {
		let row: Option<(String, Option<i64>)> = sqlx::query_as(
			"SELECT level, expires_at FROM grants WHERE instance_id = ? AND actor_id = ? AND actor_kind = ?",
		)
		.bind(instance_id)
		.bind(actor_id)
		.bind(actor_kind)
		.fetch_optional(self.store.pool())
		.await?;

		let Some((level, expires_at)) = row else { return Ok(None) };
		if let Some(expires_at) = expires_at {
			if expires_at < Timestamp::now().0 {
				return Ok(None);
			}
		}
		Ok(GrantLevel::parse(&level))
	}

	/// Upserts a grant, enforcing the monotone-order conflict rule (§4.5
	/// step 5): replacing a strictly lower existing grant is fine; granting
	/// a strictly lower level than an existing higher one is rejected.
	pub async fn upsert_grant(
		&self,
		instance_id: &str,
		actor_id: &str,
		actor_kind: &str,
		level: GrantLevel,
		expires_at: Option<i64>,
	) -> ClResult<()> {
		if let Some(existing) = self.lookup_grant(instance_id, actor_id, actor_kind).await? {
			if level < existing {
				return Err(Error::ConflictingGrant);
			}
		}

		sqlx::query(
			"INSERT INTO grants (instance_id, actor_id, actor_kind, level, expires_at) VALUES (?, ?, ?, ?, ?)
			 ON CONFLICT(instance_id, actor_id, actor_kind) DO UPDATE SET level = excluded.level, expires_at = excluded.expires_at",
		)
		.bind(instance_id)
		.bind(actor_id)
		.bind(actor_kind)
		.bind(level.as_str())
		.bind(expires_at)
		.execute(self.store.pool())
		.await?;
		Ok(())
	}
}


// vim: ts=4
