//! Process configuration (§10.3). A thin env-driven struct, following the
//! reference platform's own `main` → config-struct → builder pattern rather
//! than a declarative config-file crate.

use std::{env, path::PathBuf};

#[derive(Clone, Debug)]
pub struct EngineOpts {
	/// Instance id this engine process serves; one engine per instance (§1).
	pub instance_id: Box<str>,
	/// SQLite file backing the Persistent Store.
	pub db_path: PathBuf,
	/// Bind address for the HTTP bridge and streaming upgrade.
	pub listen: Box<str>,
	/// Path prefix of the streaming channel (§6): `/<sync-prefix>/<instanceId>`.
	pub sync_path_prefix: Box<str>,
	/// Gates the legacy non-prod synthetic-principal auth fallback (§4.3).
	pub production: bool,
}

impl EngineOpts {
	/// Reads configuration from the environment, the same way the reference
	/// platform's standalone entry point does (`env::var(..).unwrap_or(..)`).
	pub fn from_env() -> Self {
		Self {
			instance_id: env::var("INSTANCE_ID").unwrap_or_else(|_| "default".to_string()).into(),
			db_path: PathBuf::from(env::var("DB_PATH").unwrap_or_else(|_| "./instance.db".to_string())),
			listen: env::var("LISTEN").unwrap_or_else(|_| "127.0.0.1:8080".to_string()).into(),
			sync_path_prefix: env::var("SYNC_PATH_PREFIX").unwrap_or_else(|_| "sync".to_string()).into(),
			production: env::var("PRODUCTION").map(|v| v == "1" || v == "true").unwrap_or(false),
		}
	}
}

impl Default for EngineOpts {
	fn default() -> Self {
		Self {
			instance_id: "default".into(),
			db_path: PathBuf::from("./instance.db"),
			listen: "127.0.0.1:8080".into(),
			sync_path_prefix: "sync".into(),
			production: false,
		}
	}
}

// vim: ts=4
