//! Engine-wide error taxonomy (§7).

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use serde::Serialize;

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	Protocol(String),
	PermissionDenied,
	NotFound,
	Validation(String),
	ConflictingGrant,
	Storage(String),
	Migration(String),
	Internal(String),
	Io(std::io::Error),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
			Error::PermissionDenied => write!(f, "permission denied"),
			Error::NotFound => write!(f, "not found"),
			Error::Validation(msg) => write!(f, "validation error: {msg}"),
			Error::ConflictingGrant => write!(f, "conflicting grant"),
			Error::Storage(msg) => write!(f, "storage error: {msg}"),
			Error::Migration(msg) => write!(f, "migration error: {msg}"),
			Error::Internal(msg) => write!(f, "internal error: {msg}"),
			Error::Io(err) => write!(f, "io error: {err}"),
		}
	}
}

impl std::error::Error for Error {}

#[derive(Serialize)]
struct ErrorResponse {
	code: &'static str,
	message: String,
}

impl ErrorResponse {
	fn new(code: &'static str, message: impl Into<String>) -> Self {
		Self { code, message: message.into() }
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let (status, code, message) = match &self {
			Error::Protocol(msg) => (StatusCode::BAD_REQUEST, "E-ENGINE-PROTOCOL", msg.clone()),
			Error::PermissionDenied => {
				(StatusCode::FORBIDDEN, "E-ENGINE-NOPERM", "permission denied".to_string())
			}
			Error::NotFound => (StatusCode::NOT_FOUND, "E-ENGINE-NOTFOUND", "not found".to_string()),
			Error::Validation(msg) => (StatusCode::BAD_REQUEST, "E-ENGINE-VALIDATION", msg.clone()),
			Error::ConflictingGrant => (
				StatusCode::CONFLICT,
				"E-ENGINE-CONFLICTGRANT",
				"grant would lower an existing higher grant".to_string(),
			),
			Error::Storage(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "E-ENGINE-STORAGE", msg.clone()),
			Error::Migration(msg) => {
				(StatusCode::INTERNAL_SERVER_ERROR, "E-ENGINE-MIGRATION", msg.clone())
			}
			Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "E-ENGINE-INTERNAL", msg.clone()),
			Error::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, "E-ENGINE-IO", err.to_string()),
		};
		(status, Json(ErrorResponse::new(code, message))).into_response()
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Error::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Validation(err.to_string())
	}
}

impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		match err {
			sqlx::Error::RowNotFound => Error::NotFound,
			other => Error::Storage(other.to_string()),
		}
	}
}

/// Converts a poisoned `std::sync::Mutex` lock into `Error::Internal`.
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex.lock().map_err(|_| $crate::error::Error::Internal("mutex poisoned".into()))
	};
	($mutex:expr, $context:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::Internal(format!("mutex poisoned: {}", $context)))
	};
}

// vim: ts=4
