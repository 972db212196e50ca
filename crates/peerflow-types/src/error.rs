//! Error type shared by the engine and all adapters.
//!
//! Caller-facing failures carry a stable machine code (see [`Error::code`]);
//! upstream error text (sqlx, reqwest, provider bodies) is logged where it
//! occurs and never surfaced through the code.

pub type PfResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Bad input (amount bounds, address format). No state change.
	Validation(String),
	/// Operation not valid in the current state (stop on non-active session,
	/// duplicate active session). Idempotent no-op where retries are expected.
	StateConflict(&'static str),
	/// Reserve amount exceeds the available balance. No partial reservation.
	InsufficientBalance,
	/// Reputation lookup or payout provider unreachable.
	UpstreamUnavailable(String),
	/// Ledger sum mismatch, negative balance after mutation. Fatal for the
	/// operation; the reconciliation backstop picks it up.
	InvariantViolation(String),
	NotFound,
	PermissionDenied,
	DbError,
	Parse,
	Internal(String),

	// externals
	Io(std::io::Error),
}

impl Error {
	/// Stable machine-readable reason code surfaced to callers.
	pub fn code(&self) -> &'static str {
		match self {
			Error::Validation(_) => "validation_error",
			Error::StateConflict(_) => "state_conflict",
			Error::InsufficientBalance => "insufficient_balance",
			Error::UpstreamUnavailable(_) => "upstream_unavailable",
			Error::InvariantViolation(_) => "invariant_violation",
			Error::NotFound => "not_found",
			Error::PermissionDenied => "permission_denied",
			Error::DbError | Error::Parse | Error::Internal(_) | Error::Io(_) => "internal_error",
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::Validation(msg) => write!(f, "validation error: {}", msg),
			Error::StateConflict(what) => write!(f, "state conflict: {}", what),
			Error::InsufficientBalance => write!(f, "insufficient balance"),
			Error::UpstreamUnavailable(what) => write!(f, "upstream unavailable: {}", what),
			Error::InvariantViolation(msg) => write!(f, "invariant violation: {}", msg),
			Error::NotFound => write!(f, "not found"),
			Error::PermissionDenied => write!(f, "permission denied"),
			Error::DbError => write!(f, "database error"),
			Error::Parse => write!(f, "parse error"),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {}


// vim: ts=4
