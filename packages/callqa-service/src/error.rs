pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Invalid transition: {message}")]
	InvalidTransition { message: String },
	#[error("Authentication required.")]
	AuthenticationRequired,
	#[error("Authenticated identity has no organization.")]
	OrganizationRequired,
	#[error("Forbidden: {message}")]
	Forbidden { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Upstream unavailable: {message}")]
	UpstreamUnavailable { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}
impl From<callqa_storage::Error> for Error {
	fn from(err: callqa_storage::Error) -> Self {
		if err.is_unique_violation() {
			return Self::Conflict { message: err.to_string() };
		}

		match err {
			callqa_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			callqa_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
		}
	}
}
impl From<callqa_providers::Error> for Error {
	fn from(err: callqa_providers::Error) -> Self {
		Self::UpstreamUnavailable { message: err.to_string() }
	}
}
impl From<callqa_domain::TransitionError> for Error {
	fn from(err: callqa_domain::TransitionError) -> Self {
		Self::InvalidTransition { message: err.to_string() }
	}
}
