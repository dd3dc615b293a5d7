#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
}
impl Error {
	/// Whether the failure is a unique-constraint violation.
	pub fn is_unique_violation(&self) -> bool {
		match self {
			Error::Sqlx(sqlx::Error::Database(err)) => err.is_unique_violation(),
			_ => false,
		}
	}
}
