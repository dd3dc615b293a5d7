use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
	#[error("Transition from {from} to {to} is not allowed.")]
	NotAllowed { from: CallStatus, to: CallStatus },
	#[error("A call cannot enter processing without an audio reference.")]
	AudioRequired,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown call status {0:?}.")]
pub struct UnknownStatus(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
	Pending,
	Downloaded,
	Processing,
	Transcribed,
	Flagged,
	Safe,
	Failed,
}
impl CallStatus {
	pub const ALL: [CallStatus; 7] = [
		CallStatus::Pending,
		CallStatus::Downloaded,
		CallStatus::Processing,
		CallStatus::Transcribed,
		CallStatus::Flagged,
		CallStatus::Safe,
		CallStatus::Failed,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			CallStatus::Pending => "pending",
			CallStatus::Downloaded => "downloaded",
			CallStatus::Processing => "processing",
			CallStatus::Transcribed => "transcribed",
			CallStatus::Flagged => "flagged",
			CallStatus::Safe => "safe",
			CallStatus::Failed => "failed",
		}
	}

	/// Statuses a worker may still be acting on; any of them can fail.
	pub fn is_in_flight(self) -> bool {
		matches!(
			self,
			CallStatus::Pending
				| CallStatus::Downloaded
				| CallStatus::Processing
				| CallStatus::Transcribed
		)
	}
}
impl fmt::Display for CallStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for CallStatus {
	type Err = UnknownStatus;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		CallStatus::ALL
			.into_iter()
			.find(|status| status.as_str() == raw)
			.ok_or_else(|| UnknownStatus(raw.to_string()))
	}
}

/// Reviewer action applied to a set of flagged calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
	MarkSafe,
	ConfirmBad,
}
impl BulkAction {
	pub fn as_str(self) -> &'static str {
		match self {
			BulkAction::MarkSafe => "mark_safe",
			BulkAction::ConfirmBad => "confirm_bad",
		}
	}

	/// The `(from, to)` pair the action applies. `confirm_bad` keeps the call flagged.
	pub fn transition(self) -> (CallStatus, CallStatus) {
		match self {
			BulkAction::MarkSafe => (CallStatus::Flagged, CallStatus::Safe),
			BulkAction::ConfirmBad => (CallStatus::Flagged, CallStatus::Flagged),
		}
	}
}

pub fn is_allowed(from: CallStatus, to: CallStatus) -> bool {
	use CallStatus::*;

	match (from, to) {
		(Pending, Downloaded)
		| (Downloaded, Processing)
		| (Processing, Transcribed)
		| (Transcribed, Flagged)
		| (Transcribed, Safe)
		| (Failed, Pending)
		| (Flagged, Safe)
		| (Flagged, Flagged) => true,
		(from, Failed) => from.is_in_flight(),
		_ => false,
	}
}

/// Validates a status change. `has_audio` reports whether the call will carry an audio
/// reference once the change is applied.
pub fn check_transition(
	from: CallStatus,
	to: CallStatus,
	has_audio: bool,
) -> Result<(), TransitionError> {
	if !is_allowed(from, to) {
		return Err(TransitionError::NotAllowed { from, to });
	}
	if matches!(to, CallStatus::Downloaded | CallStatus::Processing) && !has_audio {
		return Err(TransitionError::AudioRequired);
	}

	Ok(())
}
