use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{CallQaService, CallView, Error, Result};
use callqa_domain::{CallStatus, recovery, status};
use callqa_storage::{
	calls::{self, StatusWrite},
	models::Call,
};

/// Collaborator payloads written together with a status change.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransitionFields {
	pub audio_ref: Option<String>,
	pub transcript: Option<String>,
	pub qa_result: Option<Value>,
	pub judge_model: Option<String>,
	pub qa_version: Option<String>,
	pub processing_error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionRequest {
	pub org_id: Uuid,
	pub call_id: Uuid,
	pub to: CallStatus,
	#[serde(default)]
	pub fields: TransitionFields,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimRequest {
	pub org_id: Uuid,
	pub call_id: Uuid,
	pub from: CallStatus,
	pub to: CallStatus,
}

impl CallQaService {
	/// Validates and applies one status change under a row lock.
	pub async fn transition(&self, req: TransitionRequest) -> Result<CallView> {
		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		let call = calls::lock_call(&mut *tx, req.org_id, req.call_id)
			.await?
			.ok_or_else(|| Error::NotFound { message: "Call not found.".to_string() })?;
		let updated = apply_transition(&mut tx, call, req.to, req.fields, now).await?;

		tx.commit().await?;

		CallView::try_from(updated)
	}

	/// Compare-and-swap claim of one call. `None` means the call was not in `from` anymore.
	pub async fn claim(&self, req: ClaimRequest) -> Result<Option<CallView>> {
		check_claim(req.from, req.to)?;

		let claimed = calls::claim_call(
			&self.db.pool,
			req.org_id,
			req.call_id,
			req.from.as_str(),
			req.to.as_str(),
			OffsetDateTime::now_utc(),
		)
		.await?;

		if let Some(call) = claimed.as_ref() {
			tracing::info!(
				call_id = %call.id,
				org_id = %call.org_id,
				from = req.from.as_str(),
				to = req.to.as_str(),
				"Call claimed."
			);
		}

		claimed.map(CallView::try_from).transpose()
	}

	/// Claims the newest call waiting in `from`, across organizations.
	pub async fn claim_next(&self, from: CallStatus, to: CallStatus) -> Result<Option<CallView>> {
		check_claim(from, to)?;

		let claimed = calls::claim_next_call(
			&self.db.pool,
			from.as_str(),
			to.as_str(),
			OffsetDateTime::now_utc(),
		)
		.await?;

		if let Some(call) = claimed.as_ref() {
			tracing::info!(
				call_id = %call.id,
				org_id = %call.org_id,
				from = from.as_str(),
				to = to.as_str(),
				"Call claimed."
			);
		}

		claimed.map(CallView::try_from).transpose()
	}

	/// Set-based form of the gate for one organization. Returns the ids that moved.
	pub async fn transition_many(
		&self,
		org_id: Uuid,
		ids: &[Uuid],
		from: CallStatus,
		to: CallStatus,
	) -> Result<Vec<Uuid>> {
		transition_many(&mut *self.db.pool.acquire().await?, org_id, ids, from, to).await
	}
}

pub(crate) async fn transition_many(
	conn: &mut PgConnection,
	org_id: Uuid,
	ids: &[Uuid],
	from: CallStatus,
	to: CallStatus,
) -> Result<Vec<Uuid>> {
	check_claim(from, to)?;

	if ids.is_empty() {
		return Ok(Vec::new());
	}

	let moved = calls::transition_calls(
		conn,
		org_id,
		ids,
		from.as_str(),
		to.as_str(),
		OffsetDateTime::now_utc(),
	)
	.await?;

	tracing::info!(
		org_id = %org_id,
		from = from.as_str(),
		to = to.as_str(),
		requested = ids.len(),
		moved = moved.len(),
		"Calls transitioned."
	);

	Ok(moved)
}

/// Applies `to` to a call the caller already holds locked.
pub(crate) async fn apply_transition(
	conn: &mut PgConnection,
	call: Call,
	to: CallStatus,
	fields: TransitionFields,
	now: OffsetDateTime,
) -> Result<Call> {
	let from = parse_status(&call.status)?;
	let audio_ref = non_blank(fields.audio_ref);
	let has_audio = call.audio_ref.is_some() || audio_ref.is_some();

	status::check_transition(from, to, has_audio)?;

	if fields.processing_error.is_some() && to != CallStatus::Failed {
		return Err(Error::InvalidRequest {
			message: "processing_error is accepted only when status is failed.".to_string(),
		});
	}

	let write = if from == to {
		StatusWrite {
			call_id: call.id,
			org_id: call.org_id,
			from: from.as_str().to_string(),
			to: to.as_str().to_string(),
			audio_ref: None,
			transcript: None,
			qa_result: None,
			judge_model: None,
			qa_version: None,
			retry_increment: 0,
			processing_error: call.processing_error.clone(),
			updated_at: now,
		}
	} else {
		let failing = to == CallStatus::Failed;

		StatusWrite {
			call_id: call.id,
			org_id: call.org_id,
			from: from.as_str().to_string(),
			to: to.as_str().to_string(),
			audio_ref,
			transcript: fields.transcript,
			qa_result: fields.qa_result,
			judge_model: fields.judge_model,
			qa_version: fields.qa_version,
			retry_increment: i32::from(failing),
			processing_error: failing
				.then(|| recovery::normalize_processing_error(fields.processing_error.as_deref())),
			updated_at: now,
		}
	};
	let updated = calls::write_status(conn, &write).await?.ok_or_else(|| Error::Conflict {
		message: "Call status changed concurrently.".to_string(),
	})?;

	tracing::info!(
		call_id = %updated.id,
		org_id = %updated.org_id,
		from = from.as_str(),
		to = to.as_str(),
		retry_count = updated.retry_count,
		"Call status changed."
	);

	Ok(updated)
}

pub(crate) fn parse_status(raw: &str) -> Result<CallStatus> {
	raw.parse()
		.map_err(|_| Error::Storage { message: format!("Stored call status {raw:?} is unknown.") })
}

fn check_claim(from: CallStatus, to: CallStatus) -> Result<()> {
	if to == CallStatus::Failed {
		return Err(Error::InvalidRequest {
			message: "Failing a call requires an error; use a single transition.".to_string(),
		});
	}
	if !status::is_allowed(from, to) {
		return Err(Error::InvalidTransition {
			message: format!("Transition from {from} to {to} is not allowed."),
		});
	}

	Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
	value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}
