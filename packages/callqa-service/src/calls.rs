use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{CallQaService, Error, Result, access, transition};
use callqa_domain::{
	AudioRef, AuthContext, CallStatus,
	audio::{self, SignedAudioUrl},
};
use callqa_storage::{
	calls::{self, ListFilter},
	models::Call,
};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallView {
	pub id: Uuid,
	pub org_id: Uuid,
	pub external_call_id: String,
	pub campaign_id: Option<Uuid>,
	#[serde(with = "time::serde::rfc3339")]
	pub start_time: OffsetDateTime,
	pub status: CallStatus,
	pub audio_ref: Option<String>,
	pub transcript: Option<String>,
	pub qa_result: Option<Value>,
	pub judge_model: Option<String>,
	pub qa_version: Option<String>,
	pub revenue: f64,
	pub payout: Option<f64>,
	pub duration_seconds: Option<i32>,
	pub caller_number: Option<String>,
	pub retry_count: i32,
	pub processing_error: Option<String>,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
}
impl TryFrom<Call> for CallView {
	type Error = Error;

	fn try_from(call: Call) -> Result<Self> {
		Ok(Self {
			status: transition::parse_status(&call.status)?,
			id: call.id,
			org_id: call.org_id,
			external_call_id: call.external_call_id,
			campaign_id: call.campaign_id,
			start_time: call.start_time,
			audio_ref: call.audio_ref,
			transcript: call.transcript,
			qa_result: call.qa_result,
			judge_model: call.judge_model,
			qa_version: call.qa_version,
			revenue: call.revenue,
			payout: call.payout,
			duration_seconds: call.duration_seconds,
			caller_number: call.caller_number,
			retry_count: call.retry_count,
			processing_error: call.processing_error,
			created_at: call.created_at,
			updated_at: call.updated_at,
		})
	}
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListCallsRequest {
	pub status: Option<String>,
	pub limit: Option<i64>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub before: Option<OffsetDateTime>,
	/// Breaks ties between calls sharing the `before` start time.
	pub before_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListCallsResponse {
	pub calls: Vec<CallView>,
	/// Cursor for the next page; both halves are absent on the last page.
	#[serde(with = "time::serde::rfc3339::option")]
	pub next_before: Option<OffsetDateTime>,
	pub next_before_id: Option<Uuid>,
}

/// Body of a single-call update. Only these fields may be changed by end users.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchCallRequest {
	pub status: Option<String>,
	pub qa_result: Option<Value>,
	pub processing_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioLink {
	Signed {
		url: String,
		#[serde(with = "time::serde::rfc3339")]
		expires_at: OffsetDateTime,
	},
	Provider {
		url: String,
	},
}

impl CallQaService {
	pub async fn list_calls(
		&self,
		ctx: &AuthContext,
		req: ListCallsRequest,
	) -> Result<ListCallsResponse> {
		let status = match req.status.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
			Some(raw) => Some(parse_requested_status(raw)?),
			None => None,
		};
		let limit = req.limit.unwrap_or(DEFAULT_LIST_LIMIT);

		if !(1..=MAX_LIST_LIMIT).contains(&limit) {
			return Err(Error::InvalidRequest {
				message: format!("limit must be between 1 and {MAX_LIST_LIMIT}."),
			});
		}
		if req.before_id.is_some() && req.before.is_none() {
			return Err(Error::InvalidRequest {
				message: "before_id requires before.".to_string(),
			});
		}

		let filter = ListFilter {
			status: status.map(|status| status.as_str().to_string()),
			before: req.before,
			before_id: req.before_id,
			limit,
		};
		let rows = calls::list_calls(&self.db.pool, ctx.org_id, &filter).await?;
		let cursor = if rows.len() as i64 == limit {
			rows.last().map(|call| (call.start_time, call.id))
		} else {
			None
		};
		let (next_before, next_before_id) = cursor.unzip();
		let calls = rows.into_iter().map(CallView::try_from).collect::<Result<Vec<_>>>()?;

		Ok(ListCallsResponse { calls, next_before, next_before_id })
	}

	pub async fn get_call(&self, ctx: &AuthContext, call_id: Uuid) -> Result<CallView> {
		let call = access::verify_call_ownership(&self.db.pool, ctx, call_id).await?;

		CallView::try_from(call)
	}

	/// End-user update of one call. A status change goes through the gate; without a status only
	/// `qa_result` may change.
	pub async fn patch_call(
		&self,
		ctx: &AuthContext,
		call_id: Uuid,
		req: PatchCallRequest,
	) -> Result<CallView> {
		let status = req.status.as_deref().map(parse_requested_status).transpose()?;

		if status.is_none() && req.qa_result.is_none() {
			if req.processing_error.is_some() {
				return Err(Error::InvalidRequest {
					message: "processing_error is accepted only when status is failed.".to_string(),
				});
			}

			return Err(Error::InvalidRequest {
				message: "Request must change status or qa_result.".to_string(),
			});
		}

		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		let call = access::lock_owned_call(&mut *tx, ctx, call_id).await?;
		let updated = match status {
			Some(to) => {
				let fields = transition::TransitionFields {
					qa_result: req.qa_result,
					processing_error: req.processing_error,
					..Default::default()
				};

				transition::apply_transition(&mut tx, call, to, fields, now).await?
			},
			None => {
				if req.processing_error.is_some() {
					return Err(Error::InvalidRequest {
						message: "processing_error is accepted only when status is failed."
							.to_string(),
					});
				}

				let qa_result = req.qa_result.unwrap_or(Value::Null);

				calls::set_qa_result(&mut *tx, ctx.org_id, call.id, &qa_result, now).await?
			},
		};

		tx.commit().await?;

		tracing::info!(
			call_id = %updated.id,
			org_id = %ctx.org_id,
			user_id = %ctx.user_id,
			"Call updated."
		);

		CallView::try_from(updated)
	}

	/// Playable link for a call's audio: a short-lived signed URL for stored audio, or the
	/// provider URL as-is.
	pub async fn audio_link(&self, ctx: &AuthContext, call_id: Uuid) -> Result<AudioLink> {
		let call = access::verify_call_ownership(&self.db.pool, ctx, call_id).await?;
		let not_found = || Error::NotFound { message: "Call has no audio.".to_string() };
		let audio_ref = call.audio_ref.as_deref().and_then(AudioRef::parse).ok_or_else(not_found)?;

		match audio_ref {
			AudioRef::Provider(url) => Ok(AudioLink::Provider { url: url.to_string() }),
			AudioRef::Stored(key) => {
				let SignedAudioUrl { url, expires_at } =
					audio::sign_stored_audio(key, &self.cfg.audio, OffsetDateTime::now_utc())
						.ok_or_else(|| Error::Storage {
							message: "Failed to sign audio URL.".to_string(),
						})?;

				Ok(AudioLink::Signed { url, expires_at })
			},
		}
	}
}

fn parse_requested_status(raw: &str) -> Result<CallStatus> {
	raw.parse().map_err(|_| Error::InvalidRequest {
		message: format!(
			"status must be one of {}.",
			CallStatus::ALL.map(CallStatus::as_str).join(", ")
		),
	})
}
